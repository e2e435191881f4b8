//! Credential error types.

use std::path::PathBuf;

/// Why a valid credential could not be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureReason {
    ConfigMissing,
    StoreIo,
    GrantFailed,
}

/// Returned by `CredentialManager::acquire` when no valid credential can be
/// handed to the caller. The caller must not attempt an upload.
#[derive(Debug, thiserror::Error)]
pub enum AuthUnavailable {
    #[error("client configuration unavailable at {}: {detail}", path.display())]
    ConfigMissing { path: PathBuf, detail: String },

    #[error("token store {location} unusable: {detail}")]
    StoreIo { location: String, detail: String },

    #[error("authorization failed: {0}")]
    GrantFailed(String),
}

impl AuthUnavailable {
    pub fn reason(&self) -> AuthFailureReason {
        match self {
            AuthUnavailable::ConfigMissing { .. } => AuthFailureReason::ConfigMissing,
            AuthUnavailable::StoreIo { .. } => AuthFailureReason::StoreIo,
            AuthUnavailable::GrantFailed(_) => AuthFailureReason::GrantFailed,
        }
    }
}

/// Errors raised by a `TokenStore` backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt token blob: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Errors raised by an `AuthorizationProvider`.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("authorization denied: {0}")]
    Denied(String),

    #[error("installed flow failed: {0}")]
    Flow(#[from] yup_oauth2::Error),

    #[error("timed out waiting for the authorization redirect")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential has no client identity to refresh with")]
    MissingClientIdentity,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
