//! The single OAuth grant the uploader works with.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Scope requested by the uploader: per-file write access to Drive.
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Access/refresh token pair plus the client identity needed to refresh it.
///
/// `expiry == None` means the access token does not expire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    pub scope: String,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Result of a successful refresh exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expiry: Option<DateTime<Utc>>,
}

impl fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("access_token", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl Credential {
    /// Returns true when the access token is past (or within `leeway` of) its expiry.
    pub fn is_expired_at(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        match self.expiry {
            Some(expiry) => now + leeway >= expiry,
            None => false,
        }
    }

    /// Usable right now: a non-empty access token that has not expired.
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        !self.access_token.is_empty() && !self.is_expired_at(now, leeway)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now(), Duration::zero())
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .map(|t| !t.is_empty())
            .unwrap_or(false)
    }

    /// Google reports granted scopes as a space-separated list; `scope` must
    /// be one of them.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.split_whitespace().any(|granted| granted == scope)
    }

    /// Copy of this credential with the refreshed access token and expiry.
    /// Everything else, the refresh token included, is kept.
    pub fn with_refreshed(&self, refreshed: RefreshedToken) -> Credential {
        Credential {
            access_token: refreshed.access_token,
            expiry: refreshed.expiry,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expiry", &self.expiry)
            .field("scope", &self.scope)
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}
