//! OAuth credential lifecycle for the uploader.
//!
//! `CredentialManager` is the only piece callers normally touch: it loads the
//! persisted credential, refreshes or re-authorizes as needed, and writes the
//! result back before handing it out. Storage and the OAuth provider sit
//! behind the `TokenStore` and `AuthorizationProvider` traits.

mod credential;
mod error;
mod google;
mod manager;
mod provider;
mod store;

pub use credential::{Credential, RefreshedToken, DRIVE_FILE_SCOPE};
pub use error::{AuthFailureReason, AuthUnavailable, ProviderError, StoreError};
pub use google::GoogleAuthProvider;
pub use manager::{CredentialManager, DEFAULT_LEEWAY_SECS};
pub use provider::AuthorizationProvider;
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
