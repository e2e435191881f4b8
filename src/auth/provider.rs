//! Seam between the credential manager and whatever performs the OAuth
//! exchanges.

use super::credential::{Credential, RefreshedToken};
use super::error::ProviderError;
use crate::config::ClientSecret;

/// External authorization service: token refresh and interactive consent.
pub trait AuthorizationProvider {
    /// Exchange the credential's refresh token for a new access token.
    fn refresh(&self, credential: &Credential) -> Result<RefreshedToken, ProviderError>;

    /// Run the interactive consent flow for `scope` and return a fresh
    /// credential. May block on user action.
    fn interactive_grant(
        &self,
        client: &ClientSecret,
        scope: &str,
    ) -> Result<Credential, ProviderError>;
}

impl<P: AuthorizationProvider + ?Sized> AuthorizationProvider for &P {
    fn refresh(&self, credential: &Credential) -> Result<RefreshedToken, ProviderError> {
        (**self).refresh(credential)
    }

    fn interactive_grant(
        &self,
        client: &ClientSecret,
        scope: &str,
    ) -> Result<Credential, ProviderError> {
        (**self).interactive_grant(client, scope)
    }
}
