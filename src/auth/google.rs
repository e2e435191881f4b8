//! Google OAuth 2.0 installed-app provider.
//!
//! Refresh goes straight to the token endpoint. The interactive grant is
//! yup-oauth2's installed flow: it serves the loopback redirect, exchanges
//! the code and hands the token back through `CapturedToken`. The flow is
//! async, so it runs on a throwaway current-thread runtime.
//!
//! Tokens handled here are secrets: never log them or put them in error
//! messages.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::{ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod};

use super::credential::{Credential, RefreshedToken};
use super::error::ProviderError;
use super::provider::AuthorizationProvider;
use crate::config::ClientSecret;

/// Successful response from the token endpoint.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Error body from the token endpoint.
#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct GoogleAuthProvider {
    client: Client,
    redirect_port: u16,
    timeout: Duration,
    open_browser: bool,
}

impl GoogleAuthProvider {
    pub fn new(redirect_port: u16, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            redirect_port,
            timeout,
            open_browser: true,
        })
    }

    /// Only print the consent URL instead of launching a browser.
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    fn post_token(
        &self,
        token_uri: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, ProviderError> {
        let res = self
            .client
            .post(token_uri)
            .header("Accept", "application/json")
            .form(form)
            .send()?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().unwrap_or_default();
            let detail = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => err.error_description.unwrap_or(err.error),
                Err(_) => body,
            };
            warn!(status = %status, "token endpoint rejected request");
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body: detail,
            });
        }

        res.json::<TokenResponse>()
            .map_err(|e| ProviderError::InvalidResponse(format!("token response: {e}")))
    }

    fn return_method(&self) -> InstalledFlowReturnMethod {
        match self.redirect_port {
            0 => InstalledFlowReturnMethod::HTTPRedirect,
            port => InstalledFlowReturnMethod::HTTPPortRedirect(port),
        }
    }

    async fn run_installed_flow(
        &self,
        client: &ClientSecret,
        scope: &str,
        captured: CapturedToken,
    ) -> Result<(), ProviderError> {
        let secret = application_secret(client);
        let auth = InstalledFlowAuthenticator::builder(secret, self.return_method())
            .with_storage(Box::new(captured))
            .flow_delegate(Box::new(BrowserDelegate {
                open_browser: self.open_browser,
            }))
            .build()
            .await?;
        auth.token(&[scope]).await?;
        Ok(())
    }
}

impl AuthorizationProvider for GoogleAuthProvider {
    #[instrument(skip_all)]
    fn refresh(&self, credential: &Credential) -> Result<RefreshedToken, ProviderError> {
        let (Some(refresh_token), Some(token_uri), Some(client_id), Some(client_secret)) = (
            credential.refresh_token.as_deref(),
            credential.token_uri.as_deref(),
            credential.client_id.as_deref(),
            credential.client_secret.as_deref(),
        ) else {
            return Err(ProviderError::MissingClientIdentity);
        };

        debug!(token_uri, "refreshing access token");
        let token = self.post_token(
            token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ],
        )?;

        Ok(RefreshedToken {
            access_token: token.access_token,
            expiry: token
                .expires_in
                .map(|seconds| Utc::now() + chrono::Duration::seconds(seconds)),
        })
    }

    #[instrument(skip_all, fields(scope = %scope))]
    fn interactive_grant(
        &self,
        client: &ClientSecret,
        scope: &str,
    ) -> Result<Credential, ProviderError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let captured = CapturedToken::default();

        runtime.block_on(async {
            tokio::time::timeout(
                self.timeout,
                self.run_installed_flow(client, scope, captured.clone()),
            )
            .await
            .map_err(|_| ProviderError::Timeout)?
        })?;

        let token = captured
            .take()
            .ok_or_else(|| ProviderError::InvalidResponse("installed flow stored no token".into()))?;
        let access_token = token
            .access_token
            .ok_or_else(|| ProviderError::InvalidResponse("token without access_token".into()))?;

        info!(
            has_refresh_token = token.refresh_token.is_some(),
            expires_at = ?token.expires_at,
            "authorization code exchanged"
        );

        Ok(Credential {
            access_token,
            refresh_token: token.refresh_token,
            expiry: token
                .expires_at
                .and_then(|at| DateTime::<Utc>::from_timestamp(at.unix_timestamp(), 0)),
            scope: scope.to_string(),
            token_uri: Some(client.token_uri.clone()),
            client_id: Some(client.client_id.clone()),
            client_secret: Some(client.client_secret.clone()),
        })
    }
}

fn application_secret(client: &ClientSecret) -> ApplicationSecret {
    ApplicationSecret {
        client_id: client.client_id.clone(),
        client_secret: client.client_secret.clone(),
        auth_uri: client.auth_uri.clone(),
        token_uri: client.token_uri.clone(),
        ..Default::default()
    }
}

/// Token sink for the installed flow. `get` never answers, so every grant
/// goes to Google; `set` keeps the full token, refresh token included.
#[derive(Clone, Default)]
struct CapturedToken(Arc<Mutex<Option<TokenInfo>>>);

impl CapturedToken {
    fn take(&self) -> Option<TokenInfo> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

#[async_trait]
impl TokenStorage for CapturedToken {
    async fn set(&self, _scopes: &[&str], token: TokenInfo) -> anyhow::Result<()> {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = Some(token);
        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        None
    }
}

/// Prints the consent URL and, unless disabled, opens it in the browser.
struct BrowserDelegate {
    open_browser: bool,
}

impl InstalledFlowDelegate for BrowserDelegate {
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        _need_code: bool,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>> {
        Box::pin(async move {
            eprintln!("Please visit this URL to authorize this application:\n{url}\n");
            if self.open_browser {
                if let Err(e) = webbrowser::open(url) {
                    debug!(error = %e, "failed to open browser");
                }
            }
            // The redirect carries the code; nothing to type in.
            Ok(String::new())
        })
    }
}
