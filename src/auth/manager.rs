//! Credential lifecycle: hand out a credential that is valid at the moment it
//! is returned, doing the least work needed (nothing, a refresh, or a full
//! interactive grant) and persisting any change before returning.
//!
//! ```text
//! NoCredential -> Loaded --valid--> Valid
//!                   |
//!                   v
//!                Expired --refresh token--> Refreshing --ok--> Persisted -> Valid
//!                   |                           |
//!                   | no refresh token          | provider error,
//!                   | or other scope            | or expires within leeway
//!                   v                           v
//!               Authorizing <-------------------+
//!                   |
//!                   +--ok--> Persisted -> Valid
//!                   +--no client config / grant error--> Failed
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, Utc};
use tracing::{debug, info, instrument, warn};

use super::credential::Credential;
use super::error::{AuthUnavailable, StoreError};
use super::provider::AuthorizationProvider;
use super::store::TokenStore;
use crate::config::ClientSecret;

/// Default margin applied to expiry checks.
pub const DEFAULT_LEEWAY_SECS: i64 = 60;

enum Step {
    Loaded(Option<Credential>),
    Expired(Option<Credential>),
    Refreshing(Credential),
    Authorizing,
    Persist(Credential),
}

/// Owns the single active credential of the process.
///
/// `acquire` holds an internal mutex for its whole duration, so concurrent
/// callers never run two refreshes or two interactive grants at once.
pub struct CredentialManager<S, P> {
    store: S,
    provider: P,
    client_secrets_path: PathBuf,
    scope: String,
    leeway: Duration,
    active: Mutex<Option<Credential>>,
}

impl<S, P> CredentialManager<S, P>
where
    S: TokenStore,
    P: AuthorizationProvider,
{
    pub fn new(
        store: S,
        provider: P,
        client_secrets_path: impl Into<PathBuf>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider,
            client_secrets_path: client_secrets_path.into(),
            scope: scope.into(),
            leeway: Duration::seconds(DEFAULT_LEEWAY_SECS),
            active: Mutex::new(None),
        }
    }

    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn client_secrets_path(&self) -> &Path {
        &self.client_secrets_path
    }

    /// Return a credential that is valid right now.
    #[instrument(skip_all, fields(scope = %self.scope))]
    pub fn acquire(&self) -> Result<Credential, AuthUnavailable> {
        let mut active = self.lock_active();

        let mut step = match active.as_ref() {
            Some(cached) => Step::Loaded(Some(cached.clone())),
            None => Step::Loaded(self.load_from_store()?),
        };

        loop {
            step = match step {
                Step::Loaded(Some(credential)) if self.is_usable(&credential) => {
                    debug!("credential valid, no work needed");
                    *active = Some(credential.clone());
                    return Ok(credential);
                }
                Step::Loaded(credential) => Step::Expired(credential),
                // A refresh keeps the scope of the original grant, so only
                // credentials already covering our scope are worth refreshing.
                Step::Expired(Some(credential))
                    if credential.has_refresh_token() && credential.has_scope(&self.scope) =>
                {
                    Step::Refreshing(credential)
                }
                Step::Expired(_) => Step::Authorizing,
                Step::Refreshing(credential) => match self.provider.refresh(&credential) {
                    Ok(refreshed) => {
                        let updated = credential.with_refreshed(refreshed);
                        if updated.is_valid_at(Utc::now(), self.leeway) {
                            info!("access token refreshed");
                            Step::Persist(updated)
                        } else {
                            warn!(expiry = ?updated.expiry, "refreshed token expires within leeway, falling back to interactive authorization");
                            Step::Authorizing
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "refresh failed, falling back to interactive authorization");
                        Step::Authorizing
                    }
                },
                Step::Authorizing => {
                    let client = self.load_client_secret()?;
                    debug!("starting interactive authorization");
                    let credential = self
                        .provider
                        .interactive_grant(&client, &self.scope)
                        .map_err(|e| AuthUnavailable::GrantFailed(e.to_string()))?;
                    info!("interactive authorization completed");
                    Step::Persist(credential)
                }
                Step::Persist(credential) => {
                    if !credential.has_scope(&self.scope) {
                        return Err(AuthUnavailable::GrantFailed(format!(
                            "provider returned a credential for `{}`",
                            credential.scope
                        )));
                    }
                    if !credential.is_valid_at(Utc::now(), self.leeway) {
                        return Err(AuthUnavailable::GrantFailed(
                            "provider returned a credential that is already expired".into(),
                        ));
                    }
                    self.store
                        .save(&credential)
                        .map_err(|e| self.store_error(e))?;
                    *active = Some(credential.clone());
                    return Ok(credential);
                }
            };
        }
    }

    fn is_usable(&self, credential: &Credential) -> bool {
        if !credential.has_scope(&self.scope) {
            debug!(stored_scope = %credential.scope, "stored credential was issued for another scope");
            return false;
        }
        credential.is_valid_at(Utc::now(), self.leeway)
    }

    fn load_from_store(&self) -> Result<Option<Credential>, AuthUnavailable> {
        let loaded = self.store.load().map_err(|e| self.store_error(e))?;
        debug!(found = loaded.is_some(), location = %self.store.location(), "token store read");
        Ok(loaded)
    }

    fn load_client_secret(&self) -> Result<ClientSecret, AuthUnavailable> {
        let path = &self.client_secrets_path;
        if !path.exists() {
            return Err(AuthUnavailable::ConfigMissing {
                path: path.clone(),
                detail: "file not found".into(),
            });
        }
        ClientSecret::from_file(path).map_err(|e| AuthUnavailable::ConfigMissing {
            path: path.clone(),
            detail: format!("{e:#}"),
        })
    }

    fn store_error(&self, err: StoreError) -> AuthUnavailable {
        AuthUnavailable::StoreIo {
            location: self.store.location(),
            detail: err.to_string(),
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<Credential>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credential::{RefreshedToken, DRIVE_FILE_SCOPE};
    use crate::auth::error::{AuthFailureReason, ProviderError};
    use crate::auth::store::{FileTokenStore, MemoryTokenStore};
    use chrono::DateTime;
    use std::cell::{Cell, RefCell};
    use std::io;

    const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

    const CLIENT_SECRETS: &str = r#"{"installed": {"client_id": "id", "client_secret": "s"}}"#;

    /// Provider whose answers are scripted per test.
    #[derive(Default)]
    struct ScriptedProvider {
        refresh_result: RefCell<Option<Result<RefreshedToken, ProviderError>>>,
        grant_result: RefCell<Option<Result<Credential, ProviderError>>>,
        refresh_calls: Cell<usize>,
        grant_calls: Cell<usize>,
    }

    impl ScriptedProvider {
        fn refreshing_to(access_token: &str, expiry: DateTime<Utc>) -> Self {
            let provider = Self::default();
            *provider.refresh_result.borrow_mut() = Some(Ok(RefreshedToken {
                access_token: access_token.to_string(),
                expiry: Some(expiry),
            }));
            provider
        }

        fn granting(credential: Credential) -> Self {
            let provider = Self::default();
            *provider.grant_result.borrow_mut() = Some(Ok(credential));
            provider
        }
    }

    impl AuthorizationProvider for ScriptedProvider {
        fn refresh(&self, _credential: &Credential) -> Result<RefreshedToken, ProviderError> {
            self.refresh_calls.set(self.refresh_calls.get() + 1);
            self.refresh_result
                .borrow_mut()
                .take()
                .unwrap_or(Err(ProviderError::Denied("invalid_grant".into())))
        }

        fn interactive_grant(
            &self,
            _client: &ClientSecret,
            _scope: &str,
        ) -> Result<Credential, ProviderError> {
            self.grant_calls.set(self.grant_calls.get() + 1);
            self.grant_result
                .borrow_mut()
                .take()
                .unwrap_or(Err(ProviderError::Denied("access_denied".into())))
        }
    }

    /// Memory store whose writes fail while `fail_saves` is set.
    struct FlakyStore {
        inner: MemoryTokenStore,
        fail_saves: Cell<bool>,
    }

    impl TokenStore for FlakyStore {
        fn load(&self) -> Result<Option<Credential>, StoreError> {
            self.inner.load()
        }

        fn save(&self, credential: &Credential) -> Result<(), StoreError> {
            if self.fail_saves.get() {
                return Err(StoreError::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "read-only filesystem",
                )));
            }
            self.inner.save(credential)
        }

        fn location(&self) -> String {
            "flaky".to_string()
        }
    }

    fn credential(access: &str, refresh: Option<&str>, expiry: DateTime<Utc>) -> Credential {
        Credential {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            expiry: Some(expiry),
            scope: DRIVE_FILE_SCOPE.to_string(),
            token_uri: None,
            client_id: None,
            client_secret: None,
        }
    }

    fn secrets_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, CLIENT_SECRETS).unwrap();
        path
    }

    #[test]
    fn test_valid_credential_returned_unchanged_without_write() {
        let stored = credential("A1", Some("R1"), Utc::now() + Duration::seconds(3600));
        let manager = CredentialManager::new(
            MemoryTokenStore::with_credential(stored.clone()),
            ScriptedProvider::default(),
            "missing.json",
            DRIVE_FILE_SCOPE,
        );

        assert_eq!(manager.acquire().unwrap(), stored);
        assert_eq!(manager.store().writes(), 0);
        assert_eq!(manager.provider().refresh_calls.get(), 0);
        assert_eq!(manager.provider().grant_calls.get(), 0);
    }

    #[test]
    fn test_expired_credential_is_refreshed_and_persisted_once() {
        let now = Utc::now();
        let new_expiry = now + Duration::seconds(3600);
        let manager = CredentialManager::new(
            MemoryTokenStore::with_credential(credential(
                "A1",
                Some("R1"),
                now - Duration::seconds(10),
            )),
            ScriptedProvider::refreshing_to("A2", new_expiry),
            "missing.json",
            DRIVE_FILE_SCOPE,
        );

        let got = manager.acquire().unwrap();
        assert_eq!(got, credential("A2", Some("R1"), new_expiry));
        assert_eq!(manager.store().writes(), 1);
        assert_eq!(manager.store().snapshot(), Some(got));
        assert_eq!(manager.provider().grant_calls.get(), 0);
    }

    #[test]
    fn test_no_store_no_config_is_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CredentialManager::new(
            MemoryTokenStore::new(),
            ScriptedProvider::default(),
            dir.path().join("credentials.json"),
            DRIVE_FILE_SCOPE,
        );

        let err = manager.acquire().unwrap_err();
        assert_eq!(err.reason(), AuthFailureReason::ConfigMissing);
        assert_eq!(manager.store().writes(), 0);
        assert!(manager.store().snapshot().is_none());
        assert_eq!(manager.provider().grant_calls.get(), 0);
    }

    #[test]
    fn test_no_store_with_config_grants_once_and_persists_once() {
        let dir = tempfile::tempdir().unwrap();
        let granted = credential("G1", Some("GR1"), Utc::now() + Duration::seconds(3600));
        let manager = CredentialManager::new(
            MemoryTokenStore::new(),
            ScriptedProvider::granting(granted.clone()),
            secrets_file(&dir),
            DRIVE_FILE_SCOPE,
        );

        assert_eq!(manager.acquire().unwrap(), granted);
        assert_eq!(manager.provider().grant_calls.get(), 1);
        assert_eq!(manager.store().writes(), 1);
    }

    #[test]
    fn test_second_acquire_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let granted = credential("G1", None, Utc::now() + Duration::seconds(3600));
        let manager = CredentialManager::new(
            MemoryTokenStore::new(),
            ScriptedProvider::granting(granted),
            secrets_file(&dir),
            DRIVE_FILE_SCOPE,
        );

        let first = manager.acquire().unwrap();
        let second = manager.acquire().unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.store().writes(), 1);
        assert_eq!(manager.provider().grant_calls.get(), 1);
    }

    #[test]
    fn test_expired_without_refresh_token_requires_grant() {
        let dir = tempfile::tempdir().unwrap();
        let granted = credential("G1", Some("GR1"), Utc::now() + Duration::seconds(3600));
        let manager = CredentialManager::new(
            MemoryTokenStore::with_credential(credential(
                "A1",
                None,
                Utc::now() - Duration::seconds(10),
            )),
            ScriptedProvider::granting(granted.clone()),
            secrets_file(&dir),
            DRIVE_FILE_SCOPE,
        );

        assert_eq!(manager.acquire().unwrap(), granted);
        assert_eq!(manager.provider().refresh_calls.get(), 0);
        assert_eq!(manager.provider().grant_calls.get(), 1);
    }

    #[test]
    fn test_refresh_failure_falls_back_to_grant() {
        let dir = tempfile::tempdir().unwrap();
        let granted = credential("G1", Some("GR1"), Utc::now() + Duration::seconds(3600));
        let manager = CredentialManager::new(
            MemoryTokenStore::with_credential(credential(
                "A1",
                Some("revoked"),
                Utc::now() - Duration::seconds(10),
            )),
            ScriptedProvider::granting(granted.clone()),
            secrets_file(&dir),
            DRIVE_FILE_SCOPE,
        );

        assert_eq!(manager.acquire().unwrap(), granted);
        assert_eq!(manager.provider().refresh_calls.get(), 1);
        assert_eq!(manager.provider().grant_calls.get(), 1);
        assert_eq!(manager.store().writes(), 1);
    }

    #[test]
    fn test_refresh_failure_without_config_is_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let stored = credential("A1", Some("revoked"), Utc::now() - Duration::seconds(10));
        let manager = CredentialManager::new(
            MemoryTokenStore::with_credential(stored.clone()),
            ScriptedProvider::default(),
            dir.path().join("credentials.json"),
            DRIVE_FILE_SCOPE,
        );

        let err = manager.acquire().unwrap_err();
        assert_eq!(err.reason(), AuthFailureReason::ConfigMissing);
        assert_eq!(manager.store().writes(), 0);
        assert_eq!(manager.store().snapshot(), Some(stored));
    }

    #[test]
    fn test_declined_grant_is_grant_failed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CredentialManager::new(
            MemoryTokenStore::new(),
            ScriptedProvider::default(),
            secrets_file(&dir),
            DRIVE_FILE_SCOPE,
        );

        let err = manager.acquire().unwrap_err();
        assert_eq!(err.reason(), AuthFailureReason::GrantFailed);
        assert_eq!(manager.store().writes(), 0);
    }

    #[test]
    fn test_already_expired_grant_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CredentialManager::new(
            MemoryTokenStore::new(),
            ScriptedProvider::granting(credential("G1", None, Utc::now() - Duration::seconds(5))),
            secrets_file(&dir),
            DRIVE_FILE_SCOPE,
        );

        let err = manager.acquire().unwrap_err();
        assert_eq!(err.reason(), AuthFailureReason::GrantFailed);
        assert_eq!(manager.store().writes(), 0);
    }

    #[test]
    fn test_malformed_config_is_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{}").unwrap();
        let manager = CredentialManager::new(
            MemoryTokenStore::new(),
            ScriptedProvider::default(),
            &path,
            DRIVE_FILE_SCOPE,
        );

        let err = manager.acquire().unwrap_err();
        assert!(matches!(err, AuthUnavailable::ConfigMissing { .. }));
        assert_eq!(manager.provider().grant_calls.get(), 0);
    }

    #[test]
    fn test_corrupt_store_is_store_io() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token.json");
        std::fs::write(&token_path, "garbage").unwrap();
        let manager = CredentialManager::new(
            FileTokenStore::new(&token_path),
            ScriptedProvider::default(),
            secrets_file(&dir),
            DRIVE_FILE_SCOPE,
        );

        let err = manager.acquire().unwrap_err();
        assert_eq!(err.reason(), AuthFailureReason::StoreIo);
        assert_eq!(manager.provider().grant_calls.get(), 0);
        assert_eq!(std::fs::read_to_string(&token_path).unwrap(), "garbage");
    }

    #[test]
    fn test_other_scope_triggers_reauthorization() {
        let dir = tempfile::tempdir().unwrap();
        let mut stored = credential("A1", Some("R1"), Utc::now() + Duration::seconds(3600));
        stored.scope = READONLY_SCOPE.to_string();
        let granted = credential("G1", Some("GR1"), Utc::now() + Duration::seconds(3600));
        let manager = CredentialManager::new(
            MemoryTokenStore::with_credential(stored),
            ScriptedProvider::granting(granted.clone()),
            secrets_file(&dir),
            DRIVE_FILE_SCOPE,
        );

        assert_eq!(manager.acquire().unwrap(), granted);
        assert_eq!(manager.provider().grant_calls.get(), 1);
    }

    #[test]
    fn test_other_scope_is_not_refreshed_even_when_refresh_works() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let mut stored = credential("A1", Some("R1"), now - Duration::seconds(10));
        stored.scope = READONLY_SCOPE.to_string();
        let granted = credential("G1", Some("GR1"), now + Duration::seconds(3600));
        let provider = ScriptedProvider::refreshing_to("A2", now + Duration::seconds(3600));
        *provider.grant_result.borrow_mut() = Some(Ok(granted.clone()));
        let manager = CredentialManager::new(
            MemoryTokenStore::with_credential(stored),
            provider,
            secrets_file(&dir),
            DRIVE_FILE_SCOPE,
        );

        let got = manager.acquire().unwrap();
        assert_eq!(got, granted);
        assert!(got.has_scope(DRIVE_FILE_SCOPE));
        assert_eq!(manager.provider().refresh_calls.get(), 0);
        assert_eq!(manager.provider().grant_calls.get(), 1);
        assert_eq!(manager.store().snapshot(), Some(granted));
    }

    #[test]
    fn test_grant_for_other_scope_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut granted = credential("G1", Some("GR1"), Utc::now() + Duration::seconds(3600));
        granted.scope = READONLY_SCOPE.to_string();
        let manager = CredentialManager::new(
            MemoryTokenStore::new(),
            ScriptedProvider::granting(granted),
            secrets_file(&dir),
            DRIVE_FILE_SCOPE,
        );

        let err = manager.acquire().unwrap_err();
        assert_eq!(err.reason(), AuthFailureReason::GrantFailed);
        assert!(err.to_string().contains("drive.readonly"));
        assert_eq!(manager.store().writes(), 0);
    }

    #[test]
    fn test_multi_scope_grant_is_reused() {
        let mut stored = credential("A1", Some("R1"), Utc::now() + Duration::seconds(3600));
        stored.scope = format!("openid {DRIVE_FILE_SCOPE}");
        let manager = CredentialManager::new(
            MemoryTokenStore::with_credential(stored.clone()),
            ScriptedProvider::default(),
            "missing.json",
            DRIVE_FILE_SCOPE,
        );

        assert_eq!(manager.acquire().unwrap(), stored);
        assert_eq!(manager.store().writes(), 0);
        assert_eq!(manager.provider().grant_calls.get(), 0);
    }

    #[test]
    fn test_refresh_inside_leeway_falls_back_to_grant() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let granted = credential("G1", Some("GR1"), now + Duration::seconds(3600));
        let provider = ScriptedProvider::refreshing_to("A2", now + Duration::seconds(30));
        *provider.grant_result.borrow_mut() = Some(Ok(granted.clone()));
        let manager = CredentialManager::new(
            MemoryTokenStore::with_credential(credential(
                "A1",
                Some("R1"),
                now - Duration::seconds(10),
            )),
            provider,
            secrets_file(&dir),
            DRIVE_FILE_SCOPE,
        );

        assert_eq!(manager.acquire().unwrap(), granted);
        assert_eq!(manager.provider().refresh_calls.get(), 1);
        assert_eq!(manager.provider().grant_calls.get(), 1);
        assert_eq!(manager.store().writes(), 1);
    }

    #[test]
    fn test_unwritable_store_is_store_io_and_nothing_cached() {
        let now = Utc::now();
        let stored = credential("A1", Some("R1"), now - Duration::seconds(10));
        let manager = CredentialManager::new(
            FlakyStore {
                inner: MemoryTokenStore::with_credential(stored.clone()),
                fail_saves: Cell::new(true),
            },
            ScriptedProvider::refreshing_to("A2", now + Duration::seconds(3600)),
            "missing.json",
            DRIVE_FILE_SCOPE,
        );

        let err = manager.acquire().unwrap_err();
        assert_eq!(err.reason(), AuthFailureReason::StoreIo);
        assert!(err.to_string().contains("read-only filesystem"));
        assert!(manager.lock_active().is_none());
        assert_eq!(manager.store().inner.snapshot(), Some(stored));

        // The unpersisted A2 was never cached, so the next call refreshes again.
        manager.store().fail_saves.set(false);
        *manager.provider().refresh_result.borrow_mut() = Some(Ok(RefreshedToken {
            access_token: "A3".to_string(),
            expiry: Some(now + Duration::seconds(3600)),
        }));
        assert_eq!(manager.acquire().unwrap().access_token, "A3");
        assert_eq!(manager.provider().refresh_calls.get(), 2);
        assert_eq!(manager.store().inner.writes(), 1);
    }

    #[test]
    fn test_leeway_refreshes_nearly_expired_token() {
        let now = Utc::now();
        let manager = CredentialManager::new(
            MemoryTokenStore::with_credential(credential(
                "A1",
                Some("R1"),
                now + Duration::seconds(30),
            )),
            ScriptedProvider::refreshing_to("A2", now + Duration::seconds(3600)),
            "missing.json",
            DRIVE_FILE_SCOPE,
        )
        .with_leeway(Duration::seconds(120));

        assert_eq!(manager.acquire().unwrap().access_token, "A2");
        assert_eq!(manager.store().writes(), 1);
    }
}
