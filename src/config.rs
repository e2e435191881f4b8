// Configuration module: reads runtime settings from the environment and
// parses the OAuth client-secrets file downloaded from the Google Cloud
// console.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://www.googleapis.com";
pub const DEFAULT_CLIENT_SECRETS: &str = "credentials.json";
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 300;

/// Settings for one run of the uploader.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Client identity/secret artifact needed for the interactive grant.
    pub client_secrets_path: PathBuf,
    /// Where the credential is persisted between runs.
    pub token_path: PathBuf,
    /// Destination Drive folder. Prompted for when unset.
    pub folder_id: Option<String>,
    pub api_url: String,
    /// Loopback port for the OAuth redirect; 0 picks a free port.
    pub redirect_port: u16,
    pub auth_timeout: Duration,
}

impl AppConfig {
    /// Build the configuration from `DRIVE_UPLOADER_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` but with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let client_secrets_path = get("DRIVE_UPLOADER_CLIENT_SECRETS")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIENT_SECRETS));
        let token_path = get("DRIVE_UPLOADER_TOKEN")
            .map(PathBuf::from)
            .unwrap_or_else(default_token_path);
        let api_url = get("DRIVE_UPLOADER_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.into())
            .trim_end_matches('/')
            .to_string();

        let redirect_port = match get("DRIVE_UPLOADER_REDIRECT_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("Invalid DRIVE_UPLOADER_REDIRECT_PORT: {raw}"))?,
            None => 0,
        };
        let timeout_secs = match get("DRIVE_UPLOADER_AUTH_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid DRIVE_UPLOADER_AUTH_TIMEOUT_SECS: {raw}"))?,
            None => DEFAULT_AUTH_TIMEOUT_SECS,
        };

        Ok(AppConfig {
            client_secrets_path,
            token_path,
            folder_id: get("DRIVE_UPLOADER_FOLDER_ID").map(|v| v.trim().to_string()),
            api_url,
            redirect_port,
            auth_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Token file location in the user's config directory.
pub fn default_token_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drive-uploader")
        .join("token.json")
}

/// OAuth client identity taken from the client-secrets file.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecret")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("auth_uri", &self.auth_uri)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".into()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".into()
}

/// The console wraps the identity in an `installed` (desktop app) or `web`
/// section.
#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ClientSecretsFile =
            serde_json::from_str(json).context("Parsing client secrets json")?;
        file.installed
            .or(file.web)
            .context("Client secrets file has neither an `installed` nor a `web` section")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&data)
    }
}
