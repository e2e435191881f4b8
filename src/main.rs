// Entrypoint for the uploader.
// - Keeps `main` small: read configuration, build the credential manager
//   and hand both to the UI flow.
// - Returns `anyhow::Result` so failures exit non-zero with the error chain.

use drive_uploader::auth::{CredentialManager, FileTokenStore, GoogleAuthProvider, DRIVE_FILE_SCOPE};
use drive_uploader::config::AppConfig;
use drive_uploader::ui;

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; quiet by default so they do not interleave with the
    // prompts. Override with RUST_LOG=drive_uploader=debug.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drive_uploader=warn".into()),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::debug!(?config, "configuration loaded");

    let provider = GoogleAuthProvider::new(config.redirect_port, config.auth_timeout)?;
    let manager = CredentialManager::new(
        FileTokenStore::new(&config.token_path),
        provider,
        &config.client_secrets_path,
        DRIVE_FILE_SCOPE,
    );

    ui::run(&config, &manager)?;
    Ok(())
}
