// UI layer: the linear terminal flow of one run. Authenticate, pick a file,
// upload it, report the result. Prompts use `dialoguer`, the file picker is
// the native dialog from `rfd`.

use crate::api::{DriveClient, UploadRequest, UploadedFile};
use crate::auth::{AuthUnavailable, AuthorizationProvider, CredentialManager, TokenStore};
use crate::config::AppConfig;
use anyhow::Result;
use crossterm::style::Stylize;
use dialoguer::{Confirm, Input};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

/// Run the whole upload flow once. Returns an error when authorization or
/// the upload fails; nothing is uploaded without a valid credential.
pub fn run<S, P>(config: &AppConfig, manager: &CredentialManager<S, P>) -> Result<()>
where
    S: TokenStore,
    P: AuthorizationProvider,
{
    println!("{}", "Upload Files Directly to a Google Drive Folder".bold());
    println!();

    // The interactive grant may print a URL and wait for the browser, so no
    // spinner here.
    println!("Authenticating with Google...");
    if let Err(e) = manager.acquire() {
        eprintln!("{}", describe_auth_failure(&e).red());
        return Err(e.into());
    }

    let drive = DriveClient::new(&config.api_url)?;

    let folder_id = match &config.folder_id {
        Some(id) => id.clone(),
        None => Input::<String>::new()
            .with_prompt("Drive folder ID (not a file ID)")
            .interact_text()?
            .trim()
            .to_string(),
    };

    let Some(path) = pick_file()? else {
        println!("No file selected, nothing to upload.");
        return Ok(());
    };

    let request = UploadRequest::from_path(&path, &folder_id)?;
    println!("Uploading `{}`...", request.file_name);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.set_message("Uploading...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = upload_with_fresh_credential(manager, &drive, &request);
    spinner.finish_and_clear();

    match result {
        Ok(file) => {
            println!("{}", format!("Upload done! File ID: {}", file.id).green());
            println!("View file in Drive: {}", file.web_view_url());
            Ok(())
        }
        Err(e) => {
            match e.downcast_ref::<AuthUnavailable>() {
                Some(auth) => eprintln!("{}", describe_auth_failure(auth).red()),
                None => eprintln!("{}", format!("Upload failed: {e:#}").red()),
            }
            Err(e)
        }
    }
}

/// Ask the manager again right before sending: the prompts may have
/// outlasted the credential obtained at start-up.
pub fn upload_with_fresh_credential<S, P>(
    manager: &CredentialManager<S, P>,
    drive: &DriveClient,
    request: &UploadRequest,
) -> Result<UploadedFile>
where
    S: TokenStore,
    P: AuthorizationProvider,
{
    let credential = manager.acquire()?;
    drive.upload(&credential, request)
}

/// One message per failure reason, so the user knows what to fix.
pub fn describe_auth_failure(err: &AuthUnavailable) -> String {
    match err {
        AuthUnavailable::ConfigMissing { path, detail } => format!(
            "{} could not be used ({detail}). Download the OAuth client file from the \
             Google Cloud console and save it there.",
            path.display()
        ),
        AuthUnavailable::StoreIo { location, detail } => format!(
            "The saved token at {location} could not be read or written ({detail}). \
             Fix or remove it and try again."
        ),
        AuthUnavailable::GrantFailed(detail) => {
            format!("Google did not grant access: {detail}")
        }
    }
}

/// Native file dialog first; if it is cancelled or unavailable, offer a
/// typed path instead.
fn pick_file() -> Result<Option<PathBuf>> {
    if let Some(path) = rfd::FileDialog::new()
        .set_title("Select a file to upload to Drive")
        .pick_file()
    {
        return Ok(Some(path));
    }

    if !Confirm::new()
        .with_prompt("No file chosen in the dialog. Type a path instead?")
        .default(true)
        .interact()?
    {
        return Ok(None);
    }

    let path: String = Input::new()
        .with_prompt("File path (leave empty to cancel)")
        .allow_empty(true)
        .interact_text()?;
    let path = path.trim();
    if path.is_empty() {
        return Ok(None);
    }
    Ok(Some(PathBuf::from(path)))
}
