// API client module: a small blocking HTTP client that pushes one file into
// a Drive folder. It is synchronous on purpose: the tool uploads a single
// file per run.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, instrument};

use crate::auth::Credential;

/// Upload client holding a reqwest blocking client and the API base URL
/// (`https://www.googleapis.com` outside of tests).
#[derive(Clone)]
pub struct DriveClient {
    client: Client,
    base_url: String,
}

/// Everything the upload needs besides the credential.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub folder_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// File metadata sent as the first part of the multipart body.
#[derive(Serialize, Debug)]
struct FileMetadata<'a> {
    name: &'a str,
    parents: [&'a str; 1],
}

/// Response of `files.create` with `fields=id`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub id: String,
}

impl UploadedFile {
    pub fn web_view_url(&self) -> String {
        format!("https://drive.google.com/file/d/{}", self.id)
    }
}

impl UploadRequest {
    /// Read `path` into memory and guess its MIME type from the extension.
    pub fn from_path(path: &Path, folder_id: &str) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .context("File path has no usable file name")?
            .to_string();
        Ok(UploadRequest {
            folder_id: folder_id.to_string(),
            mime_type: mime_for_path(path),
            file_name,
            bytes,
        })
    }
}

impl DriveClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(DriveClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Bearer header for the given credential.
    fn auth_headers(credential: &Credential) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let mut val = HeaderValue::from_str(&format!("Bearer {}", credential.access_token))
            .context("Access token is not a valid header value")?;
        val.set_sensitive(true);
        headers.insert(AUTHORIZATION, val);
        Ok(headers)
    }

    /// Create the file inside `request.folder_id` in a single multipart
    /// request and return its id. Refuses to send an expired credential.
    #[instrument(skip_all, fields(file = %request.file_name, folder = %request.folder_id))]
    pub fn upload(&self, credential: &Credential, request: &UploadRequest) -> Result<UploadedFile> {
        if !credential.is_valid() {
            anyhow::bail!("Refusing to upload with an expired credential");
        }

        let url = format!(
            "{}/upload/drive/v3/files?uploadType=multipart&fields=id",
            &self.base_url
        );
        let boundary = new_boundary();
        let body = related_body(&boundary, request)?;
        debug!(bytes = request.bytes.len(), "sending upload");

        let res = self
            .client
            .post(&url)
            .headers(Self::auth_headers(credential)?)
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .context("Failed to send upload request")?;
        if !res.status().is_success() {
            let status = res.status();
            let txt = res.text().unwrap_or_else(|_| "".into());
            anyhow::bail!("Upload failed: {} - {}", status, txt);
        }
        let file: UploadedFile = res.json().context("Parsing upload response json")?;
        info!(id = %file.id, "upload complete");
        Ok(file)
    }
}

/// Build the `multipart/related` body: JSON metadata, then the media bytes.
pub fn related_body(boundary: &str, request: &UploadRequest) -> Result<Vec<u8>> {
    let metadata = serde_json::to_string(&FileMetadata {
        name: &request.file_name,
        parents: [&request.folder_id],
    })
    .context("Serializing file metadata")?;

    let mut body = Vec::with_capacity(request.bytes.len() + metadata.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: {}\r\n\r\n", request.mime_type).as_bytes(),
    );
    body.extend_from_slice(&request.bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    Ok(body)
}

/// MIME type from the file extension; `application/octet-stream` otherwise.
pub fn mime_for_path(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Random part delimiter; URL-safe base64 only uses characters allowed in a
/// MIME boundary.
fn new_boundary() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("drive_uploader_{}", URL_SAFE_NO_PAD.encode(bytes))
}
