// Library root
// -----------
// This crate exposes a small library surface for the uploader. The binary
// (`main.rs`) wires these modules together for one interactive run.
//
// Module responsibilities:
// - `auth`: credential lifecycle (load, refresh, interactive grant, persist)
//   and the Google OAuth provider behind it.
// - `api`: the Drive upload call.
// - `config`: environment settings and the OAuth client-secrets file.
// - `ui`: the terminal flow that sequences authentication and upload.
//
// Everything except `ui` is usable without a terminal, which keeps the
// credential logic testable with in-memory stores and fake providers.
pub mod api;
pub mod auth;
pub mod config;
pub mod ui;
