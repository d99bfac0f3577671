use anyhow::{Context, Result};
use chrono::SecondsFormat;
use clap::ValueEnum;
use serde::Serialize;

use crate::aws::Credentials;

/// How issued credentials are written to stdout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `export AWS_...` line for `eval` in a shell
    #[default]
    Export,
    /// JSON document for the AWS `credential_process` setting
    Process,
}

/// Document format expected from an external `credential_process`
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialProcessOutput<'a> {
    version: u8,
    access_key_id: &'a str,
    secret_access_key: &'a str,
    session_token: &'a str,
    expiration: String,
}

pub fn render(format: OutputFormat, creds: &Credentials) -> Result<String> {
    match format {
        OutputFormat::Export => Ok(export_line(creds)),
        OutputFormat::Process => credential_process_document(creds),
    }
}

pub fn export_line(creds: &Credentials) -> String {
    format!(
        "export AWS_ACCESS_KEY_ID='{}' AWS_SECRET_ACCESS_KEY='{}' AWS_SESSION_TOKEN='{}'",
        creds.access_key_id, creds.secret_access_key, creds.session_token
    )
}

pub fn credential_process_document(creds: &Credentials) -> Result<String> {
    let document = CredentialProcessOutput {
        version: 1,
        access_key_id: &creds.access_key_id,
        secret_access_key: &creds.secret_access_key,
        session_token: &creds.session_token,
        expiration: creds
            .expiration
            .to_rfc3339_opts(SecondsFormat::AutoSi, false),
    };
    serde_json::to_string(&document).context("Failed to serialize credential_process output")
}
