pub mod credentials;
pub mod roles;

pub use credentials::CredentialsCommand;
pub use roles::RolesCommand;

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::{fs, io::AsyncReadExt};

use crate::saml::Assertion;

/// Where the SAML assertion is read from
#[derive(Debug, Clone, Default, Args)]
pub struct AssertionArgs {
    #[arg(
        short = 'a',
        long = "assertion",
        value_name = "FILE",
        help = "SAML assertion file, XML or base64 SAMLResponse (default: stdin, or '-')"
    )]
    pub path: Option<PathBuf>,
}

impl AssertionArgs {
    pub async fn read(&self) -> Result<Assertion> {
        let raw = match self.path.as_deref() {
            Some(path) if path.as_os_str() != "-" => fs::read(path)
                .await
                .with_context(|| format!("Failed to read SAML assertion: {}", path.display()))?,
            _ => {
                let mut buf = Vec::new();
                tokio::io::stdin()
                    .read_to_end(&mut buf)
                    .await
                    .context("Failed to read SAML assertion from stdin")?;
                buf
            }
        };
        parse_assertion(raw)
    }
}

/// Accept either the XML document or its base64 transport form
fn parse_assertion(raw: Vec<u8>) -> Result<Assertion> {
    let looks_like_xml = raw
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'<');

    if looks_like_xml {
        return Ok(Assertion::from_xml(raw));
    }

    let text = String::from_utf8(raw).context("SAML assertion is neither XML nor base64")?;
    Assertion::from_base64(&text)
}
