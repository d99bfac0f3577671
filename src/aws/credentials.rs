use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use ini::Ini;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use super::Credentials;
use crate::constants::{self, TOKEN_CACHE_MIN_REMAINING_SECONDS};

/// Save credentials to the AWS shared credentials file
pub async fn save_credentials(profile: &str, creds: &Credentials) -> Result<()> {
    let path = constants::get_aws_credentials_path()
        .context("Failed to determine AWS credentials path")?;
    save_credentials_to(&path, profile, creds).await
}

/// Load cached credentials for `profile` if they are still usable
pub async fn load_cached_credentials(profile: &str) -> Result<Option<Credentials>> {
    let path = constants::get_aws_credentials_path()
        .context("Failed to determine AWS credentials path")?;
    load_fresh_credentials_from(&path, profile, Utc::now()).await
}

pub async fn save_credentials_to(path: &Path, profile: &str, creds: &Credentials) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut ini = path
        .exists()
        .then(|| Ini::load_from_file(path).ok())
        .flatten()
        .unwrap_or_else(Ini::new);

    let expiration = creds.expiration.to_rfc3339_opts(SecondsFormat::Secs, true);

    ini.with_section(Some(profile))
        .set("aws_access_key_id", &creds.access_key_id)
        .set("aws_secret_access_key", &creds.secret_access_key)
        .set("aws_session_token", &creds.session_token)
        .set("aws_session_expiration", &expiration);

    ini.write_to_file(path)
        .context("Failed to write credentials file")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = fs::metadata(path).await?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o600);
        fs::set_permissions(path, permissions).await?;
    }

    info!("Credentials saved to profile: {}", profile);
    Ok(())
}

/// Load credentials for `profile` from an INI credentials file
pub async fn load_credentials_from(path: &Path, profile: &str) -> Result<Credentials> {
    let ini = Ini::load_from_file(path)
        .with_context(|| format!("Failed to read AWS credentials file: {}", path.display()))?;

    let section = ini
        .section(Some(profile))
        .with_context(|| format!("Profile '{profile}' not found in credentials file"))?;

    let field = |key: &str| {
        section
            .get(key)
            .map(str::to_string)
            .with_context(|| format!("{key} not found"))
    };

    let expiration_str = field("aws_session_expiration")?;
    let expiration = DateTime::parse_from_rfc3339(&expiration_str)
        .map(|dt| dt.with_timezone(&Utc))
        .context("Failed to parse session expiration time")?;

    Ok(Credentials {
        access_key_id: field("aws_access_key_id")?,
        secret_access_key: field("aws_secret_access_key")?,
        session_token: field("aws_session_token")?,
        expiration,
    })
}

/// Cached credentials that stay valid for a while after `now`, if any.
///
/// A missing file, missing profile or incomplete entry is a cache miss.
pub async fn load_fresh_credentials_from(
    path: &Path,
    profile: &str,
    now: DateTime<Utc>,
) -> Result<Option<Credentials>> {
    if !path.exists() {
        return Ok(None);
    }

    match load_credentials_from(path, profile).await {
        Ok(creds) if creds.is_fresh_at(now, TOKEN_CACHE_MIN_REMAINING_SECONDS) => {
            debug!("Using cached credentials for profile: {}", profile);
            Ok(Some(creds))
        }
        Ok(_) => {
            debug!("Cached credentials for profile {} are expiring", profile);
            Ok(None)
        }
        Err(e) => {
            debug!("No usable cached credentials: {:#}", e);
            Ok(None)
        }
    }
}
