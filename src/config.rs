use crate::aws::{BrokerConfig, Credentials, RoleBinding};
use crate::constants::{self, DEFAULT_MAX_DURATION_SECONDS};
use anyhow::{Context, Result};
use ini::{Ini, Properties};
use std::path::Path;
use tracing::debug;

/// Per-profile settings read from the AWS config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub role_arn: Option<String>,
    pub provider_arn: Option<String>,
    pub region: Option<String>,
    pub duration: Option<i32>,
    pub auto_duration: bool,
    pub max_duration: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role_arn: None,
            provider_arn: None,
            region: None,
            duration: None,
            auto_duration: true,
            max_duration: DEFAULT_MAX_DURATION_SECONDS,
        }
    }
}

impl Config {
    fn from_ini_section(section: &Properties) -> Self {
        let text = |key: &str| {
            section
                .get(key)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(String::from)
        };

        Self {
            role_arn: text("saml_role_arn"),
            provider_arn: text("saml_provider_arn"),
            region: text("region"),
            duration: section.get("saml_duration").and_then(|s| s.trim().parse().ok()),
            auto_duration: section
                .get("saml_auto_duration")
                .and_then(parse_bool)
                .unwrap_or(true),
            max_duration: section
                .get("saml_max_duration")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_MAX_DURATION_SECONDS),
        }
    }

    /// Broker settings for the selected role
    pub fn broker_config(&self, role: &RoleBinding, token_cache: Option<Credentials>) -> BrokerConfig {
        BrokerConfig {
            role_arn: role.role_arn.clone(),
            provider_arn: role.principal_arn.clone(),
            region: self.region.clone(),
            duration: self.duration,
            auto_duration: self.auto_duration,
            max_duration: self.max_duration,
            token_cache,
        }
    }
}

/// Load the profile from the AWS config file; a missing file or profile yields defaults
pub async fn load(profile: &str) -> Result<Config> {
    let path = constants::get_aws_config_path().context("Failed to determine AWS config path")?;
    load_from(&path, profile)
}

pub fn load_from(path: &Path, profile: &str) -> Result<Config> {
    if !path.exists() {
        debug!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let ini = Ini::load_from_file(path)
        .with_context(|| format!("Failed to load config file: {}", path.display()))?;

    Ok(ini
        .section(Some(section_name(profile)))
        .map(Config::from_ini_section)
        .unwrap_or_default())
}

fn section_name(profile: &str) -> String {
    if profile == "default" {
        profile.to_string()
    } else {
        format!("profile {profile}")
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}
