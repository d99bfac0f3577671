use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::info;

use super::AssertionArgs;
use crate::{
    aws::{self, AliasMap, AliasResolver, RoleMap, alias::IamAliasService, sts::StsTokenService},
    config,
};

#[derive(Debug, Clone, Default, Args)]
pub struct RolesCommand {
    #[command(flatten)]
    pub assertion: AssertionArgs,

    #[arg(long, help = "AWS region for the STS and IAM calls")]
    pub region: Option<String>,

    #[arg(long, help = "Skip account alias lookup")]
    pub no_aliases: bool,
}

impl RolesCommand {
    pub async fn execute(self, profile: &str) -> Result<()> {
        let config = config::load(profile)
            .await
            .with_context(|| format!("Failed to load configuration for profile '{profile}'"))?;
        let region = self.region.clone().or(config.region);

        let assertion = self.assertion.read().await?;
        if !assertion.is_valid() {
            bail!("SAML assertion is expired or invalid");
        }

        let roles = aws::roles::extract_roles(&assertion)
            .context("Failed to extract roles from SAML assertion")?;
        if roles.is_empty() {
            bail!("No roles found in SAML assertion");
        }
        info!("Found {} roles in SAML assertion", roles.len());

        let aliases = if self.no_aliases {
            AliasMap::new()
        } else {
            let resolver = AliasResolver::new(
                StsTokenService::new(region.as_deref()),
                IamAliasService::new(region.as_deref()),
                &assertion,
            );
            resolver.resolve_aliases(&roles).await
        };

        for line in role_listing(&roles, &aliases) {
            println!("{line}");
        }
        Ok(())
    }
}

/// One line per role, grouped by account label: `<alias> (<account>)  <role arn>`
fn role_listing(roles: &RoleMap, aliases: &AliasMap) -> Vec<String> {
    let mut rows: Vec<(String, String)> = roles
        .keys()
        .map(|role_arn| {
            let account = aws::roles::account_id(role_arn).unwrap_or("unknown");
            let label = match aliases.get(account) {
                Some(alias) if alias != account => format!("{alias} ({account})"),
                _ => account.to_string(),
            };
            (label, role_arn.clone())
        })
        .collect();
    rows.sort();

    rows.into_iter()
        .map(|(label, role_arn)| format!("{label}  {role_arn}"))
        .collect()
}
