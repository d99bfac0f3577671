use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::info;

use super::AssertionArgs;
use crate::{
    aws::{self, BrokerConfig, CredentialBroker, RoleBinding, RoleMap, sts::StsTokenService},
    config::{self, Config},
    output::{self, OutputFormat},
    saml::Assertion,
};

#[derive(Debug, Clone, Default, Args)]
pub struct CredentialsCommand {
    #[command(flatten)]
    pub assertion: AssertionArgs,

    #[arg(short = 'r', long, help = "Role to assume, by name or full ARN")]
    pub role: Option<String>,

    #[arg(long, help = "Role ARN to assume, skipping selection")]
    pub role_arn: Option<String>,

    #[arg(long, help = "SAML provider ARN paired with --role-arn")]
    pub principal_arn: Option<String>,

    #[arg(long, help = "AWS region for the STS call")]
    pub region: Option<String>,

    #[arg(short = 'd', long, help = "Session duration in seconds")]
    pub duration: Option<i32>,

    #[arg(long, help = "Do not probe for the longest allowed session duration")]
    pub no_auto_duration: bool,

    #[arg(long, value_name = "SECONDS", help = "Session duration probed first")]
    pub max_duration: Option<i32>,

    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Export, help = "Output format")]
    pub format: OutputFormat,

    #[arg(long, help = "Save the credentials to the profile in the AWS credentials file")]
    pub save: bool,

    #[arg(long, help = "Reuse unexpired credentials saved for the profile")]
    pub cached: bool,
}

impl CredentialsCommand {
    pub async fn execute(self, profile: &str) -> Result<()> {
        info!("Requesting credentials for profile: {}", profile);

        let mut config = config::load(profile)
            .await
            .with_context(|| format!("Failed to load configuration for profile '{profile}'"))?;
        self.apply_overrides(&mut config);

        if self.cached {
            if let Some(cached) = aws::credentials::load_cached_credentials(profile).await? {
                info!("Using cached credentials for profile: {}", profile);
                let role = RoleBinding::new(
                    config.role_arn.clone().unwrap_or_default(),
                    config.provider_arn.clone().unwrap_or_default(),
                );
                let broker_config = config.broker_config(&role, Some(cached));
                return self.emit(profile, &broker_config, None).await;
            }
        }

        let assertion = self.assertion.read().await?;
        if !assertion.is_valid() {
            bail!("SAML assertion is expired or invalid");
        }

        let roles = aws::roles::extract_roles(&assertion)
            .context("Failed to extract roles from SAML assertion")?;
        let selected_role = self.select_role(&config, &roles)?;

        info!(
            "Requesting AWS credentials for role: {}",
            selected_role.role_arn
        );

        let broker_config = config.broker_config(&selected_role, None);
        self.emit(profile, &broker_config, Some(&assertion)).await
    }

    async fn emit(
        &self,
        profile: &str,
        broker_config: &BrokerConfig,
        assertion: Option<&Assertion>,
    ) -> Result<()> {
        let broker = CredentialBroker::new(
            StsTokenService::new(broker_config.region.as_deref()),
            broker_config,
            assertion,
        );
        let credentials = broker.get_credential().await?;

        if self.save && assertion.is_some() {
            aws::credentials::save_credentials(profile, credentials)
                .await
                .context("Failed to save AWS credentials")?;
        }

        println!("{}", output::render(self.format, credentials)?);
        Ok(())
    }

    fn apply_overrides(&self, config: &mut Config) {
        if let Some(role_arn) = &self.role_arn {
            config.role_arn = Some(role_arn.clone());
        }
        if let Some(principal_arn) = &self.principal_arn {
            config.provider_arn = Some(principal_arn.clone());
        }
        if let Some(region) = &self.region {
            config.region = Some(region.clone());
        }
        if let Some(duration) = self.duration {
            config.duration = Some(duration);
        }
        if let Some(max_duration) = self.max_duration {
            config.max_duration = max_duration;
        }
        if self.no_auto_duration {
            config.auto_duration = false;
        }
    }

    /// An explicit role/provider pair wins; otherwise pick from the assertion
    fn select_role(&self, config: &Config, roles: &RoleMap) -> Result<RoleBinding> {
        if let (Some(role_arn), Some(provider_arn)) = (&config.role_arn, &config.provider_arn) {
            return Ok(RoleBinding::new(role_arn, provider_arn));
        }

        let requested = self.role.as_deref().or(config.role_arn.as_deref());
        aws::roles::select_role(roles, requested).context("Failed to select role")
    }
}
