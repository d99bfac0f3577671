use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::Credentials;
use super::sts::{AssumeRoleRequest, TokenError, TokenService};
use crate::constants::DEFAULT_MAX_DURATION_SECONDS;
use crate::saml::Assertion;

/// Settings the broker needs to issue credentials for one role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub role_arn: String,
    pub provider_arn: String,
    pub region: Option<String>,
    /// Explicit session length, used when negotiation is off
    pub duration: Option<i32>,
    /// Probe `max_duration` first and narrow to the bound STS reports
    pub auto_duration: bool,
    pub max_duration: i32,
    /// Previously issued credentials; when set no STS call is made
    pub token_cache: Option<Credentials>,
}

impl BrokerConfig {
    pub fn new(role_arn: impl Into<String>, provider_arn: impl Into<String>) -> Self {
        Self {
            role_arn: role_arn.into(),
            provider_arn: provider_arn.into(),
            region: None,
            duration: None,
            auto_duration: true,
            max_duration: DEFAULT_MAX_DURATION_SECONDS,
            token_cache: None,
        }
    }
}

/// Result of one `AssumeRoleWithSAML` call as seen by the negotiation loop
#[derive(Debug)]
enum AttemptOutcome {
    Issued(Credentials),
    NeedsNarrowing(i32),
    Fatal(TokenError),
}

/// Issues credentials for the configured role and memoizes them.
///
/// The first caller of [`CredentialBroker::get_credential`] pays for the STS
/// round trips; concurrent callers wait on the same cell and never trigger a
/// second issuance.
pub struct CredentialBroker<'a, S> {
    service: S,
    config: &'a BrokerConfig,
    assertion: Option<&'a Assertion>,
    credentials: OnceCell<Credentials>,
}

impl<'a, S: TokenService> CredentialBroker<'a, S> {
    pub fn new(service: S, config: &'a BrokerConfig, assertion: Option<&'a Assertion>) -> Self {
        Self {
            service,
            config,
            assertion,
            credentials: OnceCell::new_with(config.token_cache.clone()),
        }
    }

    /// Whether credentials are already materialized
    pub fn is_issued(&self) -> bool {
        self.credentials.initialized()
    }

    /// Memoized credentials, issued on first use
    pub async fn get_credential(&self) -> Result<&Credentials> {
        self.credentials
            .get_or_try_init(|| async {
                let assertion = self
                    .assertion
                    .context("No SAML assertion available to request credentials")?;
                let credentials = self
                    .issue(
                        &self.config.role_arn,
                        &self.config.provider_arn,
                        assertion,
                        self.config.duration,
                        true,
                    )
                    .await?;
                Ok::<_, anyhow::Error>(credentials)
            })
            .await
    }

    pub async fn access_key_id(&self) -> Result<&str> {
        Ok(&self.get_credential().await?.access_key_id)
    }

    pub async fn secret_access_key(&self) -> Result<&str> {
        Ok(&self.get_credential().await?.secret_access_key)
    }

    pub async fn session_token(&self) -> Result<&str> {
        Ok(&self.get_credential().await?.session_token)
    }

    pub async fn expiration(&self) -> Result<DateTime<Utc>> {
        Ok(self.get_credential().await?.expiration)
    }

    /// Run the duration negotiation for one role.
    ///
    /// With negotiation enabled the first call asks for `max_duration`; a
    /// validation error carrying the allowed maximum is retried once with
    /// that value. Otherwise `duration` is sent as given (or omitted). No more
    /// than two calls are made and the retry never negotiates again.
    pub async fn issue(
        &self,
        role_arn: &str,
        principal_arn: &str,
        assertion: &Assertion,
        duration: Option<i32>,
        auto_duration: bool,
    ) -> Result<Credentials, TokenError> {
        let mut negotiating = self.config.auto_duration && auto_duration;
        let mut duration = duration;

        loop {
            let request = AssumeRoleRequest {
                role_arn,
                principal_arn,
                saml_assertion: assertion.base64(),
                duration_seconds: if negotiating {
                    Some(self.config.max_duration)
                } else {
                    duration
                },
            };

            match self.attempt(request, negotiating).await {
                AttemptOutcome::Issued(credentials) => {
                    info!("Successfully obtained AWS credentials");
                    return Ok(credentials);
                }
                AttemptOutcome::NeedsNarrowing(seconds) => {
                    info!(
                        "Requested duration rejected, retrying with {} seconds",
                        seconds
                    );
                    negotiating = false;
                    duration = Some(seconds);
                }
                AttemptOutcome::Fatal(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, request: AssumeRoleRequest<'_>, negotiating: bool) -> AttemptOutcome {
        match self.service.assume_role_with_saml(request).await {
            Ok(credentials) => AttemptOutcome::Issued(credentials),
            Err(e) => match e.max_duration_hint() {
                Some(seconds) if negotiating => AttemptOutcome::NeedsNarrowing(seconds),
                _ => {
                    debug!("AssumeRoleWithSAML failed: {}", e);
                    AttemptOutcome::Fatal(e)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::sts::tests::{FakeTokenService, credentials, validation_error};

    const ROLE: &str = "arn:aws:iam::111111111111:role/Foo";
    const PROVIDER: &str = "arn:aws:iam::111111111111:saml-provider/Bar";

    fn assertion() -> Assertion {
        Assertion::from_xml("<saml:Assertion/>")
    }

    #[tokio::test]
    async fn test_narrows_duration_after_validation_error() {
        let config = BrokerConfig::new(ROLE, PROVIDER);
        let assertion = assertion();
        let service = FakeTokenService::new(vec![
            Err(validation_error(
                "Member must have value less than or equal to 28800",
            )),
            Ok(credentials("SECOND")),
        ]);
        let broker = CredentialBroker::new(service, &config, Some(&assertion));

        let issued = broker.get_credential().await.unwrap();
        assert_eq!(issued, &credentials("SECOND"));

        let calls = broker.service.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            (ROLE.to_string(), PROVIDER.to_string(), Some(43200))
        );
        assert_eq!(calls[1].2, Some(28800));
    }

    #[tokio::test]
    async fn test_unrelated_validation_error_is_fatal() {
        let config = BrokerConfig::new(ROLE, PROVIDER);
        let assertion = assertion();
        let service = FakeTokenService::new(vec![
            Err(validation_error("Invalid SAML assertion")),
            Ok(credentials("UNUSED")),
        ]);
        let broker = CredentialBroker::new(service, &config, Some(&assertion));

        let err = broker.get_credential().await.unwrap_err();
        let token_error = err.downcast_ref::<TokenError>().unwrap();
        assert_eq!(token_error.to_string(), "ValidationError: Invalid SAML assertion");
        assert_eq!(broker.service.calls().len(), 1);
        assert!(!broker.is_issued());
    }

    #[tokio::test]
    async fn test_narrowed_retry_does_not_negotiate_again() {
        let config = BrokerConfig::new(ROLE, PROVIDER);
        let assertion = assertion();
        let service = FakeTokenService::new(vec![
            Err(validation_error(
                "Member must have value less than or equal to 28800",
            )),
            Err(validation_error(
                "Member must have value less than or equal to 3600",
            )),
            Ok(credentials("UNUSED")),
        ]);
        let broker = CredentialBroker::new(service, &config, Some(&assertion));

        let err = broker
            .issue(ROLE, PROVIDER, &assertion, None, true)
            .await
            .unwrap_err();
        assert_eq!(err.max_duration_hint(), Some(3600));
        assert_eq!(broker.service.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_fixed_duration_when_negotiation_disabled() {
        let mut config = BrokerConfig::new(ROLE, PROVIDER);
        config.auto_duration = false;
        config.duration = Some(3600);
        let assertion = assertion();
        let service = FakeTokenService::new(vec![Ok(credentials("FIXED"))]);
        let broker = CredentialBroker::new(service, &config, Some(&assertion));

        broker.get_credential().await.unwrap();
        assert_eq!(broker.service.calls()[0].2, Some(3600));
    }

    #[tokio::test]
    async fn test_duration_omitted_without_explicit_value() {
        let mut config = BrokerConfig::new(ROLE, PROVIDER);
        config.auto_duration = false;
        let assertion = assertion();
        let service = FakeTokenService::new(vec![Err(validation_error(
            "Member must have value less than or equal to 3600",
        ))]);
        let broker = CredentialBroker::new(service, &config, Some(&assertion));

        assert!(broker.get_credential().await.is_err());
        let calls = broker.service.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2, None);
    }

    #[tokio::test]
    async fn test_get_credential_is_memoized() {
        let config = BrokerConfig::new(ROLE, PROVIDER);
        let assertion = assertion();
        let service = FakeTokenService::new(vec![Ok(credentials("ONCE")), Ok(credentials("TWICE"))]);
        let broker = CredentialBroker::new(service, &config, Some(&assertion));

        let first = broker.get_credential().await.unwrap().clone();
        let second = broker.get_credential().await.unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(broker.access_key_id().await.unwrap(), "AKIAONCE");
        assert_eq!(broker.secret_access_key().await.unwrap(), "secret-ONCE");
        assert_eq!(broker.session_token().await.unwrap(), "token-ONCE");
        assert_eq!(broker.expiration().await.unwrap(), credentials("ONCE").expiration);
        assert_eq!(broker.service.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_issuance() {
        let config = BrokerConfig::new(ROLE, PROVIDER);
        let assertion = assertion();
        let service = FakeTokenService::new(vec![Ok(credentials("A")), Ok(credentials("B"))]);
        let broker = CredentialBroker::new(service, &config, Some(&assertion));

        let (first, second) = tokio::join!(broker.get_credential(), broker.access_key_id());
        assert_eq!(first.unwrap().access_key_id, "AKIAA");
        assert_eq!(second.unwrap(), "AKIAA");
        assert_eq!(broker.service.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_token_cache_skips_issuance() {
        let mut config = BrokerConfig::new(ROLE, PROVIDER);
        config.token_cache = Some(credentials("CACHED"));
        let broker = CredentialBroker::new(FakeTokenService::default(), &config, None);

        assert!(broker.is_issued());
        assert_eq!(broker.access_key_id().await.unwrap(), "AKIACACHED");
        assert!(broker.service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_assertion_without_cache_fails() {
        let config = BrokerConfig::new(ROLE, PROVIDER);
        let broker = CredentialBroker::new(FakeTokenService::default(), &config, None);

        let err = broker.get_credential().await.unwrap_err();
        assert!(err.to_string().contains("No SAML assertion"));
        assert!(broker.service.calls().is_empty());
    }
}
