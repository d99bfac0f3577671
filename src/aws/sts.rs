use aws_config::{BehaviorVersion, Region};
use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sts::{Client as StsClient, config::Config as StsConfig};
use regex::Regex;
use std::{future::Future, sync::LazyLock};
use thiserror::Error;
use tracing::{debug, info};

use super::Credentials;
use crate::constants::DEFAULT_AWS_REGION;

static MAX_DURATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Member must have value less than or equal to ([0-9]{3,5})")
        .expect("valid duration pattern")
});

/// Parameters for a single `AssumeRoleWithSAML` call
#[derive(Debug, Clone, Copy)]
pub struct AssumeRoleRequest<'a> {
    pub role_arn: &'a str,
    pub principal_arn: &'a str,
    /// Base64-encoded SAML assertion
    pub saml_assertion: &'a str,
    /// `None` leaves the session length to STS
    pub duration_seconds: Option<i32>,
}

/// Failure of a token-issuing call
#[derive(Debug, Error)]
pub enum TokenError {
    /// No usable anonymous identity could be set up for the call
    #[error("Unable to prepare an anonymous STS request: {0}")]
    ProfileResolution(String),

    /// STS rejected the request
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    /// The request never produced a service response
    #[error("Failed to reach AWS: {0}")]
    Transport(String),
}

impl TokenError {
    /// Upper bound embedded in a `ValidationError` about `DurationSeconds`
    pub fn max_duration_hint(&self) -> Option<i32> {
        match self {
            Self::Service { code, message } if code == "ValidationError" => MAX_DURATION_PATTERN
                .captures(message)
                .and_then(|captures| captures.get(1))
                .and_then(|m| m.as_str().parse().ok()),
            _ => None,
        }
    }

    pub fn from_sdk_error<E, R>(err: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug + Send + Sync + 'static,
    {
        match &err {
            SdkError::ConstructionFailure(_) => {
                Self::ProfileResolution(DisplayErrorContext(&err).to_string())
            }
            SdkError::ServiceError(_) => Self::Service {
                code: err.code().unwrap_or("Unknown").to_string(),
                message: err.message().unwrap_or_default().to_string(),
            },
            _ => Self::Transport(DisplayErrorContext(&err).to_string()),
        }
    }
}

/// Token-issuing endpoint accepting a SAML assertion
pub trait TokenService {
    fn assume_role_with_saml(
        &self,
        request: AssumeRoleRequest<'_>,
    ) -> impl Future<Output = Result<Credentials, TokenError>> + Send;
}

/// AWS STS backed [`TokenService`].
///
/// A client is built per call from explicit settings only, so profile
/// selection in the environment (`AWS_PROFILE`) never leaks into the request.
#[derive(Debug, Clone)]
pub struct StsTokenService {
    region: Region,
}

impl StsTokenService {
    pub fn new(region: Option<&str>) -> Self {
        let region = region.unwrap_or(DEFAULT_AWS_REGION).to_string();
        Self {
            region: Region::new(region),
        }
    }

    fn client(&self) -> StsClient {
        // no credentials provider: AssumeRoleWithSAML is sent unsigned
        let config = StsConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(self.region.clone())
            .build();
        StsClient::from_conf(config)
    }
}

impl TokenService for StsTokenService {
    async fn assume_role_with_saml(
        &self,
        request: AssumeRoleRequest<'_>,
    ) -> Result<Credentials, TokenError> {
        info!("Calling AWS STS AssumeRoleWithSAML");
        debug!("Region: {}", self.region);
        debug!("Role ARN: {}", request.role_arn);
        debug!("Principal ARN: {}", request.principal_arn);
        debug!("Duration: {:?} seconds", request.duration_seconds);

        let response = self
            .client()
            .assume_role_with_saml()
            .role_arn(request.role_arn)
            .principal_arn(request.principal_arn)
            .saml_assertion(request.saml_assertion)
            .set_duration_seconds(request.duration_seconds)
            .send()
            .await
            .map_err(TokenError::from_sdk_error)?;

        let sts_creds = response
            .credentials()
            .ok_or_else(|| TokenError::Transport("AWS STS returned no credentials".into()))?;

        let expiration = sts_creds.expiration();
        let expiration =
            chrono::DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos())
                .ok_or_else(|| {
                    TokenError::Transport(format!("Invalid credential expiration: {expiration:?}"))
                })?;

        Ok(Credentials {
            access_key_id: sts_creds.access_key_id().to_string(),
            secret_access_key: sts_creds.secret_access_key().to_string(),
            session_token: sts_creds.session_token().to_string(),
            expiration,
        })
    }
}
