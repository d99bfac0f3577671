use std::{env, path::PathBuf};

/// AWS configuration directory name
pub const AWS_CONFIG_DIR_NAME: &str = ".aws";

/// AWS configuration file name
pub const AWS_CONFIG_FILE_NAME: &str = "config";

/// AWS shared credentials file name
pub const AWS_CREDENTIALS_FILE_NAME: &str = "credentials";

/// SAML attribute carrying the `role,provider` ARN pairs
pub const AWS_ROLE_ATTRIBUTE: &str = "https://aws.amazon.com/SAML/Attributes/Role";

/// Namespace of the SAML 2.0 assertion elements
pub const SAML_ASSERTION_NS: &[u8] = b"urn:oasis:names:tc:SAML:2.0:assertion";

/// IAM partition markers recognized in role attribute values
pub const IAM_PARTITION_MARKERS: [&str; 2] = ["arn:aws:iam:", "arn:aws-us-gov:iam:"];

/// Default AWS region for STS and IAM calls when no region is configured
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Largest session duration STS accepts (12 hours), used as the negotiation probe
pub const DEFAULT_MAX_DURATION_SECONDS: i32 = 43_200;

/// Cached credentials closer than this to expiry are not reused
pub const TOKEN_CACHE_MIN_REMAINING_SECONDS: i64 = 300;

/// Get the AWS config file path
/// Respects AWS_CONFIG_FILE environment variable if set
pub fn get_aws_config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("AWS_CONFIG_FILE") {
        return Some(PathBuf::from(path));
    }

    dirs::home_dir().map(|home| home.join(AWS_CONFIG_DIR_NAME).join(AWS_CONFIG_FILE_NAME))
}

/// Get the AWS credentials file path
/// Respects AWS_SHARED_CREDENTIALS_FILE environment variable if set
pub fn get_aws_credentials_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("AWS_SHARED_CREDENTIALS_FILE") {
        return Some(PathBuf::from(path));
    }

    dirs::home_dir().map(|home| {
        home.join(AWS_CONFIG_DIR_NAME)
            .join(AWS_CREDENTIALS_FILE_NAME)
    })
}
