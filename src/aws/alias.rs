use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_iam::{Client as IamClient, config::Config as IamConfig};
use futures::future::join_all;
use std::{collections::HashMap, future::Future};
use tracing::{debug, info};

use super::Credentials;
use super::roles::{RoleMap, account_id};
use super::sts::{AssumeRoleRequest, TokenService};
use crate::constants::DEFAULT_AWS_REGION;
use crate::saml::Assertion;

/// Account id → account alias (the id itself when no alias could be found)
pub type AliasMap = HashMap<String, String>;

/// Lists the IAM aliases of the account a credential belongs to
pub trait AliasService {
    fn list_account_aliases(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// IAM `ListAccountAliases` backed [`AliasService`]
#[derive(Debug, Clone)]
pub struct IamAliasService {
    region: Region,
}

impl IamAliasService {
    pub fn new(region: Option<&str>) -> Self {
        let region = region.unwrap_or(DEFAULT_AWS_REGION).to_string();
        Self {
            region: Region::new(region),
        }
    }
}

impl AliasService for IamAliasService {
    async fn list_account_aliases(&self, credentials: &Credentials) -> Result<Vec<String>> {
        let provider = aws_sdk_iam::config::Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            Some(credentials.session_token.clone()),
            None,
            "samlex",
        );
        let config = IamConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(self.region.clone())
            .credentials_provider(provider)
            .build();

        let response = IamClient::from_conf(config)
            .list_account_aliases()
            .send()
            .await
            .context("Failed to list account aliases")?;

        Ok(response.account_aliases().to_vec())
    }
}

/// Best-effort lookup of human-readable account names for a set of roles
pub struct AliasResolver<'a, T, A> {
    tokens: T,
    aliases: A,
    assertion: &'a Assertion,
}

impl<'a, T: TokenService, A: AliasService> AliasResolver<'a, T, A> {
    pub fn new(tokens: T, aliases: A, assertion: &'a Assertion) -> Self {
        Self {
            tokens,
            aliases,
            assertion,
        }
    }

    /// Resolve the alias of every role's account concurrently.
    ///
    /// Never fails: a role whose lookup fails maps its account id to itself,
    /// unless another role in the same account found the alias.
    pub async fn resolve_aliases(&self, roles: &RoleMap) -> AliasMap {
        info!("Resolving account aliases for {} roles", roles.len());

        let lookups = roles
            .iter()
            .map(|(role_arn, principal_arn)| self.resolve_alias(role_arn, principal_arn));

        let mut resolved = AliasMap::new();
        for (account, alias) in join_all(lookups).await {
            // a real alias outranks the fallback from a sibling role in the same account
            let has_alias = resolved
                .get(&account)
                .is_some_and(|existing| *existing != account);
            if !has_alias {
                resolved.insert(account, alias);
            }
        }
        resolved
    }

    async fn resolve_alias(&self, role_arn: &str, principal_arn: &str) -> (String, String) {
        let account = account_id(role_arn).unwrap_or(role_arn).to_string();

        match self.lookup_alias(role_arn, principal_arn).await {
            Ok(alias) => (account, alias),
            Err(e) => {
                debug!("Failing to resolve alias for {}: {:#}", role_arn, e);
                (account.clone(), account)
            }
        }
    }

    async fn lookup_alias(&self, role_arn: &str, principal_arn: &str) -> Result<String> {
        let request = AssumeRoleRequest {
            role_arn,
            principal_arn,
            saml_assertion: self.assertion.base64(),
            duration_seconds: None,
        };
        let credentials = self.tokens.assume_role_with_saml(request).await?;

        self.aliases
            .list_account_aliases(&credentials)
            .await?
            .into_iter()
            .next()
            .context("Account has no alias")
    }
}
