use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;

use crate::constants::{AWS_ROLE_ATTRIBUTE, IAM_PARTITION_MARKERS};
use crate::saml::Assertion;

/// Role ARN → SAML provider ARN, as listed in the assertion
pub type RoleMap = BTreeMap<String, String>;

/// AWS IAM role together with the SAML provider needed to assume it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleBinding {
    pub name: String,
    pub role_arn: String,
    pub principal_arn: String,
}

impl RoleBinding {
    pub fn new(role_arn: impl Into<String>, principal_arn: impl Into<String>) -> Self {
        let role_arn = role_arn.into();
        // arn:aws:iam::123456789012:role/RoleName
        let name = role_arn
            .split('/')
            .next_back()
            .map_or_else(|| "UnknownRole".to_string(), String::from);

        Self {
            name,
            role_arn,
            principal_arn: principal_arn.into(),
        }
    }

    pub fn account_id(&self) -> Option<&str> {
        account_id(&self.role_arn)
    }
}

/// Extract the role bindings offered by the assertion.
///
/// Values are split once on `,`; the first field becomes the key and the
/// second the value, in the order the identity provider sent them. Values
/// without an IAM partition marker or without a comma are skipped.
pub fn extract_roles(assertion: &Assertion) -> Result<RoleMap> {
    let values = assertion
        .attribute_values(AWS_ROLE_ATTRIBUTE)
        .context("Failed to read role attribute from SAML assertion")?;

    let roles = values
        .iter()
        .filter(|value| {
            IAM_PARTITION_MARKERS
                .iter()
                .any(|marker| value.contains(marker))
        })
        .filter_map(|value| value.split_once(','))
        .map(|(first, second)| (first.to_string(), second.to_string()))
        .collect();

    Ok(roles)
}

/// Account id segment of an ARN (`arn:partition:service:region:<account>:resource`)
pub fn account_id(arn: &str) -> Option<&str> {
    arn.split(':').nth(4).filter(|segment| !segment.is_empty())
}

/// Pick the role to assume.
///
/// `requested` may be a full role ARN or a role name. A single available
/// role is selected without a request; several require one.
pub fn select_role(roles: &RoleMap, requested: Option<&str>) -> Result<RoleBinding> {
    let bindings: Vec<RoleBinding> = roles
        .iter()
        .map(|(role_arn, principal_arn)| RoleBinding::new(role_arn, principal_arn))
        .collect();

    let available = || {
        bindings
            .iter()
            .map(|r| r.role_arn.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    match (bindings.len(), requested) {
        (0, _) => bail!("No roles found in SAML assertion"),
        (1, None) => Ok(bindings[0].clone()),
        (_, None) => bail!(
            "Multiple roles available. Please specify one with --role flag: {}",
            available()
        ),
        (_, Some(wanted)) => bindings
            .iter()
            .find(|r| r.role_arn == wanted || r.name == wanted)
            .cloned()
            .with_context(|| format!("Role '{wanted}' not found. Available roles: {}", available())),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn assertion_with_roles(values: &[&str]) -> Assertion {
        let values: String = values
            .iter()
            .map(|v| format!("<saml2:AttributeValue>{v}</saml2:AttributeValue>"))
            .collect();
        Assertion::from_xml(format!(
            r#"<saml2:Assertion xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion">
  <saml2:AttributeStatement>
    <saml2:Attribute Name="https://aws.amazon.com/SAML/Attributes/RoleSessionName">
      <saml2:AttributeValue>user@example.com</saml2:AttributeValue>
    </saml2:Attribute>
    <saml2:Attribute Name="https://aws.amazon.com/SAML/Attributes/Role">{values}</saml2:Attribute>
  </saml2:AttributeStatement>
</saml2:Assertion>"#
        ))
    }

    #[test]
    fn test_extract_roles_single_pair() {
        let assertion = assertion_with_roles(&[
            "arn:aws:iam::111111111111:role/Foo,arn:aws:iam::111111111111:saml-provider/Bar",
        ]);
        let roles = extract_roles(&assertion).unwrap();

        assert_eq!(roles.len(), 1);
        assert_eq!(
            roles["arn:aws:iam::111111111111:role/Foo"],
            "arn:aws:iam::111111111111:saml-provider/Bar"
        );
    }

    #[test]
    fn test_extract_roles_keeps_field_order() {
        let assertion = assertion_with_roles(&[
            "arn:aws:iam::123456789012:saml-provider/MyProvider,arn:aws:iam::123456789012:role/AdminRole",
        ]);
        let roles = extract_roles(&assertion).unwrap();

        assert_eq!(
            roles["arn:aws:iam::123456789012:saml-provider/MyProvider"],
            "arn:aws:iam::123456789012:role/AdminRole"
        );
    }

    #[test]
    fn test_extract_roles_govcloud_and_unrelated_values() {
        let assertion = assertion_with_roles(&[
            "arn:aws-us-gov:iam::222222222222:role/Gov,arn:aws-us-gov:iam::222222222222:saml-provider/Idp",
            "not-an-arn,still-not",
            "arn:aws:iam::333333333333:role/NoComma",
        ]);
        let roles = extract_roles(&assertion).unwrap();

        assert_eq!(roles.len(), 1);
        assert!(roles.contains_key("arn:aws-us-gov:iam::222222222222:role/Gov"));
    }

    #[test]
    fn test_extract_roles_without_attribute_is_empty() {
        let assertion = Assertion::from_xml(
            r#"<saml2:Assertion xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion"/>"#,
        );
        assert!(extract_roles(&assertion).unwrap().is_empty());
    }

    #[test]
    fn test_extract_roles_fails_on_broken_xml() {
        let assertion = Assertion::from_xml("<a><b></a>");
        assert!(extract_roles(&assertion).is_err());
    }

    #[test]
    fn test_account_id() {
        assert_eq!(
            account_id("arn:aws:iam::123456789012:role/MyRole"),
            Some("123456789012")
        );
        assert_eq!(account_id("arn:aws:iam:"), None);
        assert_eq!(account_id("garbage"), None);
    }

    #[test]
    fn test_role_binding_name() {
        let role = RoleBinding::new(
            "arn:aws:iam::123456789012:role/path/MyRole",
            "arn:aws:iam::123456789012:saml-provider/MyProvider",
        );
        assert_eq!(role.name, "MyRole");
        assert_eq!(role.account_id(), Some("123456789012"));
    }

    fn two_roles() -> RoleMap {
        RoleMap::from([
            (
                "arn:aws:iam::123456789012:role/Role1".to_string(),
                "arn:aws:iam::123456789012:saml-provider/Provider".to_string(),
            ),
            (
                "arn:aws:iam::210987654321:role/Role2".to_string(),
                "arn:aws:iam::210987654321:saml-provider/Provider".to_string(),
            ),
        ])
    }

    #[test]
    fn test_select_single_role() {
        let mut roles = two_roles();
        roles.remove("arn:aws:iam::210987654321:role/Role2");

        let selected = select_role(&roles, None).unwrap();
        assert_eq!(selected.role_arn, "arn:aws:iam::123456789012:role/Role1");

        let result = select_role(&roles, Some("WrongRole"));
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_select_from_multiple_roles() {
        let roles = two_roles();

        let result = select_role(&roles, None);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Multiple roles available")
        );

        let by_name = select_role(&roles, Some("Role2")).unwrap();
        assert_eq!(
            by_name.principal_arn,
            "arn:aws:iam::210987654321:saml-provider/Provider"
        );

        let by_arn = select_role(&roles, Some("arn:aws:iam::123456789012:role/Role1")).unwrap();
        assert_eq!(by_arn.name, "Role1");
    }

    #[test]
    fn test_select_without_roles() {
        let result = select_role(&RoleMap::new(), None);
        assert!(result.unwrap_err().to_string().contains("No roles found"));
    }
}
