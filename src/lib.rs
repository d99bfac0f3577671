//! Exchange a SAML assertion for temporary AWS credentials.
//!
//! The assertion is checked against its validity window ([`saml`]), the
//! roles it grants are extracted ([`aws::roles`]), and
//! [`aws::CredentialBroker`] issues credentials through STS
//! `AssumeRoleWithSAML`, probing for the longest session the role allows.
//! [`aws::AliasResolver`] looks up account aliases for role listings and
//! [`output`] renders the result for shells or `credential_process`.

pub mod aws;
pub mod cli;
pub mod commands;
pub mod config;
pub mod constants;
pub mod output;
pub mod saml;
