use anyhow::{Context, Result, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::{NsReader, Reader};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::constants::SAML_ASSERTION_NS;

/// Timestamp layout used by `Conditions` bounds
const SAML_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// chrono treats the fraction as optional; bounds must carry 1 to 6 digits
static SAML_TIMESTAMP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{1,6}Z$")
        .expect("valid timestamp pattern")
});

/// SAML assertion as received from the identity provider
///
/// Holds the decoded XML and the base64 form STS expects. Immutable once built.
#[derive(Debug, Clone)]
pub struct Assertion {
    decoded_xml: Vec<u8>,
    encoded: String,
}

/// Validity bounds taken from the assertion's `Conditions` element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub not_before: DateTime<Utc>,
    pub not_on_or_after: DateTime<Utc>,
}

impl ValidityWindow {
    /// Half-open check: `not_before <= now < not_on_or_after`
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now < self.not_on_or_after
    }

    fn from_conditions(conditions: &BytesStart) -> Result<Self> {
        Ok(Self {
            not_before: timestamp_attribute(conditions, "NotBefore")?,
            not_on_or_after: timestamp_attribute(conditions, "NotOnOrAfter")?,
        })
    }
}

impl Assertion {
    /// Create from the Base64-encoded `SAMLResponse` form
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let encoded: String = encoded.split_whitespace().collect();
        let decoded = STANDARD
            .decode(&encoded)
            .context("Failed to decode SAML assertion from base64")?;
        Ok(Self {
            decoded_xml: decoded,
            encoded,
        })
    }

    /// Create from the raw XML document
    pub fn from_xml(xml: impl Into<Vec<u8>>) -> Self {
        let decoded_xml = xml.into();
        let encoded = STANDARD.encode(&decoded_xml);
        Self {
            decoded_xml,
            encoded,
        }
    }

    /// Get the raw decoded XML content
    pub fn as_bytes(&self) -> &[u8] {
        &self.decoded_xml
    }

    /// Base64 transport form sent as `SAMLAssertion`
    pub fn base64(&self) -> &str {
        &self.encoded
    }

    /// Whether the assertion is inside its validity window right now
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Whether the assertion is inside its validity window at `now`.
    ///
    /// Never fails: any parse problem, a missing `Conditions` element or a
    /// malformed bound is reported as `false`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.validity_window() {
            Ok(window) => window.contains(now),
            Err(e) => {
                debug!("Treating SAML assertion as invalid: {:#}", e);
                false
            }
        }
    }

    /// Read the first `saml:Conditions` element of the assertion
    pub fn validity_window(&self) -> Result<ValidityWindow> {
        let mut reader = NsReader::from_reader(self.decoded_xml.as_slice());
        let mut buf = Vec::new();

        loop {
            match reader.read_resolved_event_into(&mut buf) {
                Ok((ResolveResult::Bound(Namespace(ns)), Event::Start(e) | Event::Empty(e)))
                    if ns == SAML_ASSERTION_NS && e.local_name().as_ref() == b"Conditions" =>
                {
                    return ValidityWindow::from_conditions(&e);
                }
                Ok((_, Event::Eof)) => bail!("No Conditions element found in SAML assertion"),
                Err(e) => bail!("Error parsing SAML assertion: {}", e),
                _ => {}
            }
            buf.clear();
        }
    }

    /// Collect every text node below elements whose `Name` attribute matches.
    ///
    /// Returns an empty list when no such element exists; only XML syntax
    /// errors are reported.
    pub fn attribute_values(&self, attribute_name: &str) -> Result<Vec<String>> {
        let mut reader = Reader::from_reader(self.decoded_xml.as_slice());
        reader.config_mut().trim_text(true);

        let mut values = Vec::new();
        // nesting depth inside a matching element, 0 while outside
        let mut depth = 0usize;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    if depth > 0 {
                        depth += 1;
                    } else if check_attribute_name(e, attribute_name) {
                        depth = 1;
                    }
                }
                Ok(Event::End(_)) if depth > 0 => depth -= 1,
                Ok(Event::Text(e)) if depth > 0 => {
                    let text = e
                        .unescape()
                        .context("Failed to unescape SAML attribute value")?;
                    values.push(text.into_owned());
                }
                Ok(Event::CData(e)) if depth > 0 => {
                    values.push(String::from_utf8_lossy(e.as_ref()).to_string());
                }
                Ok(Event::Eof) => break,
                Err(e) => bail!("Error parsing SAML assertion: {}", e),
                _ => {}
            }
            buf.clear();
        }

        Ok(values)
    }
}

/// Check if the element carries `Name="<attribute_name>"`
fn check_attribute_name(e: &BytesStart, attribute_name: &str) -> bool {
    e.attributes().filter_map(Result::ok).any(|attr| {
        attr.key.as_ref() == b"Name" && attr.value.as_ref() == attribute_name.as_bytes()
    })
}

fn timestamp_attribute(e: &BytesStart, name: &str) -> Result<DateTime<Utc>> {
    let attr = e
        .try_get_attribute(name)
        .with_context(|| format!("Malformed {name} attribute"))?
        .with_context(|| format!("Conditions element has no {name} attribute"))?;
    let value = std::str::from_utf8(&attr.value)
        .with_context(|| format!("{name} is not valid UTF-8"))?;
    parse_saml_timestamp(value)
}

/// Parse a UTC SAML timestamp such as `2024-05-01T10:00:00.123456Z`
pub fn parse_saml_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if !SAML_TIMESTAMP_PATTERN.is_match(value) {
        bail!("Invalid SAML timestamp: {value}");
    }
    NaiveDateTime::parse_from_str(value, SAML_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .with_context(|| format!("Invalid SAML timestamp: {value}"))
}
