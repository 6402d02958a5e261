//! Credential bundle normalisation.
//!
//! A bundle arrives either as a JSON array of `{ "key" | "name", "value" }`
//! entries or as a raw `k=v; k2=v2` header string. Both normalise to the
//! header form attached to outbound calls.

use std::fmt;

use serde::Deserialize;

use crate::error::DispatchError;

const DEFAULT_REQUIRED_KEY: &str = "sb";

/// Transport-ready identity string. Its contents never appear in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity(String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity(<redacted {} bytes>)", self.0.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPolicy {
    /// Key that must be present for the bundle to be accepted.
    pub required_key: String,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            required_key: DEFAULT_REQUIRED_KEY.to_string(),
        }
    }
}

impl CredentialPolicy {
    pub fn new(required_key: impl Into<String>) -> Self {
        Self {
            required_key: required_key.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BundleEntry {
    #[serde(alias = "name")]
    key: String,
    value: String,
}

/// Converts an opaque credential bundle into a semicolon-joined identity string.
///
/// ```
/// use boost_core::{CredentialPolicy, normalize_credential};
///
/// let bundle = r#"[{"key":"sb","value":"abc"},{"name":"lang","value":"en"}]"#;
/// let identity = normalize_credential(bundle, &CredentialPolicy::default()).unwrap();
/// assert_eq!(identity.as_str(), "sb=abc; lang=en");
/// ```
pub fn normalize_credential(
    bundle: &str,
    policy: &CredentialPolicy,
) -> Result<Identity, DispatchError> {
    let trimmed = bundle.trim();
    if trimmed.is_empty() {
        return Err(invalid("credential bundle is empty"));
    }

    let pairs = if trimmed.starts_with('[') {
        parse_json_bundle(trimmed)?
    } else {
        parse_header_bundle(trimmed)?
    };

    if pairs.is_empty() {
        return Err(invalid("credential bundle has no entries"));
    }
    if !pairs.iter().any(|(key, _)| key == &policy.required_key) {
        return Err(invalid(format!(
            "credential bundle is missing required key `{}`",
            policy.required_key
        )));
    }

    let joined = pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("; ");
    Ok(Identity(joined))
}

fn parse_json_bundle(raw: &str) -> Result<Vec<(String, String)>, DispatchError> {
    let entries: Vec<BundleEntry> = serde_json::from_str(raw)
        .map_err(|err| invalid(format!("credential bundle is not a key/value array: {err}")))?;
    entries
        .into_iter()
        .map(|entry| {
            let key = entry.key.trim().to_string();
            if key.is_empty() {
                return Err(invalid("credential entry has an empty key"));
            }
            Ok((key, entry.value))
        })
        .collect()
}

fn parse_header_bundle(raw: &str) -> Result<Vec<(String, String)>, DispatchError> {
    raw.split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| invalid(format!("credential segment `{segment}` has no `=`")))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(invalid("credential entry has an empty key"));
            }
            Ok((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn invalid(message: impl Into<String>) -> DispatchError {
    DispatchError::InvalidCredentialFormat(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CredentialPolicy {
        CredentialPolicy::new("sid")
    }

    #[test]
    fn json_bundle_preserves_order() {
        let bundle = r#"[
            {"key": "c_user", "value": "42", "domain": ".example.test"},
            {"key": "sid", "value": "s3cr3t"},
            {"key": "xs", "value": "a%3Ab"}
        ]"#;
        let identity = normalize_credential(bundle, &policy()).unwrap();
        assert_eq!(identity.as_str(), "c_user=42; sid=s3cr3t; xs=a%3Ab");
    }

    #[test]
    fn default_policy_accepts_appstate_export() {
        let bundle = r#"[
            {"key": "sb", "value": "Zx1", "domain": ".example.test", "path": "/", "hostOnly": false},
            {"key": "c_user", "value": "1000", "domain": ".example.test"},
            {"key": "xs", "value": "9%3Aab", "domain": ".example.test"}
        ]"#;
        let identity = normalize_credential(bundle, &CredentialPolicy::default()).unwrap();
        assert_eq!(identity.as_str(), "sb=Zx1; c_user=1000; xs=9%3Aab");
    }

    #[test]
    fn header_bundle_is_trimmed_and_rejoined() {
        let identity = normalize_credential(" sid=abc;lang = en ; ", &policy()).unwrap();
        assert_eq!(identity.as_str(), "sid=abc; lang=en");
    }

    #[test]
    fn header_value_may_contain_equals() {
        let identity = normalize_credential("sid=a=b", &policy()).unwrap();
        assert_eq!(identity.as_str(), "sid=a=b");
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let err = normalize_credential(r#"[{"key":"lang","value":"en"}]"#, &policy()).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidCredentialFormat(ref m) if m.contains("sid")));
    }

    #[test]
    fn malformed_bundles_are_rejected() {
        for bundle in [
            "",
            "   ",
            "[",
            r#"[{"value":"x"}]"#,
            r#"[{"key":"sid","value":1}]"#,
            r#"[{"key":" ","value":"x"}]"#,
            "[]",
            "sid",
            "=abc; sid=1",
        ] {
            let err = normalize_credential(bundle, &policy()).unwrap_err();
            assert_eq!(err.code(), "invalid_credential_format", "bundle {bundle:?}");
        }
    }

    #[test]
    fn debug_output_is_redacted() {
        let identity = normalize_credential("sid=topsecret", &policy()).unwrap();
        let rendered = format!("{identity:?}");
        assert!(!rendered.contains("topsecret"));
    }
}
