//! SSH key fingerprint allow-list

use crate::error::{Error, Result};
use crate::protocol::Identity;

/// Allow-list of SSH key fingerprints
///
/// Entries use the OpenSSH `SHA256:<base64>` form. Base64 is
/// case-sensitive, so entries are compared verbatim; an entry may be a
/// prefix of the full fingerprint for convenience.
#[derive(Debug, Clone, Default)]
pub struct FingerprintAllowList {
    patterns: Vec<String>,
}

impl FingerprintAllowList {
    /// Create a new fingerprint allow-list
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            if !pattern.starts_with("SHA256:") {
                return Err(Error::Config(format!(
                    "Invalid fingerprint format: {}. Expected SHA256:...",
                    pattern
                )));
            }
            parsed.push(pattern.to_string());
        }
        Ok(Self { patterns: parsed })
    }

    /// Whether the list is empty (and therefore allows every key)
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Get the configured patterns
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Check a rendered fingerprint against the list
    pub fn is_allowed(&self, fingerprint: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| fingerprint.starts_with(p.as_str()))
    }

    /// Check whether the given identity is allowed
    pub fn matches(&self, identity: &Identity) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        match identity.fingerprint() {
            Some(fp) => self.is_allowed(&fp.to_string()),
            None => false,
        }
    }
}
