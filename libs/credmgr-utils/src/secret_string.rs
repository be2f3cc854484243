use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque wrapper around a secret string value (tokens, client secrets).
///
/// `Debug` and `Display` both print `[REDACTED]`. Use
/// [`expose`](Self::expose) for controlled access when building request
/// headers, form bodies or the persistence document.
///
/// The backing buffer is zeroed on [`Drop`].
///
/// Deserializes from a plain string so secrets can live in configuration
/// files. Serializes as `[REDACTED]`, so dumping a config never leaks them.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read-only access to the underlying secret.
    ///
    /// Callers must not log or otherwise leak the returned slice.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Default for SecretString {
    fn default() -> Self {
        Self(String::new())
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self)
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn formatting_is_redacted() {
        let s = SecretString::new("hunter2");
        assert_eq!(format!("{s:?}"), "[REDACTED]");
        assert_eq!(format!("{s}"), "[REDACTED]");
    }

    #[test]
    fn debug_of_containing_struct_hides_secret() {
        #[derive(Debug)]
        #[allow(dead_code)]
        struct Holder {
            token: SecretString,
        }

        let holder = Holder {
            token: SecretString::new("tok-abc-123"),
        };
        let dbg = format!("{holder:?}");
        assert!(!dbg.contains("tok-abc-123"), "got: {dbg}");
    }

    #[test]
    fn expose_and_is_empty() {
        assert_eq!(SecretString::new("value").expose(), "value");
        assert!(SecretString::default().is_empty());
        assert!(!SecretString::from("x").is_empty());
    }

    #[test]
    fn deserializes_from_plain_string() {
        let s: SecretString = serde_json::from_str(r#""from-config""#).unwrap();
        assert_eq!(s.expose(), "from-config");
    }

    #[test]
    fn serializes_redacted() {
        let json = serde_json::to_string(&SecretString::new("hunter2")).unwrap();
        assert_eq!(json, r#""[REDACTED]""#);
    }

    #[test]
    fn zeroize_clears_buffer() {
        let mut s = SecretString::new("sensitive");
        s.zeroize();
        assert!(s.is_empty(), "buffer should be empty after zeroize");
    }
}
