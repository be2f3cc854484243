//! `humantime` (de)serialization for [`Duration`] config fields.
//!
//! ```
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Settings {
//!     #[serde(with = "credmgr_utils::duration_serde")]
//!     timeout: Duration,
//!     #[serde(default, with = "credmgr_utils::duration_serde::option")]
//!     ttl: Option<Duration>,
//! }
//!
//! let s: Settings = serde_json::from_str(r#"{"timeout":"1m 30s"}"#).unwrap();
//! assert_eq!(s.timeout, Duration::from_secs(90));
//! assert!(s.ttl.is_none());
//! ```

use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

/// # Errors
///
/// Returns an error if the value is not a string accepted by
/// [`humantime::parse_duration`].
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(|e| D::Error::custom(format!("'{raw}': {e}")))
}

/// # Errors
///
/// Propagates serializer errors.
#[allow(clippy::trivially_copy_pass_by_ref)]
pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(&humantime::format_duration(*value))
}

/// Same as the parent module for `Option<Duration>`; `null` maps to `None`.
pub mod option {
    use super::{Deserialize, Deserializer, Duration, Serializer};
    use serde::de::Error as _;

    /// # Errors
    ///
    /// Returns an error if a present value is not a valid humantime duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => humantime::parse_duration(&raw)
                .map(Some)
                .map_err(|e| D::Error::custom(format!("'{raw}': {e}"))),
        }
    }

    /// # Errors
    ///
    /// Propagates serializer errors.
    #[allow(clippy::ref_option)]
    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.collect_str(&humantime::format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }
}
