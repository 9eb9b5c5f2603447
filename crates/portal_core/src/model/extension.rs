//! Extension map and its Nagios side-record.
//!
//! # Responsibility
//! - Define the canonical in-memory extension map carried by alerts.
//! - Translate that map to and from the typed one-to-one side-record.
//!
//! # Invariants
//! - An empty map translates to "no side-record", never an empty record.
//! - A side-record always reads back as exactly the four fixed keys.
//! - Numeric keys are coerced to integers on write; non-numeric values are
//!   rejected instead of silently dropped.
//! - A non-empty map must carry at least one of the four keys.

use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Extension attributes keyed by name.
pub type Extensions = BTreeMap<String, Value>;

pub const SEVERITY_KEY: &str = "severity";
pub const NOTIFY_KEY: &str = "notify";
pub const MAX_CHECK_ATTEMPTS_KEY: &str = "maxCheckAttempts";
pub const FRESHNESS_THRESHOLD_KEY: &str = "freshnessThreshold";

const KNOWN_KEYS: [&str; 4] = [
    SEVERITY_KEY,
    NOTIFY_KEY,
    MAX_CHECK_ATTEMPTS_KEY,
    FRESHNESS_THRESHOLD_KEY,
];

/// Typed side-record stored next to an alert row.
///
/// Individual fields may be `None` when the map omitted the key; partial
/// extension sets are accepted on write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NagiosExtension {
    pub severity: Option<String>,
    pub notify: Option<String>,
    pub max_check_attempts: Option<i64>,
    pub freshness_threshold_seconds: Option<i64>,
}

/// Extension map cannot be converted to a side-record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionError {
    /// Value under `key` has a JSON type the side-record cannot hold.
    InvalidType {
        key: &'static str,
        expected: &'static str,
    },
    /// Numeric value under `key` does not fit a 64-bit integer.
    OutOfRange { key: &'static str },
    /// Non-empty map without any of the four side-record keys.
    NoKnownKeys { keys: Vec<String> },
}

impl Display for ExtensionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidType { key, expected } => {
                write!(f, "extension `{key}` must be {expected}")
            }
            Self::OutOfRange { key } => {
                write!(f, "extension `{key}` is out of the 64-bit integer range")
            }
            Self::NoKnownKeys { keys } => write!(
                f,
                "extensions [{}] carry none of {}",
                keys.join(", "),
                KNOWN_KEYS.join("|")
            ),
        }
    }
}

impl Error for ExtensionError {}

impl NagiosExtension {
    /// Builds the side-record for an extension map.
    ///
    /// Returns `Ok(None)` for an empty map. Keys outside the fixed four are
    /// not stored; a map made only of such keys is rejected.
    pub fn from_extensions(extensions: &Extensions) -> Result<Option<Self>, ExtensionError> {
        if extensions.is_empty() {
            return Ok(None);
        }
        if !KNOWN_KEYS.iter().any(|key| extensions.contains_key(*key)) {
            return Err(ExtensionError::NoKnownKeys {
                keys: extensions.keys().cloned().collect(),
            });
        }

        Ok(Some(Self {
            severity: read_text(extensions, SEVERITY_KEY)?,
            notify: read_text(extensions, NOTIFY_KEY)?,
            max_check_attempts: read_integer(extensions, MAX_CHECK_ATTEMPTS_KEY)?,
            freshness_threshold_seconds: read_integer(extensions, FRESHNESS_THRESHOLD_KEY)?,
        }))
    }

    /// Exposes a stored side-record (or its absence) as an extension map.
    pub fn to_extensions(record: Option<&Self>) -> Extensions {
        let mut extensions = Extensions::new();
        let Some(record) = record else {
            return extensions;
        };

        extensions.insert(SEVERITY_KEY.to_string(), text_value(&record.severity));
        extensions.insert(NOTIFY_KEY.to_string(), text_value(&record.notify));
        extensions.insert(
            MAX_CHECK_ATTEMPTS_KEY.to_string(),
            integer_value(record.max_check_attempts),
        );
        extensions.insert(
            FRESHNESS_THRESHOLD_KEY.to_string(),
            integer_value(record.freshness_threshold_seconds),
        );
        extensions
    }
}

fn read_text(extensions: &Extensions, key: &'static str) -> Result<Option<String>, ExtensionError> {
    match extensions.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(_) => Err(ExtensionError::InvalidType {
            key,
            expected: "a string",
        }),
    }
}

fn read_integer(extensions: &Extensions, key: &'static str) -> Result<Option<i64>, ExtensionError> {
    let invalid = ExtensionError::InvalidType {
        key,
        expected: "an integer",
    };

    match extensions.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => {
            if let Some(value) = number.as_i64() {
                return Ok(Some(value));
            }
            if number.is_u64() {
                return Err(ExtensionError::OutOfRange { key });
            }
            match number.as_f64() {
                Some(value) if value.fract() == 0.0 => float_to_i64(value, key).map(Some),
                _ => Err(invalid),
            }
        }
        Some(Value::String(text)) => text.trim().parse::<i64>().map(Some).map_err(|_| invalid),
        Some(_) => Err(invalid),
    }
}

fn float_to_i64(value: f64, key: &'static str) -> Result<i64, ExtensionError> {
    // 2^63 is exactly representable; anything at or past it overflows.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if value >= LIMIT || value < -LIMIT {
        return Err(ExtensionError::OutOfRange { key });
    }
    Ok(value as i64)
}

fn text_value(value: &Option<String>) -> Value {
    value.clone().map_or(Value::Null, Value::String)
}

fn integer_value(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::from)
}
