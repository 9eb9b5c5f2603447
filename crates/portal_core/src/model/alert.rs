//! Alert domain model.
//!
//! # Responsibility
//! - Define the threshold rule evaluated over a metric stream.
//! - Provide stable storage names for `Context` and `Operator`.
//!
//! # Invariants
//! - `id` is stable and never reused for another alert.
//! - `extensions` is either empty or carries the fixed Nagios keys.

use crate::model::extension::Extensions;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Stable identifier for an alert.
pub type AlertId = Uuid;

/// Scope an alert is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Context {
    /// Aggregated across the whole cluster.
    Cluster,
    /// Evaluated per host.
    Host,
}

impl Context {
    /// Stable storage value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cluster => "CLUSTER",
            Self::Host => "HOST",
        }
    }

    /// Parses a stored value, returning `None` for unknown names.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CLUSTER" => Some(Self::Cluster),
            "HOST" => Some(Self::Host),
            _ => None,
        }
    }
}

/// Comparison applied between the statistic and the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    EqualTo,
    NotEqualTo,
    GreaterThan,
    GreaterThanOrEqualTo,
    LessThan,
    LessThanOrEqualTo,
}

impl Operator {
    /// Stable storage value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EqualTo => "EQUAL_TO",
            Self::NotEqualTo => "NOT_EQUAL_TO",
            Self::GreaterThan => "GREATER_THAN",
            Self::GreaterThanOrEqualTo => "GREATER_THAN_OR_EQUAL_TO",
            Self::LessThan => "LESS_THAN",
            Self::LessThanOrEqualTo => "LESS_THAN_OR_EQUAL_TO",
        }
    }

    /// Parses a stored value, returning `None` for unknown names.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "EQUAL_TO" => Some(Self::EqualTo),
            "NOT_EQUAL_TO" => Some(Self::NotEqualTo),
            "GREATER_THAN" => Some(Self::GreaterThan),
            "GREATER_THAN_OR_EQUAL_TO" => Some(Self::GreaterThanOrEqualTo),
            "LESS_THAN" => Some(Self::LessThan),
            "LESS_THAN_OR_EQUAL_TO" => Some(Self::LessThanOrEqualTo),
            _ => None,
        }
    }
}

/// Threshold value with an optional unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Quantity {
    pub fn new(value: f64, unit: Option<String>) -> Self {
        Self { value, unit }
    }
}

/// Threshold rule over one metric statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Primary key; immutable after the first upsert.
    pub id: AlertId,
    pub name: String,
    pub cluster: String,
    pub service: String,
    pub context: Context,
    pub metric: String,
    pub statistic: String,
    /// Evaluation window.
    pub period: Duration,
    pub operator: Operator,
    pub value: Quantity,
    /// Free-form extension attributes. Only the Nagios keys are persisted.
    #[serde(default)]
    pub extensions: Extensions,
}
