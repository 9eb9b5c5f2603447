//! Expression domain model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for an expression.
pub type ExpressionId = Uuid;

/// Named metric computation. `script` is opaque to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    pub id: ExpressionId,
    pub cluster: String,
    pub service: String,
    pub metric: String,
    pub script: String,
}

impl Expression {
    /// Creates an expression with a generated id.
    pub fn new(
        cluster: impl Into<String>,
        service: impl Into<String>,
        metric: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self::with_id(Uuid::new_v4(), cluster, service, metric, script)
    }

    /// Creates an expression with a caller-provided id.
    pub fn with_id(
        id: ExpressionId,
        cluster: impl Into<String>,
        service: impl Into<String>,
        metric: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            id,
            cluster: cluster.into(),
            service: service.into(),
            metric: metric.into(),
            script: script.into(),
        }
    }
}
