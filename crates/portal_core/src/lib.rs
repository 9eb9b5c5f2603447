//! Alert and expression storage for the metrics portal.
//! Records are kept in SQLite behind lifecycle-gated repositories.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;

pub use config::{ConfigError, PortalConfig, QueryGeneratorKind, RepositoryConfig};
pub use db::{open_db, open_db_in_memory, open_shared, DbError, DbResult, SharedConnection};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::alert::{Alert, AlertId, Context, Operator, Quantity};
pub use model::expression::{Expression, ExpressionId};
pub use model::extension::{Extensions, NagiosExtension};
pub use repo::alert_repo::{
    AlertQuery, AlertQueryGenerator, AlertRepository, DatabaseAlertRepository,
};
pub use repo::error::{ConflictReason, RepoError, RepoResult};
pub use repo::expression_repo::{
    DatabaseExpressionRepository, ExpressionQuery, ExpressionQueryGenerator, ExpressionRepository,
};
pub use repo::lifecycle::RepositoryState;
pub use repo::query::{QueryResult, DEFAULT_QUERY_LIMIT};
pub use repo::UpsertOutcome;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
