//! Alert repository contracts, query generators and SQLite implementation.
//!
//! # Responsibility
//! - Gate every alert operation behind the open/closed lifecycle.
//! - Translate between `Alert` records and `alerts` rows plus the
//!   `alert_nagios_extensions` side-record.
//! - Delegate paged reads and row writes to a pluggable query generator.
//!
//! # Invariants
//! - Upsert is a total replace of every mutable field, inside one
//!   `IMMEDIATE` transaction.
//! - Serialization happens before the transaction opens; a record that
//!   cannot be stored never starts one.
//! - Malformed stored rows are logged and read as absent.

use crate::config::{ConfigError, QueryGeneratorKind, RepositoryConfig};
use crate::db::SharedConnection;
use crate::model::alert::{Alert, AlertId, Context, Operator, Quantity};
use crate::model::extension::NagiosExtension;
use crate::model::period::{format_period, parse_period};
use crate::repo::error::{ConflictReason, RepoError, RepoResult};
use crate::repo::lifecycle::{Lifecycle, RepositoryState};
use crate::repo::maintenance::BulkClear;
use crate::repo::query::{
    compute_etag, count_rows, current_version, delete_rows, fetch_page, ContainsMatch,
    FilterBuilder, Page, PageSql, QueryResult, Timestamped, DEFAULT_QUERY_LIMIT,
};
use crate::repo::UpsertOutcome;
use log::{debug, error, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::fmt::{Debug, Formatter};
use uuid::Uuid;

const REPOSITORY: &str = "alert";

const ALERT_SELECT_SQL: &str = "SELECT
    a.id AS id,
    a.version AS version,
    a.created_at AS created_at,
    a.updated_at AS updated_at,
    a.name AS name,
    a.cluster AS cluster,
    a.service AS service,
    a.context AS context,
    a.metric AS metric,
    a.statistic AS statistic,
    a.period AS period,
    a.operator AS operator,
    a.quantity AS quantity,
    n.alert_id AS nagios_alert_id,
    n.severity AS severity,
    n.notify AS notify,
    n.max_check_attempts AS max_check_attempts,
    n.freshness_threshold_seconds AS freshness_threshold_seconds
FROM alerts a
LEFT JOIN alert_nagios_extensions n ON n.alert_id = a.id";

const ALERT_PAGE_SQL: PageSql<'static> = PageSql {
    select: ALERT_SELECT_SQL,
    from: "alerts a",
    order_by: "a.rowid",
};

const CONTAINS_COLUMNS: &[&str] = &["a.name", "a.cluster", "a.service", "a.metric"];

/// Stored shape of one alert, including audit columns and side-record.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRow {
    pub id: String,
    /// Optimistic-concurrency guard. `0` marks a row not yet persisted.
    pub version: i64,
    /// Epoch milliseconds, written by the store.
    pub created_at: i64,
    /// Epoch milliseconds, written by the store.
    pub updated_at: i64,
    pub name: String,
    pub cluster: String,
    pub service: String,
    pub context: String,
    pub metric: String,
    pub statistic: String,
    /// ISO-8601 duration text.
    pub period: String,
    pub operator: String,
    /// Inline JSON blob of the threshold `Quantity`.
    pub quantity: String,
    pub nagios: Option<NagiosExtension>,
}

impl Timestamped for AlertRow {
    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }
}

impl AlertRow {
    /// Converts a record into an unpersisted row (`version == 0`).
    ///
    /// # Errors
    /// - `Serialization` when the threshold is not finite or the extension
    ///   map holds values the side-record cannot store.
    pub fn from_alert(alert: &Alert) -> RepoResult<Self> {
        let serialization = |message: String| RepoError::Serialization {
            id: alert.id,
            message,
        };

        if !alert.value.value.is_finite() {
            return Err(serialization(format!(
                "threshold value {} is not finite",
                alert.value.value
            )));
        }
        let quantity =
            serde_json::to_string(&alert.value).map_err(|err| serialization(err.to_string()))?;
        let nagios = NagiosExtension::from_extensions(&alert.extensions)
            .map_err(|err| serialization(err.to_string()))?;

        Ok(Self {
            id: alert.id.to_string(),
            version: 0,
            created_at: 0,
            updated_at: 0,
            name: alert.name.clone(),
            cluster: alert.cluster.clone(),
            service: alert.service.clone(),
            context: alert.context.as_str().to_string(),
            metric: alert.metric.clone(),
            statistic: alert.statistic.clone(),
            period: format_period(alert.period),
            operator: alert.operator.as_str().to_string(),
            quantity,
            nagios,
        })
    }

    /// Reassembles the record, merging the side-record into `extensions`.
    pub fn into_alert(self) -> RepoResult<Alert> {
        let id = Uuid::parse_str(&self.id).map_err(|_| {
            RepoError::InvalidData(format!("invalid uuid value `{}` in alerts.id", self.id))
        })?;
        let context = Context::parse(&self.context).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid context `{}` in alerts.context", self.context))
        })?;
        let operator = Operator::parse(&self.operator).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid operator `{}` in alerts.operator",
                self.operator
            ))
        })?;
        let period = parse_period(&self.period)
            .map_err(|err| RepoError::InvalidData(format!("{err} in alerts.period")))?;
        let value: Quantity = serde_json::from_str(&self.quantity).map_err(|err| {
            RepoError::InvalidData(format!("invalid quantity blob in alerts.quantity: {err}"))
        })?;

        Ok(Alert {
            id,
            name: self.name,
            cluster: self.cluster,
            service: self.service,
            context,
            metric: self.metric,
            statistic: self.statistic,
            period,
            operator,
            value,
            extensions: NagiosExtension::to_extensions(self.nagios.as_ref()),
        })
    }
}

/// Filter and paging descriptor for alert queries.
///
/// Usually obtained from [`AlertRepository::create_query`], populated with the
/// `with_*` setters and run with [`AlertQuery::execute`].
pub struct AlertQuery<'r> {
    repository: &'r dyn AlertRepository,
    contains: Option<String>,
    cluster: Option<String>,
    service: Option<String>,
    context: Option<Context>,
    limit: u32,
    offset: Option<u32>,
}

impl<'r> AlertQuery<'r> {
    pub fn new(repository: &'r dyn AlertRepository) -> Self {
        Self {
            repository,
            contains: None,
            cluster: None,
            service: None,
            context: None,
            limit: DEFAULT_QUERY_LIMIT,
            offset: None,
        }
    }

    /// Substring matched against name, cluster, service and metric.
    pub fn with_contains(mut self, needle: impl Into<String>) -> Self {
        self.contains = Some(needle.into());
        self
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    /// Page size. `0` is treated as `1`.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn contains(&self) -> Option<&str> {
        self.contains.as_deref()
    }

    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn context(&self) -> Option<Context> {
        self.context
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> Option<u32> {
        self.offset
    }

    /// Runs this descriptor against the repository that created it.
    fn is_bound_to(&self, repository: &dyn AlertRepository) -> bool {
        std::ptr::addr_eq(self.repository, repository)
    }

    pub fn execute(&self) -> RepoResult<QueryResult<Alert>> {
        self.repository.query(self)
    }
}

impl Debug for AlertQuery<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertQuery")
            .field("contains", &self.contains)
            .field("cluster", &self.cluster)
            .field("service", &self.service)
            .field("context", &self.context)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish()
    }
}

/// Backend strategy for alert row access.
///
/// Implementations receive a connection that is already inside the
/// caller's transaction for `save`.
pub trait AlertQueryGenerator: Send + Sync {
    /// Returns one page of rows for `query` plus the unpaged match count.
    fn fetch_page(&self, conn: &Connection, query: &AlertQuery<'_>) -> RepoResult<Page<AlertRow>>;

    /// Inserts (`version == 0`) or version-guarded updates `row` and its
    /// side-record.
    fn save(&self, conn: &Connection, row: &AlertRow) -> RepoResult<()>;
}

/// Portable generator using escaped `LIKE` containment.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericAlertQueryGenerator;

impl AlertQueryGenerator for GenericAlertQueryGenerator {
    fn fetch_page(&self, conn: &Connection, query: &AlertQuery<'_>) -> RepoResult<Page<AlertRow>> {
        fetch_alert_page(conn, query, ContainsMatch::Like)
    }

    fn save(&self, conn: &Connection, row: &AlertRow) -> RepoResult<()> {
        save_alert_row(conn, row)
    }
}

/// Generator with case-sensitive `instr` containment.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseSensitiveAlertQueryGenerator;

impl AlertQueryGenerator for CaseSensitiveAlertQueryGenerator {
    fn fetch_page(&self, conn: &Connection, query: &AlertQuery<'_>) -> RepoResult<Page<AlertRow>> {
        fetch_alert_page(conn, query, ContainsMatch::Instr)
    }

    fn save(&self, conn: &Connection, row: &AlertRow) -> RepoResult<()> {
        save_alert_row(conn, row)
    }
}

/// Builds the generator named by configuration.
pub fn alert_query_generator(kind: QueryGeneratorKind) -> Box<dyn AlertQueryGenerator> {
    match kind {
        QueryGeneratorKind::Generic => Box::new(GenericAlertQueryGenerator),
        QueryGeneratorKind::CaseSensitive => Box::new(CaseSensitiveAlertQueryGenerator),
    }
}

/// Lifecycle-gated alert access.
pub trait AlertRepository {
    fn open(&self) -> RepoResult<()>;
    fn close(&self) -> RepoResult<()>;
    fn get(&self, id: AlertId) -> RepoResult<Option<Alert>>;
    fn create_query(&self) -> RepoResult<AlertQuery<'_>>;
    fn query(&self, query: &AlertQuery<'_>) -> RepoResult<QueryResult<Alert>>;
    /// Total alerts, ignoring every filter.
    fn count(&self) -> RepoResult<u64>;
    fn add_or_update(&self, alert: &Alert) -> RepoResult<UpsertOutcome>;
}

/// SQLite-backed alert repository.
pub struct DatabaseAlertRepository {
    conn: SharedConnection,
    generator: Box<dyn AlertQueryGenerator>,
    lifecycle: Lifecycle,
}

impl DatabaseAlertRepository {
    /// Creates a closed repository using `generator` for row access.
    pub fn new(conn: SharedConnection, generator: Box<dyn AlertQueryGenerator>) -> Self {
        Self {
            conn,
            generator,
            lifecycle: Lifecycle::new(REPOSITORY),
        }
    }

    /// Creates a closed repository with the configured generator.
    pub fn from_config(
        conn: SharedConnection,
        config: &RepositoryConfig,
    ) -> Result<Self, ConfigError> {
        let kind = config.generator_kind()?;
        debug!(
            "event=alert_repo_configure module=alert_repo status=ok query_generator={}",
            kind.as_str()
        );
        Ok(Self::new(conn, alert_query_generator(kind)))
    }

    pub fn state(&self) -> RepositoryState {
        self.lifecycle.state()
    }
}

impl BulkClear for DatabaseAlertRepository {
    fn delete_all(&self) -> RepoResult<u64> {
        self.lifecycle.ensure_open("delete_all")?;
        debug!("event=alert_delete_all module=alert_repo status=start");

        let mut conn = self.conn.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        delete_rows(&tx, "alert_nagios_extensions")?;
        let removed = delete_rows(&tx, "alerts")?;
        tx.commit()?;

        info!("event=alert_delete_all module=alert_repo status=ok removed={removed}");
        Ok(removed)
    }
}

impl AlertRepository for DatabaseAlertRepository {
    fn open(&self) -> RepoResult<()> {
        self.lifecycle.open()
    }

    fn close(&self) -> RepoResult<()> {
        self.lifecycle.close()
    }

    fn get(&self, id: AlertId) -> RepoResult<Option<Alert>> {
        self.lifecycle.ensure_open("get")?;
        debug!("event=alert_get module=alert_repo status=start alert_id={id}");

        let row = {
            let conn = self.conn.lock()?;
            find_alert_row(&conn, id)?
        };
        Ok(row.and_then(decode_alert))
    }

    fn create_query(&self) -> RepoResult<AlertQuery<'_>> {
        self.lifecycle.ensure_open("create_query")?;
        Ok(AlertQuery::new(self))
    }

    fn query(&self, query: &AlertQuery<'_>) -> RepoResult<QueryResult<Alert>> {
        self.lifecycle.ensure_open("query")?;
        if !query.is_bound_to(self) {
            return Err(RepoError::ForeignQuery {
                repository: REPOSITORY,
            });
        }
        debug!("event=alert_query module=alert_repo status=start query={query:?}");

        let page = {
            let conn = self.conn.lock()?;
            self.generator.fetch_page(&conn, query)?
        };
        let etag = compute_etag(page.rows.iter());
        let values: Vec<Alert> = page.rows.into_iter().filter_map(decode_alert).collect();

        debug!(
            "event=alert_query module=alert_repo status=ok returned={} total={} etag={etag}",
            values.len(),
            page.total
        );
        Ok(QueryResult {
            values,
            total: page.total,
            etag,
        })
    }

    fn count(&self) -> RepoResult<u64> {
        self.lifecycle.ensure_open("count")?;
        let conn = self.conn.lock()?;
        count_rows(&conn, "alerts")
    }

    fn add_or_update(&self, alert: &Alert) -> RepoResult<UpsertOutcome> {
        self.lifecycle.ensure_open("add_or_update")?;
        debug!(
            "event=alert_upsert module=alert_repo status=start alert_id={}",
            alert.id
        );

        let mut row = AlertRow::from_alert(alert).map_err(|err| {
            error!(
                "event=alert_upsert module=alert_repo status=error error_code=serialization_failed alert_id={} error={err}",
                alert.id
            );
            err
        })?;

        let mut conn = self.conn.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = match current_version(&tx, "alerts", &row.id)? {
            Some(version) => {
                row.version = version;
                UpsertOutcome::Updated
            }
            None => UpsertOutcome::Created,
        };

        // Dropping `tx` without commit rolls the write back.
        let written = match self.generator.save(&tx, &row) {
            Ok(()) => tx.commit().map_err(|err| RepoError::StorageConflict {
                id: alert.id,
                reason: ConflictReason::Rejected(err),
            }),
            Err(err) => Err(err.into_conflict(alert.id)),
        };
        if let Err(err) = written {
            warn!(
                "event=alert_upsert module=alert_repo status=error error_code=write_rejected alert_id={} error={err}",
                alert.id
            );
            return Err(err);
        }

        info!(
            "event=alert_upsert module=alert_repo status=ok alert_id={} created={}",
            alert.id,
            outcome.is_created()
        );
        Ok(outcome)
    }
}

fn decode_alert(row: AlertRow) -> Option<Alert> {
    let id = row.id.clone();
    match row.into_alert() {
        Ok(alert) => Some(alert),
        Err(err) => {
            error!(
                "event=alert_decode module=alert_repo status=error error_code=deserialization_failed alert_id={id} error={err}"
            );
            None
        }
    }
}

fn find_alert_row(conn: &Connection, id: AlertId) -> RepoResult<Option<AlertRow>> {
    let row = conn
        .query_row(
            &format!("{ALERT_SELECT_SQL} WHERE a.id = ?1;"),
            [id.to_string()],
            parse_alert_row,
        )
        .optional()?;
    Ok(row)
}

fn fetch_alert_page(
    conn: &Connection,
    query: &AlertQuery<'_>,
    mode: ContainsMatch,
) -> RepoResult<Page<AlertRow>> {
    let mut filter = FilterBuilder::default();
    filter
        .eq("a.cluster", query.cluster())
        .eq("a.service", query.service())
        .eq("a.context", query.context().map(Context::as_str))
        .contains(CONTAINS_COLUMNS, query.contains(), mode);

    fetch_page(
        conn,
        &ALERT_PAGE_SQL,
        &filter,
        query.limit(),
        query.offset(),
        parse_alert_row,
    )
}

fn save_alert_row(conn: &Connection, row: &AlertRow) -> RepoResult<()> {
    if row.version == 0 {
        conn.execute(
            "INSERT INTO alerts (
                id,
                version,
                created_at,
                updated_at,
                name,
                cluster,
                service,
                context,
                metric,
                statistic,
                period,
                operator,
                quantity
            ) VALUES (
                ?1,
                1,
                CAST(ROUND((julianday('now') - 2440587.5) * 86400000) AS INTEGER),
                CAST(ROUND((julianday('now') - 2440587.5) * 86400000) AS INTEGER),
                ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10
            );",
            params![
                row.id,
                row.name,
                row.cluster,
                row.service,
                row.context,
                row.metric,
                row.statistic,
                row.period,
                row.operator,
                row.quantity,
            ],
        )?;
    } else {
        let changed = conn.execute(
            "UPDATE alerts
             SET
                version = version + 1,
                updated_at = MAX(
                    created_at,
                    CAST(ROUND((julianday('now') - 2440587.5) * 86400000) AS INTEGER)
                ),
                name = ?3,
                cluster = ?4,
                service = ?5,
                context = ?6,
                metric = ?7,
                statistic = ?8,
                period = ?9,
                operator = ?10,
                quantity = ?11
             WHERE id = ?1
               AND version = ?2;",
            params![
                row.id,
                row.version,
                row.name,
                row.cluster,
                row.service,
                row.context,
                row.metric,
                row.statistic,
                row.period,
                row.operator,
                row.quantity,
            ],
        )?;

        if changed == 0 {
            let id = Uuid::parse_str(&row.id).map_err(|_| {
                RepoError::InvalidData(format!("invalid uuid value `{}` in alerts.id", row.id))
            })?;
            return Err(RepoError::StorageConflict {
                id,
                reason: ConflictReason::VersionMismatch {
                    expected_version: row.version,
                },
            });
        }
    }

    match &row.nagios {
        Some(nagios) => {
            conn.execute(
                "INSERT INTO alert_nagios_extensions (
                    alert_id,
                    severity,
                    notify,
                    max_check_attempts,
                    freshness_threshold_seconds
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(alert_id) DO UPDATE SET
                    severity = excluded.severity,
                    notify = excluded.notify,
                    max_check_attempts = excluded.max_check_attempts,
                    freshness_threshold_seconds = excluded.freshness_threshold_seconds;",
                params![
                    row.id,
                    nagios.severity,
                    nagios.notify,
                    nagios.max_check_attempts,
                    nagios.freshness_threshold_seconds,
                ],
            )?;
        }
        None => {
            conn.execute(
                "DELETE FROM alert_nagios_extensions WHERE alert_id = ?1;",
                [&row.id],
            )?;
        }
    }

    Ok(())
}

fn parse_alert_row(row: &Row<'_>) -> rusqlite::Result<AlertRow> {
    let nagios_alert_id: Option<String> = row.get("nagios_alert_id")?;
    let nagios = if nagios_alert_id.is_some() {
        Some(NagiosExtension {
            severity: row.get("severity")?,
            notify: row.get("notify")?,
            max_check_attempts: row.get("max_check_attempts")?,
            freshness_threshold_seconds: row.get("freshness_threshold_seconds")?,
        })
    } else {
        None
    };

    Ok(AlertRow {
        id: row.get("id")?,
        version: row.get("version")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        name: row.get("name")?,
        cluster: row.get("cluster")?,
        service: row.get("service")?,
        context: row.get("context")?,
        metric: row.get("metric")?,
        statistic: row.get("statistic")?,
        period: row.get("period")?,
        operator: row.get("operator")?,
        quantity: row.get("quantity")?,
        nagios,
    })
}
