//! Expression repository contracts, query generators and SQLite
//! implementation.
//!
//! # Invariants
//! - Every operation except `open` requires the repository to be open.
//! - Upsert replaces cluster, service, metric and script in one transaction.

use crate::config::{ConfigError, QueryGeneratorKind, RepositoryConfig};
use crate::db::SharedConnection;
use crate::model::expression::{Expression, ExpressionId};
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

const REPOSITORY: &str = "expression";

const EXPRESSION_SELECT_SQL: &str = "SELECT
    e.id AS id,
    e.version AS version,
    e.created_at AS created_at,
    e.updated_at AS updated_at,
    e.cluster AS cluster,
    e.service AS service,
    e.metric AS metric,
    e.script AS script
FROM expressions e";

const EXPRESSION_PAGE_SQL: PageSql<'static> = PageSql {
    select: EXPRESSION_SELECT_SQL,
    from: "expressions e",
    order_by: "e.rowid",
};

const CONTAINS_COLUMNS: &[&str] = &["e.cluster", "e.service", "e.metric"];

/// Stored shape of one expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionRow {
    pub id: String,
    /// `0` marks a row not yet persisted.
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub cluster: String,
    pub service: String,
    pub metric: String,
    pub script: String,
}

impl Timestamped for ExpressionRow {
    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }
}

impl ExpressionRow {
    pub fn from_expression(expression: &Expression) -> Self {
        Self {
            id: expression.id.to_string(),
            version: 0,
            created_at: 0,
            updated_at: 0,
            cluster: expression.cluster.clone(),
            service: expression.service.clone(),
            metric: expression.metric.clone(),
            script: expression.script.clone(),
        }
    }

    pub fn into_expression(self) -> RepoResult<Expression> {
        let id = Uuid::parse_str(&self.id).map_err(|_| {
            RepoError::InvalidData(format!(
                "invalid uuid value `{}` in expressions.id",
                self.id
            ))
        })?;
        Ok(Expression {
            id,
            cluster: self.cluster,
            service: self.service,
            metric: self.metric,
            script: self.script,
        })
    }
}

/// Filter and paging descriptor for expression queries.
pub struct ExpressionQuery<'r> {
    repository: &'r dyn ExpressionRepository,
    contains: Option<String>,
    cluster: Option<String>,
    service: Option<String>,
    limit: u32,
    offset: Option<u32>,
}

impl<'r> ExpressionQuery<'r> {
    pub fn new(repository: &'r dyn ExpressionRepository) -> Self {
        Self {
            repository,
            contains: None,
            cluster: None,
            service: None,
            limit: DEFAULT_QUERY_LIMIT,
            offset: None,
        }
    }

    /// Substring matched against cluster, service and metric.
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

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> Option<u32> {
        self.offset
    }

    fn is_bound_to(&self, repository: &dyn ExpressionRepository) -> bool {
        std::ptr::addr_eq(self.repository, repository)
    }

    pub fn execute(&self) -> RepoResult<QueryResult<Expression>> {
        self.repository.query(self)
    }
}

impl Debug for ExpressionQuery<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionQuery")
            .field("contains", &self.contains)
            .field("cluster", &self.cluster)
            .field("service", &self.service)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish()
    }
}

/// Backend strategy for expression row access.
pub trait ExpressionQueryGenerator: Send + Sync {
    fn fetch_page(
        &self,
        conn: &Connection,
        query: &ExpressionQuery<'_>,
    ) -> RepoResult<Page<ExpressionRow>>;

    /// Must run inside the caller's transaction.
    fn save(&self, conn: &Connection, row: &ExpressionRow) -> RepoResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GenericExpressionQueryGenerator;

impl ExpressionQueryGenerator for GenericExpressionQueryGenerator {
    fn fetch_page(
        &self,
        conn: &Connection,
        query: &ExpressionQuery<'_>,
    ) -> RepoResult<Page<ExpressionRow>> {
        fetch_expression_page(conn, query, ContainsMatch::Like)
    }

    fn save(&self, conn: &Connection, row: &ExpressionRow) -> RepoResult<()> {
        save_expression_row(conn, row)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CaseSensitiveExpressionQueryGenerator;

impl ExpressionQueryGenerator for CaseSensitiveExpressionQueryGenerator {
    fn fetch_page(
        &self,
        conn: &Connection,
        query: &ExpressionQuery<'_>,
    ) -> RepoResult<Page<ExpressionRow>> {
        fetch_expression_page(conn, query, ContainsMatch::Instr)
    }

    fn save(&self, conn: &Connection, row: &ExpressionRow) -> RepoResult<()> {
        save_expression_row(conn, row)
    }
}

pub fn expression_query_generator(kind: QueryGeneratorKind) -> Box<dyn ExpressionQueryGenerator> {
    match kind {
        QueryGeneratorKind::Generic => Box::new(GenericExpressionQueryGenerator),
        QueryGeneratorKind::CaseSensitive => Box::new(CaseSensitiveExpressionQueryGenerator),
    }
}

/// Lifecycle-gated expression access.
pub trait ExpressionRepository {
    fn open(&self) -> RepoResult<()>;
    fn close(&self) -> RepoResult<()>;
    fn get(&self, id: ExpressionId) -> RepoResult<Option<Expression>>;
    fn create_query(&self) -> RepoResult<ExpressionQuery<'_>>;
    fn query(&self, query: &ExpressionQuery<'_>) -> RepoResult<QueryResult<Expression>>;
    fn count(&self) -> RepoResult<u64>;
    fn add_or_update(&self, expression: &Expression) -> RepoResult<UpsertOutcome>;
}

/// SQLite-backed expression repository.
pub struct DatabaseExpressionRepository {
    conn: SharedConnection,
    generator: Box<dyn ExpressionQueryGenerator>,
    lifecycle: Lifecycle,
}

impl DatabaseExpressionRepository {
    pub fn new(conn: SharedConnection, generator: Box<dyn ExpressionQueryGenerator>) -> Self {
        Self {
            conn,
            generator,
            lifecycle: Lifecycle::new(REPOSITORY),
        }
    }

    pub fn from_config(
        conn: SharedConnection,
        config: &RepositoryConfig,
    ) -> Result<Self, ConfigError> {
        let kind = config.generator_kind()?;
        debug!(
            "event=expression_repo_configure module=expression_repo status=ok query_generator={}",
            kind.as_str()
        );
        Ok(Self::new(conn, expression_query_generator(kind)))
    }

    pub fn state(&self) -> RepositoryState {
        self.lifecycle.state()
    }
}

impl BulkClear for DatabaseExpressionRepository {
    fn delete_all(&self) -> RepoResult<u64> {
        self.lifecycle.ensure_open("delete_all")?;
        debug!("event=expression_delete_all module=expression_repo status=start");

        let mut conn = self.conn.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = delete_rows(&tx, "expressions")?;
        tx.commit()?;

        info!("event=expression_delete_all module=expression_repo status=ok removed={removed}");
        Ok(removed)
    }
}

impl ExpressionRepository for DatabaseExpressionRepository {
    fn open(&self) -> RepoResult<()> {
        self.lifecycle.open()
    }

    fn close(&self) -> RepoResult<()> {
        self.lifecycle.close()
    }

    fn get(&self, id: ExpressionId) -> RepoResult<Option<Expression>> {
        self.lifecycle.ensure_open("get")?;
        debug!("event=expression_get module=expression_repo status=start expression_id={id}");

        let row = {
            let conn = self.conn.lock()?;
            conn.query_row(
                &format!("{EXPRESSION_SELECT_SQL} WHERE e.id = ?1;"),
                [id.to_string()],
                parse_expression_row,
            )
            .optional()?
        };
        Ok(row.and_then(decode_expression))
    }

    fn create_query(&self) -> RepoResult<ExpressionQuery<'_>> {
        self.lifecycle.ensure_open("create_query")?;
        Ok(ExpressionQuery::new(self))
    }

    fn query(&self, query: &ExpressionQuery<'_>) -> RepoResult<QueryResult<Expression>> {
        self.lifecycle.ensure_open("query")?;
        if !query.is_bound_to(self) {
            return Err(RepoError::ForeignQuery {
                repository: REPOSITORY,
            });
        }
        debug!("event=expression_query module=expression_repo status=start query={query:?}");

        let page = {
            let conn = self.conn.lock()?;
            self.generator.fetch_page(&conn, query)?
        };
        let etag = compute_etag(page.rows.iter());
        let values = page
            .rows
            .into_iter()
            .filter_map(decode_expression)
            .collect();

        Ok(QueryResult {
            values,
            total: page.total,
            etag,
        })
    }

    fn count(&self) -> RepoResult<u64> {
        self.lifecycle.ensure_open("count")?;
        let conn = self.conn.lock()?;
        count_rows(&conn, "expressions")
    }

    fn add_or_update(&self, expression: &Expression) -> RepoResult<UpsertOutcome> {
        self.lifecycle.ensure_open("add_or_update")?;
        debug!(
            "event=expression_upsert module=expression_repo status=start expression_id={}",
            expression.id
        );

        let mut row = ExpressionRow::from_expression(expression);
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = match current_version(&tx, "expressions", &row.id)? {
            Some(version) => {
                row.version = version;
                UpsertOutcome::Updated
            }
            None => UpsertOutcome::Created,
        };

        let written = match self.generator.save(&tx, &row) {
            Ok(()) => tx.commit().map_err(|err| RepoError::StorageConflict {
                id: expression.id,
                reason: ConflictReason::Rejected(err),
            }),
            Err(err) => Err(err.into_conflict(expression.id)),
        };
        if let Err(err) = written {
            warn!(
                "event=expression_upsert module=expression_repo status=error error_code=write_rejected expression_id={} error={err}",
                expression.id
            );
            return Err(err);
        }

        info!(
            "event=expression_upsert module=expression_repo status=ok expression_id={} created={}",
            expression.id,
            outcome.is_created()
        );
        Ok(outcome)
    }
}

fn decode_expression(row: ExpressionRow) -> Option<Expression> {
    let id = row.id.clone();
    match row.into_expression() {
        Ok(expression) => Some(expression),
        Err(err) => {
            error!(
                "event=expression_decode module=expression_repo status=error error_code=deserialization_failed expression_id={id} error={err}"
            );
            None
        }
    }
}

fn fetch_expression_page(
    conn: &Connection,
    query: &ExpressionQuery<'_>,
    mode: ContainsMatch,
) -> RepoResult<Page<ExpressionRow>> {
    let mut filter = FilterBuilder::default();
    filter
        .eq("e.cluster", query.cluster())
        .eq("e.service", query.service())
        .contains(CONTAINS_COLUMNS, query.contains(), mode);

    fetch_page(
        conn,
        &EXPRESSION_PAGE_SQL,
        &filter,
        query.limit(),
        query.offset(),
        parse_expression_row,
    )
}

fn save_expression_row(conn: &Connection, row: &ExpressionRow) -> RepoResult<()> {
    if row.version == 0 {
        conn.execute(
            "INSERT INTO expressions (
                id,
                version,
                created_at,
                updated_at,
                cluster,
                service,
                metric,
                script
            ) VALUES (
                ?1,
                1,
                CAST(ROUND((julianday('now') - 2440587.5) * 86400000) AS INTEGER),
                CAST(ROUND((julianday('now') - 2440587.5) * 86400000) AS INTEGER),
                ?2, ?3, ?4, ?5
            );",
            params![row.id, row.cluster, row.service, row.metric, row.script],
        )?;
        return Ok(());
    }

    let changed = conn.execute(
        "UPDATE expressions
         SET
            version = version + 1,
            updated_at = MAX(
                created_at,
                CAST(ROUND((julianday('now') - 2440587.5) * 86400000) AS INTEGER)
            ),
            cluster = ?3,
            service = ?4,
            metric = ?5,
            script = ?6
         WHERE id = ?1
           AND version = ?2;",
        params![
            row.id,
            row.version,
            row.cluster,
            row.service,
            row.metric,
            row.script,
        ],
    )?;

    if changed == 0 {
        let id = Uuid::parse_str(&row.id).map_err(|_| {
            RepoError::InvalidData(format!(
                "invalid uuid value `{}` in expressions.id",
                row.id
            ))
        })?;
        return Err(RepoError::StorageConflict {
            id,
            reason: ConflictReason::VersionMismatch {
                expected_version: row.version,
            },
        });
    }

    Ok(())
}

fn parse_expression_row(row: &Row<'_>) -> rusqlite::Result<ExpressionRow> {
    Ok(ExpressionRow {
        id: row.get("id")?,
        version: row.get("version")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        cluster: row.get("cluster")?,
        service: row.get("service")?,
        metric: row.get("metric")?,
        script: row.get("script")?,
    })
}
