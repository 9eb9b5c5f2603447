//! Paging, filtering, etag and row helpers shared by the repositories.
//!
//! # Invariants
//! - Present predicates are joined with `AND`; absent ones add nothing.
//! - Page index is `offset / limit`; a page holds at most `limit` rows.
//! - Pages are ordered by insertion (`rowid`), stable across calls.

use crate::repo::error::RepoResult;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};

/// Page size used when a descriptor does not set one.
pub const DEFAULT_QUERY_LIMIT: u32 = 1000;

/// One page of records plus paging metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    pub values: Vec<T>,
    /// Rows matching the filters, ignoring paging.
    pub total: u64,
    /// Change fingerprint of the returned page.
    pub etag: String,
}

/// Raw rows of one page as returned by a query generator.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<R> {
    pub rows: Vec<R>,
    pub total: u64,
}

/// Row carrying store-managed audit timestamps (epoch milliseconds).
pub trait Timestamped {
    fn created_at(&self) -> i64;
    fn updated_at(&self) -> i64;
}

/// Hex etag of the newest `max(updated_at, created_at)` on the page.
///
/// Known limitation: only the returned page contributes. A change to a row on
/// another page leaves this value untouched, so it cannot detect changes to
/// the full filtered set.
pub fn compute_etag<'a, R>(rows: impl IntoIterator<Item = &'a R>) -> String
where
    R: Timestamped + 'a,
{
    let newest = rows
        .into_iter()
        .map(|row| row.updated_at().max(row.created_at()))
        .max()
        .unwrap_or(0)
        .max(0);
    format!("{newest:x}")
}

/// Zero-based page index for a descriptor's offset and limit.
pub fn page_index(offset: Option<u32>, limit: u32) -> u32 {
    offset.map_or(0, |offset| offset / limit.max(1))
}

/// SQL strategy for the free-text containment predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContainsMatch {
    /// `LIKE '%needle%'` with wildcards escaped.
    Like,
    /// `instr(column, needle) > 0`.
    Instr,
}

/// Accumulates `AND`-joined predicates and their bind values.
#[derive(Debug, Default)]
pub(crate) struct FilterBuilder {
    clauses: Vec<String>,
    binds: Vec<Value>,
}

impl FilterBuilder {
    pub(crate) fn eq(&mut self, column: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.clauses.push(format!("{column} = ?"));
            self.binds.push(Value::Text(value.to_string()));
        }
        self
    }

    pub(crate) fn contains(
        &mut self,
        columns: &[&str],
        needle: Option<&str>,
        mode: ContainsMatch,
    ) -> &mut Self {
        let Some(needle) = needle else {
            return self;
        };

        let alternatives: Vec<String> = columns
            .iter()
            .map(|column| match mode {
                ContainsMatch::Like => {
                    self.binds
                        .push(Value::Text(format!("%{}%", escape_like(needle))));
                    format!("{column} LIKE ? ESCAPE '\\'")
                }
                ContainsMatch::Instr => {
                    self.binds.push(Value::Text(needle.to_string()));
                    format!("instr({column}, ?) > 0")
                }
            })
            .collect();
        self.clauses.push(format!("({})", alternatives.join(" OR ")));
        self
    }

    pub(crate) fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for ch in needle.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Shape of one entity's paged fetch.
pub(crate) struct PageSql<'a> {
    /// `SELECT ... FROM <table> <alias> [JOIN ...]` without a `WHERE`.
    pub(crate) select: &'a str,
    /// `<table> <alias>` used by the count query.
    pub(crate) from: &'a str,
    /// Qualified `rowid` column for insertion ordering.
    pub(crate) order_by: &'a str,
}

/// Runs the count and page queries for one descriptor.
pub(crate) fn fetch_page<R>(
    conn: &Connection,
    sql: &PageSql<'_>,
    filter: &FilterBuilder,
    limit: u32,
    offset: Option<u32>,
    parse_row: impl Fn(&Row<'_>) -> rusqlite::Result<R>,
) -> RepoResult<Page<R>> {
    let where_sql = filter.where_sql();

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}{where_sql};", sql.from),
        params_from_iter(filter.binds.iter()),
        |row| row.get(0),
    )?;

    let limit = limit.max(1);
    let row_offset = i64::from(page_index(offset, limit)) * i64::from(limit);
    let mut binds = filter.binds.clone();
    binds.push(Value::Integer(i64::from(limit)));
    binds.push(Value::Integer(row_offset));

    let mut stmt = conn.prepare(&format!(
        "{}{where_sql} ORDER BY {} ASC LIMIT ? OFFSET ?;",
        sql.select, sql.order_by
    ))?;
    let mut rows = stmt.query(params_from_iter(binds))?;
    let mut page = Vec::new();
    while let Some(row) = rows.next()? {
        page.push(parse_row(row)?);
    }

    Ok(Page {
        rows: page,
        total: u64::try_from(total).unwrap_or(0),
    })
}

/// Current version of the row with primary key `id`, if it exists.
pub(crate) fn current_version(conn: &Connection, table: &str, id: &str) -> RepoResult<Option<i64>> {
    let version = conn
        .query_row(
            &format!("SELECT version FROM {table} WHERE id = ?1;"),
            [id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version)
}

/// Unfiltered row count of `table`.
pub(crate) fn count_rows(conn: &Connection, table: &str) -> RepoResult<u64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Deletes every row of `table`, returning how many were removed.
pub(crate) fn delete_rows(conn: &Connection, table: &str) -> RepoResult<u64> {
    let removed = conn.execute(&format!("DELETE FROM {table};"), [])?;
    Ok(removed as u64)
}

#[cfg(test)]
mod tests {
    use super::{compute_etag, page_index, ContainsMatch, FilterBuilder, Timestamped};
    use rusqlite::{params_from_iter, Connection};

    struct Stamp(i64, i64);

    impl Timestamped for Stamp {
        fn created_at(&self) -> i64 {
            self.0
        }
        fn updated_at(&self) -> i64 {
            self.1
        }
    }

    #[test]
    fn etag_uses_newest_timestamp_on_page() {
        let rows = [Stamp(10, 10), Stamp(20, 255), Stamp(300, 30)];
        assert_eq!(compute_etag(rows.iter()), "12c");
        assert_eq!(compute_etag(rows[..2].iter()), "ff");
    }

    #[test]
    fn etag_of_empty_page_is_zero() {
        let rows: [Stamp; 0] = [];
        assert_eq!(compute_etag(rows.iter()), "0");
    }

    #[test]
    fn page_index_floors_offset_by_limit() {
        assert_eq!(page_index(None, 10), 0);
        assert_eq!(page_index(Some(2), 2), 1);
        assert_eq!(page_index(Some(5), 2), 2);
        assert_eq!(page_index(Some(5), 0), 5);
    }

    #[test]
    fn absent_predicates_add_no_clause() {
        let mut filter = FilterBuilder::default();
        filter
            .eq("cluster", None)
            .contains(&["name"], None, ContainsMatch::Like);
        assert_eq!(filter.where_sql(), "");
        assert!(filter.binds.is_empty());
    }

    #[test]
    fn present_predicates_are_and_joined() {
        let mut filter = FilterBuilder::default();
        filter
            .eq("cluster", Some("c1"))
            .contains(&["name", "metric"], Some("cpu"), ContainsMatch::Instr);
        assert_eq!(
            filter.where_sql(),
            " WHERE cluster = ? AND (instr(name, ?) > 0 OR instr(metric, ?) > 0)"
        );
        assert_eq!(filter.binds.len(), 3);
    }

    fn row_matches(mode: ContainsMatch, value: &str, needle: &str) -> bool {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (v TEXT NOT NULL);", []).unwrap();
        conn.execute("INSERT INTO t (v) VALUES (?1);", [value]).unwrap();

        let mut filter = FilterBuilder::default();
        filter.contains(&["v"], Some(needle), mode);
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM t{};", filter.where_sql()),
                params_from_iter(filter.binds.iter()),
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    #[test]
    fn like_escapes_wildcards() {
        assert!(row_matches(ContainsMatch::Like, "cpu_100%", "_100%"));
        assert!(!row_matches(ContainsMatch::Like, "cpu-1000", "_100%"));
        assert!(row_matches(ContainsMatch::Like, "Contained", "contained"));
    }

    #[test]
    fn instr_is_case_sensitive() {
        assert!(row_matches(ContainsMatch::Instr, "my-contained-alert", "contained"));
        assert!(!row_matches(ContainsMatch::Instr, "Contained", "contained"));
    }
}
