use portal_core::config::{QueryGeneratorKind, RepositoryConfig};
use portal_core::db::{open_db_in_memory, SharedConnection};
use portal_core::repo::alert_repo::{
    alert_query_generator, AlertQueryGenerator, AlertRow, GenericAlertQueryGenerator,
};
use portal_core::repo::maintenance::BulkClear;
use portal_core::{
    Alert, AlertRepository, ConflictReason, Context, DatabaseAlertRepository, Extensions,
    Operator, Quantity, RepoError, RepositoryState, UpsertOutcome,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

fn shared() -> SharedConnection {
    SharedConnection::new(open_db_in_memory().unwrap())
}

fn open_repo(kind: QueryGeneratorKind) -> DatabaseAlertRepository {
    let repo = DatabaseAlertRepository::new(shared(), alert_query_generator(kind));
    repo.open().unwrap();
    repo
}

fn alert(name: &str, cluster: &str, service: &str, metric: &str) -> Alert {
    Alert {
        id: Uuid::new_v4(),
        name: name.to_string(),
        cluster: cluster.to_string(),
        service: service.to_string(),
        context: Context::Cluster,
        metric: metric.to_string(),
        statistic: "tp99".to_string(),
        period: Duration::from_secs(600),
        operator: Operator::EqualTo,
        value: Quantity::new(12.0, Some("test-unit".to_string())),
        extensions: Extensions::new(),
    }
}

fn nagios_extensions() -> Extensions {
    let mut extensions = Extensions::new();
    extensions.insert("severity".to_string(), json!("CRITICAL"));
    extensions.insert("notify".to_string(), json!("abc@example.com"));
    extensions.insert("maxCheckAttempts".to_string(), json!(3));
    extensions.insert("freshnessThreshold".to_string(), json!(5));
    extensions
}

fn stored_version(conn: &SharedConnection, id: Uuid) -> i64 {
    conn.lock()
        .unwrap()
        .query_row(
            "SELECT version FROM alerts WHERE id = ?1;",
            [id.to_string()],
            |row| row.get(0),
        )
        .unwrap()
}

#[test]
fn get_unknown_id_returns_none() {
    let repo = open_repo(QueryGeneratorKind::Generic);
    assert!(repo.get(Uuid::new_v4()).unwrap().is_none());
}

#[test]
fn round_trip_with_full_extensions() {
    let repo = open_repo(QueryGeneratorKind::Generic);
    let mut written = alert("test-name", "test-cluster", "test-service", "test-metric");
    written.period = Duration::from_secs(600);
    written.operator = Operator::EqualTo;
    written.value = Quantity::new(12.0, Some("test-unit".to_string()));
    written.extensions = serde_json::from_value(json!({
        "severity": "CRITICAL",
        "notify": "abc@example.com",
        "maxCheckAttempts": 3,
        "freshnessThreshold": 5
    }))
    .unwrap();

    assert_eq!(repo.add_or_update(&written).unwrap(), UpsertOutcome::Created);

    let loaded = repo.get(written.id).unwrap().unwrap();
    assert_eq!(loaded, written);
}

#[test]
fn round_trip_with_empty_extensions_leaves_no_side_record() {
    let conn = shared();
    let repo = DatabaseAlertRepository::new(conn.clone(), Box::new(GenericAlertQueryGenerator));
    repo.open().unwrap();

    let written = alert("test-name", "test-cluster", "test-service", "test-metric");
    repo.add_or_update(&written).unwrap();

    let loaded = repo.get(written.id).unwrap().unwrap();
    assert!(loaded.extensions.is_empty());
    assert_eq!(loaded, written);

    let side_records: i64 = conn
        .lock()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM alert_nagios_extensions;", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(side_records, 0);
}

#[test]
fn partial_extensions_read_back_as_four_keys() {
    let repo = open_repo(QueryGeneratorKind::Generic);
    let mut written = alert("test-name", "test-cluster", "test-service", "test-metric");
    written
        .extensions
        .insert("severity".to_string(), json!("WARNING"));
    written
        .extensions
        .insert("maxCheckAttempts".to_string(), json!("4"));
    repo.add_or_update(&written).unwrap();

    let loaded = repo.get(written.id).unwrap().unwrap();
    assert_eq!(loaded.extensions.len(), 4);
    assert_eq!(loaded.extensions["severity"], json!("WARNING"));
    assert_eq!(loaded.extensions["maxCheckAttempts"], json!(4));
    assert!(loaded.extensions["notify"].is_null());
    assert!(loaded.extensions["freshnessThreshold"].is_null());
}

#[test]
fn clearing_extensions_removes_side_record() {
    let repo = open_repo(QueryGeneratorKind::Generic);
    let mut written = alert("test-name", "test-cluster", "test-service", "test-metric");
    written.extensions = nagios_extensions();
    repo.add_or_update(&written).unwrap();

    written.extensions.clear();
    assert_eq!(repo.add_or_update(&written).unwrap(), UpsertOutcome::Updated);
    assert!(repo.get(written.id).unwrap().unwrap().extensions.is_empty());
}

#[test]
fn count_tracks_distinct_ids() {
    let repo = open_repo(QueryGeneratorKind::Generic);
    assert_eq!(repo.count().unwrap(), 0);

    let first = alert("a", "c", "s", "m");
    let second = alert("b", "c", "s", "m");
    repo.add_or_update(&first).unwrap();
    repo.add_or_update(&second).unwrap();
    repo.add_or_update(&first).unwrap();

    assert_eq!(repo.count().unwrap(), 2);
}

#[test]
fn contains_matches_any_text_column() {
    let repo = open_repo(QueryGeneratorKind::Generic);
    let matching = [
        alert("my-contained-alert", "c", "s", "m"),
        alert("a", "c", "contained-service", "m"),
        alert("b", "c", "s", "contained_metric"),
    ];
    for record in &matching {
        repo.add_or_update(record).unwrap();
    }
    repo.add_or_update(&alert("x", "c", "s", "m")).unwrap();
    repo.add_or_update(&alert("contain", "c", "s", "m")).unwrap();

    let result = repo
        .create_query()
        .unwrap()
        .with_contains("contained")
        .execute()
        .unwrap();

    assert_eq!(result.total, 3);
    let ids: Vec<Uuid> = result.values.iter().map(|value| value.id).collect();
    let expected: Vec<Uuid> = matching.iter().map(|value| value.id).collect();
    assert_eq!(ids, expected);
}

#[test]
fn paging_returns_insertion_ordered_pages() {
    let repo = open_repo(QueryGeneratorKind::Generic);
    let records = [
        alert("first", "paging-cluster", "paging-service", "m"),
        alert("second", "paging-cluster", "paging-service", "m"),
        alert("third", "paging-cluster", "paging-service", "m"),
    ];
    for record in &records {
        repo.add_or_update(record).unwrap();
    }
    repo.add_or_update(&alert("other", "elsewhere", "paging-service", "m"))
        .unwrap();

    let first_page = repo
        .create_query()
        .unwrap()
        .with_cluster("paging-cluster")
        .with_service("paging-service")
        .with_limit(2)
        .execute()
        .unwrap();
    assert_eq!(first_page.values.len(), 2);
    assert_eq!(first_page.total, 3);

    let second_page = repo
        .create_query()
        .unwrap()
        .with_cluster("paging-cluster")
        .with_service("paging-service")
        .with_limit(2)
        .with_offset(2)
        .execute()
        .unwrap();
    assert_eq!(second_page.values.len(), 1);
    assert_eq!(second_page.values[0].id, records[2].id);
    assert_eq!(second_page.total, 3);
}

#[test]
fn zero_limit_is_treated_as_one() {
    let repo = open_repo(QueryGeneratorKind::Generic);
    repo.add_or_update(&alert("a", "c", "s", "m")).unwrap();
    repo.add_or_update(&alert("b", "c", "s", "m")).unwrap();

    let query = repo.create_query().unwrap().with_limit(0);
    assert_eq!(query.limit(), 1);
    assert_eq!(query.execute().unwrap().values.len(), 1);
}

#[test]
fn filters_by_context() {
    let repo = open_repo(QueryGeneratorKind::Generic);
    let mut host = alert("host-alert", "c", "s", "m");
    host.context = Context::Host;
    repo.add_or_update(&host).unwrap();
    repo.add_or_update(&alert("cluster-alert", "c", "s", "m"))
        .unwrap();

    let result = repo
        .create_query()
        .unwrap()
        .with_context(Context::Host)
        .execute()
        .unwrap();
    assert_eq!(result.total, 1);
    assert_eq!(result.values[0].id, host.id);
}

#[test]
fn case_sensitive_generator_respects_case() {
    let generic = open_repo(QueryGeneratorKind::Generic);
    let sensitive = open_repo(QueryGeneratorKind::CaseSensitive);
    for repo in [&generic, &sensitive] {
        repo.add_or_update(&alert("Contained", "c", "s", "m")).unwrap();
        repo.add_or_update(&alert("contained", "c", "s", "m")).unwrap();
    }

    let generic_hits = generic
        .create_query()
        .unwrap()
        .with_contains("contained")
        .execute()
        .unwrap();
    assert_eq!(generic_hits.total, 2);

    let sensitive_hits = sensitive
        .create_query()
        .unwrap()
        .with_contains("contained")
        .execute()
        .unwrap();
    assert_eq!(sensitive_hits.total, 1);
    assert_eq!(sensitive_hits.values[0].name, "contained");
}

#[test]
fn upsert_updates_in_place_and_bumps_version() {
    let conn = shared();
    let repo = DatabaseAlertRepository::new(conn.clone(), Box::new(GenericAlertQueryGenerator));
    repo.open().unwrap();

    let mut record = alert("before", "c", "s", "m");
    assert_eq!(repo.add_or_update(&record).unwrap(), UpsertOutcome::Created);
    assert_eq!(stored_version(&conn, record.id), 1);

    record.name = "after".to_string();
    record.operator = Operator::GreaterThan;
    record.value = Quantity::new(99.5, None);
    assert_eq!(repo.add_or_update(&record).unwrap(), UpsertOutcome::Updated);

    assert_eq!(repo.count().unwrap(), 1);
    assert_eq!(stored_version(&conn, record.id), 2);
    assert_eq!(repo.get(record.id).unwrap().unwrap(), record);

    let (created_at, updated_at): (i64, i64) = conn
        .lock()
        .unwrap()
        .query_row(
            "SELECT created_at, updated_at FROM alerts WHERE id = ?1;",
            [record.id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert!(created_at > 0);
    assert!(updated_at >= created_at);
}

#[test]
fn stale_version_is_a_storage_conflict() {
    let conn = shared();
    let repo = DatabaseAlertRepository::new(conn.clone(), Box::new(GenericAlertQueryGenerator));
    repo.open().unwrap();

    let record = alert("a", "c", "s", "m");
    repo.add_or_update(&record).unwrap();

    let mut stale = AlertRow::from_alert(&record).unwrap();
    stale.version = 5;
    let err = GenericAlertQueryGenerator
        .save(&conn.lock().unwrap(), &stale)
        .unwrap_err();

    assert!(err.is_conflict());
    assert!(matches!(
        err,
        RepoError::StorageConflict {
            id,
            reason: ConflictReason::VersionMismatch { expected_version: 5 },
        } if id == record.id
    ));
    assert_eq!(stored_version(&conn, record.id), 1);
}

#[test]
fn serialization_failure_writes_nothing() {
    let repo = open_repo(QueryGeneratorKind::Generic);
    let mut record = alert("a", "c", "s", "m");
    record
        .extensions
        .insert("maxCheckAttempts".to_string(), json!({"times": 3}));

    let err = repo.add_or_update(&record).unwrap_err();
    assert!(matches!(err, RepoError::Serialization { id, .. } if id == record.id));
    assert_eq!(repo.count().unwrap(), 0);
}

#[test]
fn extensions_without_known_keys_are_rejected() {
    let repo = open_repo(QueryGeneratorKind::Generic);
    let mut record = alert("a", "c", "s", "m");
    record.extensions.insert("foo".to_string(), json!(1));

    let err = repo.add_or_update(&record).unwrap_err();
    assert!(matches!(err, RepoError::Serialization { id, .. } if id == record.id));
    assert!(repo.get(record.id).unwrap().is_none());
}

#[test]
fn malformed_stored_row_reads_as_absent() {
    let conn = shared();
    let repo = DatabaseAlertRepository::new(conn.clone(), Box::new(GenericAlertQueryGenerator));
    repo.open().unwrap();

    let broken = alert("broken", "c", "s", "m");
    let healthy = alert("healthy", "c", "s", "m");
    repo.add_or_update(&broken).unwrap();
    repo.add_or_update(&healthy).unwrap();
    conn.lock()
        .unwrap()
        .execute(
            "UPDATE alerts SET quantity = '{oops' WHERE id = ?1;",
            [broken.id.to_string()],
        )
        .unwrap();

    assert!(repo.get(broken.id).unwrap().is_none());

    let result = repo.create_query().unwrap().execute().unwrap();
    assert_eq!(result.total, 2);
    assert_eq!(result.values.len(), 1);
    assert_eq!(result.values[0].id, healthy.id);
}

#[test]
fn etag_reflects_newest_row_on_page() {
    let conn = shared();
    let repo = DatabaseAlertRepository::new(conn.clone(), Box::new(GenericAlertQueryGenerator));
    repo.open().unwrap();

    let empty = repo.create_query().unwrap().execute().unwrap();
    assert!(empty.values.is_empty());
    assert_eq!(empty.etag, "0");

    let record = alert("a", "c", "s", "m");
    repo.add_or_update(&record).unwrap();
    let newest: i64 = conn
        .lock()
        .unwrap()
        .query_row("SELECT MAX(updated_at) FROM alerts;", [], |row| row.get(0))
        .unwrap();

    let result = repo.create_query().unwrap().execute().unwrap();
    assert_ne!(result.etag, "0");
    assert_eq!(result.etag, format!("{newest:x}"));
}

#[test]
fn operations_require_open_repository() {
    let repo = DatabaseAlertRepository::new(shared(), Box::new(GenericAlertQueryGenerator));
    assert_eq!(repo.state(), RepositoryState::Closed);

    let err = repo.get(Uuid::new_v4()).unwrap_err();
    assert!(matches!(
        err,
        RepoError::InvalidState {
            operation: "get",
            expected: RepositoryState::Open,
            actual: RepositoryState::Closed,
            ..
        }
    ));
    assert!(repo.count().is_err());
    assert!(repo.create_query().is_err());
    assert!(repo.add_or_update(&alert("a", "c", "s", "m")).is_err());
    assert!(repo.close().is_err());

    repo.open().unwrap();
    assert!(matches!(
        repo.open().unwrap_err(),
        RepoError::InvalidState {
            operation: "open",
            ..
        }
    ));

    repo.close().unwrap();
    assert!(repo.count().is_err());
    assert!(repo.delete_all().is_err());
}

#[test]
fn delete_all_removes_rows_and_side_records() {
    let conn = shared();
    let repo = DatabaseAlertRepository::new(conn.clone(), Box::new(GenericAlertQueryGenerator));
    repo.open().unwrap();

    let mut record = alert("a", "c", "s", "m");
    record.extensions = nagios_extensions();
    repo.add_or_update(&record).unwrap();
    repo.add_or_update(&alert("b", "c", "s", "m")).unwrap();

    assert_eq!(repo.delete_all().unwrap(), 2);
    assert_eq!(repo.count().unwrap(), 0);
    let side_records: i64 = conn
        .lock()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM alert_nagios_extensions;", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(side_records, 0);
}

#[test]
fn concurrent_upserts_of_one_id_serialize() {
    let conn = shared();
    let repo = Arc::new(DatabaseAlertRepository::new(
        conn.clone(),
        Box::new(GenericAlertQueryGenerator),
    ));
    repo.open().unwrap();
    let record = alert("shared", "c", "s", "m");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let repo = Arc::clone(&repo);
            let record = record.clone();
            thread::spawn(move || repo.add_or_update(&record).unwrap())
        })
        .collect();
    let created = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|outcome| outcome.is_created())
        .count();

    assert_eq!(created, 1);
    assert_eq!(repo.count().unwrap(), 1);
    assert_eq!(stored_version(&conn, record.id), 8);
}

#[test]
fn from_config_selects_generator() {
    let config = RepositoryConfig {
        query_generator: "case_sensitive".to_string(),
    };
    let repo = DatabaseAlertRepository::from_config(shared(), &config).unwrap();
    repo.open().unwrap();
    repo.add_or_update(&alert("Upper", "c", "s", "m")).unwrap();

    let hits = repo
        .create_query()
        .unwrap()
        .with_contains("upper")
        .execute()
        .unwrap();
    assert_eq!(hits.total, 0);

    let bad = RepositoryConfig {
        query_generator: "nope".to_string(),
    };
    assert!(DatabaseAlertRepository::from_config(shared(), &bad).is_err());
}

#[test]
fn query_built_while_open_fails_after_close() {
    let repo = open_repo(QueryGeneratorKind::Generic);
    repo.add_or_update(&alert("a", "c", "s", "m")).unwrap();
    let query = repo.create_query().unwrap().with_cluster("c");

    repo.close().unwrap();

    assert!(matches!(
        query.execute().unwrap_err(),
        RepoError::InvalidState {
            repository: "alert",
            operation: "query",
            expected: RepositoryState::Open,
            actual: RepositoryState::Closed,
        }
    ));
    assert!(matches!(
        repo.query(&query).unwrap_err(),
        RepoError::InvalidState {
            operation: "query",
            ..
        }
    ));
}

#[test]
fn query_from_another_repository_is_rejected() {
    let first = open_repo(QueryGeneratorKind::Generic);
    let second = open_repo(QueryGeneratorKind::Generic);
    let query = first.create_query().unwrap();

    assert!(matches!(
        second.query(&query).unwrap_err(),
        RepoError::ForeignQuery {
            repository: "alert"
        }
    ));
    assert!(first.query(&query).unwrap().values.is_empty());
}
