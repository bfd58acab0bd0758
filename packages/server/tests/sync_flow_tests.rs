//! End-to-end replication tests over the testcontainers MySQL harness.
//!
//! One source/target schema pair per test; the metadata rows a table sync
//! needs (connection, config, mapping, job) are seeded through the same
//! migrated database the server would use.

mod common;

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::MySqlPool;
use test_context::test_context;
use tokio_util::sync::CancellationToken;

use common::TestHarness;
use server_core::domains::configs::{ConflictResolution, SyncMode, SyncOptions, TableMapping};
use server_core::kernel::error::SyncError;
use server_core::kernel::monitoring::{Monitoring, MySqlMonitorStore};
use server_core::kernel::sync::checkpoint::CheckpointStore;
use server_core::kernel::sync::memory::MemoryGovernor;
use server_core::kernel::sync::SyncEngine;

const EVENTS_DDL: &str = "id BIGINT NOT NULL PRIMARY KEY, \
                          name VARCHAR(64) NOT NULL, \
                          updated_at DATETIME(6) NOT NULL";

/// The sync collaborators one table copy needs, built per test.
struct SyncFixture {
    monitoring: Monitoring,
    checkpoints: CheckpointStore,
    memory: MemoryGovernor,
    cancel: CancellationToken,
    options: SyncOptions,
}

impl SyncFixture {
    fn new(pool: &MySqlPool) -> Self {
        Self {
            monitoring: Monitoring::new(MySqlMonitorStore::new(pool.clone())),
            checkpoints: CheckpointStore::new(pool.clone()),
            memory: MemoryGovernor::new(512),
            cancel: CancellationToken::new(),
            options: SyncOptions::default(),
        }
    }

    fn engine<'a>(&'a self, ctx: &'a TestHarness, job_id: i64) -> SyncEngine<'a> {
        SyncEngine {
            job_id,
            source: &ctx.db_pool,
            target: &ctx.db_pool,
            source_schema: &ctx.source_schema,
            target_schema: &ctx.target_schema,
            options: &self.options,
            monitoring: &self.monitoring,
            checkpoints: &self.checkpoints,
            memory: &self.memory,
            cancel: &self.cancel,
        }
    }
}

/// Create the `events` table on both sides plus the metadata rows one table
/// sync needs. Returns the mapping and a running job id.
async fn seed(ctx: &TestHarness, mode: SyncMode) -> (TableMapping, i64) {
    let pool = &ctx.db_pool;

    for schema in [&ctx.source_schema, &ctx.target_schema] {
        sqlx::query(&format!(
            "CREATE TABLE `{schema}`.`events` ({EVENTS_DDL})"
        ))
        .execute(pool)
        .await
        .unwrap();
    }

    let connection_id = sqlx::query(
        "INSERT INTO connections (name, host, port, username, password) \
         VALUES (?, 'localhost', 3306, 'test', 'test')",
    )
    .bind(format!("conn-{}", ctx.source_schema))
    .execute(pool)
    .await
    .unwrap()
    .last_insert_id() as i64;

    let config_id = sqlx::query(
        "INSERT INTO sync_configs \
         (name, source_connection_id, target_connection_id, source_schema, target_schema, options) \
         VALUES (UUID(), ?, ?, ?, ?, '{}')",
    )
    .bind(connection_id)
    .bind(connection_id)
    .bind(&ctx.source_schema)
    .bind(&ctx.target_schema)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_id() as i64;

    let mapping_id = sqlx::query(
        "INSERT INTO table_mappings (sync_config_id, source_table, target_table, mode) \
         VALUES (?, 'events', 'events', ?)",
    )
    .bind(config_id)
    .bind(mode)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_id() as i64;

    let job_id = sqlx::query(
        "INSERT INTO sync_jobs (sync_config_id, status, start_time, total_tables) \
         VALUES (?, 'running', NOW(6), 1)",
    )
    .bind(config_id)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_id() as i64;

    let mut mapping = TableMapping::builder()
        .sync_config_id(config_id)
        .source_table("events")
        .target_table("events")
        .mode(mode)
        .build();
    mapping.id = mapping_id;

    (mapping, job_id)
}

async fn insert_events(ctx: &TestHarness, rows: &[(i64, &str, NaiveDateTime)]) {
    for (id, name, updated_at) in rows {
        sqlx::query(&format!(
            "INSERT INTO `{}`.`events` (id, name, updated_at) VALUES (?, ?, ?)",
            ctx.source_schema
        ))
        .bind(id)
        .bind(*name)
        .bind(updated_at)
        .execute(&ctx.db_pool)
        .await
        .unwrap();
    }
}

async fn target_count(ctx: &TestHarness) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM `{}`.`events`",
        ctx.target_schema
    ))
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap()
}

fn ts(min: u32, sec: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, min, sec)
        .unwrap()
}

#[test_context(TestHarness)]
#[tokio::test]
async fn full_sync_copies_every_row(ctx: &TestHarness) {
    let (mapping, job_id) = seed(ctx, SyncMode::Full).await;

    let rows: Vec<(i64, String, NaiveDateTime)> = (1..=2_500)
        .map(|i| (i, format!("row-{i}"), ts(0, (i % 60) as u32)))
        .collect();
    let borrowed: Vec<(i64, &str, NaiveDateTime)> =
        rows.iter().map(|(i, n, t)| (*i, n.as_str(), *t)).collect();
    insert_events(ctx, &borrowed).await;

    let fixture = SyncFixture::new(&ctx.db_pool);
    fixture
        .monitoring
        .start_job_monitoring(job_id, mapping.sync_config_id, 1);

    let outcome = fixture.engine(ctx, job_id).sync_table(&mapping).await.unwrap();

    assert_eq!(outcome.total_rows, 2_500);
    assert_eq!(outcome.processed_rows, 2_500);
    assert_eq!(outcome.error_count, 0);
    assert_eq!(target_count(ctx).await, 2_500);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn full_sync_of_empty_table_succeeds_with_zero_rows(ctx: &TestHarness) {
    let (mapping, job_id) = seed(ctx, SyncMode::Full).await;

    let fixture = SyncFixture::new(&ctx.db_pool);
    let outcome = fixture.engine(ctx, job_id).sync_table(&mapping).await.unwrap();

    assert_eq!(outcome.processed_rows, 0);
    assert_eq!(target_count(ctx).await, 0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn incremental_bootstrap_then_delta(ctx: &TestHarness) {
    let (mapping, job_id) = seed(ctx, SyncMode::Incremental).await;

    // First run: no checkpoint, 100 rows with ascending updated_at.
    let rows: Vec<(i64, String, NaiveDateTime)> = (1..=100)
        .map(|i| (i, format!("row-{i}"), ts((i / 60) as u32, (i % 60) as u32)))
        .collect();
    let borrowed: Vec<(i64, &str, NaiveDateTime)> =
        rows.iter().map(|(i, n, t)| (*i, n.as_str(), *t)).collect();
    insert_events(ctx, &borrowed).await;

    let fixture = SyncFixture::new(&ctx.db_pool);
    let outcome = fixture.engine(ctx, job_id).sync_table(&mapping).await.unwrap();
    assert_eq!(outcome.processed_rows, 100);
    assert_eq!(target_count(ctx).await, 100);

    let checkpoint = fixture.checkpoints.load(mapping.id).await.unwrap().unwrap();
    let first_mark = checkpoint.watermark().expect("bootstrap writes a watermark");

    // Second run: five newer rows; only the delta is copied and the
    // watermark moves forward.
    let delta: Vec<(i64, &str, NaiveDateTime)> =
        (101..=105).map(|i| (i, "late", ts(2, 0))).collect();
    insert_events(ctx, &delta).await;

    let outcome = fixture.engine(ctx, job_id).sync_table(&mapping).await.unwrap();
    assert_eq!(outcome.processed_rows, 5);
    assert_eq!(target_count(ctx).await, 105);

    let checkpoint = fixture.checkpoints.load(mapping.id).await.unwrap().unwrap();
    let second_mark = checkpoint.watermark().unwrap();
    assert_eq!(second_mark.advanced_to(first_mark), second_mark);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn conflict_skip_leaves_existing_target_rows(ctx: &TestHarness) {
    let (mapping, job_id) = seed(ctx, SyncMode::Full).await;

    insert_events(ctx, &[(7, "source-version", ts(0, 1))]).await;
    sqlx::query(&format!(
        "INSERT INTO `{}`.`events` (id, name, updated_at) VALUES (7, 'target-version', ?)",
        ctx.target_schema
    ))
    .bind(ts(0, 0))
    .execute(&ctx.db_pool)
    .await
    .unwrap();

    let fixture = SyncFixture::new(&ctx.db_pool);
    let outcome = fixture.engine(ctx, job_id).sync_table(&mapping).await.unwrap();
    assert_eq!(outcome.processed_rows, 1);

    let name = sqlx::query_scalar::<_, String>(&format!(
        "SELECT name FROM `{}`.`events` WHERE id = 7",
        ctx.target_schema
    ))
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert_eq!(name, "target-version");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn conflict_overwrite_is_idempotent_over_replays(ctx: &TestHarness) {
    let (mapping, job_id) = seed(ctx, SyncMode::Full).await;
    insert_events(ctx, &[(1, "v1", ts(0, 1)), (2, "v2", ts(0, 2))]).await;

    let mut fixture = SyncFixture::new(&ctx.db_pool);
    fixture.options = SyncOptions {
        conflict_resolution: ConflictResolution::Overwrite,
        ..Default::default()
    };

    fixture.engine(ctx, job_id).sync_table(&mapping).await.unwrap();
    fixture.engine(ctx, job_id).sync_table(&mapping).await.unwrap();

    assert_eq!(target_count(ctx).await, 2);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn cancellation_stops_before_the_next_batch(ctx: &TestHarness) {
    let (mapping, job_id) = seed(ctx, SyncMode::Full).await;
    insert_events(ctx, &[(1, "only", ts(0, 1))]).await;

    let fixture = SyncFixture::new(&ctx.db_pool);
    fixture.cancel.cancel();

    let err = fixture
        .engine(ctx, job_id)
        .sync_table(&mapping)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
    assert_eq!(target_count(ctx).await, 0);
}
