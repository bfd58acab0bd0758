//! Test harness with testcontainers for integration testing.
//!
//! Uses one shared MySQL container across all tests for dramatically
//! improved performance. The container and the metadata migrations are
//! initialized once on first test, then reused; each test gets its own
//! source/target schema pair so tests can run in parallel.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio::sync::OnceCell;

// =============================================================================
// Shared Test Infrastructure
// =============================================================================

/// Shared test infrastructure that persists across all tests.
/// The container is started once and reused, migrations run once.
struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _mysql: ContainerAsync<GenericImage>,
}

/// Global shared infrastructure - initialized once, reused by all tests.
static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

/// Per-test schema suffix so parallel tests never share user tables.
static SCHEMA_SEQ: AtomicU32 = AtomicU32::new(0);

impl SharedTestInfra {
    /// Initialize shared infrastructure (container + migrations).
    /// This is called once on the first test.
    async fn init() -> Result<Self> {
        // Initialize tracing subscriber to respect RUST_LOG environment variable.
        // Uses try_init() to avoid panicking if already initialized.
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        // Start the MySQL container. The bootstrap server logs "port: 0";
        // only the final server announces "port: 3306", so waiting on that
        // line skips the throwaway init instance.
        let mysql = GenericImage::new("mysql", "8.0")
            .with_wait_for(testcontainers::core::WaitFor::message_on_stderr(
                "port: 3306",
            ))
            .with_exposed_port(testcontainers::core::ContainerPort::Tcp(3306))
            .with_env_var("MYSQL_ROOT_PASSWORD", "root")
            .with_env_var("MYSQL_DATABASE", "dbferry_meta")
            .start()
            .await
            .context("Failed to start MySQL container")?;

        let host = mysql.get_host().await?;
        let port = mysql.get_host_port_ipv4(3306).await?;
        let db_url = format!("mysql://root:root@{}:{}/dbferry_meta", host, port);

        // The server accepts TCP a beat after the ready line; retry briefly.
        let pool = connect_with_retry(&db_url).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
        pool.close().await;

        Ok(Self {
            db_url,
            _mysql: mysql,
        })
    }

    /// Get or initialize the shared infrastructure.
    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

async fn connect_with_retry(url: &str) -> Result<MySqlPool> {
    let mut last_error = None;
    for _ in 0..30 {
        match MySqlPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) => {
                last_error = Some(e);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
    Err(anyhow!(
        "MySQL container never became connectable: {:?}",
        last_error
    ))
}

// =============================================================================
// Test Harness
// =============================================================================

/// Test harness that manages test infrastructure.
///
/// Uses the shared container across all tests for fast test execution.
/// Each test gets a fresh pool and its own source/target schema pair, but
/// reuses the same MySQL container and metadata database.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let pool = &ctx.db_pool;
///     // ... test code
/// }
/// ```
pub struct TestHarness {
    /// Database pool - metadata tables plus this test's user schemas.
    pub db_pool: MySqlPool,
    /// Schema holding this test's source tables.
    pub source_schema: String,
    /// Schema holding this test's target tables.
    pub target_schema: String,
}

impl TestHarness {
    /// Creates a new test harness using the shared container.
    ///
    /// This will:
    /// 1. Get or initialize the shared MySQL container
    /// 2. Run metadata migrations (only on first call)
    /// 3. Create an empty source/target schema pair unique to this test
    pub async fn new() -> Result<Self> {
        // Shared infrastructure (container start + migrations on first call only)
        let infra = SharedTestInfra::get().await;

        let db_pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(&infra.db_url)
            .await
            .context("Failed to connect to test database")?;

        let seq = SCHEMA_SEQ.fetch_add(1, Ordering::SeqCst);
        let source_schema = format!("dbferry_src_{seq}");
        let target_schema = format!("dbferry_dst_{seq}");
        for schema in [&source_schema, &target_schema] {
            sqlx::query(&format!("CREATE DATABASE `{schema}`"))
                .execute(&db_pool)
                .await
                .with_context(|| format!("Failed to create schema {schema}"))?;
        }

        Ok(Self {
            db_pool,
            source_schema,
            target_schema,
        })
    }
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        for schema in [&self.source_schema, &self.target_schema] {
            let _ = sqlx::query(&format!("DROP DATABASE IF EXISTS `{schema}`"))
                .execute(&self.db_pool)
                .await;
        }
        self.db_pool.close().await;
    }
}
