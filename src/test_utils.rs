//! Fixtures for integration tests: a seeded sourcing database on a temporary file and executor
//! wrappers that record, fail, delay or count statements.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::error::HydrateError;
use crate::executor::QueryExecutor;
use crate::pool::SqlitePools;
use crate::results::ResultSet;
use crate::sourcing::SCHEMA;
use crate::sqlite::SqliteOptionsBuilder;
use crate::types::{ReadRouting, RowValues};

/// Seven purchase orders over three inquiries, with items, trackings, assignees and invoices.
///
/// By `updated_at DESC` the admin listing order is po-7, po-6, ..., po-1.
pub const SEED: &str = r#"
INSERT INTO users (id, name, email, company_name) VALUES
    ('u-buyer1', 'Buyer One', 'buyer1@example.com', 'Buyer One Ltd'),
    ('u-buyer2', 'Buyer Two', 'buyer2@example.com', NULL),
    ('u-seller1', 'Seller One', 'seller1@example.com', 'Seller Mill'),
    ('u-staff1', 'Staff One', 'staff1@example.com', NULL),
    ('u-staff2', 'Staff Two', 'staff2@example.com', NULL);

INSERT INTO addresses (id, user_id, line1, city, country_code) VALUES
    ('a-1', 'u-buyer1', '1 Market St', 'Hanoi', 'VN'),
    ('a-2', 'u-buyer2', '2 Harbour Rd', 'Da Nang', 'VN');

INSERT INTO inquiries (id, reference_id, title, user_id, shipping_address_id, status, created_at) VALUES
    ('iq-A', 'IQ-A', 'Linen shirts', 'u-buyer1', 'a-1', 'approved', '2024-01-01 08:00:00'),
    ('iq-B', 'IQ-B', 'Denim jackets', 'u-buyer2', 'a-2', 'approved', '2024-01-01 09:00:00'),
    ('iq-C', 'IQ-C', 'Wool scarves', 'u-buyer1', NULL, 'new', '2024-01-01 10:00:00');

INSERT INTO purchase_orders
    (id, reference_id, inquiry_id, user_id, sample_maker_id, assignee_ids, invoice_number, status,
     total_amount, internal_note, created_at, updated_at) VALUES
    ('po-1', 'PO-001', 'iq-A', 'u-buyer1', 'u-seller1', '["u-staff1","u-staff2"]', 1001, 'pending', 100.0, 'vip buyer', '2024-01-01 10:00:00', '2024-02-01 10:00:00'),
    ('po-2', 'PO-002', 'iq-A', 'u-buyer1', 'inflow', '["u-staff1"]', NULL, 'confirmed', 200.0, NULL, '2024-01-02 10:00:00', '2024-02-02 10:00:00'),
    ('po-3', 'PO-003', 'iq-B', 'u-buyer2', 'u-seller1', '[]', 1002, 'shipped', 300.0, NULL, '2024-01-03 10:00:00', '2024-02-03 10:00:00'),
    ('po-4', 'PO-004', NULL, 'u-buyer2', NULL, '[]', NULL, 'pending', 400.0, NULL, '2024-01-04 10:00:00', '2024-02-04 10:00:00'),
    ('po-5', 'PO-005', 'iq-C', 'u-buyer1', 'u-seller1', '["u-staff2"]', 1003, 'pending', 500.0, NULL, '2024-01-05 10:00:00', '2024-02-05 10:00:00'),
    ('po-6', 'PO-006', 'iq-B', 'u-buyer2', NULL, '[]', NULL, 'cancelled', 600.0, NULL, '2024-01-06 10:00:00', '2024-02-06 10:00:00'),
    ('po-7', 'PO-007', 'iq-A', 'u-buyer1', 'u-seller1', '["u-staff1"]', NULL, 'confirmed', 700.0, NULL, '2024-01-07 10:00:00', '2024-02-07 10:00:00');

INSERT INTO purchase_order_items (id, purchase_order_id, sku, quantity, unit_price) VALUES
    ('i-1', 'po-1', 'SKU-LINEN-S', 10, 2.5),
    ('i-2', 'po-1', 'SKU-LINEN-M', 20, 2.5),
    ('i-3', 'po-2', 'SKU-LINEN-L', 5, 3.0),
    ('i-4', 'po-3', 'SKU-DENIM', 50, 12.0);

INSERT INTO purchase_order_trackings (id, purchase_order_id, action, created_at) VALUES
    ('t-1', 'po-1', 'created', '2024-01-01 10:00:00'),
    ('t-2', 'po-1', 'paid', '2024-01-02 10:00:00'),
    ('t-3', 'po-3', 'shipped', '2024-01-03 10:00:00');

INSERT INTO invoices (invoice_number, total, status) VALUES
    (1001, 100.0, 'paid'),
    (1002, 300.0, 'unpaid'),
    (1003, 500.0, 'paid');
"#;

/// A seeded database. Keep the struct alive for as long as the pools are used.
pub struct SourcingDb {
    pub pools: SqlitePools,
    _dir: TempDir,
}

impl SourcingDb {
    /// Create the schema and seed data in a fresh temporary file.
    ///
    /// # Errors
    /// Pool or statement failures.
    pub async fn seeded() -> Result<Self, HydrateError> {
        let dir = tempfile::tempdir()
            .map_err(|e| HydrateError::Other(format!("tempdir: {e}")))?;
        let path = dir.path().join("sourcing.db");
        let pools = SqliteOptionsBuilder::new(path.to_string_lossy().into_owned())
            .pool_size(4)
            .build()
            .await?;
        pools.execute_batch(SCHEMA).await?;
        pools.execute_batch(SEED).await?;
        Ok(Self { pools, _dir: dir })
    }

    #[must_use]
    pub fn executor(&self) -> Arc<dyn QueryExecutor> {
        Arc::new(self.pools.clone())
    }

    #[must_use]
    pub fn context(&self) -> RequestContext {
        RequestContext::new(self.executor(), EngineConfig::default())
    }
}

/// One statement seen by a [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    pub routing: ReadRouting,
    pub sql: String,
    pub params: Vec<RowValues>,
}

/// Delegates to an inner executor and keeps every SELECT it was asked to run.
pub struct RecordingExecutor {
    inner: Arc<dyn QueryExecutor>,
    statements: Mutex<Vec<RecordedStatement>>,
}

impl RecordingExecutor {
    #[must_use]
    pub fn new(inner: Arc<dyn QueryExecutor>) -> Self {
        Self {
            inner,
            statements: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RecordedStatement>> {
        self.statements
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.lock().clone()
    }

    /// Statements whose text contains `needle`, e.g. `"FROM inquiries"`.
    #[must_use]
    pub fn matching(&self, needle: &str) -> Vec<RecordedStatement> {
        self.lock()
            .iter()
            .filter(|s| s.sql.contains(needle))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn select(
        &self,
        routing: ReadRouting,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, HydrateError> {
        self.lock().push(RecordedStatement {
            routing,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        self.inner.select(routing, sql, params).await
    }

    async fn dml(&self, sql: &str, params: &[RowValues]) -> Result<usize, HydrateError> {
        self.inner.dml(sql, params).await
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), HydrateError> {
        self.inner.execute_batch(sql).await
    }

    fn pool_size(&self) -> u32 {
        self.inner.pool_size()
    }
}

/// Fails, or delays, every SELECT whose text contains `needle`; passes the rest through.
pub struct FaultyExecutor {
    inner: Arc<dyn QueryExecutor>,
    needle: String,
    delay: Option<Duration>,
}

impl FaultyExecutor {
    /// Fail matching statements with an `ExecutionError`.
    #[must_use]
    pub fn failing(inner: Arc<dyn QueryExecutor>, needle: &str) -> Self {
        Self {
            inner,
            needle: needle.to_string(),
            delay: None,
        }
    }

    /// Sleep `delay` before running matching statements.
    #[must_use]
    pub fn delaying(inner: Arc<dyn QueryExecutor>, needle: &str, delay: Duration) -> Self {
        Self {
            inner,
            needle: needle.to_string(),
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl QueryExecutor for FaultyExecutor {
    async fn select(
        &self,
        routing: ReadRouting,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, HydrateError> {
        if sql.contains(&self.needle) {
            match self.delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(HydrateError::ExecutionError(format!(
                        "injected failure for `{}`",
                        self.needle
                    )));
                }
            }
        }
        self.inner.select(routing, sql, params).await
    }

    async fn dml(&self, sql: &str, params: &[RowValues]) -> Result<usize, HydrateError> {
        self.inner.dml(sql, params).await
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), HydrateError> {
        self.inner.execute_batch(sql).await
    }

    fn pool_size(&self) -> u32 {
        self.inner.pool_size()
    }
}

/// Holds every SELECT for `hold` and remembers the most statements that were ever in flight at
/// once.
pub struct InFlightExecutor {
    inner: Arc<dyn QueryExecutor>,
    hold: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightExecutor {
    #[must_use]
    pub fn new(inner: Arc<dyn QueryExecutor>, hold: Duration) -> Self {
        Self {
            inner,
            hold,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Highest number of concurrent SELECTs observed so far.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutor for InFlightExecutor {
    async fn select(
        &self,
        routing: ReadRouting,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, HydrateError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        let result = self.inner.select(routing, sql, params).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn dml(&self, sql: &str, params: &[RowValues]) -> Result<usize, HydrateError> {
        self.inner.dml(sql, params).await
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), HydrateError> {
        self.inner.execute_batch(sql).await
    }

    fn pool_size(&self) -> u32 {
        self.inner.pool_size()
    }
}
