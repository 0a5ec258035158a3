use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::HydrateError;
use crate::executor::QueryExecutor;
use crate::results::ResultSet;
use crate::types::{ReadRouting, RowValues};

/// Everything one request shares across its main query, relation fetches and nested queries:
/// executor, consistency tier, cancellation, deadline, statement permits and composition lineage.
///
/// Cloning is cheap; clones observe the same cancellation token and permits.
#[derive(Clone)]
pub struct RequestContext {
    executor: Arc<dyn QueryExecutor>,
    config: Arc<EngineConfig>,
    routing: ReadRouting,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    permits: Arc<Semaphore>,
    lineage: Vec<&'static str>,
}

impl RequestContext {
    #[must_use]
    pub fn new(executor: Arc<dyn QueryExecutor>, config: EngineConfig) -> Self {
        let permits = config.permits_for(executor.pool_size());
        let deadline = config
            .request_timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        Self {
            executor,
            config: Arc::new(config),
            routing: ReadRouting::default(),
            cancel: CancellationToken::new(),
            deadline,
            permits: Arc::new(Semaphore::new(permits)),
            lineage: Vec::new(),
        }
    }

    /// Tie the request to an externally owned token, e.g. one cancelled on client disconnect.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_routing(mut self, routing: ReadRouting) -> Self {
        self.routing = routing;
        self
    }

    #[must_use]
    pub fn routing(&self) -> ReadRouting {
        self.routing
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<dyn QueryExecutor> {
        &self.executor
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this request and every in-flight statement under it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Number of enclosing queries; 0 for a context no query has entered yet.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lineage.len()
    }

    #[must_use]
    pub fn lineage(&self) -> &[&'static str] {
        &self.lineage
    }

    /// Context for running a query over `entity` beneath the current one.
    ///
    /// # Errors
    /// `CompositionError` when `entity` is already being fetched further up (a cycle), or when the
    /// nesting would exceed `max_depth`.
    pub fn enter(&self, entity: &'static str) -> Result<RequestContext, HydrateError> {
        if self.lineage.contains(&entity) {
            return Err(HydrateError::CompositionError(format!(
                "`{entity}` is already being hydrated by {}",
                self.lineage.join(" -> ")
            )));
        }
        if self.lineage.len() > self.config.max_depth {
            return Err(HydrateError::CompositionError(format!(
                "nesting `{entity}` under {} exceeds max depth {}",
                self.lineage.join(" -> "),
                self.config.max_depth
            )));
        }
        let mut nested = self.clone();
        nested.lineage.push(entity);
        Ok(nested)
    }

    /// Fail fast when the request was cancelled or its deadline passed.
    ///
    /// # Errors
    /// `Cancelled` or `DeadlineExceeded`.
    pub fn check(&self) -> Result<(), HydrateError> {
        if self.cancel.is_cancelled() {
            return Err(HydrateError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(HydrateError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Run a SELECT under this request's routing, permits, deadline and cancellation.
    ///
    /// # Errors
    /// `Cancelled`/`DeadlineExceeded` when aborted, otherwise whatever the executor reports.
    pub async fn select(&self, sql: &str, params: &[RowValues]) -> Result<ResultSet, HydrateError> {
        self.check()?;
        let statement = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| HydrateError::Other(format!("statement semaphore closed: {e}")))?;
            debug!(routing = ?self.routing, depth = self.depth(), sql, "select");
            self.executor.select(self.routing, sql, params).await
        };
        self.guard(statement).await
    }

    async fn guard<F, R>(&self, fut: F) -> Result<R, HydrateError>
    where
        F: Future<Output = Result<R, HydrateError>>,
    {
        tokio::select! {
            err = self.aborted() => Err(err),
            res = fut => res,
        }
    }

    /// Resolves when the request is cancelled or its deadline passes.
    pub(crate) async fn aborted(&self) -> HydrateError {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            () = self.cancel.cancelled() => HydrateError::Cancelled,
            () = deadline => HydrateError::DeadlineExceeded,
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("routing", &self.routing)
            .field("deadline", &self.deadline)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("available_permits", &self.permits.available_permits())
            .field("lineage", &self.lineage)
            .finish_non_exhaustive()
    }
}
