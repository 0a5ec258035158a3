//! Concurrent relation hydration.
//!
//! Every enabled relation with a non-empty key set fetches concurrently. Fetches never touch the
//! primary records: each returns a [`Patch`] and the patches are applied here, one at a time in
//! declaration order, after all fetches have joined. A failed relation is logged and reported;
//! its field stays empty while the others are still applied. Cancellation, deadline and
//! composition errors abort the remaining fetches and fail the call.

mod relation;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::HydrateError;

pub use relation::{Patch, PendingPatch, Relation, RelationKey, RelationTask};

/// A relation that could not be hydrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRelation {
    pub relation: &'static str,
    pub error: String,
}

/// What happened to each enabled relation of one hydration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HydrationReport {
    pub fetched: Vec<&'static str>,
    /// Enabled but no record referenced anything.
    pub skipped: Vec<&'static str>,
    pub failed: Vec<FailedRelation>,
}

impl HydrationReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    #[must_use]
    pub fn failed(&self, relation: &str) -> bool {
        self.failed.iter().any(|f| f.relation == relation)
    }
}

/// Hydrate `records` with every enabled relation.
///
/// # Errors
/// `Cancelled` or `DeadlineExceeded` when the request is aborted, `CompositionError` when a
/// nested fetch breaks the depth or cycle bounds. Other relation failures are not errors; they
/// are listed in the returned report.
pub async fn hydrate<T: Send + 'static>(
    ctx: &RequestContext,
    entity: &'static str,
    records: &mut [T],
    relations: &[Arc<dyn Relation<T>>],
) -> Result<HydrationReport, HydrateError> {
    let mut report = HydrationReport::default();
    if records.is_empty() {
        return Ok(report);
    }

    let mut tasks = JoinSet::new();
    let mut names = HashMap::new();
    for (position, relation) in relations.iter().enumerate() {
        if !relation.enabled() {
            continue;
        }
        match relation.prepare(ctx, records) {
            Some(pending) => {
                let handle = tasks.spawn(async move { (position, pending.await) });
                names.insert(handle.id(), relation.name());
            }
            None => {
                debug!(entity, relation = relation.name(), "no keys, relation skipped");
                report.skipped.push(relation.name());
            }
        }
    }

    let mut patches: Vec<Option<Patch<T>>> = relations.iter().map(|_| None).collect();
    loop {
        let joined = tokio::select! {
            err = ctx.aborted() => {
                tasks.abort_all();
                return Err(err);
            }
            joined = tasks.join_next_with_id() => joined,
        };
        let Some(joined) = joined else { break };
        match joined {
            Ok((_, (position, Ok(patch)))) => {
                patches[position] = Some(patch);
            }
            Ok((_, (_, Err(err)))) if err.is_fatal() => {
                tasks.abort_all();
                return Err(unwrap_relation(err));
            }
            Ok((id, (_, Err(err)))) => {
                let relation = names.get(&id).copied().unwrap_or("unknown");
                warn!(entity, relation, error = %err, "relation fetch failed");
                report.failed.push(FailedRelation {
                    relation,
                    error: err.to_string(),
                });
            }
            Err(join_err) => {
                let relation = names.get(&join_err.id()).copied().unwrap_or("unknown");
                warn!(entity, relation, error = %join_err, "relation task did not complete");
                report.failed.push(FailedRelation {
                    relation,
                    error: join_err.to_string(),
                });
            }
        }
    }

    for (relation, patch) in relations.iter().zip(patches) {
        if let Some(patch) = patch {
            patch(records);
            report.fetched.push(relation.name());
        }
    }
    Ok(report)
}

fn unwrap_relation(err: HydrateError) -> HydrateError {
    match err {
        HydrateError::RelationError { source, .. } => unwrap_relation(*source),
        other => other,
    }
}
