//! Page windows and page metadata.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::HydrateError;
use crate::hydrate::HydrationReport;

/// Caller-supplied paging input.
///
/// `page` is 1-based; 0 is treated as 1. `limit: None` is the unbounded sentinel: a single page
/// holding every record. `order_by` entries replace the spec's default ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationParams {
    pub page: u32,
    pub limit: Option<u32>,
    pub keyword: Option<String>,
    pub order_by: Vec<String>,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: 1,
            limit: Some(EngineConfig::default().default_limit),
            keyword: None,
            order_by: Vec::new(),
        }
    }
}

impl PaginationParams {
    #[must_use]
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page,
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Every record on one page.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            page: 1,
            limit: None,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    #[must_use]
    pub fn with_order_by(mut self, order_by: &[&str]) -> Self {
        self.order_by = order_by.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Normalize against engine limits.
    ///
    /// # Errors
    /// `ConfigError` for a zero limit.
    pub fn window(&self, config: &EngineConfig) -> Result<PageWindow, HydrateError> {
        match self.limit {
            Some(0) => Err(HydrateError::ConfigError(
                "page limit must be positive".into(),
            )),
            Some(limit) => {
                let page = self.page.max(1);
                let limit = limit.min(config.max_limit.max(1));
                Ok(PageWindow {
                    page,
                    limit: Some(limit),
                    offset: u64::from(page - 1) * u64::from(limit),
                })
            }
            None => Ok(PageWindow {
                page: 1,
                limit: None,
                offset: 0,
            }),
        }
    }
}

/// A normalized page request: `page >= 1`, `limit` positive or unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: u32,
    pub limit: Option<u32>,
    pub offset: u64,
}

impl PageWindow {
    /// `LIMIT .. OFFSET ..` suffix for the main statement; empty when unbounded.
    #[must_use]
    pub fn sql_suffix(&self) -> String {
        match self.limit {
            Some(limit) if self.offset > 0 => format!(" LIMIT {limit} OFFSET {}", self.offset),
            Some(limit) => format!(" LIMIT {limit}"),
            None => String::new(),
        }
    }
}

/// One page of hydrated records plus navigation metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub page: u32,
    pub per_page: i64,
    pub offset: u64,
    /// `None` when the page was fetched without a count statement.
    pub total_record: Option<i64>,
    pub total_page: Option<i64>,
    pub has_next: bool,
    pub has_prev: bool,
    pub next_page: u32,
    pub prev_page: u32,
    pub total_current_record: usize,
    #[serde(skip_serializing_if = "HydrationReport::is_clean")]
    pub hydration: HydrationReport,
}

impl<T> Page<T> {
    /// Page metadata from a count.
    #[must_use]
    pub fn counted(records: Vec<T>, window: PageWindow, total: i64, hydration: HydrationReport) -> Self {
        let (per_page, total_page) = match window.limit {
            Some(limit) => {
                let limit = i64::from(limit.max(1));
                (limit, (total + limit - 1) / limit)
            }
            None => (total, 1),
        };
        let has_next = total_page > i64::from(window.page);
        Self::assemble(records, window, per_page, Some(total), Some(total_page), has_next, hydration)
    }

    /// Page metadata without a count: another page is assumed to exist when this one came back
    /// full. `fetched_rows` is the row count before any row was skipped by the decoder.
    #[must_use]
    pub fn infinite(
        records: Vec<T>,
        window: PageWindow,
        fetched_rows: usize,
        hydration: HydrationReport,
    ) -> Self {
        let (per_page, has_next) = match window.limit {
            Some(limit) => (i64::from(limit), fetched_rows == limit as usize),
            None => (i64::try_from(fetched_rows).unwrap_or(i64::MAX), false),
        };
        Self::assemble(records, window, per_page, None, None, has_next, hydration)
    }

    fn assemble(
        records: Vec<T>,
        window: PageWindow,
        per_page: i64,
        total_record: Option<i64>,
        total_page: Option<i64>,
        has_next: bool,
        hydration: HydrationReport,
    ) -> Self {
        let page = window.page;
        Self {
            total_current_record: records.len(),
            records,
            page,
            per_page,
            offset: window.offset,
            total_record,
            total_page,
            has_next,
            has_prev: page > 1,
            next_page: if has_next { page + 1 } else { page },
            prev_page: page.saturating_sub(1).max(1),
            hydration,
        }
    }
}
