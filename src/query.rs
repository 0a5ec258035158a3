//! The runner: `Query::new(&ctx, spec).filter(..).paginate()`.
//!
//! A `Query` owns one spec plus per-call filters, ordering and paging, and is consumed by one of
//! the terminal operations. Every terminal operation enters the spec's entity on the request
//! context first, so a nested query that would exceed the depth bound or re-enter an entity
//! already being fetched fails before it issues a statement.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::decode::RowView;
use crate::error::HydrateError;
use crate::hydrate::{RelationKey, hydrate};
use crate::paginate::{Page, PageWindow, PaginationParams};
use crate::query_spec::{Predicate, QuerySpec, predicate_params};
use crate::results::ResultSet;
use crate::types::RowValues;

static ORDER_TERM: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"(?i)^[a-z_][a-z0-9_]*(\.[a-z_][a-z0-9_]*)?(\s+(asc|desc))?(\s+nulls\s+(first|last))?$")
});

/// Reject ordering terms that are not `[table.]column [ASC|DESC] [NULLS FIRST|LAST]`, so caller
/// supplied overrides cannot inject SQL.
fn validate_order_terms(terms: &[&str]) -> Result<Vec<String>, HydrateError> {
    let pattern = ORDER_TERM
        .as_ref()
        .map_err(|e| HydrateError::Other(format!("order-by pattern: {e}")))?;
    terms
        .iter()
        .map(|term| {
            let term = term.trim();
            if pattern.is_match(term) {
                Ok(term.to_string())
            } else {
                Err(HydrateError::ConfigError(format!(
                    "invalid order-by term `{term}`"
                )))
            }
        })
        .collect()
}

/// Final statement text for one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Statements {
    pub main: String,
    pub count: Option<String>,
    pub params: Vec<RowValues>,
}

pub struct Query<T> {
    ctx: RequestContext,
    spec: QuerySpec<T>,
    filters: Vec<Predicate>,
    order_by: Option<Vec<String>>,
    group_by: Option<Vec<String>>,
    paging: PaginationParams,
    without_count: bool,
    wrap_select: bool,
    error: Option<HydrateError>,
}

impl<T: Send + 'static> Query<T> {
    /// Run `spec` under `ctx`. The spec's routing, when set, replaces the request's tier for this
    /// query and everything it hydrates.
    #[must_use]
    pub fn new(ctx: &RequestContext, spec: QuerySpec<T>) -> Self {
        let routing = spec.routing.unwrap_or(ctx.routing());
        let paging = PaginationParams {
            limit: Some(ctx.config().default_limit.max(1)),
            ..PaginationParams::default()
        };
        Self {
            ctx: ctx.clone().with_routing(routing),
            without_count: spec.without_count,
            wrap_select: spec.wrap_select,
            spec,
            filters: Vec::new(),
            order_by: None,
            group_by: None,
            paging,
            error: None,
        }
    }

    fn fail(&mut self, err: HydrateError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Add a condition; the first becomes `WHERE`, later ones `AND`. Applies to the count too.
    #[must_use]
    pub fn filter(mut self, sql: &str, params: Vec<RowValues>) -> Self {
        self.filters.push(Predicate::new(sql, params));
        self
    }

    #[must_use]
    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    /// `column IN (keys)`; an empty key list matches nothing.
    #[must_use]
    pub fn filter_in<K: RelationKey>(self, column: &str, keys: &[K]) -> Self {
        self.predicate(Predicate::in_list(column, keys))
    }

    /// Replace the spec's ordering.
    #[must_use]
    pub fn order_by(mut self, terms: &[&str]) -> Self {
        match validate_order_terms(terms) {
            Ok(terms) => self.order_by = Some(terms),
            Err(e) => self.fail(e),
        }
        self
    }

    #[must_use]
    pub fn group_by(mut self, terms: &[&str]) -> Self {
        self.group_by = Some(terms.iter().map(|s| (*s).to_string()).collect());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.paging.limit = Some(limit);
        self
    }

    /// No `LIMIT`: one page holding every record.
    #[must_use]
    pub fn unbounded(mut self) -> Self {
        self.paging.limit = None;
        self
    }

    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.paging.page = page;
        self
    }

    #[must_use]
    pub fn keyword(mut self, keyword: &str) -> Self {
        self.paging.keyword = Some(keyword.to_string());
        self
    }

    /// Take page, limit, keyword and ordering overrides from caller input.
    #[must_use]
    pub fn pagination(mut self, params: &PaginationParams) -> Self {
        if !params.order_by.is_empty() {
            let terms: Vec<&str> = params.order_by.iter().map(String::as_str).collect();
            self = self.order_by(&terms);
        }
        self.paging = PaginationParams {
            order_by: Vec::new(),
            ..params.clone()
        };
        self
    }

    #[must_use]
    pub fn without_count(mut self, without_count: bool) -> Self {
        self.without_count = without_count;
        self
    }

    #[must_use]
    pub fn wrap_select(mut self, wrap: bool) -> Self {
        self.wrap_select = wrap;
        self
    }

    fn keyword_predicate(&self) -> Option<Predicate> {
        let keyword = self.paging.keyword.as_deref().map(str::trim)?;
        if keyword.is_empty() {
            return None;
        }
        if self.spec.keyword_columns.is_empty() {
            debug!(entity = self.spec.entity, "keyword ignored, no keyword columns");
            return None;
        }
        let pattern = RowValues::Text(format!("%{keyword}%"));
        let sql = self
            .spec
            .keyword_columns
            .iter()
            .map(|column| format!("{column} LIKE ?"))
            .collect::<Vec<_>>()
            .join(" OR ");
        Some(Predicate::new(
            format!("({sql})"),
            vec![pattern; self.spec.keyword_columns.len()],
        ))
    }

    /// Assemble the statements: `WHERE`, `GROUP BY` and `HAVING` go on both; `ORDER BY` and the
    /// window only on the main statement. The count wraps its base as `SELECT COUNT(1) FROM (...) t`.
    fn compose(&self, window: Option<PageWindow>, counted: bool) -> Result<Statements, HydrateError> {
        if let Some(err) = &self.error {
            return Err(HydrateError::ConfigError(err.to_string()));
        }
        let mut predicates: Vec<Predicate> = self.spec.predicates.clone();
        predicates.extend(self.filters.iter().cloned());
        predicates.extend(self.keyword_predicate());

        let mut filtered = String::new();
        for (i, predicate) in predicates.iter().enumerate() {
            filtered.push_str(if i == 0 { " WHERE " } else { " AND " });
            filtered.push_str(&predicate.sql);
        }
        let group_by = self.group_by.as_ref().unwrap_or(&self.spec.group_by);
        if !group_by.is_empty() {
            filtered.push_str(" GROUP BY ");
            filtered.push_str(&group_by.join(", "));
        }
        if let Some(having) = &self.spec.having {
            filtered.push_str(" HAVING ");
            filtered.push_str(having);
        }

        let mut main = format!("{}{filtered}", self.spec.raw_sql);
        let order_by = self.order_by.as_ref().unwrap_or(&self.spec.order_by);
        if !order_by.is_empty() {
            main.push_str(" ORDER BY ");
            main.push_str(&order_by.join(", "));
        }
        if let Some(window) = window {
            main.push_str(&window.sql_suffix());
        }
        if self.wrap_select {
            main = format!("SELECT * FROM (\n{main}\n) alias");
        }

        let count = counted.then(|| {
            let base = self.spec.count_sql.as_deref().unwrap_or(&self.spec.raw_sql);
            format!("SELECT COUNT(1) FROM (\n{base}{filtered}\n) t")
        });

        Ok(Statements {
            main,
            count,
            params: predicate_params(&predicates),
        })
    }

    /// Statements `paginate` would run with the current settings.
    ///
    /// # Errors
    /// Stored builder errors (e.g. a rejected order-by term) and invalid paging.
    pub fn statements(&self) -> Result<Statements, HydrateError> {
        let window = self.paging.window(self.ctx.config())?;
        self.compose(Some(window), !self.without_count)
    }

    /// Main and count SQL text `paginate` would run.
    ///
    /// # Errors
    /// See [`Query::statements`].
    pub fn sql(&self) -> Result<(String, Option<String>), HydrateError> {
        let statements = self.statements()?;
        Ok((statements.main, statements.count))
    }

    /// Main statement with its parameters inlined, for logs only. The output is approximate:
    /// placeholders are matched positionally outside quoted text and comments, and values are
    /// rendered as literals, so it is never fit to execute.
    ///
    /// # Errors
    /// See [`Query::statements`].
    pub fn explain(&self) -> Result<String, HydrateError> {
        let statements = self.statements()?;
        Ok(inline_params(&statements.main, &statements.params))
    }

    fn decode(&self, rows: &ResultSet) -> Vec<T> {
        let mut records = Vec::with_capacity(rows.len());
        for (index, row) in rows.results.iter().enumerate() {
            match (self.spec.decoder)(&RowView::new(row)) {
                Ok(record) => records.push(record),
                Err(error) => {
                    warn!(entity = self.spec.entity, row = index, %error, "row skipped");
                }
            }
        }
        records
    }

    /// Count and fetch one page, then hydrate it.
    ///
    /// # Errors
    /// Build-time errors, `CompositionError`, count or main statement failures and
    /// cancellation. Row-decode and relation failures are not errors.
    pub async fn paginate(self) -> Result<Page<T>, HydrateError> {
        let ctx = self.ctx.enter(self.spec.entity)?;
        let window = self.paging.window(ctx.config())?;
        let statements = self.compose(Some(window), !self.without_count)?;
        debug!(
            entity = self.spec.entity,
            label = self.spec.description.as_str(),
            sql = statements.main.as_str(),
            "paginate"
        );

        let (rows, total) = match &statements.count {
            Some(count_sql) => {
                let (rows, counted) = tokio::try_join!(
                    ctx.select(&statements.main, &statements.params),
                    ctx.select(count_sql, &statements.params),
                )?;
                let total = counted.scalar_int().ok_or_else(|| {
                    HydrateError::ExecutionError(format!(
                        "count for `{}` returned no integer",
                        self.spec.entity
                    ))
                })?;
                (rows, Some(total))
            }
            None => (ctx.select(&statements.main, &statements.params).await?, None),
        };

        let fetched = rows.len();
        let mut records = self.decode(&rows);
        let report = hydrate(&ctx, self.spec.entity, &mut records, &self.spec.relations).await?;
        Ok(match total {
            Some(total) => Page::counted(records, window, total, report),
            None => Page::infinite(records, window, fetched, report),
        })
    }

    /// Fetch one page without a count; `has_next` means the page came back full.
    ///
    /// # Errors
    /// See [`Query::paginate`].
    pub async fn paginate_infinite(self) -> Result<Page<T>, HydrateError> {
        self.without_count(true).paginate().await
    }

    /// Every matching record, hydrated, without paging or count.
    ///
    /// # Errors
    /// See [`Query::paginate`].
    pub async fn find(self) -> Result<Vec<T>, HydrateError> {
        self.fetch(None).await
    }

    /// The first matching record.
    ///
    /// # Errors
    /// `NotFound` when nothing matches, otherwise see [`Query::paginate`].
    pub async fn first(self) -> Result<T, HydrateError> {
        let window = PageWindow {
            page: 1,
            limit: Some(1),
            offset: 0,
        };
        self.fetch(Some(window))
            .await?
            .into_iter()
            .next()
            .ok_or(HydrateError::NotFound)
    }

    async fn fetch(self, window: Option<PageWindow>) -> Result<Vec<T>, HydrateError> {
        let ctx = self.ctx.enter(self.spec.entity)?;
        let statements = self.compose(window, false)?;
        debug!(
            entity = self.spec.entity,
            label = self.spec.description.as_str(),
            depth = ctx.depth(),
            sql = statements.main.as_str(),
            "find"
        );
        let rows = ctx.select(&statements.main, &statements.params).await?;
        let mut records = self.decode(&rows);
        let report = hydrate(&ctx, self.spec.entity, &mut records, &self.spec.relations).await?;
        if !report.is_clean() {
            debug!(entity = self.spec.entity, failed = ?report.failed, "partially hydrated");
        }
        Ok(records)
    }
}

#[derive(Clone, Copy)]
enum Lexeme {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

// Positional `?` replacement that leaves string literals, quoted identifiers and comments alone.
fn inline_params(sql: &str, params: &[RowValues]) -> String {
    let mut params = params.iter();
    let mut out = String::with_capacity(sql.len());
    let mut state = Lexeme::Code;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match state {
            Lexeme::Code => match c {
                '\'' | '"' => state = Lexeme::Quoted(c),
                '-' if chars.peek() == Some(&'-') => state = Lexeme::LineComment,
                '/' if chars.peek() == Some(&'*') => {
                    out.push(c);
                    if let Some(star) = chars.next() {
                        out.push(star);
                    }
                    state = Lexeme::BlockComment;
                    continue;
                }
                '?' => {
                    if let Some(value) = params.next() {
                        out.push_str(&value.to_sql_literal());
                        continue;
                    }
                }
                _ => {}
            },
            Lexeme::Quoted(quote) if c == quote => state = Lexeme::Code,
            Lexeme::LineComment if c == '\n' => state = Lexeme::Code,
            Lexeme::BlockComment if c == '*' && chars.peek() == Some(&'/') => {
                out.push(c);
                if let Some(slash) = chars.next() {
                    out.push(slash);
                }
                state = Lexeme::Code;
                continue;
            }
            _ => {}
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inlining_skips_quotes_and_comments() {
        let sql = "SELECT /* who? */ a FROM t -- why?\nWHERE b = ? AND c = '?' AND \"d?\" = ? AND e = ?";
        let inlined = inline_params(
            sql,
            &[RowValues::Int(7), RowValues::Text("o'k".into())],
        );
        assert_eq!(
            inlined,
            "SELECT /* who? */ a FROM t -- why?\nWHERE b = 7 AND c = '?' AND \"d?\" = 'o''k' AND e = ?"
        );
    }

    #[test]
    fn order_terms_are_validated() {
        assert_eq!(
            validate_order_terms(&["po.created_at DESC", "id"]).unwrap(),
            vec!["po.created_at DESC".to_string(), "id".to_string()]
        );
        assert!(validate_order_terms(&["id; DROP TABLE users"]).is_err());
        assert!(validate_order_terms(&["(SELECT 1)"]).is_err());
        assert!(validate_order_terms(&["name nulls last"]).is_ok());
    }
}
