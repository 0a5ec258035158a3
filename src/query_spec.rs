//! `QuerySpec`: one not-yet-executed query over an entity plus its relations.
//!
//! A spec is assembled with [`QuerySpecBuilder`] and validated by [`QuerySpecBuilder::build`].
//! Every build-time failure (malformed template, missing variant, duplicate relation field, self
//! nesting) surfaces there, before a statement exists. Building is pure: the same inputs yield the
//! same SQL text.

mod variant;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::decode::{FromRow, RowView};
use crate::error::HydrateError;
use crate::hydrate::Relation;
use crate::template::{FuncMap, Template};
use crate::types::{ReadRouting, Role, RowValues};

pub use variant::{Predicate, QueryVariant, ScopeFn, select_variant};

/// Turns one row into one entity, folding any embedded projections into it.
pub type Decoder<T> = Arc<dyn Fn(&RowView<'_>) -> Result<T, HydrateError> + Send + Sync>;

/// A built, immutable query plan.
pub struct QuerySpec<T> {
    pub(crate) entity: &'static str,
    pub(crate) description: String,
    pub(crate) raw_sql: String,
    pub(crate) count_sql: Option<String>,
    pub(crate) order_by: Vec<String>,
    pub(crate) group_by: Vec<String>,
    pub(crate) having: Option<String>,
    pub(crate) routing: Option<ReadRouting>,
    pub(crate) predicates: Vec<Predicate>,
    pub(crate) keyword_columns: Vec<String>,
    pub(crate) wrap_select: bool,
    pub(crate) without_count: bool,
    pub(crate) decoder: Decoder<T>,
    pub(crate) relations: Vec<Arc<dyn Relation<T>>>,
}

impl<T> QuerySpec<T> {
    #[must_use]
    pub fn builder(entity: &'static str) -> QuerySpecBuilder<T> {
        QuerySpecBuilder::new(entity)
    }

    #[must_use]
    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// Rendered `label-Role` tag, also available to templates as `{{ Description }}`.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Rendered main SELECT, before filters and paging are applied.
    #[must_use]
    pub fn raw_sql(&self) -> &str {
        &self.raw_sql
    }

    #[must_use]
    pub fn count_sql(&self) -> Option<&str> {
        self.count_sql.as_deref()
    }

    /// `Some(Primary)` for consistent reads; `None` inherits the request's tier.
    #[must_use]
    pub fn routing(&self) -> Option<ReadRouting> {
        self.routing
    }

    #[must_use]
    pub fn order_by(&self) -> &[String] {
        &self.order_by
    }

    /// Names of the relations that will run, in declaration order.
    #[must_use]
    pub fn enabled_relations(&self) -> Vec<&'static str> {
        self.relations
            .iter()
            .filter(|r| r.enabled())
            .map(|r| r.name())
            .collect()
    }
}

impl<T> Clone for QuerySpec<T> {
    fn clone(&self) -> Self {
        Self {
            entity: self.entity,
            description: self.description.clone(),
            raw_sql: self.raw_sql.clone(),
            count_sql: self.count_sql.clone(),
            order_by: self.order_by.clone(),
            group_by: self.group_by.clone(),
            having: self.having.clone(),
            routing: self.routing,
            predicates: self.predicates.clone(),
            keyword_columns: self.keyword_columns.clone(),
            wrap_select: self.wrap_select,
            without_count: self.without_count,
            decoder: Arc::clone(&self.decoder),
            relations: self.relations.clone(),
        }
    }
}

impl<T> fmt::Debug for QuerySpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySpec")
            .field("entity", &self.entity)
            .field("description", &self.description)
            .field("raw_sql", &self.raw_sql)
            .field("count_sql", &self.count_sql)
            .field("order_by", &self.order_by)
            .field("routing", &self.routing)
            .field("relations", &self.enabled_relations())
            .finish_non_exhaustive()
    }
}

/// Fluent accumulator for a [`QuerySpec`].
///
/// ```rust
/// use sql_hydrate::prelude::*;
///
/// #[derive(serde::Serialize)]
/// struct Opts { include_email: bool }
///
/// let spec = QuerySpec::<(String, String)>::builder("users")
///     .raw_sql("SELECT /* {{ Description }} */ u.id, u.name{{ if .include_email }}, u.email{{ end }} FROM users u")
///     .options(&Opts { include_email: false })
///     .describe("user-list", Role::Admin)
///     .order_by(&["u.name ASC"])
///     .decoder(|row| Ok((row.text("id")?, row.text("name")?)))
///     .build()
///     .unwrap();
/// assert_eq!(spec.raw_sql(), "SELECT /* user-list-Admin */ u.id, u.name FROM users u");
/// ```
pub struct QuerySpecBuilder<T> {
    entity: &'static str,
    label: Option<String>,
    role: Option<Role>,
    raw_sql: Option<String>,
    count_sql: Option<String>,
    order_by: Vec<String>,
    group_by: Vec<String>,
    having: Option<String>,
    routing: Option<ReadRouting>,
    context: JsonValue,
    funcs: FuncMap,
    predicates: Vec<Predicate>,
    keyword_columns: Vec<String>,
    wrap_select: bool,
    without_count: bool,
    decoder: Option<Decoder<T>>,
    relations: Vec<Arc<dyn Relation<T>>>,
    error: Option<HydrateError>,
}

impl<T> QuerySpecBuilder<T> {
    fn new(entity: &'static str) -> Self {
        Self {
            entity,
            label: None,
            role: None,
            raw_sql: None,
            count_sql: None,
            order_by: Vec::new(),
            group_by: Vec::new(),
            having: None,
            routing: None,
            context: JsonValue::Object(serde_json::Map::new()),
            funcs: FuncMap::new(),
            predicates: Vec::new(),
            keyword_columns: Vec::new(),
            wrap_select: false,
            without_count: false,
            decoder: None,
            relations: Vec::new(),
            error: None,
        }
    }

    fn fail(&mut self, err: HydrateError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Main SELECT template, rendered against [`options`](Self::options) at build time. It should
    /// end after its FROM/JOIN clauses; filters are appended as `WHERE ... AND ...`.
    #[must_use]
    pub fn raw_sql(mut self, template: &str) -> Self {
        self.raw_sql = Some(template.to_string());
        self
    }

    /// Counted SELECT template with the same FROM/JOINs as the main one. Without it the count is
    /// derived from the main statement.
    #[must_use]
    pub fn count_sql(mut self, template: &str) -> Self {
        self.count_sql = Some(template.to_string());
        self
    }

    #[must_use]
    pub fn order_by(mut self, terms: &[&str]) -> Self {
        self.order_by = terms.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn group_by(mut self, terms: &[&str]) -> Self {
        self.group_by = terms.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn having(mut self, condition: &str) -> Self {
        self.having = Some(condition.to_string());
        self
    }

    #[must_use]
    pub fn routing(mut self, routing: ReadRouting) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Route to the primary when `consistent_read`, otherwise inherit the request's tier.
    #[must_use]
    pub fn consistent_read(self, consistent_read: bool) -> Self {
        if consistent_read {
            self.routing(ReadRouting::Primary)
        } else {
            self
        }
    }

    /// Template context. Serialized once; the templates see its fields as `.field`.
    #[must_use]
    pub fn options<C: Serialize + ?Sized>(mut self, options: &C) -> Self {
        match serde_json::to_value(options) {
            Ok(context) => self.context = context,
            Err(e) => self.fail(HydrateError::ConfigError(format!(
                "`{}` options are not serializable: {e}",
                self.entity
            ))),
        }
        self
    }

    /// Extra template functions; they win over built-ins of the same name.
    #[must_use]
    pub fn funcs(mut self, funcs: &FuncMap) -> Self {
        self.funcs = std::mem::take(&mut self.funcs).merged(funcs);
        self
    }

    /// Instrumentation tag rendered by `{{ Description }}` as `label-Role`.
    #[must_use]
    pub fn describe(mut self, label: impl Into<String>, role: Role) -> Self {
        self.label = Some(label.into());
        self.role = Some(role);
        self
    }

    /// Always-applied condition, e.g. a role scope.
    #[must_use]
    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Columns a request keyword is matched against with `LIKE`.
    #[must_use]
    pub fn keyword_columns(mut self, columns: &[&str]) -> Self {
        self.keyword_columns = columns.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Wrap the final main statement as `SELECT * FROM (...) alias`.
    #[must_use]
    pub fn wrap_select(mut self, wrap: bool) -> Self {
        self.wrap_select = wrap;
        self
    }

    #[must_use]
    pub fn without_count(mut self, without_count: bool) -> Self {
        self.without_count = without_count;
        self
    }

    #[must_use]
    pub fn decoder<F>(mut self, decoder: F) -> Self
    where
        F: Fn(&RowView<'_>) -> Result<T, HydrateError> + Send + Sync + 'static,
    {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Decode through a flattened alias row type that folds into `T`.
    #[must_use]
    pub fn decode_as<A>(self) -> Self
    where
        A: FromRow + Into<T> + 'static,
        T: 'static,
    {
        self.decoder(|row| A::from_row(row).map(Into::into))
    }

    #[must_use]
    pub fn relation(mut self, relation: Arc<dyn Relation<T>>) -> Self {
        self.relations.push(relation);
        self
    }

    /// Apply a variant row: its SQL, count SQL, ordering and role scope.
    #[must_use]
    pub fn variant<O>(mut self, variant: &QueryVariant<O>, options: &O) -> Self {
        self.raw_sql = Some(variant.raw_sql.to_string());
        self.count_sql = variant.count_sql.map(str::to_string);
        self.order_by = variant.order_by.iter().map(|s| (*s).to_string()).collect();
        self.role = Some(variant.role);
        if let Some(scope) = variant.scope {
            match scope(options) {
                Ok(predicate) => self.predicates.push(predicate),
                Err(e) => self.fail(e),
            }
        }
        self
    }

    fn description(&self) -> String {
        let label = self.label.as_deref().unwrap_or(self.entity);
        match self.role {
            Some(role) => format!("{label}-{}", role.display_name()),
            None => label.to_string(),
        }
    }

    /// Render the templates and validate relations.
    ///
    /// # Errors
    /// `TemplateError` for malformed templates, `ConfigError` for missing SQL, decoder or
    /// relation callbacks, duplicate relation fields and a label outside `[A-Za-z0-9_.-]`, `CompositionError` for a relation that
    /// nests this spec's own entity, plus any error a variant scope raised.
    pub fn build(self) -> Result<QuerySpec<T>, HydrateError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let description = self.description();
        if !is_plain_tag(&description) {
            return Err(HydrateError::ConfigError(format!(
                "`{}` description `{description}` may only hold ASCII letters, digits, `_`, `.` and `-`",
                self.entity
            )));
        }
        let Some(raw_template) = self.raw_sql.as_deref() else {
            return Err(HydrateError::ConfigError(format!(
                "`{}` has no SQL template",
                self.entity
            )));
        };
        let Some(decoder) = self.decoder else {
            return Err(HydrateError::ConfigError(format!(
                "`{}` has no row decoder",
                self.entity
            )));
        };

        let tag = description.clone();
        let funcs = FuncMap::new()
            .with("Description", move |_| Ok(tag.clone()))
            .merged(&self.funcs);
        let raw_sql = render_sql(raw_template, &self.context, &funcs)?;
        let count_sql = self
            .count_sql
            .as_deref()
            .map(|template| render_sql(template, &self.context, &funcs))
            .transpose()?;

        let mut fields = HashSet::new();
        for relation in &self.relations {
            if !fields.insert(relation.name()) {
                return Err(HydrateError::ConfigError(format!(
                    "`{}` declares relation field `{}` twice",
                    self.entity,
                    relation.name()
                )));
            }
            relation.validate()?;
            if relation.nests() == Some(self.entity) {
                return Err(HydrateError::CompositionError(format!(
                    "relation `{}` of `{}` nests `{}` itself",
                    relation.name(),
                    self.entity,
                    self.entity
                )));
            }
        }

        Ok(QuerySpec {
            entity: self.entity,
            description,
            raw_sql,
            count_sql,
            order_by: self.order_by,
            group_by: self.group_by,
            having: self.having,
            routing: self.routing,
            predicates: self.predicates,
            keyword_columns: self.keyword_columns,
            wrap_select: self.wrap_select,
            without_count: self.without_count,
            decoder,
            relations: self.relations,
        })
    }
}

// The tag lands inside a SQL comment, so nothing that can close it is allowed.
fn is_plain_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

fn render_sql(template: &str, context: &JsonValue, funcs: &FuncMap) -> Result<String, HydrateError> {
    let rendered = Template::parse(template)?.render(context, funcs)?;
    Ok(rendered.trim().to_string())
}

/// Bound parameters of `predicates`, in text order.
pub(crate) fn predicate_params(predicates: &[Predicate]) -> Vec<RowValues> {
    predicates
        .iter()
        .flat_map(|p| p.params.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrate::RelationTask;

    #[derive(Serialize)]
    struct Opts {
        include_total: bool,
    }

    fn base() -> QuerySpecBuilder<String> {
        QuerySpec::builder("orders").decoder(|row| row.text("id"))
    }

    #[test]
    fn renders_templates_with_description() {
        let spec = base()
            .raw_sql(
                "SELECT /* {{Description}} */ o.id{{ if .include_total }}, o.total{{ end }} FROM orders o",
            )
            .count_sql("SELECT o.id FROM orders o")
            .options(&Opts { include_total: true })
            .describe("order-list", Role::Staff)
            .build()
            .unwrap();
        assert_eq!(
            spec.raw_sql(),
            "SELECT /* order-list-Staff */ o.id, o.total FROM orders o"
        );
        assert_eq!(spec.count_sql(), Some("SELECT o.id FROM orders o"));
        assert_eq!(spec.description(), "order-list-Staff");
    }

    #[test]
    fn label_cannot_leave_the_comment() {
        for label in ["x */ OR 1=1 --", "a\nb", "drop;", ""] {
            let err = base()
                .raw_sql("SELECT /* {{ Description }} */ o.id FROM orders o")
                .describe(label, Role::Buyer)
                .build()
                .unwrap_err();
            assert!(matches!(err, HydrateError::ConfigError(ref m) if m.contains("description")));
        }
        let spec = base()
            .raw_sql("SELECT /* {{ Description }} */ o.id FROM orders o")
            .describe("v2.order_list-x", Role::Buyer)
            .build()
            .unwrap();
        assert_eq!(spec.raw_sql(), "SELECT /* v2.order_list-x-Buyer */ o.id FROM orders o");
    }

    #[test]
    fn malformed_template_fails_the_build() {
        let err = base()
            .raw_sql("SELECT {{ if .include_total }} o.id FROM orders o")
            .options(&Opts { include_total: true })
            .build()
            .unwrap_err();
        assert!(matches!(err, HydrateError::TemplateError { .. }));
        assert!(err.is_build_time());
    }

    #[test]
    fn missing_sql_or_decoder_is_a_config_error() {
        let err = base().build().unwrap_err();
        assert!(matches!(err, HydrateError::ConfigError(_)));
        let err = QuerySpec::<String>::builder("orders")
            .raw_sql("SELECT 1")
            .build()
            .unwrap_err();
        assert!(matches!(err, HydrateError::ConfigError(_)));
    }

    fn relation(name: &'static str) -> Arc<dyn Relation<String>> {
        RelationTask::<String, String, String>::new(name, true)
            .key(|s| Some(s.clone()))
            .fetch(|_ctx, ids| async move { Ok(ids) })
            .match_on(String::clone)
            .attach(|s, found| s.push_str(&found.concat()))
            .into_relation()
    }

    #[test]
    fn one_field_per_relation() {
        let err = base()
            .raw_sql("SELECT id FROM orders")
            .relation(relation("items"))
            .relation(relation("items"))
            .build()
            .unwrap_err();
        assert!(matches!(err, HydrateError::ConfigError(ref m) if m.contains("twice")));
    }

    #[test]
    fn self_nesting_relation_is_rejected() {
        let nested = RelationTask::<String, String, String>::new("parent", true)
            .key(|s| Some(s.clone()))
            .fetch(|_ctx, ids| async move { Ok(ids) })
            .match_on(String::clone)
            .attach(|_, _| {})
            .nests("orders")
            .into_relation();
        let err = base()
            .raw_sql("SELECT id FROM orders")
            .relation(nested)
            .build()
            .unwrap_err();
        assert!(matches!(err, HydrateError::CompositionError(_)));
    }

    #[test]
    fn building_twice_yields_identical_sql() {
        let build = || {
            base()
                .raw_sql("SELECT /* {{ Description }} */ id FROM orders")
                .describe("orders", Role::Buyer)
                .build()
                .unwrap()
                .raw_sql()
                .to_string()
        };
        assert_eq!(build(), build());
    }
}
