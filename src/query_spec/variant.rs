use std::fmt;

use crate::error::HydrateError;
use crate::hydrate::RelationKey;
use crate::types::{Role, RowValues};

/// A bound SQL condition. Values are always parameters; only `sql` is spliced into the text.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub sql: String,
    pub params: Vec<RowValues>,
}

impl Predicate {
    #[must_use]
    pub fn new(sql: impl Into<String>, params: Vec<RowValues>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// `column IN (?, ?, ...)`; an empty key list matches nothing.
    #[must_use]
    pub fn in_list<K: RelationKey>(column: &str, keys: &[K]) -> Self {
        if keys.is_empty() {
            return Self::new("1 = 0", Vec::new());
        }
        let placeholders = vec!["?"; keys.len()].join(", ");
        Self::new(
            format!("{column} IN ({placeholders})"),
            keys.iter().map(RelationKey::to_param).collect(),
        )
    }
}

/// Role-scoped restriction a variant adds, derived from the caller's options.
pub type ScopeFn<O> = fn(&O) -> Result<Predicate, HydrateError>;

/// One row of an entity's variant table: the SQL forms a role queries with.
pub struct QueryVariant<O> {
    pub role: Role,
    pub raw_sql: &'static str,
    /// Projection-light SELECT with the same FROM/JOINs as `raw_sql`, counted instead of it.
    pub count_sql: Option<&'static str>,
    pub order_by: &'static [&'static str],
    pub scope: Option<ScopeFn<O>>,
}

impl<O> fmt::Debug for QueryVariant<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryVariant")
            .field("role", &self.role)
            .field("order_by", &self.order_by)
            .field("scoped", &self.scope.is_some())
            .finish_non_exhaustive()
    }
}

/// Pick the variant for `role`.
///
/// # Errors
/// `ConfigError` when the table has no variant for `role`.
pub fn select_variant<O>(
    entity: &str,
    variants: &'static [QueryVariant<O>],
    role: Role,
) -> Result<&'static QueryVariant<O>, HydrateError> {
    variants.iter().find(|v| v.role == role).ok_or_else(|| {
        HydrateError::ConfigError(format!(
            "`{entity}` has no query variant for role {}",
            role.display_name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    static VARIANTS: &[QueryVariant<()>] = &[
        QueryVariant {
            role: Role::Admin,
            raw_sql: "SELECT * FROM t",
            count_sql: None,
            order_by: &["t.id DESC"],
            scope: None,
        },
        QueryVariant {
            role: Role::Buyer,
            raw_sql: "SELECT id FROM t",
            count_sql: None,
            order_by: &["t.id"],
            scope: None,
        },
    ];

    #[test]
    fn selects_by_role() {
        let v = select_variant("t", VARIANTS, Role::Buyer).unwrap();
        assert_eq!(v.raw_sql, "SELECT id FROM t");
    }

    #[test]
    fn unknown_role_is_a_config_error() {
        let err = select_variant("t", VARIANTS, Role::Guest).unwrap_err();
        assert!(matches!(err, HydrateError::ConfigError(ref m) if m.contains("Guest")));
    }

    #[test]
    fn in_list_binds_each_key() {
        let p = Predicate::in_list("po.id", &["a".to_string(), "b".to_string()]);
        assert_eq!(p.sql, "po.id IN (?, ?)");
        assert_eq!(p.params.len(), 2);
        assert_eq!(Predicate::in_list::<i64>("x", &[]).sql, "1 = 0");
    }
}
