//! Typed decoding of result rows, including prefixed "embedded" projections.
//!
//! A joined projection such as `SELECT po.*, u.id AS u__id, u.name AS u__name ...` is decoded by
//! reading the primary columns from a bare [`RowView`] and the joined entity from
//! `view.embedded::<User>("u__")`. The flattened row is only a decode target: the embedded value
//! is folded into the primary entity and the row is discarded.

use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;

use crate::error::HydrateError;
use crate::results::CustomDbRow;
use crate::types::RowValues;

/// Decode one entity from a row view.
pub trait FromRow: Sized {
    /// # Errors
    /// Returns `HydrateError::DecodeError` when a required column is missing or has the wrong type.
    fn from_row(row: &RowView<'_>) -> Result<Self, HydrateError>;
}

/// Read-only view over a row, optionally restricted to columns carrying a prefix.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    row: &'a CustomDbRow,
    prefix: &'a str,
}

impl<'a> RowView<'a> {
    #[must_use]
    pub fn new(row: &'a CustomDbRow) -> Self {
        Self { row, prefix: "" }
    }

    /// View the columns of an embedded projection, e.g. `u__` for `u.name AS u__name`.
    #[must_use]
    pub fn prefixed(&self, prefix: &'a str) -> RowView<'a> {
        RowView {
            row: self.row,
            prefix,
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        self.prefix
    }

    fn value(&self, column: &str) -> Option<&'a RowValues> {
        if self.prefix.is_empty() {
            self.row.get(column)
        } else {
            self.row.get(&format!("{}{column}", self.prefix))
        }
    }

    fn missing(&self, column: &str) -> HydrateError {
        HydrateError::DecodeError(format!("column `{}{column}` is missing or NULL", self.prefix))
    }

    fn mismatch(&self, column: &str, expected: &str, got: &RowValues) -> HydrateError {
        HydrateError::DecodeError(format!(
            "column `{}{column}`: expected {expected}, got {got:?}",
            self.prefix
        ))
    }

    /// Decode an embedded entity; `None` when its `id` column is absent or NULL (outer join miss).
    ///
    /// # Errors
    /// Propagates the embedded entity's decode error.
    pub fn embedded<T: FromRow>(&self, prefix: &'a str) -> Result<Option<T>, HydrateError> {
        let view = self.prefixed(prefix);
        match view.value("id") {
            None | Some(RowValues::Null) => Ok(None),
            Some(_) => T::from_row(&view).map(Some),
        }
    }

    /// # Errors
    /// Returns `DecodeError` when the column is missing, NULL, or not text.
    pub fn text(&self, column: &str) -> Result<String, HydrateError> {
        self.opt_text(column)?.ok_or_else(|| self.missing(column))
    }

    /// # Errors
    /// Returns `DecodeError` when the column holds a non-text value.
    pub fn opt_text(&self, column: &str) -> Result<Option<String>, HydrateError> {
        match self.value(column) {
            None | Some(RowValues::Null) => Ok(None),
            Some(RowValues::Text(s)) => Ok(Some(s.clone())),
            Some(RowValues::Int(i)) => Ok(Some(i.to_string())),
            Some(other) => Err(self.mismatch(column, "text", other)),
        }
    }

    /// Text column where NULL decodes to an empty string.
    ///
    /// # Errors
    /// Returns `DecodeError` when the column holds a non-text value.
    pub fn text_or_default(&self, column: &str) -> Result<String, HydrateError> {
        Ok(self.opt_text(column)?.unwrap_or_default())
    }

    /// # Errors
    /// Returns `DecodeError` when the column is missing, NULL, or not an integer.
    pub fn int(&self, column: &str) -> Result<i64, HydrateError> {
        self.opt_int(column)?.ok_or_else(|| self.missing(column))
    }

    /// # Errors
    /// Returns `DecodeError` when the column holds a non-integer value.
    pub fn opt_int(&self, column: &str) -> Result<Option<i64>, HydrateError> {
        match self.value(column) {
            None | Some(RowValues::Null) => Ok(None),
            Some(RowValues::Int(i)) => Ok(Some(*i)),
            Some(RowValues::Bool(b)) => Ok(Some(i64::from(*b))),
            Some(other) => Err(self.mismatch(column, "integer", other)),
        }
    }

    /// # Errors
    /// Returns `DecodeError` when the column is missing, NULL, or not numeric.
    pub fn float(&self, column: &str) -> Result<f64, HydrateError> {
        match self.value(column) {
            None | Some(RowValues::Null) => Err(self.missing(column)),
            Some(v) => v
                .as_float()
                .ok_or_else(|| self.mismatch(column, "number", v)),
        }
    }

    /// # Errors
    /// Returns `DecodeError` when the column is not a boolean or 0/1 integer.
    pub fn bool(&self, column: &str) -> Result<bool, HydrateError> {
        match self.value(column) {
            None | Some(RowValues::Null) => Ok(false),
            Some(v) => v
                .as_bool()
                .copied()
                .ok_or_else(|| self.mismatch(column, "boolean", v)),
        }
    }

    /// # Errors
    /// Returns `DecodeError` when the column is missing, NULL, or not a parseable timestamp.
    pub fn timestamp(&self, column: &str) -> Result<NaiveDateTime, HydrateError> {
        self.opt_timestamp(column)?
            .ok_or_else(|| self.missing(column))
    }

    /// # Errors
    /// Returns `DecodeError` when the column holds something other than a timestamp.
    pub fn opt_timestamp(&self, column: &str) -> Result<Option<NaiveDateTime>, HydrateError> {
        match self.value(column) {
            None | Some(RowValues::Null) => Ok(None),
            Some(v) => v
                .as_timestamp()
                .map(Some)
                .ok_or_else(|| self.mismatch(column, "timestamp", v)),
        }
    }

    /// Decode a JSON document stored as text; NULL or a missing column yields `T::default()`.
    ///
    /// # Errors
    /// Returns `DecodeError` when the text is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned + Default>(&self, column: &str) -> Result<T, HydrateError> {
        match self.value(column) {
            None | Some(RowValues::Null) => Ok(T::default()),
            Some(RowValues::Text(s)) if s.is_empty() => Ok(T::default()),
            Some(RowValues::Text(s)) => serde_json::from_str(s).map_err(|e| {
                HydrateError::DecodeError(format!("column `{}{column}`: {e}", self.prefix))
            }),
            Some(RowValues::JSON(v)) => serde_json::from_value(v.clone()).map_err(|e| {
                HydrateError::DecodeError(format!("column `{}{column}`: {e}", self.prefix))
            }),
            Some(other) => Err(self.mismatch(column, "json text", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Named {
        id: String,
        name: String,
    }

    impl FromRow for Named {
        fn from_row(row: &RowView<'_>) -> Result<Self, HydrateError> {
            Ok(Self {
                id: row.text("id")?,
                name: row.text_or_default("name")?,
            })
        }
    }

    fn row(cols: &[&str], vals: Vec<RowValues>) -> CustomDbRow {
        CustomDbRow::new(Arc::new(cols.iter().map(ToString::to_string).collect()), vals)
    }

    #[test]
    fn embedded_projection_decodes_under_prefix() {
        let r = row(
            &["id", "name", "u__id", "u__name"],
            vec![
                RowValues::Text("po1".into()),
                RowValues::Text("order".into()),
                RowValues::Text("u1".into()),
                RowValues::Text("alice".into()),
            ],
        );
        let view = RowView::new(&r);
        let user: Option<Named> = view.embedded("u__").unwrap();
        assert_eq!(
            user,
            Some(Named {
                id: "u1".into(),
                name: "alice".into()
            })
        );
        assert_eq!(view.text("name").unwrap(), "order");
    }

    #[test]
    fn outer_join_miss_is_none() {
        let r = row(
            &["id", "u__id", "u__name"],
            vec![RowValues::Text("po1".into()), RowValues::Null, RowValues::Null],
        );
        let user: Option<Named> = RowView::new(&r).embedded("u__").unwrap();
        assert!(user.is_none());
    }

    #[test]
    fn type_mismatch_is_decode_error() {
        let r = row(&["id"], vec![RowValues::Float(1.5)]);
        let err = RowView::new(&r).text("id").unwrap_err();
        assert!(matches!(err, HydrateError::DecodeError(_)));
    }

    #[test]
    fn json_array_column() {
        let r = row(&["ids"], vec![RowValues::Text(r#"["a","b"]"#.into())]);
        let ids: Vec<String> = RowView::new(&r).json("ids").unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        let missing: Vec<String> = RowView::new(&r).json("nope").unwrap();
        assert!(missing.is_empty());
    }
}
