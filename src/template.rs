//! SQL text templates.
//!
//! Templates are plain SQL with `{{ ... }}` actions:
//!
//! * `{{ .field }}` / `{{ .a.b }}` – a value from the serialized options (`$.x` always reads the
//!   root even inside `range`);
//! * `{{ Description }}` / `{{ fields "po" }}` – a call into the caller-supplied [`FuncMap`];
//! * `{{ if .flag }} ... {{ else }} ... {{ end }}` and `{{ range .list }}{{ . }}{{ end }}`;
//! * builtins `not`, `and`, `or`, `eq`, `join`;
//! * `{{-` / `-}}` trim whitespace on that side of the action.
//!
//! Everything rendered is inserted verbatim into SQL text. Filter values supplied by callers must
//! be bound as parameters, never rendered.
//!
//! ```rust
//! use sql_hydrate::template::{FuncMap, render};
//!
//! #[derive(serde::Serialize)]
//! struct Opts { include_user: bool }
//!
//! let funcs = FuncMap::new().with("Description", |_| Ok("list-orders".to_string()));
//! let sql = render(
//!     "SELECT /* {{Description}} */ po.*{{if .include_user}}, u.name{{end}} FROM po",
//!     &Opts { include_user: true },
//!     &funcs,
//! )
//! .unwrap();
//! assert_eq!(sql, "SELECT /* list-orders */ po.*, u.name FROM po");
//! ```

mod parser;
mod render;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::HydrateError;

pub(crate) use parser::Node;

/// A template function. Receives evaluated arguments, returns SQL text.
pub type TemplateFn = Arc<dyn Fn(&[JsonValue]) -> Result<String, HydrateError> + Send + Sync>;

/// Named functions callable from a template.
#[derive(Clone, Default)]
pub struct FuncMap {
    funcs: HashMap<String, TemplateFn>,
}

impl FuncMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, replacing any previous function with that name.
    #[must_use]
    pub fn with<F>(mut self, name: &str, func: F) -> Self
    where
        F: Fn(&[JsonValue]) -> Result<String, HydrateError> + Send + Sync + 'static,
    {
        self.funcs.insert(name.to_string(), Arc::new(func));
        self
    }

    /// Merge `other` into `self`; functions in `other` win.
    #[must_use]
    pub fn merged(mut self, other: &FuncMap) -> Self {
        for (name, func) in &other.funcs {
            self.funcs.insert(name.clone(), Arc::clone(func));
        }
        self
    }

    pub(crate) fn get(&self, name: &str) -> Option<&TemplateFn> {
        self.funcs.get(name)
    }
}

impl fmt::Debug for FuncMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.funcs.keys().collect();
        names.sort();
        f.debug_struct("FuncMap").field("funcs", &names).finish()
    }
}

/// A parsed template. Parsing is separate from rendering so malformed text fails before any
/// context is applied.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// # Errors
    /// Returns `HydrateError::TemplateError` for unbalanced or malformed actions.
    pub fn parse(source: &str) -> Result<Self, HydrateError> {
        Ok(Self {
            nodes: parser::parse(source)?,
        })
    }

    /// # Errors
    /// Returns `HydrateError::TemplateError` when the context cannot be serialized, a referenced
    /// field does not exist, or a function is unknown or fails.
    pub fn render<C: Serialize + ?Sized>(
        &self,
        context: &C,
        funcs: &FuncMap,
    ) -> Result<String, HydrateError> {
        let root = serde_json::to_value(context)
            .map_err(|e| HydrateError::template(0, format!("context is not serializable: {e}")))?;
        render::render(&self.nodes, &root, funcs)
    }
}

/// Parse and render in one step.
///
/// # Errors
/// See [`Template::parse`] and [`Template::render`].
pub fn render<C: Serialize + ?Sized>(
    template: &str,
    context: &C,
    funcs: &FuncMap,
) -> Result<String, HydrateError> {
    Template::parse(template)?.render(context, funcs)
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Opts {
        role: &'static str,
        include_user: bool,
        columns: Vec<&'static str>,
        nested: Nested,
    }

    #[derive(Serialize)]
    struct Nested {
        limit: i64,
    }

    fn opts() -> Opts {
        Opts {
            role: "admin",
            include_user: false,
            columns: vec!["id", "name"],
            nested: Nested { limit: 5 },
        }
    }

    #[test]
    fn renders_fields_and_functions() {
        let funcs = FuncMap::new().with("Description", |_| Ok("po-list".into()));
        let out = render(
            "SELECT /* {{ Description }} */ * FROM t -- {{ .role }} {{ .nested.limit }}",
            &opts(),
            &funcs,
        )
        .unwrap();
        assert_eq!(out, "SELECT /* po-list */ * FROM t -- admin 5");
    }

    #[test]
    fn conditionals_and_else() {
        let out = render(
            "a{{if .include_user}} b{{else}} c{{end}}{{if not .include_user}} d{{end}}",
            &opts(),
            &FuncMap::new(),
        )
        .unwrap();
        assert_eq!(out, "a c d");
    }

    #[test]
    fn range_and_join() {
        let out = render(
            "{{range .columns}}x.{{.}} {{end}}|{{join .columns \", \"}}",
            &opts(),
            &FuncMap::new(),
        )
        .unwrap();
        assert_eq!(out, "x.id x.name |id, name");
    }

    #[test]
    fn function_arguments_are_evaluated() {
        let funcs = FuncMap::new().with("fields", |args| {
            let alias = args.first().and_then(|v| v.as_str()).unwrap_or("t");
            Ok(format!("{alias}.id, {alias}.name"))
        });
        let out = render("SELECT {{ fields \"po\" }}", &opts(), &funcs).unwrap();
        assert_eq!(out, "SELECT po.id, po.name");
    }

    #[test]
    fn trim_markers() {
        let out = render("a   {{- if .include_user }} b {{- else -}}   c{{ end }}", &opts(), &FuncMap::new())
            .unwrap();
        assert_eq!(out, "ac");
    }

    #[test]
    fn malformed_templates_fail_at_parse() {
        for bad in ["{{ .a ", "{{ if .a }}x", "{{ end }}", "{{ }}", "x {{ else }}", "{{ \"open }}"] {
            let err = Template::parse(bad).unwrap_err();
            assert!(err.is_build_time(), "{bad}: {err}");
        }
    }

    #[test]
    fn unknown_function_and_missing_field_fail_at_render() {
        let tpl = Template::parse("{{ Nope }}").unwrap();
        assert!(matches!(
            tpl.render(&opts(), &FuncMap::new()),
            Err(HydrateError::TemplateError { .. })
        ));
        let tpl = Template::parse("{{ .missing }}").unwrap();
        assert!(tpl.render(&opts(), &FuncMap::new()).is_err());
    }

    #[test]
    fn rendering_is_deterministic() {
        let tpl = Template::parse("{{if .include_user}}u{{end}}{{.role}}").unwrap();
        let a = tpl.render(&opts(), &FuncMap::new()).unwrap();
        let b = tpl.render(&opts(), &FuncMap::new()).unwrap();
        assert_eq!(a, b);
    }
}
