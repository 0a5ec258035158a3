use serde_json::Value as JsonValue;

use super::FuncMap;
use super::parser::{Expr, Node};
use crate::error::HydrateError;

pub(super) fn render(
    nodes: &[Node],
    root: &JsonValue,
    funcs: &FuncMap,
) -> Result<String, HydrateError> {
    let mut out = String::new();
    let scope = Scope { root, funcs };
    scope.render_nodes(nodes, root, &mut out)?;
    Ok(out)
}

struct Scope<'a> {
    root: &'a JsonValue,
    funcs: &'a FuncMap,
}

impl Scope<'_> {
    fn render_nodes(
        &self,
        nodes: &[Node],
        dot: &JsonValue,
        out: &mut String,
    ) -> Result<(), HydrateError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Output { offset, expr } => {
                    let value = self.eval(expr, dot, *offset)?;
                    write_value(&value, out);
                }
                Node::If {
                    offset,
                    cond,
                    then,
                    otherwise,
                } => {
                    if truthy(&self.eval(cond, dot, *offset)?) {
                        self.render_nodes(then, dot, out)?;
                    } else {
                        self.render_nodes(otherwise, dot, out)?;
                    }
                }
                Node::Range {
                    offset,
                    expr,
                    body,
                    otherwise,
                } => match self.eval(expr, dot, *offset)? {
                    JsonValue::Array(items) if !items.is_empty() => {
                        for item in &items {
                            self.render_nodes(body, item, out)?;
                        }
                    }
                    JsonValue::Array(_) | JsonValue::Null => {
                        self.render_nodes(otherwise, dot, out)?;
                    }
                    other => {
                        return Err(HydrateError::template(
                            *offset,
                            format!("range over non-list value {other}"),
                        ));
                    }
                },
            }
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr, dot: &JsonValue, offset: usize) -> Result<JsonValue, HydrateError> {
        match expr {
            Expr::Path { root, fields } => {
                let mut current = if *root { self.root } else { dot };
                for field in fields {
                    current = match current {
                        JsonValue::Object(map) => map.get(field).ok_or_else(|| {
                            HydrateError::template(offset, format!("field `{field}` not found"))
                        })?,
                        other => {
                            return Err(HydrateError::template(
                                offset,
                                format!("cannot read `{field}` from {}", kind(other)),
                            ));
                        }
                    };
                }
                Ok(current.clone())
            }
            Expr::Str(s) => Ok(JsonValue::String(s.clone())),
            Expr::Int(i) => Ok(JsonValue::from(*i)),
            Expr::Bool(b) => Ok(JsonValue::Bool(*b)),
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, dot, offset))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(name, &args, offset)
            }
        }
    }

    fn call(&self, name: &str, args: &[JsonValue], offset: usize) -> Result<JsonValue, HydrateError> {
        if let Some(func) = self.funcs.get(name) {
            return func(args)
                .map(JsonValue::String)
                .map_err(|e| match e {
                    HydrateError::TemplateError { .. } => e,
                    other => HydrateError::template(offset, format!("function `{name}`: {other}")),
                });
        }
        match (name, args) {
            ("not", [value]) => Ok(JsonValue::Bool(!truthy(value))),
            ("and", [_, ..]) => Ok(JsonValue::Bool(args.iter().all(truthy))),
            ("or", [_, ..]) => Ok(JsonValue::Bool(args.iter().any(truthy))),
            ("eq", [a, b]) => Ok(JsonValue::Bool(a == b)),
            ("join", [JsonValue::Array(items), JsonValue::String(sep)]) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|item| {
                        let mut s = String::new();
                        write_value(item, &mut s);
                        s
                    })
                    .collect();
                Ok(JsonValue::String(parts.join(sep)))
            }
            ("not" | "and" | "or" | "eq" | "join", _) => Err(HydrateError::template(
                offset,
                format!("wrong arguments for builtin `{name}`"),
            )),
            _ => Err(HydrateError::template(
                offset,
                format!("function `{name}` not defined"),
            )),
        }
    }
}

/// Go-template truthiness: false, 0, null, and empty strings/lists/maps are false.
fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

fn write_value(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Null => {}
        JsonValue::String(s) => out.push_str(s),
        JsonValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        JsonValue::Number(n) => out.push_str(&n.to_string()),
        other => out.push_str(&other.to_string()),
    }
}

fn kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "an object",
    }
}
