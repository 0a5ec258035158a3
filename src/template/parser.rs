use crate::error::HydrateError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    /// `.`, `.a.b`, `$`, `$.a`
    Path { root: bool, fields: Vec<String> },
    Str(String),
    Int(i64),
    Bool(bool),
    Call { name: String, args: Vec<Expr> },
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Text(String),
    Output {
        offset: usize,
        expr: Expr,
    },
    If {
        offset: usize,
        cond: Expr,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Range {
        offset: usize,
        expr: Expr,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path { root: bool, fields: Vec<String> },
    Ident(String),
    Str(String),
    Int(i64),
}

#[derive(Debug)]
enum Item {
    Text(String),
    Action { offset: usize, tokens: Vec<Token> },
}

enum Terminator {
    End,
    Else { offset: usize, rest: Vec<Token> },
}

pub(crate) fn parse(source: &str) -> Result<Vec<Node>, HydrateError> {
    let items = scan(source)?;
    let mut parser = Parser { items, pos: 0 };
    let (nodes, term) = parser.parse_nodes()?;
    match term {
        None => Ok(nodes),
        Some(Terminator::End) => Err(HydrateError::template(
            parser.last_offset(),
            "unexpected {{end}}",
        )),
        Some(Terminator::Else { offset, .. }) => {
            Err(HydrateError::template(offset, "unexpected {{else}}"))
        }
    }
}

/// Split the source into text runs and tokenized actions, applying `{{-` / `-}}` trimming.
fn scan(source: &str) -> Result<Vec<Item>, HydrateError> {
    let mut items = Vec::new();
    let mut rest = source;
    let mut base = 0;
    let mut trim_next = false;

    while let Some(start) = rest.find("{{") {
        let mut text = &rest[..start];
        if trim_next {
            text = text.trim_start();
        }
        let action_start = base + start;
        let after_open = &rest[start + 2..];
        let end = find_action_end(after_open, action_start)?;
        let mut inner = &after_open[..end];

        let trim_left = inner.starts_with('-')
            && inner[1..].starts_with(|c: char| c.is_whitespace());
        if trim_left {
            inner = &inner[1..];
            text = text.trim_end();
        }
        trim_next = inner.ends_with('-')
            && inner[..inner.len() - 1].ends_with(|c: char| c.is_whitespace());
        if trim_next {
            inner = &inner[..inner.len() - 1];
        }

        if !text.is_empty() {
            items.push(Item::Text(text.to_string()));
        }
        let tokens = tokenize(inner, action_start)?;
        if tokens.is_empty() {
            return Err(HydrateError::template(action_start, "empty action"));
        }
        items.push(Item::Action {
            offset: action_start,
            tokens,
        });

        let consumed = start + 2 + end + 2;
        base += consumed;
        rest = &rest[consumed..];
    }

    let tail = if trim_next { rest.trim_start() } else { rest };
    if !tail.is_empty() {
        items.push(Item::Text(tail.to_string()));
    }
    Ok(items)
}

/// Byte index of the closing `}}` within `s`, skipping quoted strings.
fn find_action_end(s: &str, offset: usize) -> Result<usize, HydrateError> {
    let bytes = s.as_bytes();
    let mut idx = 0;
    let mut in_string = false;
    while idx < bytes.len() {
        let b = bytes[idx];
        if in_string {
            match b {
                b'\\' => idx += 1,
                b'"' => in_string = false,
                _ => {}
            }
        } else if b == b'"' {
            in_string = true;
        } else if b == b'}' && bytes.get(idx + 1) == Some(&b'}') {
            return Ok(idx);
        }
        idx += 1;
    }
    if in_string {
        Err(HydrateError::template(offset, "unterminated string in action"))
    } else {
        Err(HydrateError::template(offset, "unclosed action, expected `}}`"))
    }
}

fn tokenize(inner: &str, offset: usize) -> Result<Vec<Token>, HydrateError> {
    let chars: Vec<char> = inner.chars().collect();
    let mut tokens = Vec::new();
    let mut idx = 0;

    while idx < chars.len() {
        let c = chars[idx];
        if c.is_whitespace() {
            idx += 1;
        } else if c == '"' {
            let mut value = String::new();
            idx += 1;
            loop {
                match chars.get(idx) {
                    None => {
                        return Err(HydrateError::template(offset, "unterminated string"));
                    }
                    Some('"') => break,
                    Some('\\') => {
                        match chars.get(idx + 1) {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some(other) => value.push(*other),
                            None => {
                                return Err(HydrateError::template(offset, "dangling escape"));
                            }
                        }
                        idx += 1;
                    }
                    Some(other) => value.push(*other),
                }
                idx += 1;
            }
            idx += 1;
            tokens.push(Token::Str(value));
        } else if c == '.' || c == '$' {
            let root = c == '$';
            let start = idx;
            idx += 1;
            while idx < chars.len() && is_path_char(chars[idx]) {
                idx += 1;
            }
            let raw: String = chars[start + 1..idx].iter().collect();
            let raw = if root {
                raw.strip_prefix('.').map(str::to_string).unwrap_or(raw)
            } else {
                raw
            };
            if raw.contains("..") || raw.starts_with('.') || raw.ends_with('.') {
                return Err(HydrateError::template(offset, format!("bad path `{c}{raw}`")));
            }
            let fields = raw
                .split('.')
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect();
            tokens.push(Token::Path { root, fields });
        } else if c.is_ascii_digit() || (c == '-' && chars.get(idx + 1).is_some_and(char::is_ascii_digit)) {
            let start = idx;
            idx += 1;
            while idx < chars.len() && chars[idx].is_ascii_digit() {
                idx += 1;
            }
            let raw: String = chars[start..idx].iter().collect();
            let value = raw
                .parse::<i64>()
                .map_err(|e| HydrateError::template(offset, format!("bad number `{raw}`: {e}")))?;
            tokens.push(Token::Int(value));
        } else if c.is_alphabetic() || c == '_' {
            let start = idx;
            while idx < chars.len() && (chars[idx].is_alphanumeric() || chars[idx] == '_') {
                idx += 1;
            }
            tokens.push(Token::Ident(chars[start..idx].iter().collect()));
        } else {
            return Err(HydrateError::template(
                offset,
                format!("unexpected character `{c}` in action"),
            ));
        }
    }
    Ok(tokens)
}

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

struct Parser {
    items: Vec<Item>,
    pos: usize,
}

impl Parser {
    fn last_offset(&self) -> usize {
        self.items[..self.pos]
            .iter()
            .rev()
            .find_map(|item| match item {
                Item::Action { offset, .. } => Some(*offset),
                Item::Text(_) => None,
            })
            .unwrap_or(0)
    }

    fn parse_nodes(&mut self) -> Result<(Vec<Node>, Option<Terminator>), HydrateError> {
        let mut nodes = Vec::new();
        while self.pos < self.items.len() {
            let idx = self.pos;
            self.pos += 1;
            let (offset, tokens) = match &self.items[idx] {
                Item::Text(text) => {
                    nodes.push(Node::Text(text.clone()));
                    continue;
                }
                Item::Action { offset, tokens } => (*offset, tokens.clone()),
            };

            match tokens.first() {
                Some(Token::Ident(kw)) if kw == "if" => {
                    let cond = parse_expr(&tokens[1..], offset)?;
                    nodes.push(self.parse_if(offset, cond)?);
                }
                Some(Token::Ident(kw)) if kw == "range" => {
                    let expr = parse_expr(&tokens[1..], offset)?;
                    nodes.push(self.parse_range(offset, expr)?);
                }
                Some(Token::Ident(kw)) if kw == "else" => {
                    return Ok((
                        nodes,
                        Some(Terminator::Else {
                            offset,
                            rest: tokens[1..].to_vec(),
                        }),
                    ));
                }
                Some(Token::Ident(kw)) if kw == "end" => {
                    if tokens.len() > 1 {
                        return Err(HydrateError::template(offset, "{{end}} takes no arguments"));
                    }
                    return Ok((nodes, Some(Terminator::End)));
                }
                _ => nodes.push(Node::Output {
                    offset,
                    expr: parse_expr(&tokens, offset)?,
                }),
            }
        }
        Ok((nodes, None))
    }

    fn parse_if(&mut self, offset: usize, cond: Expr) -> Result<Node, HydrateError> {
        let (then, term) = self.parse_nodes()?;
        let otherwise = match term {
            None => return Err(HydrateError::template(offset, "unclosed {{if}}")),
            Some(Terminator::End) => Vec::new(),
            Some(Terminator::Else { rest, .. }) if rest.is_empty() => {
                let (otherwise, term) = self.parse_nodes()?;
                match term {
                    Some(Terminator::End) => otherwise,
                    None => return Err(HydrateError::template(offset, "unclosed {{if}}")),
                    Some(Terminator::Else { offset, .. }) => {
                        return Err(HydrateError::template(offset, "duplicate {{else}}"));
                    }
                }
            }
            Some(Terminator::Else { offset, rest })
                if matches!(rest.first(), Some(Token::Ident(kw)) if kw == "if") =>
            {
                let cond = parse_expr(&rest[1..], offset)?;
                vec![self.parse_if(offset, cond)?]
            }
            Some(Terminator::Else { offset, .. }) => {
                return Err(HydrateError::template(offset, "{{else}} takes no arguments"));
            }
        };
        Ok(Node::If {
            offset,
            cond,
            then,
            otherwise,
        })
    }

    fn parse_range(&mut self, offset: usize, expr: Expr) -> Result<Node, HydrateError> {
        let (body, term) = self.parse_nodes()?;
        let otherwise = match term {
            None => return Err(HydrateError::template(offset, "unclosed {{range}}")),
            Some(Terminator::End) => Vec::new(),
            Some(Terminator::Else { rest, .. }) if rest.is_empty() => {
                let (otherwise, term) = self.parse_nodes()?;
                match term {
                    Some(Terminator::End) => otherwise,
                    _ => return Err(HydrateError::template(offset, "unclosed {{range}}")),
                }
            }
            Some(Terminator::Else { offset, .. }) => {
                return Err(HydrateError::template(offset, "{{else}} takes no arguments"));
            }
        };
        Ok(Node::Range {
            offset,
            expr,
            body,
            otherwise,
        })
    }
}

fn parse_expr(tokens: &[Token], offset: usize) -> Result<Expr, HydrateError> {
    match tokens {
        [] => Err(HydrateError::template(offset, "missing expression")),
        [Token::Ident(name), args @ ..] if !is_literal_ident(name) => {
            if is_keyword(name) {
                return Err(HydrateError::template(offset, format!("unexpected keyword `{name}`")));
            }
            let args = args
                .iter()
                .map(|t| parse_term(t, offset))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::Call {
                name: name.clone(),
                args,
            })
        }
        [single] => parse_term(single, offset),
        _ => Err(HydrateError::template(
            offset,
            "only a function call may take arguments",
        )),
    }
}

fn parse_term(token: &Token, offset: usize) -> Result<Expr, HydrateError> {
    Ok(match token {
        Token::Path { root, fields } => Expr::Path {
            root: *root,
            fields: fields.clone(),
        },
        Token::Str(s) => Expr::Str(s.clone()),
        Token::Int(i) => Expr::Int(*i),
        Token::Ident(name) if name == "true" => Expr::Bool(true),
        Token::Ident(name) if name == "false" => Expr::Bool(false),
        Token::Ident(name) if is_keyword(name) => {
            return Err(HydrateError::template(offset, format!("unexpected keyword `{name}`")));
        }
        Token::Ident(name) => Expr::Call {
            name: name.clone(),
            args: Vec::new(),
        },
    })
}

fn is_keyword(name: &str) -> bool {
    matches!(name, "if" | "else" | "end" | "range")
}

fn is_literal_ident(name: &str) -> bool {
    matches!(name, "true" | "false")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_parse_with_root_marker() {
        let nodes = parse("{{ $.a.b }}{{ . }}").unwrap();
        match (&nodes[0], &nodes[1]) {
            (Node::Output { expr: e1, .. }, Node::Output { expr: e2, .. }) => {
                assert_eq!(
                    e1,
                    &Expr::Path {
                        root: true,
                        fields: vec!["a".into(), "b".into()]
                    }
                );
                assert_eq!(
                    e2,
                    &Expr::Path {
                        root: false,
                        fields: vec![]
                    }
                );
            }
            other => panic!("unexpected nodes {other:?}"),
        }
    }

    #[test]
    fn else_if_chains_share_one_end() {
        let nodes = parse("{{if .a}}A{{else if .b}}B{{else}}C{{end}}").unwrap();
        assert_eq!(nodes.len(), 1);
        let Node::If { otherwise, .. } = &nodes[0] else {
            panic!("expected if");
        };
        assert!(matches!(otherwise.as_slice(), [Node::If { .. }]));
    }

    #[test]
    fn braces_inside_strings_do_not_close_actions() {
        let nodes = parse(r#"{{ f "}}" }}tail"#).unwrap();
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn errors_carry_offsets() {
        let err = parse("SELECT 1 {{ if .a }}").unwrap_err();
        match err {
            HydrateError::TemplateError { offset, .. } => assert_eq!(offset, 9),
            other => panic!("unexpected {other:?}"),
        }
    }
}
