//! Path expressions over JSON payloads.
//!
//! A small JSONPath subset: `$`, `.name`, `*`, `[n]`, `[*]`, `[a:b]`,
//! `["quoted key"]`. A lone `.` is the identity path.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid path `{path}`: {message}")]
pub struct PathError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(i64),
    Wildcard,
    Slice { start: Option<i64>, end: Option<i64> },
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    source: String,
    segments: Vec<Segment>,
}

impl PathExpr {
    pub fn parse(source: &str) -> Result<Self, PathError> {
        let err = |message: &str| PathError {
            path: source.to_string(),
            message: message.to_string(),
        };

        let trimmed = source.trim();
        let body = trimmed.strip_prefix('$').unwrap_or(trimmed);
        let chars: Vec<char> = body.chars().collect();
        let mut segments = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    if chars.get(i + 1) == Some(&'.') {
                        return Err(err("recursive descent is not supported"));
                    }
                    i += 1;
                }
                '[' => {
                    // Quoted keys may contain `]`.
                    let mut from = i + 1;
                    while chars.get(from).is_some_and(|c| c.is_whitespace()) {
                        from += 1;
                    }
                    if let Some(&quote) = chars.get(from).filter(|c| matches!(**c, '"' | '\'')) {
                        from = chars[from + 1..]
                            .iter()
                            .position(|&c| c == quote)
                            .map(|p| p + from + 2)
                            .ok_or_else(|| err("unterminated quoted key"))?;
                    }
                    let close = chars[from..]
                        .iter()
                        .position(|&c| c == ']')
                        .map(|p| p + from)
                        .ok_or_else(|| err("unclosed `[`"))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    segments.push(parse_bracket(inner.trim()).map_err(|m| err(&m))?);
                    i = close + 1;
                }
                ']' => return Err(err("unexpected `]`")),
                _ => {
                    let start = i;
                    while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                        i += 1;
                    }
                    let name: String = chars[start..i].iter().collect();
                    let name = name.trim();
                    if name == "*" {
                        segments.push(Segment::Wildcard);
                    } else {
                        segments.push(Segment::Key(name.to_string()));
                    }
                }
            }
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn is_identity(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when the path can match more than one value.
    pub fn is_multi(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Wildcard | Segment::Slice { .. }))
    }

    /// Every value the path reaches from `root`, in document order.
    pub fn resolve<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                match (segment, value) {
                    (Segment::Key(k), Value::Object(map)) => next.extend(map.get(k)),
                    (Segment::Index(i), Value::Array(items)) => {
                        next.extend(normalize_index(*i, items.len()).map(|i| &items[i]));
                    }
                    (Segment::Wildcard, Value::Array(items)) => next.extend(items.iter()),
                    (Segment::Wildcard, Value::Object(map)) => next.extend(map.values()),
                    (Segment::Slice { start, end }, Value::Array(items)) => {
                        let len = items.len();
                        let from = clamp_bound(*start, len, 0);
                        let to = clamp_bound(*end, len, len);
                        if from < to {
                            next.extend(items[from..to].iter());
                        }
                    }
                    _ => {}
                }
            }
            current = next;
        }
        current
    }
}

impl FromStr for PathExpr {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_bracket(inner: &str) -> Result<Segment, String> {
    if inner == "*" {
        return Ok(Segment::Wildcard);
    }
    for quote in ['"', '\''] {
        if inner.len() >= 2 && inner.starts_with(quote) && inner.ends_with(quote) {
            return Ok(Segment::Key(inner[1..inner.len() - 1].to_string()));
        }
    }
    if let Some((start, end)) = inner.split_once(':') {
        let bound = |s: &str| -> Result<Option<i64>, String> {
            let s = s.trim();
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse()
                    .map(Some)
                    .map_err(|_| format!("invalid slice bound `{s}`"))
            }
        };
        return Ok(Segment::Slice {
            start: bound(start)?,
            end: bound(end)?,
        });
    }
    inner
        .parse()
        .map(Segment::Index)
        .map_err(|_| format!("invalid index `{inner}`"))
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

fn clamp_bound(bound: Option<i64>, len: usize, default: usize) -> usize {
    match bound {
        None => default,
        Some(b) if b < 0 => (len as i64 + b).max(0) as usize,
        Some(b) => (b as usize).min(len),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolve(path: &str, doc: &Value) -> Vec<Value> {
        PathExpr::parse(path)
            .unwrap()
            .resolve(doc)
            .into_iter()
            .cloned()
            .collect()
    }

    #[test]
    fn test_identity() {
        let doc = json!({"a": 1});
        for p in [".", "$", "", "$."] {
            let expr = PathExpr::parse(p).unwrap();
            assert!(expr.is_identity(), "{p}");
            assert_eq!(resolve(p, &doc), vec![doc.clone()]);
        }
    }

    #[test]
    fn test_keys_and_indices() {
        let doc = json!({"data": {"events": [{"id": 1}, {"id": 2}, {"id": 3}]}});
        assert_eq!(resolve("$.data.events[0].id", &doc), vec![json!(1)]);
        assert_eq!(resolve("data.events[-1].id", &doc), vec![json!(3)]);
        assert!(resolve("data.events[9].id", &doc).is_empty());
        assert!(resolve("data.missing.id", &doc).is_empty());
    }

    #[test]
    fn test_wildcards_and_slices() {
        let doc = json!({"items": [{"p": 1}, {"p": 2}, {"p": 3}, {"p": 4}]});
        assert_eq!(
            resolve("items[*].p", &doc),
            vec![json!(1), json!(2), json!(3), json!(4)]
        );
        assert_eq!(resolve("items.*.p", &doc).len(), 4);
        assert_eq!(resolve("items[1:3].p", &doc), vec![json!(2), json!(3)]);
        assert_eq!(resolve("items[:1].p", &doc), vec![json!(1)]);
        assert_eq!(resolve("items[-2:].p", &doc), vec![json!(3), json!(4)]);
        assert!(PathExpr::parse("items[*].p").unwrap().is_multi());
        assert!(!PathExpr::parse("items[0].p").unwrap().is_multi());
    }

    #[test]
    fn test_quoted_keys() {
        let doc = json!({"odds.home": 2.1, "with space": "x"});
        assert_eq!(resolve(r#"["odds.home"]"#, &doc), vec![json!(2.1)]);
        assert_eq!(resolve("$['with space']", &doc), vec![json!("x")]);
    }

    #[test]
    fn test_quoted_key_containing_bracket() {
        let doc = json!({"a]b": {"c[0]": 7}});
        assert_eq!(resolve(r#"["a]b"]['c[0]']"#, &doc), vec![json!(7)]);
        assert_eq!(resolve(r#"$[ "a]b" ]"#, &doc), vec![json!({"c[0]": 7})]);
        assert!(PathExpr::parse(r#"["a]b"#).is_err());
        assert!(PathExpr::parse(r#"["a]b""#).is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(PathExpr::parse("a[0").is_err());
        assert!(PathExpr::parse("a[x]").is_err());
        assert!(PathExpr::parse("$..a").is_err());
        assert!(PathExpr::parse("a]").is_err());
    }
}
