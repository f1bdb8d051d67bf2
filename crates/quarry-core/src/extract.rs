//! Collect-instruction evaluation against HTML documents and JSON payloads.
//!
//! Both entry points are synchronous: parsed documents are not `Send` and
//! must never be held across an await.

use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::instruction::{CollectInstruction, FieldSpec};
use crate::path::PathExpr;
use crate::processor::{ProcessorContext, ProcessorRegistry};

/// Records produced by one collect instruction.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExtractedItems {
    pub rows: Vec<Map<String, Value>>,
    /// Required fields that fell back to their default.
    pub missing_required: usize,
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, AppError> {
    Selector::parse(selector)
        .map_err(|_| AppError::Extraction(format!("invalid selector `{selector}`")))
}

fn is_self_selector(selector: &str) -> bool {
    selector.trim() == "."
}

/// Runs the processor chain on a matched value, or falls back to the default.
fn finish_field(
    name: &str,
    spec: &FieldSpec,
    raw: Option<Value>,
    registry: &ProcessorRegistry,
    ctx: &ProcessorContext,
    missing_required: &mut usize,
) -> Value {
    match raw {
        Some(value) => registry.apply(value, &spec.processors, ctx),
        None => {
            if spec.required {
                warn!(field = %name, "Required field not found, using default");
                *missing_required += 1;
            }
            spec.default_value()
        }
    }
}

fn read_attribute(element: ElementRef<'_>, attribute: &str) -> Option<Value> {
    match attribute {
        "text" => {
            let text: String = element.text().collect();
            Some(Value::String(text.trim().to_string()))
        }
        "html" | "inner_html" => Some(Value::String(element.inner_html())),
        "outer_html" => Some(Value::String(element.html())),
        name => element
            .value()
            .attr(name)
            .map(|v| Value::String(v.to_string())),
    }
}

/// First candidate selector that matches wins; its attribute is the raw value.
fn locate_in_element(item: ElementRef<'_>, spec: &FieldSpec) -> Option<Value> {
    for candidate in &spec.selectors {
        if is_self_selector(candidate) {
            return read_attribute(item, &spec.attribute);
        }
        let selector = match Selector::parse(candidate) {
            Ok(s) => s,
            Err(_) => {
                debug!(selector = %candidate, "Unparseable field selector, treating as no match");
                continue;
            }
        };
        if let Some(element) = item.select(&selector).next() {
            return read_attribute(element, &spec.attribute);
        }
    }
    None
}

/// Evaluates `collect` against an HTML document.
pub fn extract_html(
    html: &str,
    collect: &CollectInstruction,
    registry: &ProcessorRegistry,
    ctx: &ProcessorContext,
) -> Result<ExtractedItems, AppError> {
    let container_selector = parse_selector(&collect.container_selector)?;
    let item_selector = if collect.items_are_containers() {
        None
    } else {
        Some(parse_selector(&collect.item_selector)?)
    };

    let document = Html::parse_document(html);
    let limit = collect.limit.unwrap_or(usize::MAX);
    let mut out = ExtractedItems::default();

    for container in document.select(&container_selector) {
        let items: Vec<ElementRef<'_>> = match &item_selector {
            Some(sel) => container.select(sel).collect(),
            None => vec![container],
        };
        for item in items {
            if out.rows.len() >= limit {
                return Ok(out);
            }
            let mut row = Map::new();
            for (name, spec) in &collect.fields {
                let raw = locate_in_element(item, spec);
                let value = finish_field(
                    name,
                    spec,
                    raw,
                    registry,
                    ctx,
                    &mut out.missing_required,
                );
                row.insert(name.clone(), value);
            }
            out.rows.push(row);
        }
    }

    Ok(out)
}

fn parse_path(path: &str) -> Result<PathExpr, AppError> {
    PathExpr::parse(path).map_err(|e| AppError::Extraction(e.to_string()))
}

fn locate_in_value(item: &Value, spec: &FieldSpec) -> Option<Value> {
    for candidate in &spec.selectors {
        let path = match PathExpr::parse(candidate) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "Unparseable field path, treating as no match");
                continue;
            }
        };
        let matches: Vec<&Value> = path
            .resolve(item)
            .into_iter()
            .filter(|v| !v.is_null())
            .collect();
        if matches.is_empty() {
            continue;
        }
        return Some(if path.is_multi() {
            Value::Array(matches.into_iter().cloned().collect())
        } else {
            matches[0].clone()
        });
    }
    None
}

/// Evaluates `collect` against a structured payload with path expressions.
pub fn extract_json(
    payload: &Value,
    collect: &CollectInstruction,
    registry: &ProcessorRegistry,
    ctx: &ProcessorContext,
) -> Result<ExtractedItems, AppError> {
    let container_path = parse_path(&collect.container_selector)?;
    let item_path = if collect.items_are_containers() {
        parse_path(".")?
    } else {
        parse_path(&collect.item_selector)?
    };

    let limit = collect.limit.unwrap_or(usize::MAX);
    let mut out = ExtractedItems::default();

    for container in container_path.resolve(payload) {
        let resolved = item_path.resolve(container);
        let items: Vec<&Value> = if resolved.len() == 1 && !item_path.is_multi() {
            match resolved[0] {
                Value::Array(elements) => elements.iter().collect(),
                single => vec![single],
            }
        } else {
            resolved
        };
        for item in items {
            if out.rows.len() >= limit {
                return Ok(out);
            }
            let mut row = Map::new();
            for (name, spec) in &collect.fields {
                let raw = locate_in_value(item, spec);
                let value = finish_field(
                    name,
                    spec,
                    raw,
                    registry,
                    ctx,
                    &mut out.missing_required,
                );
                row.insert(name.clone(), value);
            }
            out.rows.push(row);
        }
    }

    Ok(out)
}
