//! Built-in processors.

use std::fmt::Write as _;
use std::sync::LazyLock;

use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use scraper::Html;
use serde_json::{Number, Value};
use url::Url;

use crate::processor::{
    Processor, ProcessorArgs, ProcessorContext, ProcessorError, ProcessorRegistry, value_to_text,
};

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\d,]+\.?\d*").expect("number regex is valid"));

static ODDS_CLEAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\d.]").expect("odds regex is valid"));

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

pub(crate) fn register_all(registry: &mut ProcessorRegistry) {
    registry.register(Trim);
    registry.register(Uppercase);
    registry.register(Lowercase);
    registry.register(RegexProcessor);
    registry.register(Replace);
    registry.register(StripHtml);
    registry.register(AbsoluteUrl);
    registry.register(NumberProcessor);
    registry.register(DateProcessor);
    registry.register(CleanText);
    registry.register(Split);
    registry.register(Odds);
    registry.register(Join);
    registry.register(DefaultIfEmpty);
}

fn arg_i64(name: &str, args: &ProcessorArgs, key: &str) -> Result<Option<i64>, ProcessorError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| ProcessorError::invalid(name, key, "expected an integer")),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ProcessorError::invalid(name, key, "expected an integer")),
        Some(_) => Err(ProcessorError::invalid(name, key, "expected an integer")),
    }
}

fn arg_bool(args: &ProcessorArgs, key: &str, default: bool) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn text_value(s: impl Into<String>) -> Value {
    Value::String(s.into())
}

pub struct Trim;

impl Processor for Trim {
    fn name(&self) -> &str {
        "trim"
    }

    fn process(
        &self,
        value: &Value,
        _args: &ProcessorArgs,
        _ctx: &ProcessorContext,
    ) -> Result<Value, ProcessorError> {
        Ok(text_value(value_to_text(value).trim()))
    }
}

pub struct Uppercase;

impl Processor for Uppercase {
    fn name(&self) -> &str {
        "uppercase"
    }

    fn process(
        &self,
        value: &Value,
        _args: &ProcessorArgs,
        _ctx: &ProcessorContext,
    ) -> Result<Value, ProcessorError> {
        Ok(text_value(value_to_text(value).to_uppercase()))
    }
}

pub struct Lowercase;

impl Processor for Lowercase {
    fn name(&self) -> &str {
        "lowercase"
    }

    fn process(
        &self,
        value: &Value,
        _args: &ProcessorArgs,
        _ctx: &ProcessorContext,
    ) -> Result<Value, ProcessorError> {
        Ok(text_value(value_to_text(value).to_lowercase()))
    }
}

/// `pattern` plus either `extract_group` (capture to return, "" when
/// unmatched) or `replacement` (`$1`-style, default empty).
pub struct RegexProcessor;

impl Processor for RegexProcessor {
    fn name(&self) -> &str {
        "regex"
    }

    fn process(
        &self,
        value: &Value,
        args: &ProcessorArgs,
        ctx: &ProcessorContext,
    ) -> Result<Value, ProcessorError> {
        let pattern = ctx
            .lookup(args, "pattern")
            .ok_or_else(|| ProcessorError::missing(self.name(), "pattern"))?;
        let re = Regex::new(pattern).map_err(|e| ProcessorError::invalid(self.name(), "pattern", e))?;
        let text = value_to_text(value);

        if let Some(group) = arg_i64(self.name(), args, "extract_group")? {
            let group = usize::try_from(group)
                .map_err(|_| ProcessorError::invalid(self.name(), "extract_group", "must be >= 0"))?;
            let extracted = re
                .captures(&text)
                .and_then(|caps| caps.get(group))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            return Ok(text_value(extracted));
        }

        let replacement = ctx.lookup(args, "replacement").unwrap_or("");
        Ok(text_value(re.replace_all(&text, replacement)))
    }
}

pub struct Replace;

impl Processor for Replace {
    fn name(&self) -> &str {
        "replace"
    }

    fn process(
        &self,
        value: &Value,
        args: &ProcessorArgs,
        ctx: &ProcessorContext,
    ) -> Result<Value, ProcessorError> {
        let search = ctx
            .lookup(args, "search")
            .ok_or_else(|| ProcessorError::missing(self.name(), "search"))?;
        let replace = ctx.lookup(args, "replace").unwrap_or("");
        Ok(text_value(value_to_text(value).replace(search, replace)))
    }
}

pub struct StripHtml;

impl Processor for StripHtml {
    fn name(&self) -> &str {
        "strip_html"
    }

    fn process(
        &self,
        value: &Value,
        _args: &ProcessorArgs,
        _ctx: &ProcessorContext,
    ) -> Result<Value, ProcessorError> {
        let fragment = Html::parse_fragment(&value_to_text(value));
        let text: String = fragment.root_element().text().collect();
        Ok(text_value(text.trim()))
    }
}

pub struct AbsoluteUrl;

impl Processor for AbsoluteUrl {
    fn name(&self) -> &str {
        "absolute_url"
    }

    fn process(
        &self,
        value: &Value,
        args: &ProcessorArgs,
        ctx: &ProcessorContext,
    ) -> Result<Value, ProcessorError> {
        let raw = value_to_text(value);
        let href = raw.trim();
        if href.is_empty() || href.starts_with("http://") || href.starts_with("https://") {
            return Ok(text_value(href));
        }
        if href.starts_with("//") {
            return Ok(text_value(format!("https:{href}")));
        }
        let Some(base) = ctx.lookup(args, "base_url") else {
            return Ok(text_value(href));
        };
        let base = Url::parse(base).map_err(|e| ProcessorError::invalid(self.name(), "base_url", e))?;
        let joined = base
            .join(href)
            .map_err(|e| ProcessorError::failed(self.name(), e))?;
        Ok(text_value(joined.to_string()))
    }
}

/// First number found in the text; `0` when there is none.
pub struct NumberProcessor;

impl NumberProcessor {
    fn round(&self, num: f64, places: Option<i64>) -> Result<Value, ProcessorError> {
        let num = match places {
            Some(p) => {
                let p = i32::try_from(p)
                    .map_err(|_| ProcessorError::invalid(self.name(), "decimal_places", "out of range"))?;
                let factor = 10f64.powi(p);
                (num * factor).round() / factor
            }
            None => num,
        };
        Number::from_f64(num)
            .map(Value::Number)
            .ok_or_else(|| ProcessorError::failed(self.name(), "not a finite number"))
    }
}

impl Processor for NumberProcessor {
    fn name(&self) -> &str {
        "number"
    }

    fn process(
        &self,
        value: &Value,
        args: &ProcessorArgs,
        _ctx: &ProcessorContext,
    ) -> Result<Value, ProcessorError> {
        let places = arg_i64(self.name(), args, "decimal_places")?;

        if let Value::Number(n) = value {
            if n.is_f64() {
                return self.round(n.as_f64().unwrap_or_default(), places);
            }
            return Ok(value.clone());
        }

        let compact: String = value_to_text(value).split_whitespace().collect();
        let Some(found) = NUMBER_RE.find(&compact) else {
            return Ok(Value::from(0));
        };
        let digits = found.as_str().replace(',', "");

        if digits.contains('.') {
            let num: f64 = digits
                .parse()
                .map_err(|e| ProcessorError::failed(self.name(), e))?;
            self.round(num, places)
        } else {
            match digits.parse::<i64>() {
                Ok(n) => Ok(Value::from(n)),
                Err(_) => Ok(Value::from(0)),
            }
        }
    }
}

fn parse_datetime(text: &str, format: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, format).ok().or_else(|| {
        NaiveDate::parse_from_str(text, format)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    })
}

/// Reformats a date. Unparseable input is returned unchanged.
pub struct DateProcessor;

impl Processor for DateProcessor {
    fn name(&self) -> &str {
        "date"
    }

    fn process(
        &self,
        value: &Value,
        args: &ProcessorArgs,
        ctx: &ProcessorContext,
    ) -> Result<Value, ProcessorError> {
        let raw = value_to_text(value);
        let text = raw.trim();
        if text.is_empty() {
            return Ok(text_value(""));
        }

        let output_format = ctx.lookup(args, "output_format").unwrap_or("%Y-%m-%d");
        if StrftimeItems::new(output_format).any(|item| matches!(item, Item::Error)) {
            return Err(ProcessorError::invalid(
                self.name(),
                "output_format",
                "unsupported format specifier",
            ));
        }

        let parsed = match ctx.lookup(args, "input_format") {
            Some(fmt) => parse_datetime(text, fmt),
            None => DATE_FORMATS.iter().find_map(|fmt| parse_datetime(text, fmt)),
        };
        let Some(parsed) = parsed else {
            return Ok(text_value(text));
        };

        let mut out = String::new();
        write!(out, "{}", parsed.format(output_format))
            .map_err(|_| ProcessorError::invalid(self.name(), "output_format", "cannot format a naive date"))?;
        Ok(text_value(out))
    }
}

pub struct CleanText;

impl Processor for CleanText {
    fn name(&self) -> &str {
        "clean_text"
    }

    fn process(
        &self,
        value: &Value,
        args: &ProcessorArgs,
        _ctx: &ProcessorContext,
    ) -> Result<Value, ProcessorError> {
        let text = value_to_text(value);
        if arg_bool(args, "remove_extra_spaces", true) {
            Ok(text_value(text.split_whitespace().collect::<Vec<_>>().join(" ")))
        } else {
            Ok(text_value(text.trim()))
        }
    }
}

/// Splits on `delimiter` and keeps part `index` (negative counts from the end).
pub struct Split;

impl Processor for Split {
    fn name(&self) -> &str {
        "split"
    }

    fn process(
        &self,
        value: &Value,
        args: &ProcessorArgs,
        ctx: &ProcessorContext,
    ) -> Result<Value, ProcessorError> {
        let delimiter = ctx.lookup(args, "delimiter").unwrap_or(" ");
        if delimiter.is_empty() {
            return Err(ProcessorError::invalid(self.name(), "delimiter", "must not be empty"));
        }
        let index = arg_i64(self.name(), args, "index")?.unwrap_or(0);

        let text = value_to_text(value);
        let parts: Vec<&str> = text.split(delimiter).collect();
        let len = parts.len() as i64;
        let resolved = if index < 0 { len + index } else { index };
        let part = usize::try_from(resolved)
            .ok()
            .and_then(|i| parts.get(i))
            .map(|p| p.trim())
            .unwrap_or("");
        Ok(text_value(part))
    }
}

/// Normalizes betting odds to `decimal`, `fractional`, or `american` notation.
pub struct Odds;

impl Odds {
    fn to_decimal(text: &str) -> Option<f64> {
        if let Some((num, den)) = text.split_once('/') {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            return Some(num / den + 1.0);
        }
        ODDS_CLEAN_RE.replace_all(text, "").parse().ok()
    }
}

impl Processor for Odds {
    fn name(&self) -> &str {
        "odds"
    }

    fn process(
        &self,
        value: &Value,
        args: &ProcessorArgs,
        ctx: &ProcessorContext,
    ) -> Result<Value, ProcessorError> {
        let raw = value_to_text(value);
        let text = raw.trim();
        if text.is_empty() {
            return Ok(text_value(""));
        }
        let Some(decimal) = Self::to_decimal(text) else {
            return Ok(text_value(text));
        };

        let formatted = match ctx.lookup(args, "format_type").unwrap_or("decimal") {
            "fractional" => format!("{:.2}/1", decimal - 1.0),
            "american" if decimal >= 2.0 => format!("+{:.0}", (decimal - 1.0) * 100.0),
            "american" if decimal > 1.0 => format!("{:.0}", -100.0 / (decimal - 1.0)),
            "american" => return Ok(text_value(text)),
            _ => format!("{decimal:.2}"),
        };
        Ok(text_value(formatted))
    }
}

pub struct Join;

impl Processor for Join {
    fn name(&self) -> &str {
        "join"
    }

    fn process(
        &self,
        value: &Value,
        args: &ProcessorArgs,
        ctx: &ProcessorContext,
    ) -> Result<Value, ProcessorError> {
        let delimiter = ctx.lookup(args, "delimiter").unwrap_or(",");
        match value {
            Value::Array(items) => Ok(text_value(
                items
                    .iter()
                    .map(value_to_text)
                    .collect::<Vec<_>>()
                    .join(delimiter),
            )),
            other => Ok(text_value(value_to_text(other))),
        }
    }
}

pub struct DefaultIfEmpty;

impl Processor for DefaultIfEmpty {
    fn name(&self) -> &str {
        "default_if_empty"
    }

    fn process(
        &self,
        value: &Value,
        args: &ProcessorArgs,
        _ctx: &ProcessorContext,
    ) -> Result<Value, ProcessorError> {
        let fallback = args
            .get("value")
            .ok_or_else(|| ProcessorError::missing(self.name(), "value"))?;
        let empty = match value {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        };
        Ok(if empty { fallback.clone() } else { value.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(p: &dyn Processor, value: Value, args: Value) -> Result<Value, ProcessorError> {
        let args = match args {
            Value::Object(m) => m,
            _ => ProcessorArgs::new(),
        };
        p.process(&value, &args, &ProcessorContext::default())
    }

    #[test]
    fn test_trim_and_case() {
        assert_eq!(run(&Trim, json!("  a b  "), json!({})).unwrap(), json!("a b"));
        assert_eq!(run(&Trim, Value::Null, json!({})).unwrap(), json!(""));
        assert_eq!(run(&Uppercase, json!("abc"), json!({})).unwrap(), json!("ABC"));
        assert_eq!(run(&Lowercase, json!("ABC"), json!({})).unwrap(), json!("abc"));
    }

    #[test]
    fn test_regex_extract_and_replace() {
        let out = run(
            &RegexProcessor,
            json!("Match #1234 today"),
            json!({"pattern": r"#(\d+)", "extract_group": 1}),
        )
        .unwrap();
        assert_eq!(out, json!("1234"));

        let out = run(
            &RegexProcessor,
            json!("no digits"),
            json!({"pattern": r"(\d+)", "extract_group": 1}),
        )
        .unwrap();
        assert_eq!(out, json!(""));

        let out = run(
            &RegexProcessor,
            json!("a-b-c"),
            json!({"pattern": "-", "replacement": "+"}),
        )
        .unwrap();
        assert_eq!(out, json!("a+b+c"));
    }

    #[test]
    fn test_regex_errors() {
        assert!(matches!(
            run(&RegexProcessor, json!("x"), json!({})),
            Err(ProcessorError::MissingArgument { .. })
        ));
        assert!(matches!(
            run(&RegexProcessor, json!("x"), json!({"pattern": "("})),
            Err(ProcessorError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_replace() {
        let out = run(&Replace, json!("1,5"), json!({"search": ",", "replace": "."})).unwrap();
        assert_eq!(out, json!("1.5"));
    }

    #[test]
    fn test_strip_html() {
        let out = run(&StripHtml, json!("<b>Home</b> &amp; <i>Away</i>"), json!({})).unwrap();
        assert_eq!(out, json!("Home & Away"));
    }

    #[test]
    fn test_absolute_url() {
        let ctx = ProcessorContext::with_base_url("https://example.com/sport/");
        let args = ProcessorArgs::new();
        assert_eq!(
            AbsoluteUrl.process(&json!("event/1"), &args, &ctx).unwrap(),
            json!("https://example.com/sport/event/1")
        );
        assert_eq!(
            AbsoluteUrl.process(&json!("//cdn.test/x.png"), &args, &ctx).unwrap(),
            json!("https://cdn.test/x.png")
        );
        assert_eq!(
            AbsoluteUrl
                .process(&json!("https://other.test/"), &args, &ctx)
                .unwrap(),
            json!("https://other.test/")
        );
        assert_eq!(
            run(&AbsoluteUrl, json!("/rel"), json!({})).unwrap(),
            json!("/rel")
        );
    }

    #[test]
    fn test_number() {
        assert_eq!(run(&NumberProcessor, json!("Price: 1,234"), json!({})).unwrap(), json!(1234));
        assert_eq!(run(&NumberProcessor, json!("@ 2.50"), json!({})).unwrap(), json!(2.5));
        assert_eq!(
            run(&NumberProcessor, json!("3.14159"), json!({"decimal_places": 2})).unwrap(),
            json!(3.14)
        );
        assert_eq!(run(&NumberProcessor, json!("n/a"), json!({})).unwrap(), json!(0));
        assert_eq!(run(&NumberProcessor, json!(7), json!({})).unwrap(), json!(7));
    }

    #[test]
    fn test_date() {
        assert_eq!(run(&DateProcessor, json!("25/12/2024"), json!({})).unwrap(), json!("2024-12-25"));
        assert_eq!(
            run(
                &DateProcessor,
                json!("2024-12-25 18:30:00"),
                json!({"output_format": "%d.%m.%Y %H:%M"})
            )
            .unwrap(),
            json!("25.12.2024 18:30")
        );
        assert_eq!(
            run(
                &DateProcessor,
                json!("Dec 25 2024"),
                json!({"input_format": "%b %d %Y"})
            )
            .unwrap(),
            json!("2024-12-25")
        );
        assert_eq!(run(&DateProcessor, json!("tomorrow"), json!({})).unwrap(), json!("tomorrow"));
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(
            run(&CleanText, json!("  Home \n\t vs   Away "), json!({})).unwrap(),
            json!("Home vs Away")
        );
    }

    #[test]
    fn test_split() {
        assert_eq!(
            run(&Split, json!("Home - Away"), json!({"delimiter": "-", "index": 1})).unwrap(),
            json!("Away")
        );
        assert_eq!(
            run(&Split, json!("a b c"), json!({"index": -1})).unwrap(),
            json!("c")
        );
        assert_eq!(run(&Split, json!("a b"), json!({"index": 5})).unwrap(), json!(""));
    }

    #[test]
    fn test_odds() {
        assert_eq!(run(&Odds, json!("5/2"), json!({})).unwrap(), json!("3.50"));
        assert_eq!(
            run(&Odds, json!("3.5"), json!({"format_type": "american"})).unwrap(),
            json!("+250")
        );
        assert_eq!(
            run(&Odds, json!("1.5"), json!({"format_type": "american"})).unwrap(),
            json!("-200")
        );
        assert_eq!(
            run(&Odds, json!("2.5"), json!({"format_type": "fractional"})).unwrap(),
            json!("1.50/1")
        );
        assert_eq!(run(&Odds, json!("5/0"), json!({})).unwrap(), json!("5/0"));
    }

    #[test]
    fn test_join_and_default_if_empty() {
        assert_eq!(
            run(&Join, json!(["a", 1, "b"]), json!({"delimiter": "|"})).unwrap(),
            json!("a|1|b")
        );
        assert_eq!(
            run(&DefaultIfEmpty, json!("  "), json!({"value": "n/a"})).unwrap(),
            json!("n/a")
        );
        assert_eq!(
            run(&DefaultIfEmpty, json!("x"), json!({"value": "n/a"})).unwrap(),
            json!("x")
        );
        assert!(run(&DefaultIfEmpty, json!(""), json!({})).is_err());
    }
}
