//! Named value transformers applied to extracted fields.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::builtins;
use crate::instruction::ProcessorStep;

pub type ProcessorArgs = Map<String, Value>;

/// Values every processor step can see besides its own arguments.
#[derive(Debug, Clone, Default)]
pub struct ProcessorContext {
    /// Current page URL, or the scraper's start URL.
    pub base_url: Option<String>,
    /// Run variables published by loops.
    pub variables: BTreeMap<String, Value>,
}

impl ProcessorContext {
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: Some(base_url.to_string()),
            variables: BTreeMap::new(),
        }
    }

    /// String argument, falling back to a context value of the same name.
    pub fn lookup<'a>(&'a self, args: &'a ProcessorArgs, key: &str) -> Option<&'a str> {
        if let Some(v) = args.get(key) {
            return v.as_str();
        }
        match key {
            "base_url" => self.base_url.as_deref(),
            _ => self.variables.get(key).and_then(Value::as_str),
        }
    }
}

/// Failure of a single processor step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessorError {
    #[error("{processor}: missing argument `{arg}`")]
    MissingArgument { processor: String, arg: String },

    #[error("{processor}: invalid argument `{arg}`: {message}")]
    InvalidArgument {
        processor: String,
        arg: String,
        message: String,
    },

    #[error("{processor}: {message}")]
    Failed { processor: String, message: String },
}

impl ProcessorError {
    pub fn missing(processor: &str, arg: &str) -> Self {
        Self::MissingArgument {
            processor: processor.to_string(),
            arg: arg.to_string(),
        }
    }

    pub fn invalid(processor: &str, arg: &str, message: impl fmt::Display) -> Self {
        Self::InvalidArgument {
            processor: processor.to_string(),
            arg: arg.to_string(),
            message: message.to_string(),
        }
    }

    pub fn failed(processor: &str, message: impl fmt::Display) -> Self {
        Self::Failed {
            processor: processor.to_string(),
            message: message.to_string(),
        }
    }
}

/// A named, pure value transformer.
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    fn process(
        &self,
        value: &Value,
        args: &ProcessorArgs,
        ctx: &ProcessorContext,
    ) -> Result<Value, ProcessorError>;
}

/// Name → processor lookup table.
///
/// Built once, then shared immutably (`Arc<ProcessorRegistry>`) by every run.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.names())
            .finish()
    }
}

impl ProcessorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in processor.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtins::register_all(&mut registry);
        registry
    }

    /// Adds a processor, replacing any existing one with the same name.
    pub fn register(&mut self, processor: impl Processor + 'static) {
        self.processors
            .insert(processor.name().to_string(), Arc::new(processor));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Processor>> {
        self.processors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs `steps` over `value` in order.
    ///
    /// Unknown names are skipped. The first failing step stops the chain
    /// and the last successfully produced value is returned.
    pub fn apply(&self, value: Value, steps: &[ProcessorStep], ctx: &ProcessorContext) -> Value {
        let mut current = value;
        for step in steps {
            let Some(processor) = self.get(&step.name) else {
                warn!(processor = %step.name, "Unknown processor, skipping");
                continue;
            };
            match processor.process(&current, &step.args, ctx) {
                Ok(next) => current = next,
                Err(e) => {
                    warn!(error = %e, "Processor failed, keeping last good value");
                    break;
                }
            }
        }
        current
    }
}

/// Text form of a value as processors see it.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Exclaim;

    impl Processor for Exclaim {
        fn name(&self) -> &str {
            "exclaim"
        }

        fn process(
            &self,
            value: &Value,
            _args: &ProcessorArgs,
            _ctx: &ProcessorContext,
        ) -> Result<Value, ProcessorError> {
            Ok(Value::String(format!("{}!", value_to_text(value))))
        }
    }

    struct AlwaysFails;

    impl Processor for AlwaysFails {
        fn name(&self) -> &str {
            "boom"
        }

        fn process(
            &self,
            _value: &Value,
            _args: &ProcessorArgs,
            _ctx: &ProcessorContext,
        ) -> Result<Value, ProcessorError> {
            Err(ProcessorError::failed("boom", "always"))
        }
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Exclaim);
        registry.register(AlwaysFails);
        assert_eq!(registry.names(), vec!["boom", "exclaim"]);
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ProcessorRegistry::with_builtins();
        for name in [
            "trim",
            "uppercase",
            "lowercase",
            "regex",
            "replace",
            "strip_html",
            "absolute_url",
            "number",
            "date",
            "clean_text",
            "split",
            "odds",
            "join",
            "default_if_empty",
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
    }

    #[test]
    fn test_apply_skips_unknown() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Exclaim);
        let out = registry.apply(
            json!("hi"),
            &[ProcessorStep::new("nope"), ProcessorStep::new("exclaim")],
            &ProcessorContext::default(),
        );
        assert_eq!(out, json!("hi!"));
    }

    #[test]
    fn test_apply_short_circuits_on_failure() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Exclaim);
        registry.register(AlwaysFails);
        let out = registry.apply(
            json!("hi"),
            &[
                ProcessorStep::new("exclaim"),
                ProcessorStep::new("boom"),
                ProcessorStep::new("exclaim"),
            ],
            &ProcessorContext::default(),
        );
        assert_eq!(out, json!("hi!"));
    }

    #[test]
    fn test_lookup_prefers_args() {
        let ctx = ProcessorContext::with_base_url("https://ctx.test/");
        let mut args = ProcessorArgs::new();
        assert_eq!(ctx.lookup(&args, "base_url"), Some("https://ctx.test/"));
        args.insert("base_url".into(), json!("https://arg.test/"));
        assert_eq!(ctx.lookup(&args, "base_url"), Some("https://arg.test/"));
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&Value::Null), "");
        assert_eq!(value_to_text(&json!(1.5)), "1.5");
        assert_eq!(value_to_text(&json!("x")), "x");
        assert_eq!(value_to_text(&json!([1, 2])), "[1,2]");
    }
}
