//! Instruction tree, conditions, and field specifications.
//!
//! Everything here is plain data deserialized from the configuration
//! document; execution lives in [`crate::executor`].

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::models::Bucket;

/// One step of a scraping program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    Click(ClickInstruction),
    Wait(WaitInstruction),
    Navigate(NavigateInstruction),
    Input(InputInstruction),
    Select(SelectInstruction),
    Scroll(ScrollInstruction),
    Collect(CollectInstruction),
    If(IfInstruction),
    Loop(LoopInstruction),
}

impl Instruction {
    pub fn kind(&self) -> &'static str {
        match self {
            Instruction::Click(_) => "click",
            Instruction::Wait(_) => "wait",
            Instruction::Navigate(_) => "navigate",
            Instruction::Input(_) => "input",
            Instruction::Select(_) => "select",
            Instruction::Scroll(_) => "scroll",
            Instruction::Collect(_) => "collect",
            Instruction::If(_) => "if",
            Instruction::Loop(_) => "loop",
        }
    }

    /// True for instructions that need a live interactive session.
    pub fn requires_session(&self) -> bool {
        match self {
            Instruction::Click(_)
            | Instruction::Navigate(_)
            | Instruction::Input(_)
            | Instruction::Select(_)
            | Instruction::Scroll(_) => true,
            Instruction::Loop(l) => matches!(
                l.strategy,
                LoopStrategy::Pagination { .. } | LoopStrategy::DropdownOptions { .. }
            ),
            Instruction::Wait(_) | Instruction::Collect(_) | Instruction::If(_) => false,
        }
    }
}

/// A predicate evaluated against the current page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Sleeps for `ms`, then holds.
    Timeout { ms: u64 },
    /// Holds once `selector` matches, polling until `timeout_ms`.
    #[serde(alias = "selector")]
    SelectorPresent {
        selector: String,
        #[serde(default = "default_condition_timeout_ms")]
        timeout_ms: u64,
    },
    UrlContains { substring: String },
    #[serde(alias = "element_count")]
    ElementCountAtLeast {
        selector: String,
        #[serde(default = "default_min_count")]
        count: usize,
    },
}

impl Condition {
    pub fn kind(&self) -> &'static str {
        match self {
            Condition::Timeout { .. } => "timeout",
            Condition::SelectorPresent { .. } => "selector_present",
            Condition::UrlContains { .. } => "url_contains",
            Condition::ElementCountAtLeast { .. } => "element_count_at_least",
        }
    }

    /// CSS selector the condition inspects, if any.
    pub fn selector(&self) -> Option<&str> {
        match self {
            Condition::SelectorPresent { selector, .. }
            | Condition::ElementCountAtLeast { selector, .. } => Some(selector),
            Condition::Timeout { .. } | Condition::UrlContains { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickInstruction {
    pub selector: String,
    #[serde(default)]
    pub all_matching: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub wait_after: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitInstruction {
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigateInstruction {
    pub url: String,
    #[serde(default)]
    pub wait_after: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputInstruction {
    pub selector: String,
    pub value: String,
    #[serde(default = "default_true")]
    pub clear_first: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectInstruction {
    pub selector: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, alias = "text")]
    pub label: Option<String>,
    #[serde(default)]
    pub index: Option<usize>,
}

impl SelectInstruction {
    /// The chosen option, when exactly one of value/label/index is set.
    pub fn choice(&self) -> Option<OptionChoice> {
        match (&self.value, &self.label, self.index) {
            (Some(v), None, None) => Some(OptionChoice::Value(v.clone())),
            (None, Some(l), None) => Some(OptionChoice::Label(l.clone())),
            (None, None, Some(i)) => Some(OptionChoice::Index(i)),
            _ => None,
        }
    }
}

/// How a select control option is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionChoice {
    Value(String),
    Label(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    #[default]
    Down,
    Up,
    ToElement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollInstruction {
    #[serde(default)]
    pub direction: ScrollDirection,
    #[serde(default)]
    pub amount: Option<u32>,
    #[serde(default)]
    pub selector: Option<String>,
}

pub const DEFAULT_SCROLL_AMOUNT: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectInstruction {
    pub name: String,
    pub container_selector: String,
    pub item_selector: String,
    pub fields: BTreeMap<String, FieldSpec>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub bucket: Bucket,
    /// Fields that identify an item across runs; empty means all fields.
    #[serde(default)]
    pub key_fields: Vec<String>,
}

impl CollectInstruction {
    /// True when items are the containers themselves.
    pub fn items_are_containers(&self) -> bool {
        let item = self.item_selector.trim();
        item.is_empty() || item == "."
    }
}

/// How one output field is located and post-processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Candidate selectors tried in order; the first match wins.
    #[serde(rename = "selector", deserialize_with = "one_or_many")]
    pub selectors: Vec<String>,
    #[serde(default = "default_attribute")]
    pub attribute: String,
    #[serde(default)]
    pub processors: Vec<ProcessorStep>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn default_value(&self) -> Value {
        self.default
            .clone()
            .unwrap_or_else(|| Value::String(String::new()))
    }
}

/// A named processor invocation with arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessorStep {
    pub name: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
}

impl ProcessorStep {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Map::new(),
        }
    }

    pub fn with_args(name: &str, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            name: name.to_string(),
            args,
        }
    }
}

impl<'de> Deserialize<'de> for ProcessorStep {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Full {
                name: String,
                #[serde(default)]
                args: Map<String, Value>,
            },
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Name(name) => ProcessorStep {
                name,
                args: Map::new(),
            },
            Raw::Full { name, args } => ProcessorStep { name, args },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfInstruction {
    pub condition: Condition,
    #[serde(default)]
    pub then_instructions: Vec<Instruction>,
    #[serde(default)]
    pub else_instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopInstruction {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    #[serde(flatten)]
    pub strategy: LoopStrategy,
}

/// Iteration strategy of a loop instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "iterator", rename_all = "snake_case")]
pub enum LoopStrategy {
    Pagination {
        next_selector: String,
        #[serde(default)]
        break_condition: Option<Condition>,
    },
    DropdownOptions {
        dropdown_selector: String,
        #[serde(default)]
        skip_first_option: bool,
    },
    Count {
        count: u32,
    },
    While {
        while_condition: Condition,
    },
}

impl LoopStrategy {
    pub fn kind(&self) -> &'static str {
        match self {
            LoopStrategy::Pagination { .. } => "pagination",
            LoopStrategy::DropdownOptions { .. } => "dropdown_options",
            LoopStrategy::Count { .. } => "count",
            LoopStrategy::While { .. } => "while",
        }
    }
}

pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_condition_timeout_ms() -> u64 {
    30_000
}

fn default_min_count() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_attribute() -> String {
    "text".to_string()
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_click_defaults() {
        let i: Instruction = serde_json::from_value(json!({
            "type": "click",
            "selector": ".more"
        }))
        .unwrap();
        let Instruction::Click(c) = i else {
            panic!("expected click");
        };
        assert!(!c.all_matching);
        assert!(!c.optional);
        assert!(c.wait_after.is_none());
    }

    #[test]
    fn test_condition_aliases() {
        let c: Condition =
            serde_json::from_value(json!({"type": "selector", "selector": "#x"})).unwrap();
        assert_eq!(
            c,
            Condition::SelectorPresent {
                selector: "#x".into(),
                timeout_ms: 30_000
            }
        );

        let c: Condition =
            serde_json::from_value(json!({"type": "element_count", "selector": "li"})).unwrap();
        assert_eq!(
            c,
            Condition::ElementCountAtLeast {
                selector: "li".into(),
                count: 1
            }
        );
    }

    #[test]
    fn test_loop_strategies() {
        let i: Instruction = serde_json::from_value(json!({
            "type": "loop",
            "iterator": "dropdown_options",
            "dropdown_selector": "#league",
            "skip_first_option": true,
            "instructions": [{"type": "wait", "condition": {"type": "timeout", "ms": 10}}]
        }))
        .unwrap();
        let Instruction::Loop(l) = &i else {
            panic!("expected loop");
        };
        assert_eq!(l.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(l.instructions.len(), 1);
        assert_eq!(
            l.strategy,
            LoopStrategy::DropdownOptions {
                dropdown_selector: "#league".into(),
                skip_first_option: true
            }
        );
        assert!(i.requires_session());

        let i: Instruction = serde_json::from_value(json!({
            "type": "loop",
            "iterator": "count",
            "count": 3,
            "max_iterations": 2
        }))
        .unwrap();
        assert!(!i.requires_session());
        let Instruction::Loop(l) = i else {
            panic!("expected loop");
        };
        assert_eq!(l.strategy, LoopStrategy::Count { count: 3 });
        assert_eq!(l.max_iterations, 2);
    }

    #[test]
    fn test_field_spec_shapes() {
        let f: FieldSpec = serde_json::from_value(json!({
            "selector": [".a", ".b"],
            "processors": ["trim", {"name": "regex", "args": {"pattern": "\\d+"}}],
            "required": true,
            "default": "n/a"
        }))
        .unwrap();
        assert_eq!(f.selectors, vec![".a", ".b"]);
        assert_eq!(f.attribute, "text");
        assert_eq!(f.processors[0], ProcessorStep::new("trim"));
        assert_eq!(f.processors[1].name, "regex");
        assert_eq!(f.processors[1].args["pattern"], json!("\\d+"));
        assert_eq!(f.default_value(), json!("n/a"));

        let f: FieldSpec = serde_json::from_value(json!({"selector": ".only"})).unwrap();
        assert_eq!(f.selectors, vec![".only"]);
        assert_eq!(f.default_value(), json!(""));
    }

    #[test]
    fn test_select_choice_requires_exactly_one() {
        let s: SelectInstruction =
            serde_json::from_value(json!({"selector": "#s", "text": "Premier League"})).unwrap();
        assert_eq!(s.choice(), Some(OptionChoice::Label("Premier League".into())));

        let s: SelectInstruction =
            serde_json::from_value(json!({"selector": "#s", "value": "a", "index": 2})).unwrap();
        assert_eq!(s.choice(), None);

        let s: SelectInstruction = serde_json::from_value(json!({"selector": "#s"})).unwrap();
        assert_eq!(s.choice(), None);
    }

    #[test]
    fn test_collect_bucket_default_and_container_items() {
        let c: CollectInstruction = serde_json::from_value(json!({
            "name": "rows",
            "container_selector": "table",
            "item_selector": ".",
            "fields": {"a": {"selector": "td"}}
        }))
        .unwrap();
        assert_eq!(c.bucket, Bucket::Other);
        assert!(c.items_are_containers());
        assert!(c.key_fields.is_empty());
    }
}
