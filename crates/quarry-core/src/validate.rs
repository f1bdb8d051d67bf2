//! Structural validation of scraper configurations.
//!
//! Runs before any content source is acquired. Every problem is reported,
//! not just the first.

use std::collections::HashMap;

use scraper::Selector;
use url::Url;

use crate::config::{FetcherKind, ScrapeConfig};
use crate::instruction::{
    CollectInstruction, Condition, Instruction, LoopStrategy, ScrollDirection,
};
use crate::models::Bucket;
use crate::path::PathExpr;
use crate::processor::ProcessorRegistry;
use crate::util::is_allowed_domain;

/// Checks `config` against the instruction model and `registry`.
pub fn validate_config(config: &ScrapeConfig, registry: &ProcessorRegistry) -> Result<(), Vec<String>> {
    let mut v = Validator {
        registry,
        kind: config.fetcher.kind,
        buckets: HashMap::new(),
        errors: Vec::new(),
    };

    v.check_meta(config);
    if config.fetcher.timeout_ms == 0 {
        v.error("fetcher.timeout_ms must be greater than 0");
    }
    if config.instructions.is_empty() {
        v.error("instructions must not be empty");
    }
    v.check_list(&config.instructions, "instructions");

    if v.errors.is_empty() {
        Ok(())
    } else {
        Err(v.errors)
    }
}

struct Validator<'a> {
    registry: &'a ProcessorRegistry,
    kind: FetcherKind,
    buckets: HashMap<String, Bucket>,
    errors: Vec<String>,
}

impl Validator<'_> {
    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn uses_dom(&self) -> bool {
        self.kind != FetcherKind::Api
    }

    fn check_meta(&mut self, config: &ScrapeConfig) {
        let meta = &config.meta;
        if meta.name.trim().is_empty() {
            self.error("meta.name must not be empty");
        }
        match Url::parse(&meta.start_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                if !is_allowed_domain(&meta.start_url, &meta.allowed_domains) {
                    self.error(format!(
                        "meta.start_url `{}` is outside meta.allowed_domains",
                        meta.start_url
                    ));
                }
            }
            Ok(url) => self.error(format!(
                "meta.start_url must use http or https, got `{}`",
                url.scheme()
            )),
            Err(e) => self.error(format!(
                "meta.start_url `{}` is not a valid URL: {e}",
                meta.start_url
            )),
        }
    }

    fn check_list(&mut self, list: &[Instruction], path: &str) {
        for (i, instruction) in list.iter().enumerate() {
            self.check_instruction(instruction, &format!("{path}[{i}]"));
        }
    }

    fn check_css(&mut self, selector: &str, at: &str) {
        if selector.trim().is_empty() {
            self.error(format!("{at}: selector must not be empty"));
        } else if Selector::parse(selector).is_err() {
            self.error(format!("{at}: invalid CSS selector `{selector}`"));
        }
    }

    fn check_condition(&mut self, condition: &Condition, at: &str) {
        if let Some(selector) = condition.selector() {
            if self.uses_dom() {
                self.check_css(selector, at);
            } else if selector.trim().is_empty() {
                self.error(format!("{at}: selector must not be empty"));
            }
        }
    }

    fn check_instruction(&mut self, instruction: &Instruction, at: &str) {
        // Structured payloads only run top-level collects.
        if self.kind == FetcherKind::Api && !matches!(instruction, Instruction::Collect(_)) {
            self.error(format!(
                "{at}: `{}` is not supported by the api fetcher, only top-level `collect` is",
                instruction.kind()
            ));
        } else if instruction.requires_session() && self.kind != FetcherKind::Session {
            self.error(format!(
                "{at}: `{}` requires a session fetcher, but fetcher.type is `{}`",
                instruction.kind(),
                self.kind.as_str()
            ));
        }

        match instruction {
            Instruction::Click(c) => {
                self.check_css(&c.selector, at);
                if let Some(cond) = &c.wait_after {
                    self.check_condition(cond, &format!("{at}.wait_after"));
                }
            }
            Instruction::Wait(w) => self.check_condition(&w.condition, &format!("{at}.condition")),
            Instruction::Navigate(n) => {
                if n.url.trim().is_empty() {
                    self.error(format!("{at}: url must not be empty"));
                }
                if let Some(cond) = &n.wait_after {
                    self.check_condition(cond, &format!("{at}.wait_after"));
                }
            }
            Instruction::Input(i) => self.check_css(&i.selector, at),
            Instruction::Select(s) => {
                self.check_css(&s.selector, at);
                if s.choice().is_none() {
                    self.error(format!(
                        "{at}: select needs exactly one of value, label, index"
                    ));
                }
            }
            Instruction::Scroll(s) => {
                if s.direction == ScrollDirection::ToElement {
                    match &s.selector {
                        Some(sel) => self.check_css(sel, at),
                        None => self.error(format!("{at}: scroll to_element needs a selector")),
                    }
                }
            }
            Instruction::Collect(c) => self.check_collect(c, at),
            Instruction::If(i) => {
                self.check_condition(&i.condition, &format!("{at}.condition"));
                self.check_list(&i.then_instructions, &format!("{at}.then_instructions"));
                self.check_list(&i.else_instructions, &format!("{at}.else_instructions"));
            }
            Instruction::Loop(l) => {
                if l.max_iterations == 0 {
                    self.error(format!("{at}: max_iterations must be at least 1"));
                }
                match &l.strategy {
                    LoopStrategy::Pagination {
                        next_selector,
                        break_condition,
                    } => {
                        self.check_css(next_selector, &format!("{at}.next_selector"));
                        if let Some(cond) = break_condition {
                            self.check_condition(cond, &format!("{at}.break_condition"));
                        }
                    }
                    LoopStrategy::DropdownOptions {
                        dropdown_selector, ..
                    } => self.check_css(dropdown_selector, &format!("{at}.dropdown_selector")),
                    LoopStrategy::Count { count } => {
                        if *count == 0 {
                            self.error(format!("{at}: count must be at least 1"));
                        }
                    }
                    LoopStrategy::While { while_condition } => {
                        self.check_condition(while_condition, &format!("{at}.while_condition"));
                    }
                }
                self.check_list(&l.instructions, &format!("{at}.instructions"));
            }
        }
    }

    fn check_locator(&mut self, locator: &str, at: &str) {
        if self.uses_dom() {
            self.check_css(locator, at);
        } else if let Err(e) = PathExpr::parse(locator) {
            self.error(format!("{at}: {e}"));
        }
    }

    fn check_collect(&mut self, c: &CollectInstruction, at: &str) {
        if c.name.trim().is_empty() {
            self.error(format!("{at}: collect name must not be empty"));
        }
        match self.buckets.get(&c.name) {
            Some(existing) if *existing != c.bucket => self.error(format!(
                "{at}: collection `{}` is already assigned to bucket `{existing}`",
                c.name
            )),
            Some(_) => {}
            None => {
                self.buckets.insert(c.name.clone(), c.bucket);
            }
        }

        self.check_locator(&c.container_selector, &format!("{at}.container_selector"));
        if !c.items_are_containers() {
            self.check_locator(&c.item_selector, &format!("{at}.item_selector"));
        }

        if c.fields.is_empty() {
            self.error(format!("{at}: collect `{}` has no fields", c.name));
        }
        for (name, spec) in &c.fields {
            let field_at = format!("{at}.fields.{name}");
            if spec.selectors.is_empty() || spec.selectors.iter().any(|s| s.trim().is_empty()) {
                self.error(format!("{field_at}: selectors must be non-empty"));
            }
            for step in &spec.processors {
                if !self.registry.contains(&step.name) {
                    self.error(format!("{field_at}: unknown processor `{}`", step.name));
                }
            }
        }
        for key in &c.key_fields {
            if !c.fields.contains_key(key) {
                self.error(format!("{at}: key field `{key}` is not a declared field"));
            }
        }
    }
}
