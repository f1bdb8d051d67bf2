//! Instruction interpreter.
//!
//! Every handler reports success as a `bool` and never returns an error:
//! failures are logged, recorded in the [`ExecutionContext`] when they come
//! from the content source, and the sequence moves on.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::condition;
use crate::context::ExecutionContext;
use crate::extract::extract_html;
use crate::instruction::{
    ClickInstruction, CollectInstruction, Condition, DEFAULT_SCROLL_AMOUNT, IfInstruction,
    InputInstruction, Instruction, NavigateInstruction, ScrollDirection, ScrollInstruction,
    SelectInstruction,
};
use crate::processor::ProcessorRegistry;
use crate::traits::Session;
use crate::util::{is_allowed_domain, resolve_url};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Fixed pauses used while interpreting instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Interval between selector checks while waiting.
    pub poll_interval: Duration,
    /// Pause between clicks in `all_matching` mode.
    pub click_delay: Duration,
    /// Pause after advancing a pagination loop.
    pub page_settle: Duration,
    /// Pause after each dropdown option.
    pub option_delay: Duration,
    /// Pause after each while-loop iteration.
    pub while_delay: Duration,
    pub navigation_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            click_delay: Duration::from_millis(500),
            page_settle: Duration::from_secs(2),
            option_delay: Duration::from_secs(1),
            while_delay: Duration::from_millis(500),
            navigation_timeout: Duration::from_secs(30),
        }
    }
}

impl ExecutorConfig {
    /// No pauses at all.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            click_delay: Duration::ZERO,
            page_settle: Duration::ZERO,
            option_delay: Duration::ZERO,
            while_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Interprets instructions against one session.
pub struct Executor<'a, S: Session> {
    pub(crate) session: &'a S,
    pub(crate) registry: &'a ProcessorRegistry,
    pub(crate) config: &'a ExecutorConfig,
    allowed_domains: &'a [String],
}

impl<'a, S: Session> Executor<'a, S> {
    pub fn new(
        session: &'a S,
        registry: &'a ProcessorRegistry,
        config: &'a ExecutorConfig,
        allowed_domains: &'a [String],
    ) -> Self {
        Self {
            session,
            registry,
            config,
            allowed_domains,
        }
    }

    /// Runs `instructions` in order. A failing instruction does not stop
    /// the sequence.
    pub fn execute_all<'b>(
        &'b self,
        instructions: &'b [Instruction],
        ctx: &'b mut ExecutionContext,
    ) -> BoxFuture<'b, ()> {
        Box::pin(async move {
            for (index, instruction) in instructions.iter().enumerate() {
                ctx.enter(index);
                let ok = self.execute(instruction, ctx).await;
                ctx.leave();
                if !ok {
                    warn!(
                        instruction = instruction.kind(),
                        index, "Instruction failed, continuing"
                    );
                }
            }
        })
    }

    /// Runs one instruction, returning whether it succeeded.
    pub fn execute<'b>(
        &'b self,
        instruction: &'b Instruction,
        ctx: &'b mut ExecutionContext,
    ) -> BoxFuture<'b, bool> {
        Box::pin(async move {
            debug!(instruction = instruction.kind(), "Executing");
            match instruction {
                Instruction::Click(c) => self.click(c, ctx).await,
                Instruction::Wait(w) => self.wait_for(&w.condition).await,
                Instruction::Navigate(n) => self.navigate(n, ctx).await,
                Instruction::Input(i) => self.input(i, ctx).await,
                Instruction::Select(s) => self.select(s, ctx).await,
                Instruction::Scroll(s) => self.scroll(s, ctx).await,
                Instruction::Collect(c) => self.collect(c, ctx).await,
                Instruction::If(i) => self.branch(i, ctx).await,
                Instruction::Loop(l) => self.run_loop(l, ctx).await,
            }
        })
    }

    pub(crate) async fn wait_for(&self, condition: &Condition) -> bool {
        let held = condition::evaluate(condition, self.session, self.config.poll_interval).await;
        if !held {
            debug!(condition = condition.kind(), "Condition not met");
        }
        held
    }

    pub(crate) async fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            sleep(duration).await;
        }
    }

    async fn click(&self, click: &ClickInstruction, ctx: &mut ExecutionContext) -> bool {
        let count = match self.session.count(&click.selector).await {
            Ok(n) => n,
            Err(e) => {
                ctx.record_error(format!("click `{}`: {e}", click.selector));
                return false;
            }
        };

        if count == 0 {
            if !click.optional {
                warn!(selector = %click.selector, "Click target not found");
                return false;
            }
            debug!(selector = %click.selector, "Optional click target not found");
        } else if click.all_matching {
            let mut clicked = 0usize;
            for index in 0..count {
                match self.session.is_visible(&click.selector, index).await {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        debug!(selector = %click.selector, index, error = %e, "Visibility check failed");
                        continue;
                    }
                }
                match self.session.click(&click.selector, index).await {
                    Ok(()) => {
                        clicked += 1;
                        self.pause(self.config.click_delay).await;
                    }
                    Err(e) => warn!(selector = %click.selector, index, error = %e, "Click failed"),
                }
            }
            info!(selector = %click.selector, clicked, "Clicked matching elements");
        } else if let Err(e) = self.session.click(&click.selector, 0).await {
            if !click.optional {
                ctx.record_error(format!("click `{}`: {e}", click.selector));
                return false;
            }
            debug!(selector = %click.selector, error = %e, "Optional click failed");
        } else {
            info!(selector = %click.selector, "Clicked");
        }

        if let Some(condition) = &click.wait_after {
            self.wait_for(condition).await;
        }
        true
    }

    async fn navigate(&self, nav: &NavigateInstruction, ctx: &mut ExecutionContext) -> bool {
        let base = match self.session.current_url().await {
            Ok(url) => url,
            Err(_) => ctx.base_url().to_string(),
        };
        let Some(target) = resolve_url(&base, &nav.url) else {
            ctx.record_error(format!("navigate: invalid URL `{}`", nav.url));
            return false;
        };
        if !is_allowed_domain(&target, self.allowed_domains) {
            ctx.record_error(format!("navigate: {target} is outside the allowed domains"));
            return false;
        }

        match timeout(self.config.navigation_timeout, self.session.navigate(&target)).await {
            Ok(Ok(page)) => info!(url = %page.url, status = page.status, "Navigated"),
            Ok(Err(e)) => {
                ctx.record_error(format!("navigation to {target} failed: {e}"));
                return false;
            }
            Err(_) => {
                ctx.record_error(format!(
                    "navigation to {target} timed out after {} ms",
                    self.config.navigation_timeout.as_millis()
                ));
                return false;
            }
        }

        if let Some(condition) = &nav.wait_after {
            self.wait_for(condition).await;
        }
        true
    }

    async fn input(&self, input: &InputInstruction, ctx: &mut ExecutionContext) -> bool {
        match self.session.count(&input.selector).await {
            Ok(0) => {
                warn!(selector = %input.selector, "Input target not found");
                return false;
            }
            Ok(_) => {}
            Err(e) => {
                ctx.record_error(format!("input `{}`: {e}", input.selector));
                return false;
            }
        }
        match self
            .session
            .type_text(&input.selector, &input.value, input.clear_first)
            .await
        {
            Ok(()) => {
                debug!(selector = %input.selector, "Typed input");
                true
            }
            Err(e) => {
                ctx.record_error(format!("input `{}`: {e}", input.selector));
                false
            }
        }
    }

    async fn select(&self, select: &SelectInstruction, ctx: &mut ExecutionContext) -> bool {
        let Some(choice) = select.choice() else {
            warn!(selector = %select.selector, "Select needs exactly one of value, label or index");
            return false;
        };
        match self.session.count(&select.selector).await {
            Ok(0) => {
                warn!(selector = %select.selector, "Select control not found");
                return false;
            }
            Ok(_) => {}
            Err(e) => {
                ctx.record_error(format!("select `{}`: {e}", select.selector));
                return false;
            }
        }
        match self.session.select_option(&select.selector, &choice).await {
            Ok(()) => {
                info!(selector = %select.selector, ?choice, "Selected option");
                true
            }
            Err(e) => {
                ctx.record_error(format!("select `{}`: {e}", select.selector));
                false
            }
        }
    }

    async fn scroll(&self, scroll: &ScrollInstruction, ctx: &mut ExecutionContext) -> bool {
        let amount = i64::from(scroll.amount.unwrap_or(DEFAULT_SCROLL_AMOUNT));
        let outcome = match scroll.direction {
            ScrollDirection::Down => self.session.scroll_by(amount).await.map(|()| true),
            ScrollDirection::Up => self.session.scroll_by(-amount).await.map(|()| true),
            ScrollDirection::ToElement => {
                let Some(selector) = scroll.selector.as_deref() else {
                    warn!("Scroll to_element without a selector");
                    return false;
                };
                self.session.scroll_into_view(selector).await
            }
        };
        match outcome {
            Ok(true) => true,
            Ok(false) => {
                warn!(selector = ?scroll.selector, "Scroll target not found");
                false
            }
            Err(e) => {
                ctx.record_error(format!("scroll: {e}"));
                false
            }
        }
    }

    async fn collect(&self, collect: &CollectInstruction, ctx: &mut ExecutionContext) -> bool {
        let html = match self.session.content().await {
            Ok(html) => html,
            Err(e) => {
                ctx.record_error(format!("collect `{}`: {e}", collect.name));
                return false;
            }
        };
        let page_url = self.session.current_url().await.ok();
        let pctx = ctx.processor_context(page_url.as_deref());

        match extract_html(&html, collect, self.registry, &pctx) {
            Ok(items) => {
                let added = ctx.append(collect, items);
                if added == 0 {
                    warn!(collection = %collect.name, "No items matched");
                }
                info!(
                    collection = %collect.name,
                    added,
                    total = ctx.collection(&collect.name).len(),
                    "Collected items"
                );
                true
            }
            Err(e) => {
                ctx.record_error(format!("collect `{}`: {e}", collect.name));
                false
            }
        }
    }

    async fn branch(&self, branch: &IfInstruction, ctx: &mut ExecutionContext) -> bool {
        let held = self.wait_for(&branch.condition).await;
        let chosen = if held {
            &branch.then_instructions
        } else {
            &branch.else_instructions
        };
        debug!(held, instructions = chosen.len(), "Branch chosen");
        self.execute_all(chosen, ctx).await;
        true
    }
}
