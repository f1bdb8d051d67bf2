//! Loop instruction strategies.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::executor::Executor;
use crate::instruction::{Condition, Instruction, LoopInstruction, LoopStrategy, OptionChoice};
use crate::traits::Session;

impl<S: Session> Executor<'_, S> {
    /// Runs a loop. Its counter is keyed by tree position and reset on entry,
    /// so the body never runs more than `max_iterations` times.
    pub(crate) async fn run_loop(&self, l: &LoopInstruction, ctx: &mut ExecutionContext) -> bool {
        let key = ctx.loop_key();
        ctx.reset_loop(&key);
        info!(
            iterator = l.strategy.kind(),
            max_iterations = l.max_iterations,
            key = %key,
            "Starting loop"
        );

        let ok = match &l.strategy {
            LoopStrategy::Pagination {
                next_selector,
                break_condition,
            } => {
                self.paginate(l, next_selector, break_condition.as_ref(), &key, ctx)
                    .await
            }
            LoopStrategy::DropdownOptions {
                dropdown_selector,
                skip_first_option,
            } => {
                self.each_option(l, dropdown_selector, *skip_first_option, &key, ctx)
                    .await
            }
            LoopStrategy::Count { count } => self.repeat(l, *count, &key, ctx).await,
            LoopStrategy::While { while_condition } => {
                self.repeat_while(l, while_condition, &key, ctx).await
            }
        };

        info!(key = %key, iterations = ctx.loop_count(&key), "Loop finished");
        ok
    }

    async fn body(&self, body: &[Instruction], key: &str, ctx: &mut ExecutionContext) -> u32 {
        self.execute_all(body, ctx).await;
        ctx.tick_loop(key)
    }

    async fn paginate(
        &self,
        l: &LoopInstruction,
        next_selector: &str,
        break_condition: Option<&Condition>,
        key: &str,
        ctx: &mut ExecutionContext,
    ) -> bool {
        loop {
            ctx.set_var("loop_index", ctx.loop_count(key));
            let done = self.body(&l.instructions, key, ctx).await;

            if let Some(condition) = break_condition
                && self.wait_for(condition).await
            {
                info!(key = %key, "Break condition met");
                break;
            }
            if done >= l.max_iterations {
                debug!(key = %key, "Reached max iterations");
                break;
            }

            match self.session.count(next_selector).await {
                Ok(0) => {
                    debug!(selector = %next_selector, "No next control, last page reached");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(selector = %next_selector, error = %e, "Next control lookup failed");
                    break;
                }
            }
            match self.session.is_enabled(next_selector, 0).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(selector = %next_selector, "Next control disabled, last page reached");
                    break;
                }
                Err(e) => {
                    warn!(selector = %next_selector, error = %e, "Next control check failed");
                    break;
                }
            }
            if let Err(e) = self.session.click(next_selector, 0).await {
                warn!(selector = %next_selector, error = %e, "Could not advance page");
                break;
            }
            self.pause(self.config.page_settle).await;
        }
        true
    }

    async fn each_option(
        &self,
        l: &LoopInstruction,
        dropdown_selector: &str,
        skip_first: bool,
        key: &str,
        ctx: &mut ExecutionContext,
    ) -> bool {
        let options = match self.session.options(dropdown_selector).await {
            Ok(options) => options,
            Err(e) => {
                ctx.record_error(format!("dropdown `{dropdown_selector}`: {e}"));
                return false;
            }
        };
        let start = usize::from(skip_first);
        debug!(options = options.len(), skip_first, "Enumerated dropdown options");

        for (index, option) in options.iter().enumerate().skip(start) {
            if ctx.loop_count(key) >= l.max_iterations {
                break;
            }
            let choice = OptionChoice::Value(option.value.clone());
            if let Err(e) = self.session.select_option(dropdown_selector, &choice).await {
                ctx.record_error(format!(
                    "dropdown `{dropdown_selector}` option {index}: {e}"
                ));
                continue;
            }
            ctx.set_var("current_option_index", index);
            ctx.set_var("current_option_value", option.value.clone());
            ctx.set_var("current_option_label", option.label.clone());
            info!(option = %option.label, index, "Processing dropdown option");

            self.body(&l.instructions, key, ctx).await;
            self.pause(self.config.option_delay).await;
        }
        true
    }

    async fn repeat(&self, l: &LoopInstruction, count: u32, key: &str, ctx: &mut ExecutionContext) -> bool {
        for i in 0..count {
            if ctx.loop_count(key) >= l.max_iterations {
                break;
            }
            ctx.set_var("loop_index", Value::from(i));
            self.body(&l.instructions, key, ctx).await;
        }
        true
    }

    async fn repeat_while(
        &self,
        l: &LoopInstruction,
        condition: &Condition,
        key: &str,
        ctx: &mut ExecutionContext,
    ) -> bool {
        while ctx.loop_count(key) < l.max_iterations {
            if !self.wait_for(condition).await {
                break;
            }
            ctx.set_var("loop_index", ctx.loop_count(key));
            self.body(&l.instructions, key, ctx).await;
            self.pause(self.config.while_delay).await;
        }
        true
    }
}
