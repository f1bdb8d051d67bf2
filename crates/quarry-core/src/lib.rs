mod builtins;
pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod extract;
pub mod instruction;
mod loops;
pub mod models;
pub mod path;
pub mod processor;
pub mod runner;
pub mod static_page;
pub mod traits;
pub mod util;
pub mod validate;

#[cfg(test)]
mod testutil;

pub use config::{ConfigLoader, FetcherConfig, FetcherKind, ScrapeConfig};
pub use error::AppError;
pub use executor::{Executor, ExecutorConfig};
pub use instruction::{CollectInstruction, Condition, Instruction};
pub use models::{Bucket, Record, RunMode, RunOutcome, ScrapeResult, SubmitReport, compute_hash};
pub use processor::{Processor, ProcessorRegistry};
pub use runner::{ContentSource, RunEvent, RunReporter, Runner, TracingRunReporter};
pub use static_page::StaticPage;
pub use traits::{FetchedPage, Fetcher, NullStore, RecordStore, SelectOption, Session};
pub use validate::validate_config;
