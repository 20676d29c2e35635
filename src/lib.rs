#![deny(warnings, clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::items_after_statements,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::doc_markdown,
    clippy::redundant_closure,
    clippy::uninlined_format_args,
    clippy::option_if_let_else,
    clippy::or_fun_call,
    clippy::needless_pass_by_value,
    clippy::must_use_candidate,
    clippy::collapsible_if,
    clippy::explicit_iter_loop
)]

pub mod app;
pub mod config;
pub mod config_registry;
pub mod corrective;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod job_driver;
pub mod model_caller;
pub mod monitor;
pub mod observability;
pub mod prompt;
pub(crate) mod queue;
pub mod qa;
pub mod state;
pub mod util;
pub mod worker;
