//! The synthesis pipeline: templates, corpus adaptation, fallback, and the
//! orchestrator that runs them in priority order.

pub mod adapter;
pub mod fallback;
pub mod guards;
pub mod orchestrator;
pub mod scoring;
pub mod syntax;
pub mod templates;

pub use orchestrator::{Orchestrator, RunOptions};
