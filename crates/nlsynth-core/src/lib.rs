//! nlsynth core library: turns short natural-language requests into Python
//! function implementations.
//!
//! A request is parsed into a [`Specification`], then answered by the first
//! stage that succeeds: a curated template, an adaptation of a similar corpus
//! entry, or a typed placeholder. Results are persisted to a corpus that a
//! background learning loop re-weights from outcome feedback. Built with the
//! `python` feature, the crate is also the `_nlsynth_core` extension module.

pub mod artifacts;
pub mod config;
pub mod errors;
pub mod intent;
pub mod learn;
pub mod models;
pub mod service;
pub mod store;
pub mod synth;

#[cfg(feature = "python")]
mod python;

pub use config::{LearnConfig, SynthConfig};
pub use errors::{SynthError, SynthResult};
pub use intent::extract;
pub use learn::{BiasHandle, BiasScheduler, BiasState};
pub use models::{CorpusEntry, Origin, Specification, SynthesisResult, TypeHint};
pub use service::{FeedbackAck, FeedbackRequest, SynthesisRequest, SynthesisResponse, SynthesisService};
pub use store::{CorpusStore, MemoryCorpusStore, SqliteCorpusStore};
pub use synth::{Orchestrator, RunOptions};
