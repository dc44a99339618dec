//! Intent extraction: free text to structured Specification.

pub mod extractor;
pub mod tokenizer;

pub use extractor::extract;
