//! Error types for the nlsynth core library.

/// Top-level error enum for the synthesis core.
#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    /// Raised by intent analysis; downgraded to a placeholder spec before it
    /// leaves the extractor.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Synthesis timed out after {elapsed_ms} ms (budget {budget_ms} ms)")]
    SynthesisTimeout { elapsed_ms: u64, budget_ms: u64 },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Feedback error: {0}")]
    Feedback(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SynthError {
    /// True for failures of the backing store (as opposed to caller mistakes).
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            SynthError::Store(_) | SynthError::Sqlite(_) | SynthError::Io(_)
        )
    }
}

#[cfg(feature = "python")]
impl From<SynthError> for pyo3::PyErr {
    fn from(err: SynthError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyIOError, PyRuntimeError, PyTimeoutError, PyValueError};
        match &err {
            SynthError::InvalidInput(_) | SynthError::Feedback(_) | SynthError::Config(_) => {
                PyValueError::new_err(err.to_string())
            }
            SynthError::SynthesisTimeout { .. } => PyTimeoutError::new_err(err.to_string()),
            SynthError::Persistence(_) | SynthError::Store(_) | SynthError::Sqlite(_) => {
                PyRuntimeError::new_err(err.to_string())
            }
            SynthError::Io(_) => PyIOError::new_err(err.to_string()),
            SynthError::Json(_) => PyValueError::new_err(err.to_string()),
        }
    }
}

pub type SynthResult<T> = Result<T, SynthError>;
