//! `_nlsynth_core` extension module.
//!
//! Results cross the boundary as plain Python objects decoded from the
//! serde JSON of the Rust types.

use std::path::PathBuf;

use pyo3::prelude::*;
use serde::Serialize;

use crate::config::SynthConfig;
use crate::intent::extract;
use crate::service::{FeedbackRequest, SynthesisRequest, SynthesisService};
use crate::store::snapshot::export_jsonl;
use crate::synth::syntax::is_valid_python;

fn to_py<T: Serialize>(py: Python<'_>, value: &T) -> PyResult<PyObject> {
    let json_str = serde_json::to_string(value)
        .map_err(|e| pyo3::exceptions::PyRuntimeError::new_err(e.to_string()))?;
    let json_module = py.import("json")?;
    json_module
        .call_method1("loads", (json_str,))
        .map(|o| o.into())
}

#[pyclass(frozen)]
pub struct SynthesisEngine {
    service: SynthesisService,
}

#[pymethods]
impl SynthesisEngine {
    /// Open an engine over a SQLite corpus, or an in-memory one when
    /// `db_path` is omitted. Settings come from `NLSYNTH_*` variables.
    #[new]
    #[pyo3(signature = (db_path=None, artifact_dir=None))]
    fn new(db_path: Option<PathBuf>, artifact_dir: Option<PathBuf>) -> PyResult<Self> {
        let mut config = SynthConfig::from_env()?;
        if artifact_dir.is_some() {
            config.artifact_dir = artifact_dir;
        }
        let service = match db_path {
            Some(path) => SynthesisService::open(path, config)?,
            None => SynthesisService::in_memory(config)?,
        };
        Ok(Self { service })
    }

    #[pyo3(signature = (text, auto_persist=true))]
    fn synthesize(&self, py: Python<'_>, text: String, auto_persist: bool) -> PyResult<PyObject> {
        let request = SynthesisRequest { text, auto_persist };
        let response = py.allow_threads(|| self.service.synthesize(&request))?;
        to_py(py, &response)
    }

    #[pyo3(signature = (texts, workers=0))]
    fn synthesize_batch(
        &self,
        py: Python<'_>,
        texts: Vec<String>,
        workers: usize,
    ) -> PyResult<Vec<PyObject>> {
        let results = py.allow_threads(|| self.service.orchestrator().run_batch(&texts, workers));
        results
            .into_iter()
            .map(|r| {
                let response: crate::service::SynthesisResponse = r?.into();
                to_py(py, &response)
            })
            .collect()
    }

    fn submit_feedback(&self, py: Python<'_>, run_id: String, outcome_score: f64) -> PyResult<PyObject> {
        let request = FeedbackRequest {
            run_id,
            outcome_score,
        };
        let ack = py.allow_threads(|| self.service.submit_feedback(&request))?;
        to_py(py, &ack)
    }

    fn bias_summary(&self, py: Python<'_>) -> PyResult<PyObject> {
        to_py(py, &self.service.orchestrator().bias().snapshot().summary())
    }

    /// Corpus entries filed under a canonical signature key such as
    /// `reverse_string_1a2b3c(S)->S`, best first.
    #[pyo3(signature = (signature_key, k=10))]
    fn lookup_signature(&self, py: Python<'_>, signature_key: &str, k: usize) -> PyResult<PyObject> {
        let store = self.service.orchestrator().store();
        let entries = py.allow_threads(|| store.find_by_signature(signature_key, k))?;
        to_py(py, &entries)
    }

    fn export_corpus(&self, path: PathBuf) -> PyResult<usize> {
        let file = std::fs::File::create(&path)?;
        let stats = export_jsonl(self.service.orchestrator().store().as_ref(), file)?;
        Ok(stats.entries)
    }
}

#[pyfunction]
fn extract_spec(py: Python<'_>, text: &str) -> PyResult<PyObject> {
    to_py(py, &extract(text))
}

#[pyfunction]
fn check_syntax(source: &str) -> bool {
    is_valid_python(source)
}

#[pymodule]
fn _nlsynth_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<SynthesisEngine>()?;
    m.add_function(wrap_pyfunction!(extract_spec, m)?)?;
    m.add_function(wrap_pyfunction!(check_syntax, m)?)?;
    m.add("SPEC_ID_LEN", crate::models::SPEC_ID_LEN)?;
    Ok(())
}
