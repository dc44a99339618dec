//! Request/response boundary around the orchestrator.
//!
//! Callers outside the crate (the Python binding, an RPC layer) speak in
//! these serde types; validation failures surface here as `Feedback` errors
//! and never reach the store.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifacts::FsArtifactStore;
use crate::config::SynthConfig;
use crate::errors::{SynthError, SynthResult};
use crate::learn::bias::BiasHandle;
use crate::learn::scheduler::BiasScheduler;
use crate::models::{now_utc, Origin, SynthesisResult};
use crate::store::snapshot::JsonlJournal;
use crate::store::{CorpusStore, MemoryCorpusStore, SqliteCorpusStore};
use crate::synth::orchestrator::{Orchestrator, RunOptions};

fn default_auto_persist() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    #[serde(default = "default_auto_persist")]
    pub auto_persist: bool,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            auto_persist: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResponse {
    pub run_id: String,
    pub specification_id: String,
    pub function_name: String,
    pub implementation: String,
    pub implementation_origin: Origin,
    pub confidence: f64,
    pub artifact_location: Option<String>,
}

impl From<SynthesisResult> for SynthesisResponse {
    fn from(result: SynthesisResult) -> Self {
        Self {
            run_id: result.run_id,
            specification_id: result.spec.id,
            function_name: result.spec.name,
            implementation: result.implementation,
            implementation_origin: result.origin,
            confidence: result.confidence,
            artifact_location: result.artifact_location,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub run_id: String,
    pub outcome_score: f64,
}

impl FeedbackRequest {
    pub fn validate(&self) -> SynthResult<()> {
        if self.run_id.trim().is_empty() {
            return Err(SynthError::Feedback("run_id must not be empty".into()));
        }
        if !self.outcome_score.is_finite() || !(0.0..=1.0).contains(&self.outcome_score) {
            return Err(SynthError::Feedback(format!(
                "outcome_score must be within [0, 1], got {}",
                self.outcome_score
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedbackAck {
    Recorded { seq: i64 },
    UnknownRun,
}

pub struct SynthesisService {
    orchestrator: Arc<Orchestrator>,
}

impl SynthesisService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Service over a SQLite corpus at `db_path`, with the artifact
    /// directory, journal and persisted bias state taken from `config`.
    pub fn open(db_path: impl AsRef<Path>, config: SynthConfig) -> SynthResult<Self> {
        config.validate()?;
        let store: Arc<dyn CorpusStore> = Arc::new(SqliteCorpusStore::open(db_path)?);
        Self::with_store(store, config.clamped())
    }

    /// Service over a fresh in-memory corpus.
    pub fn in_memory(config: SynthConfig) -> SynthResult<Self> {
        config.validate()?;
        Self::with_store(Arc::new(MemoryCorpusStore::new()), config.clamped())
    }

    fn with_store(store: Arc<dyn CorpusStore>, config: SynthConfig) -> SynthResult<Self> {
        let bias = if config.learn.persist_state {
            BiasHandle::load_from(store.as_ref(), config.learn.w_min, config.learn.w_max)?
        } else {
            BiasHandle::default()
        };
        let artifact_dir = config.artifact_dir.clone();
        let journal_path = config.journal_path.clone();

        let mut orchestrator = Orchestrator::new(store, bias, config);
        if let Some(dir) = artifact_dir {
            orchestrator = orchestrator.with_artifacts(Arc::new(FsArtifactStore::new(dir)?));
        }
        if let Some(path) = journal_path {
            orchestrator = orchestrator.with_journal(Arc::new(JsonlJournal::open(path)?));
        }
        Ok(Self::new(Arc::new(orchestrator)))
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Learning loop sharing this service's store and bias state.
    pub fn scheduler(&self) -> BiasScheduler {
        BiasScheduler::new(
            self.orchestrator.store().clone(),
            self.orchestrator.bias().clone(),
            self.orchestrator.config().learn.clone(),
        )
    }

    pub fn synthesize(&self, request: &SynthesisRequest) -> SynthResult<SynthesisResponse> {
        let result = self.orchestrator.run_with(
            &request.text,
            RunOptions {
                auto_persist: request.auto_persist,
            },
        )?;
        Ok(result.into())
    }

    pub fn synthesize_json(&self, raw: &str) -> SynthResult<SynthesisResponse> {
        let request: SynthesisRequest = serde_json::from_str(raw)?;
        self.synthesize(&request)
    }

    /// Record an outcome for a run and blend it into the run's corpus entry.
    pub fn submit_feedback(&self, request: &FeedbackRequest) -> SynthResult<FeedbackAck> {
        request.validate()?;
        let store = self.orchestrator.store();

        let Some(run) = store.get_run(&request.run_id)? else {
            info!(run_id = %request.run_id, "feedback for unknown run ignored");
            return Ok(FeedbackAck::UnknownRun);
        };
        let record = store.record_feedback(&run.run_id, request.outcome_score, now_utc())?;

        let blend = self.orchestrator.config().feedback_blend;
        let lock = self.orchestrator.spec_lock(&run.spec_id);
        let _guard = lock.lock();
        match store
            .entries_for(&run.spec_id)?
            .into_iter()
            .find(|e| e.id == run.entry_id)
        {
            Some(entry) => {
                let blended = entry.outcome_score + blend * (request.outcome_score - entry.outcome_score);
                store.set_outcome_score(entry.id, blended)?;
                debug!(
                    entry_id = entry.id,
                    old = entry.outcome_score,
                    new = blended,
                    "blended outcome score"
                );
            }
            None => warn!(run_id = %run.run_id, entry_id = run.entry_id, "run entry missing"),
        }

        info!(run_id = %run.run_id, seq = record.seq, score = request.outcome_score, "feedback recorded");
        Ok(FeedbackAck::Recorded { seq: record.seq })
    }

    pub fn submit_feedback_json(&self, raw: &str) -> SynthResult<FeedbackAck> {
        let request: FeedbackRequest = serde_json::from_str(raw)
            .map_err(|e| SynthError::Feedback(format!("malformed feedback request: {e}")))?;
        self.submit_feedback(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LearnConfig;

    fn service() -> SynthesisService {
        SynthesisService::in_memory(SynthConfig::default()).unwrap()
    }

    #[test]
    fn constructors_clamp_literal_configs() {
        let config = SynthConfig {
            beam_width: 0,
            learn: LearnConfig {
                interval_ms: 0,
                ..LearnConfig::default()
            },
            ..SynthConfig::default()
        };
        let svc = SynthesisService::in_memory(config).unwrap();
        assert_eq!(svc.orchestrator().config().beam_width, 1);
        assert_eq!(
            svc.orchestrator().config().learn.interval_ms,
            crate::synth::guards::MIN_LEARNING_INTERVAL_MS as u64
        );
    }

    #[test]
    fn request_defaults_to_persisting() {
        let req: SynthesisRequest = serde_json::from_str(r#"{"text":"reverse a string"}"#).unwrap();
        assert!(req.auto_persist);
    }

    #[test]
    fn synthesize_returns_response_fields() {
        let svc = service();
        let resp = svc.synthesize(&SynthesisRequest::new("reverse a string")).unwrap();
        assert_eq!(resp.implementation_origin, Origin::Template);
        assert_eq!(resp.confidence, 1.0);
        assert_eq!(resp.specification_id.len(), 16);
        assert!(resp.artifact_location.is_none());

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["implementation_origin"], "template");
    }

    #[test]
    fn dry_run_over_json() {
        let svc = service();
        let resp = svc
            .synthesize_json(r#"{"text":"add two numbers","auto_persist":false}"#)
            .unwrap();
        assert!(resp.artifact_location.is_none());
        assert_eq!(svc.orchestrator().store().entry_count().unwrap(), 0);
        // Dry runs leave no run record, so feedback on them is a no-op.
        let ack = svc
            .submit_feedback(&FeedbackRequest {
                run_id: resp.run_id,
                outcome_score: 1.0,
            })
            .unwrap();
        assert_eq!(ack, FeedbackAck::UnknownRun);
    }

    #[test]
    fn feedback_validation_rejects_bad_requests() {
        let svc = service();
        for (run_id, score) in [("", 0.5), ("r", -0.1), ("r", 1.5), ("r", f64::NAN)] {
            let err = svc
                .submit_feedback(&FeedbackRequest {
                    run_id: run_id.into(),
                    outcome_score: score,
                })
                .unwrap_err();
            assert!(matches!(err, SynthError::Feedback(_)));
        }
        assert!(matches!(
            svc.submit_feedback_json("{\"run_id\": 3}"),
            Err(SynthError::Feedback(_))
        ));
    }

    #[test]
    fn feedback_on_unknown_run_is_a_no_op() {
        let svc = service();
        let ack = svc
            .submit_feedback_json(r#"{"run_id":"nope","outcome_score":0.5}"#)
            .unwrap();
        assert_eq!(ack, FeedbackAck::UnknownRun);
        assert!(svc.orchestrator().store().feedback_since(0, 10).unwrap().is_empty());
    }

    #[test]
    fn feedback_blends_entry_score() {
        let svc = service();
        let resp = svc.synthesize(&SynthesisRequest::new("reverse a string")).unwrap();
        let ack = svc
            .submit_feedback(&FeedbackRequest {
                run_id: resp.run_id.clone(),
                outcome_score: 0.0,
            })
            .unwrap();
        assert_eq!(ack, FeedbackAck::Recorded { seq: 1 });
        let entry = svc
            .orchestrator()
            .store()
            .get(&resp.specification_id)
            .unwrap()
            .unwrap();
        assert!((entry.outcome_score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn sqlite_service_writes_artifacts_and_scheduler_learns() {
        let dir = tempfile::tempdir().unwrap();
        let config = SynthConfig {
            artifact_dir: Some(dir.path().join("artifacts")),
            journal_path: Some(dir.path().join("corpus.jsonl")),
            learn: LearnConfig {
                epsilon: 0.0,
                persist_state: true,
                ..LearnConfig::default()
            },
            ..SynthConfig::default()
        };
        let svc = SynthesisService::open(dir.path().join("corpus.db"), config.clone()).unwrap();
        let resp = svc.synthesize(&SynthesisRequest::new("reverse a string")).unwrap();
        let location = resp.artifact_location.clone().unwrap();
        assert_eq!(std::fs::read_to_string(&location).unwrap(), resp.implementation);
        assert!(dir.path().join("corpus.jsonl").exists());

        svc.submit_feedback(&FeedbackRequest {
            run_id: resp.run_id,
            outcome_score: 1.0,
        })
        .unwrap();
        let mut scheduler = svc.scheduler();
        scheduler.run_cycle().unwrap();
        let learned = svc.orchestrator().bias().weight(Origin::Template);
        assert!(learned > 1.0);

        drop(svc);
        let reopened = SynthesisService::open(dir.path().join("corpus.db"), config).unwrap();
        assert_eq!(reopened.orchestrator().bias().weight(Origin::Template), learned);
    }
}
