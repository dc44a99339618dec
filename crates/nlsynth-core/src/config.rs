//! Runtime configuration for the synthesis pipeline and the learning loop.
//!
//! Every knob has a default; `from_env` overlays `NLSYNTH_*` variables.
//! Flags accept `1/true/yes/on` and `0/false/no/off` (case-insensitive).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{SynthError, SynthResult};
use crate::synth::guards::{
    clamp_int, clamp_limit, MAX_BATCH_WORKERS, MAX_BEAM_WIDTH, MAX_LEARNING_BATCH,
    MAX_SEARCH_BUDGET_MS, MIN_LEARNING_INTERVAL_MS,
};

pub const ENV_PREFIX: &str = "NLSYNTH_";

/// Settings for the Bias Scheduler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnConfig {
    /// EMA learning rate.
    pub alpha: f64,
    /// Largest weight change a single update may apply.
    pub max_step: f64,
    pub w_min: f64,
    pub w_max: f64,
    /// Probability of an exploratory perturbation per cycle.
    pub epsilon: f64,
    /// Half-width of the perturbation interval.
    pub perturbation: f64,
    pub batch_size: usize,
    pub interval_ms: u64,
    pub seed: u64,
    /// Snapshot the bias state into the store meta table after each cycle.
    pub persist_state: bool,
}

impl Default for LearnConfig {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            max_step: 0.15,
            w_min: 0.1,
            w_max: 3.0,
            epsilon: 0.05,
            perturbation: 0.05,
            batch_size: 64,
            interval_ms: 30_000,
            seed: 0x5eed,
            persist_state: false,
        }
    }
}

/// Settings for one orchestrator instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// Minimum keyword-overlap score for a template to be accepted.
    pub template_threshold: f64,
    /// Minimum description similarity for a corpus candidate.
    pub similarity_threshold: f64,
    pub beam_width: usize,
    /// Adapted candidates below this confidence are discarded.
    pub confidence_floor: f64,
    pub search_budget_ms: u64,
    /// Share of structural similarity in the adaptation score; the rest is
    /// the candidate's outcome score.
    pub similarity_weight: f64,
    pub corpus_search_enabled: bool,
    pub validate_syntax: bool,
    /// Blend factor applied to an entry's outcome score on new feedback.
    pub feedback_blend: f64,
    pub batch_workers: usize,
    pub journal_path: Option<PathBuf>,
    pub artifact_dir: Option<PathBuf>,
    pub learn: LearnConfig,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            template_threshold: 0.75,
            similarity_threshold: 0.3,
            beam_width: 8,
            confidence_floor: 0.35,
            search_budget_ms: 50,
            similarity_weight: 0.6,
            corpus_search_enabled: true,
            validate_syntax: true,
            feedback_blend: 0.5,
            batch_workers: 4,
            journal_path: None,
            artifact_dir: None,
            learn: LearnConfig::default(),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    let v = raw.trim().to_lowercase();
    match v.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, raw: &str) -> SynthResult<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| SynthError::Config(format!("{ENV_PREFIX}{key}: cannot parse {raw:?}")))
}

impl SynthConfig {
    /// Overlay process environment variables on the defaults.
    pub fn from_env() -> SynthResult<Self> {
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Overlay values from `lookup` (keys without the prefix) on the defaults.
    pub fn from_lookup<F>(lookup: F) -> SynthResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        macro_rules! overlay {
            ($key:literal, $field:expr) => {
                if let Some(raw) = lookup($key) {
                    $field = parse_num($key, &raw)?;
                }
            };
        }
        macro_rules! overlay_flag {
            ($key:literal, $field:expr) => {
                if let Some(raw) = lookup($key) {
                    $field = parse_flag(&raw).ok_or_else(|| {
                        SynthError::Config(format!("{ENV_PREFIX}{}: not a flag: {raw:?}", $key))
                    })?;
                }
            };
        }

        overlay!("TEMPLATE_THRESHOLD", cfg.template_threshold);
        overlay!("SIMILARITY_THRESHOLD", cfg.similarity_threshold);
        overlay!("BEAM_WIDTH", cfg.beam_width);
        overlay!("CONFIDENCE_FLOOR", cfg.confidence_floor);
        overlay!("SEARCH_BUDGET_MS", cfg.search_budget_ms);
        overlay!("SIMILARITY_WEIGHT", cfg.similarity_weight);
        overlay_flag!("CORPUS_SEARCH", cfg.corpus_search_enabled);
        overlay_flag!("VALIDATE_SYNTAX", cfg.validate_syntax);
        overlay!("FEEDBACK_BLEND", cfg.feedback_blend);
        overlay!("BATCH_WORKERS", cfg.batch_workers);
        if let Some(raw) = lookup("JOURNAL_PATH") {
            cfg.journal_path = Some(PathBuf::from(raw.trim()));
        }
        if let Some(raw) = lookup("ARTIFACT_DIR") {
            cfg.artifact_dir = Some(PathBuf::from(raw.trim()));
        }

        overlay!("LEARN_ALPHA", cfg.learn.alpha);
        overlay!("LEARN_MAX_STEP", cfg.learn.max_step);
        overlay!("LEARN_W_MIN", cfg.learn.w_min);
        overlay!("LEARN_W_MAX", cfg.learn.w_max);
        overlay!("LEARN_EPSILON", cfg.learn.epsilon);
        overlay!("LEARN_PERTURBATION", cfg.learn.perturbation);
        overlay!("LEARN_BATCH_SIZE", cfg.learn.batch_size);
        overlay!("LEARN_INTERVAL_MS", cfg.learn.interval_ms);
        overlay!("LEARN_SEED", cfg.learn.seed);
        overlay_flag!("LEARN_PERSIST_STATE", cfg.learn.persist_state);

        cfg.validate()?;
        Ok(cfg.clamped())
    }

    /// Reject combinations that cannot be clamped into something sensible.
    pub fn validate(&self) -> SynthResult<()> {
        let unit_fields = [
            ("template_threshold", self.template_threshold),
            ("similarity_threshold", self.similarity_threshold),
            ("confidence_floor", self.confidence_floor),
            ("similarity_weight", self.similarity_weight),
            ("feedback_blend", self.feedback_blend),
            ("learn.epsilon", self.learn.epsilon),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(SynthError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        let learn = &self.learn;
        if !(learn.alpha > 0.0 && learn.alpha <= 1.0) {
            return Err(SynthError::Config(format!(
                "learn.alpha must be within (0, 1], got {}",
                learn.alpha
            )));
        }
        if !(learn.w_min > 0.0 && learn.w_min < 1.0 && learn.w_max > 1.0) {
            return Err(SynthError::Config(format!(
                "learn weight band must satisfy 0 < w_min < 1 < w_max, got [{}, {}]",
                learn.w_min, learn.w_max
            )));
        }
        if !(learn.max_step > 0.0 && learn.max_step.is_finite()) {
            return Err(SynthError::Config("learn.max_step must be positive".into()));
        }
        if !(learn.perturbation >= 0.0 && learn.perturbation.is_finite()) {
            return Err(SynthError::Config(
                "learn.perturbation must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Apply the guard limits to the integer knobs.
    pub fn clamped(mut self) -> Self {
        self.beam_width = clamp_limit(self.beam_width as i64, MAX_BEAM_WIDTH) as usize;
        self.search_budget_ms =
            clamp_int(self.search_budget_ms as i64, 0, MAX_SEARCH_BUDGET_MS) as u64;
        self.batch_workers = clamp_limit(self.batch_workers as i64, MAX_BATCH_WORKERS) as usize;
        self.learn.batch_size =
            clamp_limit(self.learn.batch_size as i64, MAX_LEARNING_BATCH) as usize;
        self.learn.interval_ms = self.learn.interval_ms.max(MIN_LEARNING_INTERVAL_MS as u64);
        self
    }
}
