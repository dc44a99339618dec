//! Background learning loop that turns outcome feedback into bias weights.
//!
//! Each cycle walks `Sampling -> Scoring -> Updating -> Idle`: it reads the
//! most recent feedback past its watermark, maps every usable score to a
//! target weight for the run's origin, moves the weight toward the target by
//! a capped EMA step, optionally perturbs one weight for exploration, and
//! installs the result through [`BiasHandle`] in one swap.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::LearnConfig;
use crate::errors::SynthResult;
use crate::learn::bias::{BiasHandle, BiasState, NEUTRAL_WEIGHT};
use crate::models::{now_utc, Origin};
use crate::store::CorpusStore;
use crate::synth::guards::{
    clamp_int, clamp_limit, MAX_LEARNING_BATCH, MIN_LEARNING_INTERVAL_MS,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Idle,
    Sampling,
    Scoring,
    Updating,
    Stopped,
}

impl fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerPhase::Idle => "idle",
            SchedulerPhase::Sampling => "sampling",
            SchedulerPhase::Scoring => "scoring",
            SchedulerPhase::Updating => "updating",
            SchedulerPhase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Outcome of one learning cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub sampled: usize,
    pub applied: usize,
    pub skipped: usize,
    pub perturbed: bool,
    /// Sum of |Δweight| applied this cycle.
    pub drift: f64,
    pub watermark: i64,
}

/// Piecewise-linear map from an outcome score to a target weight:
/// 0 → `w_min`, 0.5 → neutral, 1 → `w_max`.
pub fn target_weight(score: f64, w_min: f64, w_max: f64) -> f64 {
    if score < 0.5 {
        w_min + (NEUTRAL_WEIGHT - w_min) * (score / 0.5)
    } else {
        NEUTRAL_WEIGHT + (w_max - NEUTRAL_WEIGHT) * ((score - 0.5) / 0.5)
    }
}

/// One capped EMA step from `old` toward `target`, clamped into the band.
pub fn ema_step(old: f64, target: f64, alpha: f64, max_step: f64, w_min: f64, w_max: f64) -> f64 {
    let step = (alpha * (target - old)).clamp(-max_step, max_step);
    (old + step).clamp(w_min, w_max)
}

pub struct BiasScheduler {
    store: Arc<dyn CorpusStore>,
    bias: BiasHandle,
    config: LearnConfig,
    rng: StdRng,
    watermark: i64,
    phase: Arc<RwLock<SchedulerPhase>>,
}

impl BiasScheduler {
    pub fn new(store: Arc<dyn CorpusStore>, bias: BiasHandle, config: LearnConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            store,
            bias,
            config,
            rng,
            watermark: 0,
            phase: Arc::new(RwLock::new(SchedulerPhase::Idle)),
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        *self.phase.read()
    }

    /// Highest feedback sequence number already consumed.
    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    pub fn bias(&self) -> &BiasHandle {
        &self.bias
    }

    fn set_phase(&self, phase: SchedulerPhase) {
        *self.phase.write() = phase;
    }

    /// Run one full cycle synchronously.
    pub fn run_cycle(&mut self) -> SynthResult<CycleReport> {
        let result = self.cycle();
        self.set_phase(SchedulerPhase::Idle);
        result
    }

    fn cycle(&mut self) -> SynthResult<CycleReport> {
        let LearnConfig {
            alpha,
            max_step,
            w_min,
            w_max,
            epsilon,
            perturbation,
            ..
        } = self.config;
        let batch = clamp_limit(self.config.batch_size as i64, MAX_LEARNING_BATCH) as usize;

        self.set_phase(SchedulerPhase::Sampling);
        let samples = self.store.feedback_since(self.watermark, batch)?;
        let mut report = CycleReport {
            sampled: samples.len(),
            watermark: self.watermark,
            ..CycleReport::default()
        };
        if samples.is_empty() {
            debug!(watermark = self.watermark, "no new feedback");
            return Ok(report);
        }

        self.set_phase(SchedulerPhase::Scoring);
        let mut scored: Vec<(Origin, f64)> = Vec::with_capacity(samples.len());
        for sample in &samples {
            let origin = match Origin::from_str(&sample.origin) {
                Ok(origin) => origin,
                Err(_) => {
                    warn!(seq = sample.seq, origin = %sample.origin, "skipping sample with unknown origin");
                    report.skipped += 1;
                    continue;
                }
            };
            let score = sample.outcome_score;
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                warn!(seq = sample.seq, score, "skipping sample with invalid score");
                report.skipped += 1;
                continue;
            }
            scored.push((origin, score));
        }

        self.set_phase(SchedulerPhase::Updating);
        let mut next: BiasState = self.bias.snapshot().clamped(w_min, w_max);
        let mut drift = 0.0;
        for (origin, score) in scored {
            let old = next.weight(origin);
            let new = ema_step(old, target_weight(score, w_min, w_max), alpha, max_step, w_min, w_max);
            drift += (new - old).abs();
            next.weights.insert(origin, new);
            report.applied += 1;
        }

        if epsilon > 0.0 && perturbation > 0.0 && self.rng.gen_bool(epsilon.clamp(0.0, 1.0)) {
            let origin = Origin::ALL[self.rng.gen_range(0..Origin::ALL.len())];
            let delta = self.rng.gen_range(-perturbation..=perturbation);
            let old = next.weight(origin);
            let new = (old + delta).clamp(w_min, w_max);
            drift += (new - old).abs();
            next.weights.insert(origin, new);
            report.perturbed = true;
            debug!(origin = %origin, delta, "exploratory perturbation");
        }

        next.drift_accumulator += drift;
        next.updates += 1;
        next.last_update_at = Some(now_utc());
        self.bias.replace(next);

        if let Some(max_seq) = samples.iter().map(|s| s.seq).max() {
            self.watermark = self.watermark.max(max_seq);
        }
        report.drift = drift;
        report.watermark = self.watermark;

        if self.config.persist_state {
            if let Err(e) = self.bias.save_to(self.store.as_ref()) {
                warn!(error = %e, "failed to persist bias state");
            }
        }

        info!(
            sampled = report.sampled,
            applied = report.applied,
            skipped = report.skipped,
            perturbed = report.perturbed,
            drift = report.drift,
            watermark = report.watermark,
            "bias cycle complete"
        );
        Ok(report)
    }

    /// Start the periodic loop on the current tokio runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let phase = self.phase.clone();
        let period = Duration::from_millis(clamp_int(
            self.config.interval_ms as i64,
            MIN_LEARNING_INTERVAL_MS,
            i64::MAX,
        ) as u64);
        self.set_phase(SchedulerPhase::Idle);

        let task = tokio::spawn(async move {
            let mut scheduler = self;
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = period.as_millis() as u64, "bias scheduler started");

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let outcome = tokio::task::spawn_blocking(move || {
                            let report = scheduler.run_cycle();
                            (scheduler, report)
                        })
                        .await;
                        match outcome {
                            Ok((returned, report)) => {
                                scheduler = returned;
                                if let Err(e) = report {
                                    error!(error = %e, "bias cycle failed");
                                }
                            }
                            Err(e) => {
                                error!(error = %e, "bias cycle panicked; scheduler lost");
                                return None;
                            }
                        }
                    }
                }
            }

            scheduler.set_phase(SchedulerPhase::Stopped);
            info!(watermark = scheduler.watermark, "bias scheduler stopped");
            Some(scheduler)
        });

        SchedulerHandle {
            stop_tx,
            task,
            phase,
        }
    }
}

/// Running scheduler loop.
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<Option<BiasScheduler>>,
    phase: Arc<RwLock<SchedulerPhase>>,
}

impl SchedulerHandle {
    pub fn phase(&self) -> SchedulerPhase {
        *self.phase.read()
    }

    /// Let the in-flight cycle finish, stop the loop, and hand the scheduler
    /// back. `None` if the loop died from a panic.
    pub async fn stop(self) -> Option<BiasScheduler> {
        let _ = self.stop_tx.send(true);
        match self.task.await {
            Ok(scheduler) => scheduler,
            Err(e) => {
                error!(error = %e, "bias scheduler task failed");
                None
            }
        }
    }
}
