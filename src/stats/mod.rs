//! Process-wide progress counters for one run.
//!
//! One table, initialized from the configuration before any worker starts,
//! shared by reference with every worker. Counters are individually atomic;
//! no cross-counter consistency is promised; the snapshot is progress
//! reporting, not accounting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Success/error counters for one generation model.
#[derive(Debug, Default)]
pub struct ModelCounters {
    success: AtomicU64,
    error: AtomicU64,
}

/// Success/error/skipped counters for one scorer.
#[derive(Debug, Default)]
pub struct ScorerCounters {
    success: AtomicU64,
    error: AtomicU64,
    skipped: AtomicU64,
}

/// Terminal outcome of one scoring attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringOutcome {
    Success,
    Error,
    /// The result checkpoint already existed.
    Skipped,
}

/// Serializable view of the counter table.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub run_name: String,
    pub nb_samples: u64,
    /// Expected completions: one generation plus one scoring per
    /// (sample, model) pair.
    pub total: u64,
    pub current: u64,
    pub models: HashMap<String, ModelSnapshot>,
    pub scorers: HashMap<String, ScorerSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSnapshot {
    pub success: u64,
    pub error: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScorerSnapshot {
    pub success: u64,
    pub error: u64,
    pub skipped: u64,
}

/// Counter table for one run.
#[derive(Debug)]
pub struct RunStats {
    run_name: String,
    start: DateTime<Utc>,
    nb_samples: u64,
    total: u64,
    current: AtomicU64,
    models: HashMap<String, ModelCounters>,
    scorers: HashMap<String, ScorerCounters>,
}

impl RunStats {
    /// Initializes the table with a row per configured model and scorer.
    ///
    /// `total` counts two expected transitions per (sample, model) pair:
    /// the generation and the scoring that follows it.
    pub fn new<M, S>(run_name: impl Into<String>, nb_samples: u64, models: M, scorers: S) -> Self
    where
        M: IntoIterator<Item = String>,
        S: IntoIterator<Item = String>,
    {
        let models: HashMap<String, ModelCounters> = models
            .into_iter()
            .map(|name| (name, ModelCounters::default()))
            .collect();
        let scorers = scorers
            .into_iter()
            .map(|name| (name, ScorerCounters::default()))
            .collect();
        let total = 2 * nb_samples * models.len() as u64;

        Self {
            run_name: run_name.into(),
            start: Utc::now(),
            nb_samples,
            total,
            current: AtomicU64::new(0),
            models,
            scorers,
        }
    }

    /// Records one finished generation attempt for `model`.
    pub fn record_generation(&self, model: &str, success: bool) {
        if let Some(counters) = self.models.get(model) {
            let counter = if success {
                &counters.success
            } else {
                &counters.error
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
        self.current.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one finished scoring attempt for `scorer`.
    pub fn record_scoring(&self, scorer: &str, outcome: ScoringOutcome) {
        if let Some(counters) = self.scorers.get(scorer) {
            let counter = match outcome {
                ScoringOutcome::Success => &counters.success,
                ScoringOutcome::Error => &counters.error,
                ScoringOutcome::Skipped => &counters.skipped,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
        self.current.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of recorded transitions so far.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Expected number of transitions for a complete run.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Wall-clock time since the table was initialized.
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.start
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            run_name: self.run_name.clone(),
            nb_samples: self.nb_samples,
            total: self.total,
            current: self.current(),
            models: self
                .models
                .iter()
                .map(|(name, c)| {
                    (
                        name.clone(),
                        ModelSnapshot {
                            success: c.success.load(Ordering::Relaxed),
                            error: c.error.load(Ordering::Relaxed),
                        },
                    )
                })
                .collect(),
            scorers: self
                .scorers
                .iter()
                .map(|(name, c)| {
                    (
                        name.clone(),
                        ScorerSnapshot {
                            success: c.success.load(Ordering::Relaxed),
                            error: c.error.load(Ordering::Relaxed),
                            skipped: c.skipped.load(Ordering::Relaxed),
                        },
                    )
                })
                .collect(),
        }
    }
}
