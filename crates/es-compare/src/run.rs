//! The comparison run state machine.
//!
//! A [`ComparisonRun`] owns the two datasets and the request, walks the
//! fixed phase sequence `Pending -> Running -> DistancesComputed ->
//! Aggregated -> Done`, and produces an immutable [`AggregateDistance`].
//! Per-statistic failures are recorded and never abort the run; there are
//! no automatic retries.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use es_core::{Dataset, Error, Result};
use es_stats::{DistanceValue, StatisticName};

use crate::config::StatisticConfig;
use crate::reference::ReferencePopulation;

/// Phase of a comparison run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Statistics requested, nothing computed yet.
    Pending,
    /// Per-statistic computation and distances in progress.
    Running,
    /// Every requested statistic has a distance or a failure marker.
    DistancesComputed,
    /// Normalization and the combined score are in place.
    Aggregated,
    /// Terminal: the result is available and the run is immutable.
    Done,
}

/// Stage at which a statistic failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Computing the statistic on dataset A.
    ComputeA,
    /// Computing the statistic on dataset B.
    ComputeB,
    /// Comparing the two instances.
    Distance,
    /// Z-scoring against the reference population.
    Normalization,
    /// Skipped after cooperative cancellation.
    Cancelled,
}

/// Outcome of one requested statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StatisticOutcome {
    /// The statistic completed; `normalized` is present when a reference
    /// population covered it.
    Computed {
        /// The per-statistic distance.
        value: DistanceValue,
        /// Z-scored combined distance, when normalization applied.
        normalized: Option<f64>,
    },
    /// The statistic failed; the run carried on without it.
    Failed {
        /// Stage at which the failure happened.
        stage: FailureStage,
        /// Error taxonomy variant name.
        kind: String,
        /// Human-readable error message.
        message: String,
    },
}

impl StatisticOutcome {
    /// The computed distance, if this outcome succeeded.
    pub fn value(&self) -> Option<&DistanceValue> {
        match self {
            StatisticOutcome::Computed { value, .. } => Some(value),
            StatisticOutcome::Failed { .. } => None,
        }
    }

    /// Whether this outcome is a failure marker.
    pub fn is_failed(&self) -> bool {
        matches!(self, StatisticOutcome::Failed { .. })
    }

    /// The score entering the combined mean: the normalized distance when
    /// present, the raw combined distance otherwise.
    pub fn score(&self) -> Option<f64> {
        match self {
            StatisticOutcome::Computed { value, normalized } => {
                Some(normalized.unwrap_or(value.combined))
            }
            StatisticOutcome::Failed { .. } => None,
        }
    }
}

/// The artifact of a finished run: one outcome per requested statistic
/// plus the combined score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateDistance {
    /// Outcome per requested statistic. The key set is exactly the
    /// requested set; failures are explicit markers, never omissions.
    pub distances: BTreeMap<StatisticName, StatisticOutcome>,
    /// Weighted mean of the per-statistic scores over the statistics that
    /// completed; `None` when none did.
    pub combined_score: Option<f64>,
}

impl AggregateDistance {
    /// Statistics that completed, with their distances.
    pub fn computed(&self) -> impl Iterator<Item = (StatisticName, &DistanceValue)> {
        self.distances
            .iter()
            .filter_map(|(name, o)| o.value().map(|v| (*name, v)))
    }

    /// Statistics that failed.
    pub fn failed(&self) -> impl Iterator<Item = (StatisticName, &StatisticOutcome)> {
        self.distances
            .iter()
            .filter(|(_, o)| o.is_failed())
            .map(|(name, o)| (*name, o))
    }

    /// Number of failure markers.
    pub fn n_failed(&self) -> usize {
        self.distances.values().filter(|o| o.is_failed()).count()
    }
}

/// What to compute and how to combine it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRequest {
    /// One configuration per requested statistic (duplicates rejected).
    pub statistics: Vec<StatisticConfig>,
    /// Per-statistic weights for the combined score; absent names weigh 1.
    pub weights: BTreeMap<StatisticName, f64>,
    /// Reference population for z-scoring distances.
    pub reference: Option<ReferencePopulation>,
}

impl ComparisonRequest {
    /// Request the given statistics with unit weights and no reference.
    pub fn new(statistics: Vec<StatisticConfig>) -> Self {
        Self { statistics, weights: BTreeMap::new(), reference: None }
    }

    /// Request every implemented statistic with default configuration.
    pub fn all_defaults() -> Self {
        Self::new(
            StatisticName::ALL
                .iter()
                .map(|&name| StatisticConfig::default_for(name))
                .collect(),
        )
    }

    /// Attach per-statistic weights.
    pub fn with_weights(mut self, weights: BTreeMap<StatisticName, f64>) -> Self {
        self.weights = weights;
        self
    }

    /// Attach a reference population.
    pub fn with_reference(mut self, reference: ReferencePopulation) -> Self {
        self.reference = Some(reference);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.statistics.is_empty() {
            return Err(Error::Configuration(
                "comparison request must name at least one statistic".to_string(),
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        for cfg in &self.statistics {
            if !seen.insert(cfg.name()) {
                return Err(Error::Configuration(format!(
                    "statistic {} requested more than once",
                    cfg.name()
                )));
            }
        }
        for (name, w) in &self.weights {
            if !(w.is_finite() && *w >= 0.0) {
                return Err(Error::Configuration(format!(
                    "weight for {name} must be non-negative and finite, got {w}"
                )));
            }
        }
        Ok(())
    }
}

/// A single comparison of two datasets across the requested statistics.
pub struct ComparisonRun {
    data_a: Dataset,
    data_b: Dataset,
    request: ComparisonRequest,
    state: RunState,
    result: Option<AggregateDistance>,
}

impl ComparisonRun {
    /// Set up a run. The request is validated here; the datasets were
    /// validated at construction.
    pub fn new(data_a: Dataset, data_b: Dataset, request: ComparisonRequest) -> Result<Self> {
        request.validate()?;
        Ok(Self { data_a, data_b, request, state: RunState::Pending, result: None })
    }

    /// Current phase.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Execute the run to completion and return the aggregate.
    ///
    /// Idempotent: a finished run returns its stored result.
    pub fn execute(&mut self) -> Result<&AggregateDistance> {
        static NEVER: AtomicBool = AtomicBool::new(false);
        self.execute_with_cancel(&NEVER)
    }

    /// Execute with cooperative cancellation: statistics not yet started
    /// when `cancel` becomes true are recorded as cancelled. A statistic
    /// already inside its transform runs to completion.
    pub fn execute_with_cancel(&mut self, cancel: &AtomicBool) -> Result<&AggregateDistance> {
        if self.state == RunState::Done {
            return Ok(self.result.as_ref().expect("finished run holds a result"));
        }

        self.state = RunState::Running;
        let (data_a, data_b) = (&self.data_a, &self.data_b);
        let mut distances: BTreeMap<StatisticName, StatisticOutcome> = self
            .request
            .statistics
            .par_iter()
            .map(|cfg| {
                let name = cfg.name();
                if cancel.load(Ordering::Relaxed) {
                    return (
                        name,
                        StatisticOutcome::Failed {
                            stage: FailureStage::Cancelled,
                            kind: "Cancelled".to_string(),
                            message: "run cancelled before this statistic started".to_string(),
                        },
                    );
                }
                let outcome = match cfg.pairwise_distance(data_a, data_b) {
                    Ok(value) => StatisticOutcome::Computed { value, normalized: None },
                    Err((stage, err)) => {
                        log::warn!("{name} failed at {stage:?}: {err}");
                        StatisticOutcome::Failed {
                            stage,
                            kind: err.kind().to_string(),
                            message: err.to_string(),
                        }
                    }
                };
                (name, outcome)
            })
            .collect();
        self.state = RunState::DistancesComputed;

        // Normalize against the reference population where available.
        if let Some(reference) = &self.request.reference {
            for (name, outcome) in distances.iter_mut() {
                let combined = match &*outcome {
                    StatisticOutcome::Computed { value, .. } => value.combined,
                    StatisticOutcome::Failed { .. } => continue,
                };
                match reference.zscore(*name, combined) {
                    Some(Ok(z)) => {
                        if let StatisticOutcome::Computed { normalized, .. } = outcome {
                            *normalized = Some(z);
                        }
                    }
                    Some(Err(err)) => {
                        log::warn!("{name} failed normalization: {err}");
                        *outcome = StatisticOutcome::Failed {
                            stage: FailureStage::Normalization,
                            kind: err.kind().to_string(),
                            message: err.to_string(),
                        };
                    }
                    None => {}
                }
            }
        }

        // Combine: weighted mean of the per-statistic scores.
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for (name, outcome) in &distances {
            if let Some(score) = outcome.score() {
                let w = self.request.weights.get(name).copied().unwrap_or(1.0);
                weighted_sum += w * score;
                weight_total += w;
            }
        }
        let combined_score =
            if weight_total > 0.0 { Some(weighted_sum / weight_total) } else { None };
        self.state = RunState::Aggregated;

        self.result = Some(AggregateDistance { distances, combined_score });
        self.state = RunState::Done;
        Ok(self.result.as_ref().expect("result just stored"))
    }

    /// Consume the run and return the aggregate, if it was executed.
    pub fn into_result(self) -> Option<AggregateDistance> {
        self.result
    }
}
