//! Reference populations for distance normalization.
//!
//! Raw distances from different statistics live on different scales; a
//! reference population of prior pairwise distances per statistic lets the
//! aggregator z-score each one before combining them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use es_core::{Error, Result};
use es_stats::StatisticName;

/// Per-statistic samples of prior pairwise distances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferencePopulation {
    samples: BTreeMap<StatisticName, Vec<f64>>,
}

impl ReferencePopulation {
    /// Empty population.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one prior distance for a statistic.
    pub fn push(&mut self, name: StatisticName, distance: f64) -> Result<()> {
        if !(distance.is_finite() && distance >= 0.0) {
            return Err(Error::Configuration(format!(
                "reference distance for {name} must be non-negative and finite, got {distance}"
            )));
        }
        self.samples.entry(name).or_default().push(distance);
        Ok(())
    }

    /// Build a population from the computed distances of prior runs.
    ///
    /// Failed statistics contribute nothing; normalized scores are
    /// ignored on purpose (the population must hold raw distances).
    pub fn from_runs<'a>(
        runs: impl IntoIterator<Item = &'a crate::run::AggregateDistance>,
    ) -> Self {
        let mut pop = Self::new();
        for run in runs {
            for (name, value) in run.computed() {
                pop.samples.entry(name).or_default().push(value.combined);
            }
        }
        pop
    }

    /// Recorded samples for a statistic.
    pub fn samples(&self, name: StatisticName) -> Option<&[f64]> {
        self.samples.get(&name).map(|v| v.as_slice())
    }

    /// Number of samples recorded for a statistic.
    pub fn len(&self, name: StatisticName) -> usize {
        self.samples.get(&name).map_or(0, |v| v.len())
    }

    /// Whether no samples are recorded at all.
    pub fn is_empty(&self) -> bool {
        self.samples.values().all(|v| v.is_empty())
    }

    /// Z-score a distance against the recorded population.
    ///
    /// Returns `None` when fewer than two samples exist (no usable spread
    /// estimate; the raw distance is used unnormalized), and
    /// `Some(Err(..))` when the population is degenerate (zero spread).
    pub fn zscore(&self, name: StatisticName, distance: f64) -> Option<Result<f64>> {
        let samples = self.samples.get(&name)?;
        if samples.len() < 2 {
            log::debug!("{name}: reference population too small ({}), not normalizing", samples.len());
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
        let std = var.sqrt();
        if !(std.is_finite() && std > 0.0) {
            return Some(Err(Error::Computation(format!(
                "{name}: reference population has zero spread; cannot z-score"
            ))));
        }
        Some(Ok((distance - mean) / std))
    }
}
