//! The shared statistic contract.
//!
//! Each algorithm is its own type implementing [`Statistic`]: a two-phase
//! `compute` / `distance` capability set over the common [`Dataset`] input.
//! There is no shared base implementation; algorithms compose the model
//! fitter and the curve utilities as free functions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use es_core::{Dataset, Error, FitResult, Result};

/// Identifier for every implemented statistic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StatisticName {
    /// Spatial power spectrum.
    PowerSpectrum,
    /// Modified velocity centroids.
    Mvc,
    /// Velocity channel analysis.
    Vca,
    /// Velocity coordinate spectrum.
    Vcs,
    /// Spectral correlation function.
    Scf,
    /// Bispectrum / bicoherence.
    Bispectrum,
    /// Wavelet response over scale.
    Wavelet,
    /// Delta-variance over lag.
    DeltaVariance,
    /// Genus topology curve.
    Genus,
    /// Hierarchical structure counts.
    Dendrogram,
    /// Channel-covariance eigenvalue spectrum.
    Pca,
    /// One-point intensity distribution.
    Pdf,
    /// Local moment distributions.
    Moments,
}

impl StatisticName {
    /// Every implemented statistic, in canonical order.
    pub const ALL: [StatisticName; 13] = [
        StatisticName::PowerSpectrum,
        StatisticName::Mvc,
        StatisticName::Vca,
        StatisticName::Vcs,
        StatisticName::Scf,
        StatisticName::Bispectrum,
        StatisticName::Wavelet,
        StatisticName::DeltaVariance,
        StatisticName::Genus,
        StatisticName::Dendrogram,
        StatisticName::Pca,
        StatisticName::Pdf,
        StatisticName::Moments,
    ];

    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatisticName::PowerSpectrum => "power_spectrum",
            StatisticName::Mvc => "mvc",
            StatisticName::Vca => "vca",
            StatisticName::Vcs => "vcs",
            StatisticName::Scf => "scf",
            StatisticName::Bispectrum => "bispectrum",
            StatisticName::Wavelet => "wavelet",
            StatisticName::DeltaVariance => "delta_variance",
            StatisticName::Genus => "genus",
            StatisticName::Dendrogram => "dendrogram",
            StatisticName::Pca => "pca",
            StatisticName::Pdf => "pdf",
            StatisticName::Moments => "moments",
        }
    }

    /// Whether this statistic requires a spectral cube (3D input).
    pub fn requires_cube(&self) -> bool {
        matches!(
            self,
            StatisticName::Mvc
                | StatisticName::Vca
                | StatisticName::Vcs
                | StatisticName::Scf
                | StatisticName::Pca
        )
    }
}

impl fmt::Display for StatisticName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatisticName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StatisticName::ALL
            .iter()
            .find(|name| name.as_str() == s)
            .copied()
            .ok_or_else(|| Error::Configuration(format!("unknown statistic name: {s:?}")))
    }
}

/// A non-negative distance between two statistic instances.
///
/// Most metrics produce a single scalar; a few compare along more than one
/// axis (e.g. a slope term plus a curve term) and report each component.
/// `combined` is the canonical scalar: the component itself for single-
/// component metrics, the Euclidean norm otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceValue {
    /// Named components, in metric-defined order.
    pub components: Vec<(String, f64)>,
    /// Canonical combined scalar.
    pub combined: f64,
}

impl DistanceValue {
    /// Single-component distance.
    pub fn scalar(name: &str, value: f64) -> Result<Self> {
        Self::from_components(vec![(name, value)])
    }

    /// Multi-component distance; `combined` is the Euclidean norm.
    pub fn from_components(components: Vec<(&str, f64)>) -> Result<Self> {
        if components.is_empty() {
            return Err(Error::Computation("distance has no components".to_string()));
        }
        for (name, value) in &components {
            if !value.is_finite() || *value < 0.0 {
                return Err(Error::Computation(format!(
                    "distance component {name} is not a non-negative finite value: {value}"
                )));
            }
        }
        let combined = if components.len() == 1 {
            components[0].1
        } else {
            components.iter().map(|(_, v)| v * v).sum::<f64>().sqrt()
        };
        Ok(Self {
            components: components.into_iter().map(|(n, v)| (n.to_string(), v)).collect(),
            combined,
        })
    }

    /// Look up a component by name.
    pub fn component(&self, name: &str) -> Option<f64> {
        self.components.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

/// The fixed capability set every statistic implements.
///
/// `compute` must be a deterministic pure function of `(dataset, config)`;
/// any internal randomness takes an explicit seed from the config.
/// `distance` must be symmetric and zero (to numerical tolerance) for two
/// instances computed from the same dataset and configuration.
pub trait Statistic: Sized + Send {
    /// Per-algorithm configuration with every option enumerated.
    type Config: Clone + Send + Sync;

    /// Identifier of this statistic.
    fn name() -> StatisticName;

    /// Run the algorithm on one dataset.
    ///
    /// Validates the configuration ([`Error::Configuration`]) and the
    /// dataset against the algorithm's minima ([`Error::InsufficientData`])
    /// before computing; on error no instance exists.
    fn compute(dataset: &Dataset, config: &Self::Config) -> Result<Self>;

    /// Echo of the configuration the instance was computed with.
    fn config(&self) -> &Self::Config;

    /// The model fit, for statistics that define one.
    fn fit(&self) -> Option<&FitResult> {
        None
    }

    /// Distance to another instance of the same statistic.
    ///
    /// Raises [`Error::IncompatibleInstances`] when the two configurations
    /// cannot be compared, and [`Error::InvalidFit`] when a parametric
    /// metric finds an invalid fit on either side.
    fn distance(&self, other: &Self) -> Result<DistanceValue>;
}

/// Shared compatibility check for statistics whose parametric distance is
/// only meaningful over a common fit interval: the *requested* ranges must
/// match (resolved per-dataset defaults may legitimately differ when the
/// two datasets have different shapes).
pub(crate) fn check_same_fit_range(
    name: StatisticName,
    a: Option<(f64, f64)>,
    b: Option<(f64, f64)>,
) -> Result<()> {
    let same = match (a, b) {
        (None, None) => true,
        (Some((al, ah)), Some((bl, bh))) => al == bl && ah == bh,
        _ => false,
    };
    if !same {
        return Err(Error::IncompatibleInstances(format!(
            "{name}: fit ranges differ ({a:?} vs {b:?})"
        )));
    }
    Ok(())
}
