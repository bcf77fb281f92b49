//! Per-statistic configuration dispatch.
//!
//! [`StatisticConfig`] carries one fully enumerated configuration struct
//! per implemented statistic. Serialized forms are tagged by the statistic
//! name, and unknown fields inside any configuration are rejected at
//! deserialization, not silently ignored.

use serde::{Deserialize, Serialize};

use es_core::{Dataset, Error, Result};
use es_stats::statistic::Statistic;
use es_stats::{
    Bispectrum, BispectrumConfig, DeltaVariance, DeltaVarianceConfig, Dendrogram,
    DendrogramConfig, DistanceValue, Genus, GenusConfig, Moments, MomentsConfig, Mvc,
    MvcConfig, Pca, PcaConfig, Pdf, PdfConfig, PowerSpectrum, PowerSpectrumConfig, Scf,
    ScfConfig, StatisticName, Vca, VcaConfig, Vcs, VcsConfig, Wavelet, WaveletConfig,
};

use crate::run::FailureStage;

/// Configuration for one requested statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "statistic", rename_all = "snake_case")]
pub enum StatisticConfig {
    /// Spatial power spectrum.
    PowerSpectrum(PowerSpectrumConfig),
    /// Modified velocity centroids.
    Mvc(MvcConfig),
    /// Velocity channel analysis.
    Vca(VcaConfig),
    /// Velocity coordinate spectrum.
    Vcs(VcsConfig),
    /// Spectral correlation function.
    Scf(ScfConfig),
    /// Bispectrum / bicoherence.
    Bispectrum(BispectrumConfig),
    /// Wavelet response over scale.
    Wavelet(WaveletConfig),
    /// Delta-variance over lag.
    DeltaVariance(DeltaVarianceConfig),
    /// Genus topology curve.
    Genus(GenusConfig),
    /// Hierarchical structure counts.
    Dendrogram(DendrogramConfig),
    /// Channel-covariance eigenvalue spectrum.
    Pca(PcaConfig),
    /// One-point intensity distribution.
    Pdf(PdfConfig),
    /// Local moment distributions.
    Moments(MomentsConfig),
}

impl StatisticConfig {
    /// The statistic this configuration belongs to.
    pub fn name(&self) -> StatisticName {
        match self {
            StatisticConfig::PowerSpectrum(_) => StatisticName::PowerSpectrum,
            StatisticConfig::Mvc(_) => StatisticName::Mvc,
            StatisticConfig::Vca(_) => StatisticName::Vca,
            StatisticConfig::Vcs(_) => StatisticName::Vcs,
            StatisticConfig::Scf(_) => StatisticName::Scf,
            StatisticConfig::Bispectrum(_) => StatisticName::Bispectrum,
            StatisticConfig::Wavelet(_) => StatisticName::Wavelet,
            StatisticConfig::DeltaVariance(_) => StatisticName::DeltaVariance,
            StatisticConfig::Genus(_) => StatisticName::Genus,
            StatisticConfig::Dendrogram(_) => StatisticName::Dendrogram,
            StatisticConfig::Pca(_) => StatisticName::Pca,
            StatisticConfig::Pdf(_) => StatisticName::Pdf,
            StatisticConfig::Moments(_) => StatisticName::Moments,
        }
    }

    /// Default configuration for a statistic by name.
    pub fn default_for(name: StatisticName) -> Self {
        match name {
            StatisticName::PowerSpectrum => {
                StatisticConfig::PowerSpectrum(PowerSpectrumConfig::default())
            }
            StatisticName::Mvc => StatisticConfig::Mvc(MvcConfig::default()),
            StatisticName::Vca => StatisticConfig::Vca(VcaConfig::default()),
            StatisticName::Vcs => StatisticConfig::Vcs(VcsConfig::default()),
            StatisticName::Scf => StatisticConfig::Scf(ScfConfig::default()),
            StatisticName::Bispectrum => {
                StatisticConfig::Bispectrum(BispectrumConfig::default())
            }
            StatisticName::Wavelet => StatisticConfig::Wavelet(WaveletConfig::default()),
            StatisticName::DeltaVariance => {
                StatisticConfig::DeltaVariance(DeltaVarianceConfig::default())
            }
            StatisticName::Genus => StatisticConfig::Genus(GenusConfig::default()),
            StatisticName::Dendrogram => {
                StatisticConfig::Dendrogram(DendrogramConfig::default())
            }
            StatisticName::Pca => StatisticConfig::Pca(PcaConfig::default()),
            StatisticName::Pdf => StatisticConfig::Pdf(PdfConfig::default()),
            StatisticName::Moments => StatisticConfig::Moments(MomentsConfig::default()),
        }
    }

    /// Compute the statistic on both datasets (in parallel) and take the
    /// distance, tagging any error with the stage it occurred in.
    pub(crate) fn pairwise_distance(
        &self,
        a: &Dataset,
        b: &Dataset,
    ) -> std::result::Result<DistanceValue, (FailureStage, Error)> {
        match self {
            StatisticConfig::PowerSpectrum(c) => pairwise::<PowerSpectrum>(a, b, c),
            StatisticConfig::Mvc(c) => pairwise::<Mvc>(a, b, c),
            StatisticConfig::Vca(c) => pairwise::<Vca>(a, b, c),
            StatisticConfig::Vcs(c) => pairwise::<Vcs>(a, b, c),
            StatisticConfig::Scf(c) => pairwise::<Scf>(a, b, c),
            StatisticConfig::Bispectrum(c) => pairwise::<Bispectrum>(a, b, c),
            StatisticConfig::Wavelet(c) => pairwise::<Wavelet>(a, b, c),
            StatisticConfig::DeltaVariance(c) => pairwise::<DeltaVariance>(a, b, c),
            StatisticConfig::Genus(c) => pairwise::<Genus>(a, b, c),
            StatisticConfig::Dendrogram(c) => pairwise::<Dendrogram>(a, b, c),
            StatisticConfig::Pca(c) => pairwise::<Pca>(a, b, c),
            StatisticConfig::Pdf(c) => pairwise::<Pdf>(a, b, c),
            StatisticConfig::Moments(c) => pairwise::<Moments>(a, b, c),
        }
    }
}

/// Run one statistic on both datasets with a per-statistic join barrier,
/// then compare the two instances.
fn pairwise<S: Statistic>(
    a: &Dataset,
    b: &Dataset,
    cfg: &S::Config,
) -> std::result::Result<DistanceValue, (FailureStage, Error)> {
    let (ra, rb) = rayon::join(|| S::compute(a, cfg), || S::compute(b, cfg));
    let ia = ra.map_err(|e| (FailureStage::ComputeA, e))?;
    let ib = rb.map_err(|e| (FailureStage::ComputeB, e))?;
    ia.distance(&ib).map_err(|e| (FailureStage::Distance, e))
}

/// Parse a statistic configuration from JSON, rejecting unknown fields.
pub fn config_from_json(json: &str) -> Result<StatisticConfig> {
    serde_json::from_str(json)
        .map_err(|e| Error::Configuration(format!("invalid statistic configuration: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_name_has_a_default_config() {
        for name in StatisticName::ALL {
            assert_eq!(StatisticConfig::default_for(name).name(), name);
        }
    }

    #[test]
    fn test_tagged_serialization_round_trip() {
        let cfg = StatisticConfig::default_for(StatisticName::Vca);
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"statistic\":\"vca\""), "json was {json}");
        let back: StatisticConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = config_from_json(
            r#"{"statistic": "pca", "n_eigs": 10, "extra_knob": true}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "Configuration");
    }

    #[test]
    fn test_unknown_statistic_is_rejected() {
        assert!(config_from_json(r#"{"statistic": "fractal_dimension"}"#).is_err());
    }
}
