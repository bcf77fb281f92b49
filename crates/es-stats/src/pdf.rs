//! One-point intensity distribution.
//!
//! Collects the valid samples of the field (optionally normalized), keeps
//! the sorted sample set for empirical-CDF comparisons, and bins a
//! histogram descriptor. When every sample is positive a lognormal model
//! is summarized by fitting a normal to the log-intensities and recording
//! the one-sample Kolmogorov-Smirnov statistic against it.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use es_core::{Dataset, Error, Histogram, Result};

use crate::resample::{hellinger_distance, ks_distance};
use crate::statistic::{DistanceValue, Statistic, StatisticName};

const MIN_SAMPLES: usize = 100;

/// Sample normalization applied before building the distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdfNormalization {
    /// Use the raw intensities.
    None,
    /// Divide by the mean intensity (requires a mean bounded away from
    /// zero).
    MeanDivide,
    /// Standardize to zero mean and unit variance.
    ZScore,
}

/// Configuration for [`Pdf`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PdfConfig {
    /// Pre-binning normalization.
    pub normalization: PdfNormalization,
    /// Histogram bin count.
    pub num_bins: usize,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self { normalization: PdfNormalization::None, num_bins: 50 }
    }
}

/// PDF instance: sorted samples, histogram, and the lognormal summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pdf {
    config: PdfConfig,
    samples: Vec<f64>,
    histogram: Histogram,
    lognormal: Option<LognormalSummary>,
}

/// Moment summary of the lognormal model of a positive-valued field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LognormalSummary {
    /// Mean of the log-intensities.
    pub mu: f64,
    /// Standard deviation of the log-intensities.
    pub sigma: f64,
    /// One-sample KS statistic of the log-intensities against the fitted
    /// normal.
    pub ks: f64,
}

impl Pdf {
    /// Sorted (normalized) samples.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Histogram of the samples.
    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    /// Lognormal summary; absent when the field has non-positive samples.
    pub fn lognormal(&self) -> Option<&LognormalSummary> {
        self.lognormal.as_ref()
    }
}

fn lognormal_summary(samples: &[f64]) -> Option<LognormalSummary> {
    if samples.iter().any(|&v| v <= 0.0) {
        return None;
    }
    let logs: Vec<f64> = samples.iter().map(|v| v.ln()).collect();
    let n = logs.len() as f64;
    let mu = logs.iter().sum::<f64>() / n;
    let var = logs.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / n;
    let sigma = var.sqrt();
    if !(sigma.is_finite() && sigma > 0.0) {
        return None;
    }
    let normal = Normal::new(mu, sigma).ok()?;
    // Samples arrive sorted, so the log-values are sorted too.
    let mut ks: f64 = 0.0;
    let count = logs.len() as f64;
    for (i, &v) in logs.iter().enumerate() {
        let model = normal.cdf(v);
        let lo = i as f64 / count;
        let hi = (i + 1) as f64 / count;
        ks = ks.max((model - lo).abs()).max((hi - model).abs());
    }
    Some(LognormalSummary { mu, sigma, ks })
}

impl Statistic for Pdf {
    type Config = PdfConfig;

    fn name() -> StatisticName {
        StatisticName::Pdf
    }

    fn compute(dataset: &Dataset, config: &Self::Config) -> Result<Self> {
        if config.num_bins < 2 {
            return Err(Error::Configuration(format!(
                "num_bins must be at least 2, got {}",
                config.num_bins
            )));
        }
        let mut samples = dataset.valid_values();
        if samples.len() < MIN_SAMPLES {
            return Err(Error::insufficient("pdf", MIN_SAMPLES, samples.len()));
        }

        let n = samples.len() as f64;
        match config.normalization {
            PdfNormalization::None => {}
            PdfNormalization::MeanDivide => {
                let mean = samples.iter().sum::<f64>() / n;
                let scale = samples.iter().map(|v| v.abs()).fold(0.0, f64::max);
                if mean.abs() <= 1e-12 * scale.max(1.0) {
                    return Err(Error::Computation(
                        "pdf mean-normalization is undefined for a zero-mean field".to_string(),
                    ));
                }
                for v in &mut samples {
                    *v /= mean;
                }
            }
            PdfNormalization::ZScore => {
                let mean = samples.iter().sum::<f64>() / n;
                let var = samples.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
                let std = var.sqrt();
                if !(std.is_finite() && std > 0.0) {
                    return Err(Error::Computation(
                        "pdf z-scoring is undefined for a constant field".to_string(),
                    ));
                }
                for v in &mut samples {
                    *v = (*v - mean) / std;
                }
            }
        }
        samples.sort_by(f64::total_cmp);

        let lo = samples[0];
        let hi = samples[samples.len() - 1];
        if hi <= lo {
            return Err(Error::DataValidation(
                "pdf is undefined for a constant field".to_string(),
            ));
        }
        let histogram = Histogram::from_values(&samples, lo, hi, config.num_bins)?;
        let lognormal = lognormal_summary(&samples);

        Ok(Self { config: config.clone(), samples, histogram, lognormal })
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }

    fn distance(&self, other: &Self) -> Result<DistanceValue> {
        if self.config.normalization != other.config.normalization {
            return Err(Error::IncompatibleInstances(
                "pdf: sample normalizations differ".to_string(),
            ));
        }
        if self.config.num_bins != other.config.num_bins {
            return Err(Error::IncompatibleInstances(
                "pdf: histogram bin counts differ".to_string(),
            ));
        }
        let d_ks = ks_distance(&self.samples, &other.samples)?;

        // Re-bin both sample sets onto a shared range for the histogram
        // component; the stored per-instance histograms keep their own
        // ranges for the descriptor.
        let lo = self.samples[0].min(other.samples[0]);
        let hi = self.samples[self.samples.len() - 1]
            .max(other.samples[other.samples.len() - 1]);
        let ha = Histogram::from_values(&self.samples, lo, hi, self.config.num_bins)?;
        let hb = Histogram::from_values(&other.samples, lo, hi, other.config.num_bins)?;
        let d_hist = hellinger_distance(&ha, &hb)?;

        DistanceValue::from_components(vec![("ks", d_ks), ("hist", d_hist)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, StandardNormal};

    fn noise_image(seed: u64, offset: f64) -> Dataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = Array2::from_shape_fn((32, 32), |_| {
            offset + <StandardNormal as Distribution<f64>>::sample(&StandardNormal, &mut rng)
        });
        Dataset::from_image(data, 1.0).unwrap()
    }

    #[test]
    fn test_lognormal_summary_for_positive_field() {
        let mut rng = StdRng::seed_from_u64(1);
        let data = Array2::from_shape_fn((32, 32), |_| {
            let g: f64 = <StandardNormal as Distribution<f64>>::sample(&StandardNormal, &mut rng);
            (0.5 * g).exp()
        });
        let ds = Dataset::from_image(data, 1.0).unwrap();
        let pdf = Pdf::compute(&ds, &PdfConfig::default()).unwrap();
        let summary = pdf.lognormal().expect("positive field has a lognormal summary");
        assert!(summary.sigma > 0.3 && summary.sigma < 0.7, "sigma = {}", summary.sigma);
        assert!(summary.ks < 0.1, "lognormal data should fit well, ks = {}", summary.ks);
    }

    #[test]
    fn test_no_lognormal_for_signed_field() {
        let pdf = Pdf::compute(&noise_image(2, 0.0), &PdfConfig::default()).unwrap();
        assert!(pdf.lognormal().is_none());
    }

    #[test]
    fn test_self_distance_and_symmetry() {
        let a = Pdf::compute(&noise_image(3, 0.0), &PdfConfig::default()).unwrap();
        let b = Pdf::compute(&noise_image(4, 0.0), &PdfConfig::default()).unwrap();
        assert!(a.distance(&a).unwrap().combined < 1e-12);
        let dab = a.distance(&b).unwrap().combined;
        let dba = b.distance(&a).unwrap().combined;
        assert!((dab - dba).abs() < 1e-12);
    }

    #[test]
    fn test_growing_offset_does_not_decrease_ks() {
        // The KS component is scale-sensitive: pushing B further from A
        // must not shrink the distance.
        let a = Pdf::compute(&noise_image(5, 0.0), &PdfConfig::default()).unwrap();
        let mut last = 0.0;
        for offset in [0.0, 0.5, 1.0, 2.0, 4.0] {
            let b = Pdf::compute(&noise_image(5, offset), &PdfConfig::default()).unwrap();
            let d = a.distance(&b).unwrap().component("ks").unwrap();
            assert!(
                d >= last - 1e-12,
                "ks distance decreased from {last} to {d} at offset {offset}"
            );
            last = d;
        }
    }

    #[test]
    fn test_zscore_absorbs_offset() {
        let cfg = PdfConfig { normalization: PdfNormalization::ZScore, ..PdfConfig::default() };
        let a = Pdf::compute(&noise_image(6, 0.0), &cfg).unwrap();
        let b = Pdf::compute(&noise_image(6, 10.0), &cfg).unwrap();
        // Rounding in the standardization can split ties between the two
        // sample sets, so the KS step functions may differ by a few steps.
        let d = a.distance(&b).unwrap().combined;
        assert!(d < 0.02, "z-scored identical shapes should nearly coincide, got {d}");
    }

    #[test]
    fn test_normalization_mismatch_is_incompatible() {
        let a = Pdf::compute(&noise_image(7, 0.0), &PdfConfig::default()).unwrap();
        let cfg = PdfConfig { normalization: PdfNormalization::ZScore, ..PdfConfig::default() };
        let b = Pdf::compute(&noise_image(7, 0.0), &cfg).unwrap();
        assert_eq!(a.distance(&b).unwrap_err().kind(), "IncompatibleInstances");
    }
}
