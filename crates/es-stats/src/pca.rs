//! Principal component analysis of a cube's channel covariance.
//!
//! Centers every channel map, forms the channel-channel covariance matrix,
//! and takes its symmetric eigendecomposition. The descriptor is the
//! eigenvalue spectrum sorted in descending order and normalized by the
//! total variance, truncated to a configured count. A near-singular
//! covariance (non-positive or non-finite leading eigenvalues) marks the
//! instance degenerate instead of crashing; the distance then refuses with
//! an invalid-fit error.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use es_core::{Dataset, Error, Result};

use crate::statistic::{DistanceValue, Statistic, StatisticName};

const MIN_CHANNELS: usize = 4;
const MIN_VALID_PIXELS: usize = 100;

/// Configuration for [`Pca`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PcaConfig {
    /// Number of leading eigenvalues retained (clipped to the channel
    /// count).
    pub n_eigs: usize,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self { n_eigs: 50 }
    }
}

/// PCA instance: the normalized eigenvalue spectrum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pca {
    config: PcaConfig,
    eigenvalues: Vec<f64>,
    normalized: Vec<f64>,
    degenerate: bool,
}

impl Pca {
    /// Raw eigenvalues, sorted descending.
    pub fn eigenvalues(&self) -> &[f64] {
        &self.eigenvalues
    }

    /// Eigenvalues normalized by the total variance, truncated to the
    /// configured count.
    pub fn normalized_spectrum(&self) -> &[f64] {
        &self.normalized
    }

    /// Whether the covariance was degenerate (rank-deficient or
    /// non-finite).
    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }
}

impl Statistic for Pca {
    type Config = PcaConfig;

    fn name() -> StatisticName {
        StatisticName::Pca
    }

    fn compute(dataset: &Dataset, config: &Self::Config) -> Result<Self> {
        if config.n_eigs == 0 {
            return Err(Error::Configuration("n_eigs must be at least 1".to_string()));
        }
        if !dataset.is_cube() {
            return Err(Error::DataValidation("pca requires a spectral cube".to_string()));
        }
        let (data, mask) = dataset.cube_view()?;
        let (n_chan, ny, nx) = data.dim();
        if n_chan < MIN_CHANNELS {
            return Err(Error::insufficient("pca channels", MIN_CHANNELS, n_chan));
        }
        if dataset.n_valid() < MIN_VALID_PIXELS {
            return Err(Error::insufficient("pca", MIN_VALID_PIXELS, dataset.n_valid()));
        }
        let n_pix = ny * nx;

        // Channel means over the zero-filled maps, then the centered
        // channel-channel covariance.
        let mut filled = vec![0.0; n_chan * n_pix];
        let mut means = vec![0.0; n_chan];
        for c in 0..n_chan {
            let mut sum = 0.0;
            for y in 0..ny {
                for x in 0..nx {
                    let v = if mask[[c, y, x]] { data[[c, y, x]] } else { 0.0 };
                    filled[c * n_pix + y * nx + x] = v;
                    sum += v;
                }
            }
            means[c] = sum / n_pix as f64;
        }

        let mut cov = DMatrix::<f64>::zeros(n_chan, n_chan);
        let denom = (n_pix - 1) as f64;
        for c1 in 0..n_chan {
            for c2 in c1..n_chan {
                let mut acc = 0.0;
                for p in 0..n_pix {
                    acc += (filled[c1 * n_pix + p] - means[c1])
                        * (filled[c2 * n_pix + p] - means[c2]);
                }
                let v = acc / denom;
                cov[(c1, c2)] = v;
                cov[(c2, c1)] = v;
            }
        }

        let eigen = nalgebra::linalg::SymmetricEigen::new(cov);
        let mut eigenvalues: Vec<f64> = eigen.eigenvalues.iter().copied().collect();
        eigenvalues.sort_by(|a, b| b.total_cmp(a));

        let total: f64 = eigenvalues.iter().sum();
        let degenerate = !total.is_finite()
            || total <= 0.0
            || eigenvalues.first().map_or(true, |v| !v.is_finite() || *v <= 0.0);
        if degenerate {
            log::warn!("pca: degenerate channel covariance (total variance {total})");
        }

        let keep = config.n_eigs.min(n_chan);
        let normalized = if degenerate {
            Vec::new()
        } else {
            eigenvalues.iter().take(keep).map(|v| v.max(0.0) / total).collect()
        };

        Ok(Self { config: config.clone(), eigenvalues, normalized, degenerate })
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }

    fn distance(&self, other: &Self) -> Result<DistanceValue> {
        if self.config.n_eigs != other.config.n_eigs {
            return Err(Error::IncompatibleInstances(format!(
                "pca: retained eigenvalue counts differ ({} vs {})",
                self.config.n_eigs, other.config.n_eigs
            )));
        }
        if self.degenerate || other.degenerate {
            return Err(Error::InvalidFit(
                "pca distance requires non-degenerate covariance on both sides".to_string(),
            ));
        }
        // Cubes with different channel counts reconcile to the shorter
        // normalized spectrum.
        let n = self.normalized.len().min(other.normalized.len());
        let d = self.normalized[..n]
            .iter()
            .zip(other.normalized[..n].iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        DistanceValue::scalar("eigenvalues", d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, StandardNormal};

    fn noise_cube(seed: u64, n_chan: usize) -> Dataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = Array3::from_shape_fn((n_chan, 16, 16), |_| {
            <StandardNormal as Distribution<f64>>::sample(&StandardNormal, &mut rng)
        });
        Dataset::from_cube(data, 1.0, 1.0).unwrap()
    }

    #[test]
    fn test_normalized_spectrum_sums_to_one() {
        let p = Pca::compute(&noise_cube(1, 8), &PcaConfig::default()).unwrap();
        assert!(!p.is_degenerate());
        assert_eq!(p.normalized_spectrum().len(), 8);
        let total: f64 = p.normalized_spectrum().iter().sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_correlated_channels_concentrate_variance() {
        // Every channel is the same map scaled: rank-one covariance, so the
        // first normalized eigenvalue carries essentially all variance.
        let mut rng = StdRng::seed_from_u64(2);
        let base = ndarray::Array2::from_shape_fn((16, 16), |_| {
            <StandardNormal as Distribution<f64>>::sample(&StandardNormal, &mut rng)
        });
        let data = Array3::from_shape_fn((6, 16, 16), |(c, y, x)| {
            (1.0 + c as f64) * base[[y, x]]
        });
        let ds = Dataset::from_cube(data, 1.0, 1.0).unwrap();
        let p = Pca::compute(&ds, &PcaConfig::default()).unwrap();
        assert!(p.normalized_spectrum()[0] > 0.999);
    }

    #[test]
    fn test_constant_cube_is_degenerate() {
        let data = Array3::from_elem((6, 16, 16), 3.0);
        let ds = Dataset::from_cube(data, 1.0, 1.0).unwrap();
        let p = Pca::compute(&ds, &PcaConfig::default()).unwrap();
        assert!(p.is_degenerate());
        let q = Pca::compute(&noise_cube(3, 6), &PcaConfig::default()).unwrap();
        assert_eq!(p.distance(&q).unwrap_err().kind(), "InvalidFit");
    }

    #[test]
    fn test_self_distance_and_symmetry() {
        let a = Pca::compute(&noise_cube(4, 8), &PcaConfig::default()).unwrap();
        let b = Pca::compute(&noise_cube(5, 8), &PcaConfig::default()).unwrap();
        assert!(a.distance(&a).unwrap().combined < 1e-12);
        let dab = a.distance(&b).unwrap().combined;
        let dba = b.distance(&a).unwrap().combined;
        assert!((dab - dba).abs() < 1e-12);
    }
}
