//! Bispectrum and bicoherence.
//!
//! The bispectrum `B(k1, k2) = F(k1) F(k2) F*(k1 + k2)` measures phase
//! coupling between wavenumber triads. Averaging over randomly sampled
//! orientations at each `(|k1|, |k2|)` pair and normalizing by the mean
//! triad magnitude yields the bicoherence matrix in `[0, 1]`. Sampling is
//! seeded through the configuration, so the statistic stays a pure
//! function of `(dataset, config)`.

use ndarray::Ix2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use es_core::{Dataset, Error, Result};

use crate::statistic::{DistanceValue, Statistic, StatisticName};

const MIN_IMAGE_DIM: usize = 16;
const MIN_VALID_PIXELS: usize = 100;

/// Configuration for [`Bispectrum`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BispectrumConfig {
    /// Largest wavenumber (in pixels of the transform) sampled on each
    /// axis of the bicoherence matrix; defaults to half the smaller image
    /// dimension.
    pub max_wavenumber: Option<usize>,
    /// Random orientation samples per wavenumber pair.
    pub n_samples: usize,
    /// Seed for the orientation sampling.
    pub seed: u64,
}

impl Default for BispectrumConfig {
    fn default() -> Self {
        Self { max_wavenumber: None, n_samples: 100, seed: 0 }
    }
}

/// Bispectrum instance: the bicoherence matrix over wavenumber pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bispectrum {
    config: BispectrumConfig,
    bicoherence: Vec<f64>,
    n_wavenumbers: usize,
}

impl Bispectrum {
    /// Bicoherence matrix, row-major over
    /// `n_wavenumbers x n_wavenumbers` pairs (`k = 1..=n_wavenumbers`).
    pub fn bicoherence(&self) -> (&[f64], usize) {
        (&self.bicoherence, self.n_wavenumbers)
    }

    /// Mean bicoherence over all sampled pairs.
    pub fn mean_bicoherence(&self) -> f64 {
        self.bicoherence.iter().sum::<f64>() / self.bicoherence.len() as f64
    }
}

impl Statistic for Bispectrum {
    type Config = BispectrumConfig;

    fn name() -> StatisticName {
        StatisticName::Bispectrum
    }

    fn compute(dataset: &Dataset, config: &Self::Config) -> Result<Self> {
        if config.n_samples == 0 {
            return Err(Error::Configuration("n_samples must be at least 1".to_string()));
        }
        let plane = dataset.to_plane()?;
        let (data, _) = plane.image_view()?;
        let (ny, nx) = data.dim();
        if ny.min(nx) < MIN_IMAGE_DIM {
            return Err(Error::DataValidation(format!(
                "bispectrum needs at least a {MIN_IMAGE_DIM}x{MIN_IMAGE_DIM} image, got {ny}x{nx}"
            )));
        }
        if plane.n_valid() < MIN_VALID_PIXELS {
            return Err(Error::insufficient("bispectrum", MIN_VALID_PIXELS, plane.n_valid()));
        }
        let k_max = config.max_wavenumber.unwrap_or(ny.min(nx) / 2);
        if k_max == 0 || k_max > ny.min(nx) / 2 {
            return Err(Error::Configuration(format!(
                "max_wavenumber must be in [1, {}], got {k_max}",
                ny.min(nx) / 2
            )));
        }

        let img = plane
            .filled(0.0)
            .into_dimensionality::<Ix2>()
            .expect("plane is 2D");
        let spec = crate::fourier::fft2(&img);

        // Wavenumber index with periodic wrapping into the DC-first layout.
        let wrap = |k: i64, n: usize| -> usize { k.rem_euclid(n as i64) as usize };

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut bicoherence = vec![0.0; k_max * k_max];
        for k1 in 1..=k_max {
            for k2 in 1..=k_max {
                let mut re = 0.0;
                let mut im = 0.0;
                let mut norm = 0.0;
                for _ in 0..config.n_samples {
                    let phi1 = rng.gen_range(0.0..std::f64::consts::TAU);
                    let phi2 = rng.gen_range(0.0..std::f64::consts::TAU);
                    let k1y = (k1 as f64 * phi1.sin()).round() as i64;
                    let k1x = (k1 as f64 * phi1.cos()).round() as i64;
                    let k2y = (k2 as f64 * phi2.sin()).round() as i64;
                    let k2x = (k2 as f64 * phi2.cos()).round() as i64;

                    let f1 = spec[[wrap(k1y, ny), wrap(k1x, nx)]];
                    let f2 = spec[[wrap(k2y, ny), wrap(k2x, nx)]];
                    let f3 = spec[[wrap(k1y + k2y, ny), wrap(k1x + k2x, nx)]];
                    let triad = f1 * f2 * f3.conj();
                    re += triad.re;
                    im += triad.im;
                    norm += triad.norm();
                }
                let b = if norm > 0.0 {
                    (re * re + im * im).sqrt() / norm
                } else {
                    0.0
                };
                bicoherence[(k1 - 1) * k_max + (k2 - 1)] = b;
            }
        }

        Ok(Self { config: config.clone(), bicoherence, n_wavenumbers: k_max })
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }

    fn distance(&self, other: &Self) -> Result<DistanceValue> {
        if self.n_wavenumbers != other.n_wavenumbers {
            return Err(Error::IncompatibleInstances(format!(
                "bispectrum: wavenumber grids differ ({} vs {})",
                self.n_wavenumbers, other.n_wavenumbers
            )));
        }
        if self.config.n_samples != other.config.n_samples {
            return Err(Error::IncompatibleInstances(format!(
                "bispectrum: sampling depths differ ({} vs {})",
                self.config.n_samples, other.config.n_samples
            )));
        }
        let n = self.bicoherence.len() as f64;
        let d = self
            .bicoherence
            .iter()
            .zip(other.bicoherence.iter())
            .map(|(a, b)| (a - b).abs())
            .sum::<f64>()
            / n;
        DistanceValue::scalar("bicoherence", d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand_distr::{Distribution, StandardNormal};

    fn noise_image(seed: u64) -> Dataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = Array2::from_shape_fn((32, 32), |_| {
            <StandardNormal as Distribution<f64>>::sample(&StandardNormal, &mut rng)
        });
        Dataset::from_image(data, 1.0).unwrap()
    }

    fn fast_cfg() -> BispectrumConfig {
        BispectrumConfig { max_wavenumber: Some(8), n_samples: 50, seed: 42 }
    }

    #[test]
    fn test_bicoherence_bounded() {
        let b = Bispectrum::compute(&noise_image(1), &fast_cfg()).unwrap();
        let (matrix, _) = b.bicoherence();
        assert!(matrix.iter().all(|&v| (0.0..=1.0 + 1e-12).contains(&v)));
    }

    #[test]
    fn test_seeded_sampling_is_deterministic() {
        let ds = noise_image(2);
        let a = Bispectrum::compute(&ds, &fast_cfg()).unwrap();
        let b = Bispectrum::compute(&ds, &fast_cfg()).unwrap();
        assert_eq!(a.bicoherence().0, b.bicoherence().0);
    }

    #[test]
    fn test_self_distance_and_symmetry() {
        let a = Bispectrum::compute(&noise_image(3), &fast_cfg()).unwrap();
        let b = Bispectrum::compute(&noise_image(4), &fast_cfg()).unwrap();
        assert!(a.distance(&a).unwrap().combined < 1e-12);
        let dab = a.distance(&b).unwrap().combined;
        let dba = b.distance(&a).unwrap().combined;
        assert!((dab - dba).abs() < 1e-12);
    }

    #[test]
    fn test_grid_mismatch_is_incompatible() {
        let ds = noise_image(5);
        let a = Bispectrum::compute(&ds, &fast_cfg()).unwrap();
        let other = BispectrumConfig { max_wavenumber: Some(4), ..fast_cfg() };
        let b = Bispectrum::compute(&ds, &other).unwrap();
        assert_eq!(a.distance(&b).unwrap_err().kind(), "IncompatibleInstances");
    }

    #[test]
    fn test_seeds_may_differ_between_instances() {
        // Distance remains comparable across different sampling seeds; only
        // grid and depth are part of the instance identity.
        let ds = noise_image(7);
        let a = Bispectrum::compute(&ds, &fast_cfg()).unwrap();
        let b =
            Bispectrum::compute(&ds, &BispectrumConfig { seed: 99, ..fast_cfg() }).unwrap();
        let d = a.distance(&b).unwrap().combined;
        assert!(d < 0.5, "same image under resampled orientations should stay close, got {d}");
    }
}
