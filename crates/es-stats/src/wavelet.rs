//! Continuous wavelet response over scale.
//!
//! Convolves the image with a Mexican-hat (Marr) wavelet at a set of
//! logarithmically spaced scales and records the mean absolute coefficient
//! over valid pixels per scale. The response curve follows a power law in
//! scale for self-similar fields; its slope is the compared quantity.

use ndarray::{Array2, Ix2};
use serde::{Deserialize, Serialize};

use es_core::{Curve, Dataset, Error, FitResult, Result};

use crate::fitting::fit_power_law;
use crate::fourier::{convolve2, wrap_delta};
use crate::resample::slope_t_distance;
use crate::statistic::{check_same_fit_range, DistanceValue, Statistic, StatisticName};

const MIN_IMAGE_DIM: usize = 16;
const MIN_VALID_PIXELS: usize = 100;
const MIN_SCALES: usize = 3;

/// Configuration for [`Wavelet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaveletConfig {
    /// Number of logarithmically spaced scales.
    pub num_scales: usize,
    /// Scale interval in pixels; defaults per dataset to
    /// `[2, min_dim / 4]`.
    pub scale_range: Option<(f64, f64)>,
    /// Fit interval in pixels over the response curve; defaults to the
    /// full scale range.
    pub fit_range: Option<(f64, f64)>,
}

impl Default for WaveletConfig {
    fn default() -> Self {
        Self { num_scales: 10, scale_range: None, fit_range: None }
    }
}

/// Wavelet-transform instance: the response curve and its power-law fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wavelet {
    config: WaveletConfig,
    response: Curve,
    fit: FitResult,
}

impl Wavelet {
    /// Mean absolute wavelet coefficient vs scale.
    pub fn response(&self) -> &Curve {
        &self.response
    }

    /// Fitted response slope.
    pub fn slope(&self) -> Option<f64> {
        self.fit.slope()
    }
}

/// Mexican-hat kernel at scale `a`, laid out wrap-around for periodic
/// convolution. The kernel is zero-mean by construction.
fn mexican_hat(shape: (usize, usize), a: f64) -> Array2<f64> {
    let (ny, nx) = shape;
    let norm = 1.0 / (std::f64::consts::PI * a.powi(4));
    let mut kernel = Array2::from_shape_fn((ny, nx), |(y, x)| {
        let dy = wrap_delta(y, ny);
        let dx = wrap_delta(x, nx);
        let r2 = (dy * dy + dx * dx) / (2.0 * a * a);
        norm * (1.0 - r2) * (-r2).exp()
    });
    // Discretization leaves a small residual mean; remove it so a constant
    // offset in the input cannot leak into the response.
    let mean = kernel.iter().sum::<f64>() / (ny * nx) as f64;
    kernel.mapv_inplace(|v| v - mean);
    kernel
}

impl Statistic for Wavelet {
    type Config = WaveletConfig;

    fn name() -> StatisticName {
        StatisticName::Wavelet
    }

    fn compute(dataset: &Dataset, config: &Self::Config) -> Result<Self> {
        if config.num_scales < MIN_SCALES {
            return Err(Error::Configuration(format!(
                "num_scales must be at least {MIN_SCALES}, got {}",
                config.num_scales
            )));
        }
        for (label, range) in [("scale_range", config.scale_range), ("fit_range", config.fit_range)]
        {
            if let Some((lo, hi)) = range {
                if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && lo < hi) {
                    return Err(Error::Configuration(format!(
                        "{label} must satisfy 0 < low < high, got ({lo}, {hi})"
                    )));
                }
            }
        }

        let plane = dataset.to_plane()?;
        let (data, mask) = plane.image_view()?;
        let (ny, nx) = data.dim();
        let min_dim = ny.min(nx);
        if min_dim < MIN_IMAGE_DIM {
            return Err(Error::DataValidation(format!(
                "wavelet needs at least a {MIN_IMAGE_DIM}x{MIN_IMAGE_DIM} image, got {ny}x{nx}"
            )));
        }
        if plane.n_valid() < MIN_VALID_PIXELS {
            return Err(Error::insufficient("wavelet", MIN_VALID_PIXELS, plane.n_valid()));
        }

        let (scale_lo, scale_hi) =
            config.scale_range.unwrap_or((2.0, (min_dim as f64 / 4.0).max(3.0)));
        if scale_hi > min_dim as f64 / 2.0 {
            return Err(Error::Configuration(format!(
                "largest scale {scale_hi} exceeds half the image dimension {min_dim}"
            )));
        }
        let n = config.num_scales;
        let scales: Vec<f64> = (0..n)
            .map(|i| {
                (scale_lo.ln() + (scale_hi.ln() - scale_lo.ln()) * i as f64 / (n - 1) as f64).exp()
            })
            .collect();

        let img = plane
            .filled(0.0)
            .into_dimensionality::<Ix2>()
            .expect("plane is 2D");

        let mut responses = Vec::with_capacity(n);
        for &a in &scales {
            let coeffs = convolve2(&img, &mexican_hat((ny, nx), a));
            let mut acc = 0.0;
            let mut count = 0usize;
            for ((y, x), &ok) in mask.indexed_iter() {
                if ok {
                    acc += coeffs[[y, x]].abs();
                    count += 1;
                }
            }
            responses.push(acc / count as f64);
        }
        let response = Curve::new(scales, responses, None)?;

        let section = match config.fit_range {
            Some((lo, hi)) => response.restrict(lo, hi)?,
            None => response.clone(),
        };
        let fit = fit_power_law(&section.x, &section.y, None);

        Ok(Self { config: config.clone(), response, fit })
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }

    fn fit(&self) -> Option<&FitResult> {
        Some(&self.fit)
    }

    fn distance(&self, other: &Self) -> Result<DistanceValue> {
        if self.config.num_scales != other.config.num_scales
            || self.config.scale_range != other.config.scale_range
        {
            return Err(Error::IncompatibleInstances(
                "wavelet: scale grids differ".to_string(),
            ));
        }
        check_same_fit_range(Self::name(), self.config.fit_range, other.config.fit_range)?;
        let d = slope_t_distance(&self.fit, &other.fit)?;
        DistanceValue::scalar("slope", d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, StandardNormal};

    fn noise_image(seed: u64) -> Dataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = Array2::from_shape_fn((48, 48), |_| {
            <StandardNormal as Distribution<f64>>::sample(&StandardNormal, &mut rng)
        });
        Dataset::from_image(data, 1.0).unwrap()
    }

    #[test]
    fn test_kernel_is_zero_mean() {
        let k = mexican_hat((32, 32), 3.0);
        let mean = k.iter().sum::<f64>() / 1024.0;
        assert!(mean.abs() < 1e-12);
    }

    #[test]
    fn test_response_has_requested_scales() {
        let w = Wavelet::compute(&noise_image(1), &WaveletConfig::default()).unwrap();
        assert_eq!(w.response().len(), 10);
        assert!(w.response().x[0] >= 2.0);
    }

    #[test]
    fn test_rescaling_preserves_slope() {
        let ds = noise_image(2);
        let scaled_data = ds
            .data()
            .clone()
            .into_dimensionality::<Ix2>()
            .unwrap()
            .mapv(|v| 7.0 * v);
        let scaled = Dataset::from_image(scaled_data, 1.0).unwrap();
        let cfg = WaveletConfig::default();
        let a = Wavelet::compute(&ds, &cfg).unwrap();
        let b = Wavelet::compute(&scaled, &cfg).unwrap();
        assert_relative_eq!(a.slope().unwrap(), b.slope().unwrap(), epsilon = 1e-9);
        assert!(a.distance(&b).unwrap().combined < 1e-8);
    }

    #[test]
    fn test_self_distance_and_symmetry() {
        let a = Wavelet::compute(&noise_image(3), &WaveletConfig::default()).unwrap();
        let b = Wavelet::compute(&noise_image(4), &WaveletConfig::default()).unwrap();
        assert!(a.distance(&a).unwrap().combined < 1e-12);
        let dab = a.distance(&b).unwrap().combined;
        let dba = b.distance(&a).unwrap().combined;
        assert!((dab - dba).abs() < 1e-12);
    }

    #[test]
    fn test_scale_grid_mismatch_is_incompatible() {
        let ds = noise_image(5);
        let a = Wavelet::compute(&ds, &WaveletConfig::default()).unwrap();
        let b = Wavelet::compute(
            &ds,
            &WaveletConfig { num_scales: 12, ..WaveletConfig::default() },
        )
        .unwrap();
        assert_eq!(a.distance(&b).unwrap_err().kind(), "IncompatibleInstances");
    }
}
