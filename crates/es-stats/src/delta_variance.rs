//! Delta-variance.
//!
//! Filters the image with a core-minus-annulus ("French hat") kernel at a
//! ladder of lags and records the variance of the filtered map per lag.
//! The filtering is mask-weighted: core and annulus averages are formed
//! only from valid pixels, so irregular masks do not bias the variance.

use ndarray::{Array2, Ix2};
use serde::{Deserialize, Serialize};

use es_core::{Curve, Dataset, Error, FitResult, Result};

use crate::fitting::fit_power_law;
use crate::fourier::{convolve2, wrap_delta};
use crate::resample::{curve_l1_distance, slope_t_distance};
use crate::statistic::{check_same_fit_range, DistanceValue, Statistic, StatisticName};

const MIN_IMAGE_DIM: usize = 16;
const MIN_VALID_PIXELS: usize = 100;
const MIN_LAGS: usize = 3;
const WEIGHT_FLOOR: f64 = 1e-6;
const DISTANCE_GRID: usize = 50;

/// Configuration for [`DeltaVariance`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeltaVarianceConfig {
    /// Number of logarithmically spaced lags.
    pub num_lags: usize,
    /// Lag interval in pixels; defaults per dataset to `[3, min_dim / 4]`.
    pub lag_range: Option<(f64, f64)>,
    /// Fit interval in pixels; defaults to the full lag range.
    pub fit_range: Option<(f64, f64)>,
}

impl Default for DeltaVarianceConfig {
    fn default() -> Self {
        Self { num_lags: 10, lag_range: None, fit_range: None }
    }
}

/// Delta-variance instance: the variance-vs-lag curve and its fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaVariance {
    config: DeltaVarianceConfig,
    curve: Curve,
    fit: FitResult,
}

impl DeltaVariance {
    /// Delta-variance vs lag.
    pub fn curve(&self) -> &Curve {
        &self.curve
    }

    /// Fitted power-law slope of the delta-variance curve.
    pub fn slope(&self) -> Option<f64> {
        self.fit.slope()
    }
}

/// Top-hat kernel of the given radius band, wrap-layout, normalized to
/// unit sum. `r_in == 0` gives the filled core, otherwise an annulus.
fn tophat(shape: (usize, usize), r_in: f64, r_out: f64) -> Array2<f64> {
    let (ny, nx) = shape;
    let mut kernel = Array2::from_shape_fn((ny, nx), |(y, x)| {
        let dy = wrap_delta(y, ny);
        let dx = wrap_delta(x, nx);
        let r = (dy * dy + dx * dx).sqrt();
        if r >= r_in && r <= r_out {
            1.0
        } else {
            0.0
        }
    });
    let total: f64 = kernel.iter().sum();
    if total > 0.0 {
        kernel.mapv_inplace(|v| v / total);
    }
    kernel
}

impl Statistic for DeltaVariance {
    type Config = DeltaVarianceConfig;

    fn name() -> StatisticName {
        StatisticName::DeltaVariance
    }

    fn compute(dataset: &Dataset, config: &Self::Config) -> Result<Self> {
        if config.num_lags < MIN_LAGS {
            return Err(Error::Configuration(format!(
                "num_lags must be at least {MIN_LAGS}, got {}",
                config.num_lags
            )));
        }
        for (label, range) in [("lag_range", config.lag_range), ("fit_range", config.fit_range)] {
            if let Some((lo, hi)) = range {
                if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && lo < hi) {
                    return Err(Error::Configuration(format!(
                        "{label} must satisfy 0 < low < high, got ({lo}, {hi})"
                    )));
                }
            }
        }

        let plane = dataset.to_plane()?;
        let (_, mask) = plane.image_view()?;
        let (ny, nx) = mask.dim();
        let min_dim = ny.min(nx);
        if min_dim < MIN_IMAGE_DIM {
            return Err(Error::DataValidation(format!(
                "delta_variance needs at least a {MIN_IMAGE_DIM}x{MIN_IMAGE_DIM} image, got {ny}x{nx}"
            )));
        }
        if plane.n_valid() < MIN_VALID_PIXELS {
            return Err(Error::insufficient(
                "delta_variance",
                MIN_VALID_PIXELS,
                plane.n_valid(),
            ));
        }

        let (lag_lo, lag_hi) =
            config.lag_range.unwrap_or((3.0, (min_dim as f64 / 4.0).max(4.0)));
        if lag_hi > min_dim as f64 / 2.0 {
            return Err(Error::Configuration(format!(
                "largest lag {lag_hi} exceeds half the image dimension {min_dim}"
            )));
        }
        let n = config.num_lags;
        let lags: Vec<f64> = (0..n)
            .map(|i| {
                (lag_lo.ln() + (lag_hi.ln() - lag_lo.ln()) * i as f64 / (n - 1) as f64).exp()
            })
            .collect();

        let img = plane
            .filled(0.0)
            .into_dimensionality::<Ix2>()
            .expect("plane is 2D");
        let weights = Array2::from_shape_fn((ny, nx), |idx| if mask[idx] { 1.0 } else { 0.0 });
        let weighted_img = &img * &weights;

        let mut variances = Vec::with_capacity(n);
        for &lag in &lags {
            // Core radius lag/2, annulus out to 3/2 lag (area-matched
            // band), both mask-weighted averages.
            let core = tophat((ny, nx), 0.0, lag / 2.0);
            let annulus = tophat((ny, nx), lag / 2.0, 1.5 * lag);

            let core_num = convolve2(&weighted_img, &core);
            let core_den = convolve2(&weights, &core);
            let ann_num = convolve2(&weighted_img, &annulus);
            let ann_den = convolve2(&weights, &annulus);

            let mut sum = 0.0;
            let mut sum_sq = 0.0;
            let mut count = 0usize;
            for ((y, x), &ok) in mask.indexed_iter() {
                if !ok {
                    continue;
                }
                let cd = core_den[[y, x]];
                let ad = ann_den[[y, x]];
                if cd < WEIGHT_FLOOR || ad < WEIGHT_FLOOR {
                    continue;
                }
                let delta = core_num[[y, x]] / cd - ann_num[[y, x]] / ad;
                sum += delta;
                sum_sq += delta * delta;
                count += 1;
            }
            if count < MIN_VALID_PIXELS / 2 {
                return Err(Error::insufficient(
                    "delta_variance filtered map",
                    MIN_VALID_PIXELS / 2,
                    count,
                ));
            }
            let mean = sum / count as f64;
            variances.push((sum_sq / count as f64 - mean * mean).max(0.0));
        }
        let curve = Curve::new(lags, variances, None)?;

        let section = match config.fit_range {
            Some((lo, hi)) => curve.restrict(lo, hi)?,
            None => curve.clone(),
        };
        let fit = fit_power_law(&section.x, &section.y, None);

        Ok(Self { config: config.clone(), curve, fit })
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }

    fn fit(&self) -> Option<&FitResult> {
        Some(&self.fit)
    }

    fn distance(&self, other: &Self) -> Result<DistanceValue> {
        if self.config.num_lags != other.config.num_lags
            || self.config.lag_range != other.config.lag_range
        {
            return Err(Error::IncompatibleInstances(
                "delta_variance: lag grids differ".to_string(),
            ));
        }
        check_same_fit_range(Self::name(), self.config.fit_range, other.config.fit_range)?;

        // Curve term: compare in log space when both curves allow it, so
        // the decades-spanning tail does not dominate the discrepancy.
        let log_ok = self.curve.y.iter().chain(other.curve.y.iter()).all(|&v| v > 0.0);
        let (ca, cb) = if log_ok {
            (
                Curve::new(self.curve.x.clone(), self.curve.y.iter().map(|v| v.log10()).collect(), None)?,
                Curve::new(other.curve.x.clone(), other.curve.y.iter().map(|v| v.log10()).collect(), None)?,
            )
        } else {
            (self.curve.clone(), other.curve.clone())
        };
        let d_curve = curve_l1_distance(&ca, &cb, DISTANCE_GRID)?;

        match slope_t_distance(&self.fit, &other.fit) {
            Ok(d_slope) => {
                DistanceValue::from_components(vec![("curve", d_curve), ("slope", d_slope)])
            }
            Err(Error::InvalidFit(msg)) => {
                log::warn!("delta_variance: falling back to curve-only distance: {msg}");
                DistanceValue::scalar("curve", d_curve)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn test_variances_positive_on_noise() {
        let dv = DeltaVariance::compute(&noise_image(1), &DeltaVarianceConfig::default()).unwrap();
        assert!(dv.curve().y.iter().all(|&v| v > 0.0));
        assert_eq!(dv.curve().len(), 10);
    }

    #[test]
    fn test_white_noise_variance_decreases_with_lag() {
        // Averaging uncorrelated noise over larger apertures shrinks the
        // fluctuations of the filtered map.
        let dv = DeltaVariance::compute(&noise_image(2), &DeltaVarianceConfig::default()).unwrap();
        let c = dv.curve();
        assert!(c.y[0] > c.y[c.len() - 1]);
    }

    #[test]
    fn test_self_distance_and_symmetry() {
        let a = DeltaVariance::compute(&noise_image(3), &DeltaVarianceConfig::default()).unwrap();
        let b = DeltaVariance::compute(&noise_image(4), &DeltaVarianceConfig::default()).unwrap();
        assert!(a.distance(&a).unwrap().combined < 1e-12);
        let dab = a.distance(&b).unwrap().combined;
        let dba = b.distance(&a).unwrap().combined;
        assert!((dab - dba).abs() < 1e-12);
    }

    #[test]
    fn test_lag_grid_mismatch_is_incompatible() {
        let ds = noise_image(5);
        let a = DeltaVariance::compute(&ds, &DeltaVarianceConfig::default()).unwrap();
        let b = DeltaVariance::compute(
            &ds,
            &DeltaVarianceConfig { num_lags: 12, ..DeltaVarianceConfig::default() },
        )
        .unwrap();
        assert_eq!(a.distance(&b).unwrap_err().kind(), "IncompatibleInstances");
    }

    #[test]
    fn test_masked_pixels_are_excluded() {
        let ds = noise_image(6);
        let mut mask = Array2::from_elem((48, 48), true);
        for y in 0..10 {
            for x in 0..48 {
                mask[[y, x]] = false;
            }
        }
        let masked = ds.with_mask(mask.into_dyn()).unwrap();
        // Still computable with a band masked out.
        let dv = DeltaVariance::compute(&masked, &DeltaVarianceConfig::default()).unwrap();
        assert!(dv.curve().y.iter().all(|&v| v.is_finite()));
    }
}
