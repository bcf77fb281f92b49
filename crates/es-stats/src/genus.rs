//! Genus statistic.
//!
//! Thresholds the intensity field at a ladder of quantile levels and counts
//! the topology of each excursion set: the number of isolated high regions
//! minus the number of isolated low regions (4-connected). The threshold
//! ladder is recomputed per dataset from its own intensity distribution and
//! the curve is expressed against the standardized threshold, so curves
//! from differently calibrated maps share a domain.

use ndarray::{Array2, Ix2};
use serde::{Deserialize, Serialize};

use es_core::{Curve, Dataset, Error, Result};

use crate::fourier::{convolve2, wrap_delta};
use crate::resample::curve_l1_distance;
use crate::statistic::{DistanceValue, Statistic, StatisticName};

const MIN_IMAGE_DIM: usize = 16;
const MIN_VALID_PIXELS: usize = 100;
const MIN_THRESHOLDS: usize = 5;
const DISTANCE_GRID: usize = 100;

/// Configuration for [`Genus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenusConfig {
    /// Number of threshold levels.
    pub num_thresholds: usize,
    /// Quantile span of the threshold ladder, in percent.
    pub percentile_range: (f64, f64),
    /// Optional Gaussian pre-smoothing scale in pixels.
    pub smoothing_scale: Option<f64>,
}

impl Default for GenusConfig {
    fn default() -> Self {
        Self { num_thresholds: 50, percentile_range: (1.0, 99.0), smoothing_scale: None }
    }
}

/// Genus instance: genus vs standardized threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genus {
    config: GenusConfig,
    curve: Curve,
}

impl Genus {
    /// Genus vs standardized threshold `(t - mean) / std`.
    pub fn curve(&self) -> &Curve {
        &self.curve
    }
}

/// Count 4-connected components of `flags` via breadth-first flood fill.
fn count_components(flags: &Array2<bool>) -> usize {
    let (ny, nx) = flags.dim();
    let mut seen = Array2::from_elem((ny, nx), false);
    let mut stack = Vec::new();
    let mut count = 0usize;
    for y in 0..ny {
        for x in 0..nx {
            if !flags[[y, x]] || seen[[y, x]] {
                continue;
            }
            count += 1;
            seen[[y, x]] = true;
            stack.push((y, x));
            while let Some((cy, cx)) = stack.pop() {
                let mut visit = |ny_: usize, nx_: usize| {
                    if flags[[ny_, nx_]] && !seen[[ny_, nx_]] {
                        seen[[ny_, nx_]] = true;
                        stack.push((ny_, nx_));
                    }
                };
                if cy > 0 {
                    visit(cy - 1, cx);
                }
                if cy + 1 < ny {
                    visit(cy + 1, cx);
                }
                if cx > 0 {
                    visit(cy, cx - 1);
                }
                if cx + 1 < nx {
                    visit(cy, cx + 1);
                }
            }
        }
    }
    count
}

/// Quantile of sorted samples by linear interpolation (`q` in `[0, 1]`).
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let i = pos.floor() as usize;
    let j = pos.ceil() as usize;
    if i == j {
        sorted[i]
    } else {
        let t = pos - i as f64;
        (1.0 - t) * sorted[i] + t * sorted[j]
    }
}

impl Statistic for Genus {
    type Config = GenusConfig;

    fn name() -> StatisticName {
        StatisticName::Genus
    }

    fn compute(dataset: &Dataset, config: &Self::Config) -> Result<Self> {
        if config.num_thresholds < MIN_THRESHOLDS {
            return Err(Error::Configuration(format!(
                "num_thresholds must be at least {MIN_THRESHOLDS}, got {}",
                config.num_thresholds
            )));
        }
        let (p_lo, p_hi) = config.percentile_range;
        if !(p_lo >= 0.0 && p_hi <= 100.0 && p_lo < p_hi) {
            return Err(Error::Configuration(format!(
                "percentile_range must satisfy 0 <= low < high <= 100, got ({p_lo}, {p_hi})"
            )));
        }
        if let Some(s) = config.smoothing_scale {
            if !(s.is_finite() && s > 0.0) {
                return Err(Error::Configuration(format!(
                    "smoothing_scale must be positive, got {s}"
                )));
            }
        }

        let plane = dataset.to_plane()?;
        let (raw, mask) = plane.image_view()?;
        let (ny, nx) = raw.dim();
        if ny.min(nx) < MIN_IMAGE_DIM {
            return Err(Error::DataValidation(format!(
                "genus needs at least a {MIN_IMAGE_DIM}x{MIN_IMAGE_DIM} image, got {ny}x{nx}"
            )));
        }
        if plane.n_valid() < MIN_VALID_PIXELS {
            return Err(Error::insufficient("genus", MIN_VALID_PIXELS, plane.n_valid()));
        }

        // Optional mask-weighted Gaussian smoothing before thresholding.
        let field: Array2<f64> = match config.smoothing_scale {
            Some(sigma) => {
                let img = plane
                    .filled(0.0)
                    .into_dimensionality::<Ix2>()
                    .expect("plane is 2D");
                let weights =
                    Array2::from_shape_fn((ny, nx), |idx| if mask[idx] { 1.0 } else { 0.0 });
                let mut kernel = Array2::from_shape_fn((ny, nx), |(y, x)| {
                    let dy = wrap_delta(y, ny);
                    let dx = wrap_delta(x, nx);
                    (-(dy * dy + dx * dx) / (2.0 * sigma * sigma)).exp()
                });
                let total: f64 = kernel.iter().sum();
                kernel.mapv_inplace(|v| v / total);
                let num = convolve2(&(&img * &weights), &kernel);
                let den = convolve2(&weights, &kernel);
                Array2::from_shape_fn((ny, nx), |idx| {
                    if den[idx] > 1e-6 {
                        num[idx] / den[idx]
                    } else {
                        0.0
                    }
                })
            }
            None => raw.to_owned(),
        };

        let mut valid: Vec<f64> = Vec::with_capacity(plane.n_valid());
        for (idx, &ok) in mask.indexed_iter() {
            if ok {
                valid.push(field[idx]);
            }
        }
        valid.sort_by(f64::total_cmp);
        let n_val = valid.len() as f64;
        let mean = valid.iter().sum::<f64>() / n_val;
        let var = valid.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n_val;
        let std = var.sqrt();
        if !(std.is_finite() && std > 0.0) {
            return Err(Error::DataValidation(
                "genus is undefined for a constant field".to_string(),
            ));
        }

        let n_thr = config.num_thresholds;
        let mut xs = Vec::with_capacity(n_thr);
        let mut ys = Vec::with_capacity(n_thr);
        let mut last_threshold = f64::NEG_INFINITY;
        for i in 0..n_thr {
            let q = (p_lo + (p_hi - p_lo) * i as f64 / (n_thr - 1) as f64) / 100.0;
            let threshold = quantile_sorted(&valid, q);
            // Quantiles of discrete data can repeat; keep the ladder
            // strictly increasing.
            if threshold <= last_threshold {
                continue;
            }
            last_threshold = threshold;

            let high = Array2::from_shape_fn((ny, nx), |idx| mask[idx] && field[idx] > threshold);
            let low = Array2::from_shape_fn((ny, nx), |idx| mask[idx] && field[idx] < threshold);
            let genus = count_components(&high) as f64 - count_components(&low) as f64;
            xs.push((threshold - mean) / std);
            ys.push(genus);
        }
        if xs.len() < MIN_THRESHOLDS {
            return Err(Error::insufficient("genus thresholds", MIN_THRESHOLDS, xs.len()));
        }

        Ok(Self { config: config.clone(), curve: Curve::new(xs, ys, None)? })
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }

    fn distance(&self, other: &Self) -> Result<DistanceValue> {
        if self.config.smoothing_scale != other.config.smoothing_scale
            || self.config.percentile_range != other.config.percentile_range
        {
            return Err(Error::IncompatibleInstances(
                "genus: threshold ladders are built differently".to_string(),
            ));
        }
        let d = curve_l1_distance(&self.curve, &other.curve, DISTANCE_GRID)?;
        DistanceValue::scalar("curve", d)
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
    fn test_count_components() {
        let mut flags = Array2::from_elem((5, 5), false);
        flags[[0, 0]] = true;
        flags[[0, 1]] = true;
        flags[[2, 2]] = true;
        flags[[4, 4]] = true;
        // Diagonal contact does not connect under 4-connectivity.
        flags[[3, 3]] = true;
        assert_eq!(count_components(&flags), 3);
    }

    #[test]
    fn test_genus_sign_convention() {
        // Two bright peaked blobs on a gently sloped background: at high
        // thresholds only the blob islands survive, so the genus must turn
        // positive somewhere on the ladder.
        let mut data =
            Array2::from_shape_fn((32, 32), |(y, x)| 1e-4 * (y as f64 + 32.0 * x as f64));
        for (cy, cx) in [(8usize, 8usize), (24, 24)] {
            for dy in -2i64..=2 {
                for dx in -2i64..=2 {
                    let v = 10.0 - (dy.abs() + dx.abs()) as f64;
                    data[[(cy as i64 + dy) as usize, (cx as i64 + dx) as usize]] = v;
                }
            }
        }
        let ds = Dataset::from_image(data, 1.0).unwrap();
        let g = Genus::compute(&ds, &GenusConfig::default()).unwrap();
        assert!(
            g.curve().y.iter().any(|&v| v > 0.0),
            "expected island-dominated genus at some threshold: {:?}",
            g.curve().y
        );
    }

    #[test]
    fn test_self_distance_and_symmetry() {
        let a = Genus::compute(&noise_image(1), &GenusConfig::default()).unwrap();
        let b = Genus::compute(&noise_image(2), &GenusConfig::default()).unwrap();
        assert!(a.distance(&a).unwrap().combined < 1e-12);
        let dab = a.distance(&b).unwrap().combined;
        let dba = b.distance(&a).unwrap().combined;
        assert!((dab - dba).abs() < 1e-12);
    }

    #[test]
    fn test_smoothing_mismatch_is_incompatible() {
        let ds = noise_image(3);
        let a = Genus::compute(&ds, &GenusConfig::default()).unwrap();
        let b = Genus::compute(
            &ds,
            &GenusConfig { smoothing_scale: Some(2.0), ..GenusConfig::default() },
        )
        .unwrap();
        assert_eq!(a.distance(&b).unwrap_err().kind(), "IncompatibleInstances");
    }

    #[test]
    fn test_constant_field_is_rejected() {
        let ds = Dataset::from_image(Array2::from_elem((32, 32), 1.0), 1.0).unwrap();
        assert!(Genus::compute(&ds, &GenusConfig::default()).is_err());
    }
}
