//! Local statistical moments.
//!
//! Slides a circular window over the image and computes the mean,
//! variance, skewness, and kurtosis of the valid samples it covers. The
//! descriptor is the pair of standardized histograms of the skewness and
//! kurtosis maps; heavy tails and asymmetry of small-scale structure show
//! up here before they move any global statistic.

use serde::{Deserialize, Serialize};

use es_core::{Dataset, Error, Histogram, Result};

use crate::resample::hellinger_distance;
use crate::statistic::{DistanceValue, Statistic, StatisticName};

const MIN_IMAGE_DIM: usize = 16;
const MIN_WINDOW_SAMPLES: usize = 8;
const MIN_CONTRIBUTING: usize = 100;
const HIST_SPAN: f64 = 5.0;

/// Configuration for [`Moments`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MomentsConfig {
    /// Window radius in pixels.
    pub radius: usize,
    /// Bins of the standardized moment histograms.
    pub num_bins: usize,
}

impl Default for MomentsConfig {
    fn default() -> Self {
        Self { radius: 5, num_bins: 20 }
    }
}

/// Local-moments instance: standardized skewness and kurtosis histograms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Moments {
    config: MomentsConfig,
    skewness_histogram: Histogram,
    kurtosis_histogram: Histogram,
    n_contributing: usize,
}

impl Moments {
    /// Standardized histogram of the local skewness map.
    pub fn skewness_histogram(&self) -> &Histogram {
        &self.skewness_histogram
    }

    /// Standardized histogram of the local kurtosis map.
    pub fn kurtosis_histogram(&self) -> &Histogram {
        &self.kurtosis_histogram
    }

    /// Number of pixels whose window carried enough valid samples.
    pub fn n_contributing(&self) -> usize {
        self.n_contributing
    }
}

/// Standardize values by their own mean and scatter, then bin over the
/// fixed `[-HIST_SPAN, HIST_SPAN]` range so histograms from different
/// datasets share edges.
fn standardized_histogram(values: &[f64], num_bins: usize) -> Result<Histogram> {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let std = var.sqrt();
    let z: Vec<f64> = if std > 0.0 {
        values.iter().map(|v| (v - mean) / std).collect()
    } else {
        // A constant moment map collapses into the central bin.
        vec![0.0; values.len()]
    };
    Histogram::from_values(&z, -HIST_SPAN, HIST_SPAN, num_bins)
}

impl Statistic for Moments {
    type Config = MomentsConfig;

    fn name() -> StatisticName {
        StatisticName::Moments
    }

    fn compute(dataset: &Dataset, config: &Self::Config) -> Result<Self> {
        if config.radius == 0 {
            return Err(Error::Configuration("radius must be at least 1".to_string()));
        }
        if config.num_bins < 2 {
            return Err(Error::Configuration(format!(
                "num_bins must be at least 2, got {}",
                config.num_bins
            )));
        }

        let plane = dataset.to_plane()?;
        let (data, mask) = plane.image_view()?;
        let (ny, nx) = data.dim();
        if ny.min(nx) < MIN_IMAGE_DIM {
            return Err(Error::DataValidation(format!(
                "moments needs at least a {MIN_IMAGE_DIM}x{MIN_IMAGE_DIM} image, got {ny}x{nx}"
            )));
        }
        if 2 * config.radius >= ny.min(nx) {
            return Err(Error::Configuration(format!(
                "window radius {} too large for a {ny}x{nx} image",
                config.radius
            )));
        }

        // Circular window offsets.
        let r = config.radius as i64;
        let r2 = (config.radius * config.radius) as i64;
        let mut offsets = Vec::new();
        for dy in -r..=r {
            for dx in -r..=r {
                if dy * dy + dx * dx <= r2 {
                    offsets.push((dy, dx));
                }
            }
        }

        let mut skew = Vec::new();
        let mut kurt = Vec::new();
        for y in 0..ny {
            for x in 0..nx {
                if !mask[[y, x]] {
                    continue;
                }
                let mut window = Vec::with_capacity(offsets.len());
                for &(dy, dx) in &offsets {
                    let yy = y as i64 + dy;
                    let xx = x as i64 + dx;
                    if yy < 0 || xx < 0 || yy >= ny as i64 || xx >= nx as i64 {
                        continue;
                    }
                    let (yy, xx) = (yy as usize, xx as usize);
                    if mask[[yy, xx]] {
                        window.push(data[[yy, xx]]);
                    }
                }
                if window.len() < MIN_WINDOW_SAMPLES {
                    continue;
                }
                let n = window.len() as f64;
                let mean = window.iter().sum::<f64>() / n;
                let mut m2 = 0.0;
                let mut m3 = 0.0;
                let mut m4 = 0.0;
                for v in &window {
                    let d = v - mean;
                    let d2 = d * d;
                    m2 += d2;
                    m3 += d2 * d;
                    m4 += d2 * d2;
                }
                m2 /= n;
                m3 /= n;
                m4 /= n;
                if m2 <= 0.0 {
                    continue;
                }
                skew.push(m3 / m2.powf(1.5));
                kurt.push(m4 / (m2 * m2) - 3.0);
            }
        }
        if skew.len() < MIN_CONTRIBUTING {
            return Err(Error::insufficient("moments", MIN_CONTRIBUTING, skew.len()));
        }

        Ok(Self {
            config: config.clone(),
            skewness_histogram: standardized_histogram(&skew, config.num_bins)?,
            kurtosis_histogram: standardized_histogram(&kurt, config.num_bins)?,
            n_contributing: skew.len(),
        })
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }

    fn distance(&self, other: &Self) -> Result<DistanceValue> {
        if self.config.radius != other.config.radius {
            return Err(Error::IncompatibleInstances(format!(
                "moments: window radii differ ({} vs {})",
                self.config.radius, other.config.radius
            )));
        }
        if self.config.num_bins != other.config.num_bins {
            return Err(Error::IncompatibleInstances(
                "moments: histogram bin counts differ".to_string(),
            ));
        }
        let d_skew = hellinger_distance(&self.skewness_histogram, &other.skewness_histogram)?;
        let d_kurt = hellinger_distance(&self.kurtosis_histogram, &other.kurtosis_histogram)?;
        DistanceValue::from_components(vec![("skewness", d_skew), ("kurtosis", d_kurt)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, StandardNormal};

    fn noise_image(seed: u64) -> Dataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = Array2::from_shape_fn((40, 40), |_| {
            <StandardNormal as Distribution<f64>>::sample(&StandardNormal, &mut rng)
        });
        Dataset::from_image(data, 1.0).unwrap()
    }

    #[test]
    fn test_every_interior_pixel_contributes_on_clean_input() {
        let m = Moments::compute(&noise_image(1), &MomentsConfig::default()).unwrap();
        // radius-5 windows clipped at the border still hold >= 8 samples,
        // so all 1600 pixels contribute.
        assert_eq!(m.n_contributing(), 1600);
    }

    #[test]
    fn test_self_distance_and_symmetry() {
        let a = Moments::compute(&noise_image(2), &MomentsConfig::default()).unwrap();
        let b = Moments::compute(&noise_image(3), &MomentsConfig::default()).unwrap();
        assert!(a.distance(&a).unwrap().combined < 1e-12);
        let dab = a.distance(&b).unwrap().combined;
        let dba = b.distance(&a).unwrap().combined;
        assert!((dab - dba).abs() < 1e-12);
        assert_eq!(a.distance(&b).unwrap().components.len(), 2);
    }

    #[test]
    fn test_radius_mismatch_is_incompatible() {
        let ds = noise_image(4);
        let a = Moments::compute(&ds, &MomentsConfig::default()).unwrap();
        let b =
            Moments::compute(&ds, &MomentsConfig { radius: 3, ..MomentsConfig::default() })
                .unwrap();
        assert_eq!(a.distance(&b).unwrap_err().kind(), "IncompatibleInstances");
    }

    #[test]
    fn test_heavily_masked_input_is_insufficient() {
        let ds = noise_image(5);
        let mut mask = Array2::from_elem((40, 40), false);
        for i in 0..10 {
            mask[[i, i]] = true;
        }
        let masked = ds.with_mask(mask.into_dyn()).unwrap();
        let err = Moments::compute(&masked, &MomentsConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "InsufficientData");
    }
}
