//! Modified velocity centroids.
//!
//! The power spectrum of the mean-subtracted, intensity-weighted velocity
//! centroid map of a cube. Reuses the plane-spectrum pipeline of
//! [`crate::power_spectrum`]; only the map construction differs.

use ndarray::Ix2;
use serde::{Deserialize, Serialize};

use es_core::{Curve, Dataset, Error, FitResult, Result};

use crate::fourier::{power_spectrum_2d, Apodization, RadialBinning};
use crate::power_spectrum::fit_radial_spectrum;
use crate::resample::slope_t_distance;
use crate::statistic::{check_same_fit_range, DistanceValue, Statistic, StatisticName};

const MIN_IMAGE_DIM: usize = 16;
const MIN_VALID_PIXELS: usize = 100;

/// Configuration for [`Mvc`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MvcConfig {
    /// Pre-transform taper.
    pub apodization: Apodization,
    /// Radial binning of the 2D spectrum.
    pub binning: RadialBinning,
    /// Fit interval in cycles per pixel; defaults per dataset.
    pub fit_range: Option<(f64, f64)>,
    /// Weight the fit by the per-bin scatter.
    pub weighted_fit: bool,
}

impl Default for MvcConfig {
    fn default() -> Self {
        Self {
            apodization: Apodization::default(),
            binning: RadialBinning::default(),
            fit_range: None,
            weighted_fit: false,
        }
    }
}

/// Modified-velocity-centroid instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mvc {
    config: MvcConfig,
    spectrum: Curve,
    fit: FitResult,
    fit_range: (f64, f64),
}

impl Mvc {
    /// The azimuthally averaged centroid power spectrum.
    pub fn spectrum(&self) -> &Curve {
        &self.spectrum
    }

    /// Fitted spectral slope.
    pub fn slope(&self) -> Option<f64> {
        self.fit.slope()
    }
}

impl Statistic for Mvc {
    type Config = MvcConfig;

    fn name() -> StatisticName {
        StatisticName::Mvc
    }

    fn compute(dataset: &Dataset, config: &Self::Config) -> Result<Self> {
        config.apodization.validate()?;
        config.binning.validate()?;
        if let Some((lo, hi)) = config.fit_range {
            if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && lo < hi) {
                return Err(Error::Configuration(format!(
                    "fit_range must satisfy 0 < low < high, got ({lo}, {hi})"
                )));
            }
        }
        if !dataset.is_cube() {
            return Err(Error::DataValidation(
                "mvc requires a spectral cube".to_string(),
            ));
        }

        let centroid = dataset.centroid_map()?;
        let (data, _) = centroid.image_view()?;
        let (ny, nx) = data.dim();
        if ny.min(nx) < MIN_IMAGE_DIM {
            return Err(Error::DataValidation(format!(
                "mvc needs at least a {MIN_IMAGE_DIM}x{MIN_IMAGE_DIM} map, got {ny}x{nx}"
            )));
        }
        if centroid.n_valid() < MIN_VALID_PIXELS {
            return Err(Error::insufficient("mvc", MIN_VALID_PIXELS, centroid.n_valid()));
        }

        // Subtract the mean centroid over valid pixels so the DC leakage of
        // the bulk velocity does not contaminate low frequencies.
        let mean = centroid.valid_values().iter().sum::<f64>() / centroid.n_valid() as f64;
        let mut map = centroid
            .filled(mean)
            .into_dimensionality::<Ix2>()
            .expect("centroid map is 2D");
        map.mapv_inplace(|v| v - mean);

        let ps2d = power_spectrum_2d(&map, &config.apodization)?;
        let (spectrum, fit, fit_range) = fit_radial_spectrum(
            &ps2d,
            &config.binning,
            config.fit_range,
            config.weighted_fit,
            "mvc",
        )?;

        Ok(Self { config: config.clone(), spectrum, fit, fit_range })
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }

    fn fit(&self) -> Option<&FitResult> {
        Some(&self.fit)
    }

    fn distance(&self, other: &Self) -> Result<DistanceValue> {
        check_same_fit_range(Self::name(), self.config.fit_range, other.config.fit_range)?;
        if self.config.binning.log_spacing != other.config.binning.log_spacing {
            return Err(Error::IncompatibleInstances(
                "mvc: radial bin spacing differs".to_string(),
            ));
        }
        let d = slope_t_distance(&self.fit, &other.fit)?;
        DistanceValue::scalar("slope", d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, StandardNormal};

    fn noise_cube(seed: u64, nc: usize, ny: usize, nx: usize) -> Dataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = Array3::from_shape_fn((nc, ny, nx), |_| {
            5.0 + <StandardNormal as Distribution<f64>>::sample(&StandardNormal, &mut rng)
        });
        Dataset::from_cube(data, 1.0, 1.0).unwrap()
    }

    #[test]
    fn test_requires_cube() {
        let img = ndarray::Array2::from_elem((32, 32), 1.0);
        let ds = Dataset::from_image(img, 1.0).unwrap();
        let err = Mvc::compute(&ds, &MvcConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "DataValidation");
    }

    #[test]
    fn test_self_distance_is_zero() {
        let ds = noise_cube(4, 8, 32, 32);
        let a = Mvc::compute(&ds, &MvcConfig::default()).unwrap();
        let b = Mvc::compute(&ds, &MvcConfig::default()).unwrap();
        assert!(a.distance(&b).unwrap().combined < 1e-12);
    }

    #[test]
    fn test_symmetry() {
        let a = Mvc::compute(&noise_cube(1, 8, 32, 32), &MvcConfig::default()).unwrap();
        let b = Mvc::compute(&noise_cube(2, 8, 32, 32), &MvcConfig::default()).unwrap();
        let dab = a.distance(&b).unwrap().combined;
        let dba = b.distance(&a).unwrap().combined;
        assert!((dab - dba).abs() < 1e-12);
    }
}
