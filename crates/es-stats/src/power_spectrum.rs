//! Spatial power spectrum.
//!
//! Apodize, transform, azimuthally average, and fit a power law to the 1D
//! spectrum over a strict sub-interval of the sampled frequency range. Cube
//! input is collapsed to its integrated-intensity map first.
//!
//! The distance between two power spectra is the t-statistic of their
//! fitted slopes, which makes the metric dimensionless and invariant under
//! a uniform intensity rescaling of either input.

use ndarray::Ix2;
use serde::{Deserialize, Serialize};

use es_core::{Curve, Dataset, Error, FitResult, Result};

use crate::fitting::{fit_power_law, log_weights_from_scatter};
use crate::fourier::{default_fit_range, power_spectrum_2d, radial_average, Apodization, RadialBinning};
use crate::resample::slope_t_distance;
use crate::statistic::{check_same_fit_range, DistanceValue, Statistic, StatisticName};

const MIN_IMAGE_DIM: usize = 16;
const MIN_VALID_PIXELS: usize = 100;
const MIN_FIT_POINTS: usize = 10;

/// Configuration for [`PowerSpectrum`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PowerSpectrumConfig {
    /// Pre-transform taper.
    pub apodization: Apodization,
    /// Radial binning of the 2D spectrum.
    pub binning: RadialBinning,
    /// Fit interval in cycles per pixel; defaults per dataset to
    /// `[1/(0.5 * max_dim), 0.5]`.
    pub fit_range: Option<(f64, f64)>,
    /// Weight the fit by the per-bin scatter of the radial average.
    pub weighted_fit: bool,
}

impl Default for PowerSpectrumConfig {
    fn default() -> Self {
        Self {
            apodization: Apodization::default(),
            binning: RadialBinning::default(),
            fit_range: None,
            weighted_fit: false,
        }
    }
}

impl PowerSpectrumConfig {
    fn validate(&self) -> Result<()> {
        self.apodization.validate()?;
        self.binning.validate()?;
        if let Some((lo, hi)) = self.fit_range {
            if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && lo < hi) {
                return Err(Error::Configuration(format!(
                    "fit_range must satisfy 0 < low < high, got ({lo}, {hi})"
                )));
            }
        }
        Ok(())
    }
}

/// Spatial power spectrum instance: the azimuthally averaged spectrum and
/// its power-law fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerSpectrum {
    config: PowerSpectrumConfig,
    spectrum: Curve,
    fit: FitResult,
    fit_range: (f64, f64),
}

impl PowerSpectrum {
    /// The azimuthally averaged 1D spectrum (full frequency range).
    pub fn spectrum(&self) -> &Curve {
        &self.spectrum
    }

    /// Resolved fit interval in cycles per pixel.
    pub fn fit_range(&self) -> (f64, f64) {
        self.fit_range
    }

    /// Fitted spectral slope.
    pub fn slope(&self) -> Option<f64> {
        self.fit.slope()
    }

    /// 1-sigma uncertainty on the slope.
    pub fn slope_uncertainty(&self) -> Option<f64> {
        self.fit.slope_uncertainty()
    }
}

/// Shared pipeline tail for the plane-spectrum statistics: radially average
/// a 2D power spectrum, restrict to the fit interval, and fit a power law.
pub(crate) fn fit_radial_spectrum(
    ps2d: &ndarray::Array2<f64>,
    binning: &RadialBinning,
    requested_range: Option<(f64, f64)>,
    weighted: bool,
    context: &str,
) -> Result<(Curve, FitResult, (f64, f64))> {
    let spectrum = radial_average(ps2d, binning)?;
    let range = requested_range.unwrap_or_else(|| default_fit_range(ps2d.dim()));
    let section = spectrum.restrict(range.0, range.1)?;
    if section.len() < MIN_FIT_POINTS {
        return Err(Error::insufficient(context, MIN_FIT_POINTS, section.len()));
    }
    let weights = if weighted {
        let w = section
            .stddev
            .as_ref()
            .and_then(|sd| log_weights_from_scatter(&section.y, sd));
        if w.is_none() {
            log::warn!("{context}: per-bin scatter unusable for weighting; fitting unweighted");
        }
        w
    } else {
        None
    };
    let fit = fit_power_law(&section.x, &section.y, weights.as_deref());
    Ok((spectrum, fit, range))
}

impl Statistic for PowerSpectrum {
    type Config = PowerSpectrumConfig;

    fn name() -> StatisticName {
        StatisticName::PowerSpectrum
    }

    fn compute(dataset: &Dataset, config: &Self::Config) -> Result<Self> {
        config.validate()?;
        let plane = dataset.to_plane()?;
        let (data, _) = plane.image_view()?;
        let (ny, nx) = data.dim();
        if ny.min(nx) < MIN_IMAGE_DIM {
            return Err(Error::DataValidation(format!(
                "power_spectrum needs at least a {MIN_IMAGE_DIM}x{MIN_IMAGE_DIM} image, got {ny}x{nx}"
            )));
        }
        if plane.n_valid() < MIN_VALID_PIXELS {
            return Err(Error::insufficient("power_spectrum", MIN_VALID_PIXELS, plane.n_valid()));
        }

        let img = plane
            .filled(0.0)
            .into_dimensionality::<Ix2>()
            .expect("plane is 2D");
        let ps2d = power_spectrum_2d(&img, &config.apodization)?;
        let (spectrum, fit, fit_range) = fit_radial_spectrum(
            &ps2d,
            &config.binning,
            config.fit_range,
            config.weighted_fit,
            "power_spectrum",
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
                "power_spectrum: radial bin spacing differs".to_string(),
            ));
        }
        let d = slope_t_distance(&self.fit, &other.fit)?;
        DistanceValue::scalar("slope", d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, StandardNormal};

    fn noise_image(seed: u64, ny: usize, nx: usize) -> Dataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = Array2::from_shape_fn((ny, nx), |_| {
            <StandardNormal as Distribution<f64>>::sample(&StandardNormal, &mut rng)
        });
        Dataset::from_image(data, 1.0).unwrap()
    }

    #[test]
    fn test_white_noise_slope_is_near_flat() {
        let ds = noise_image(7, 64, 64);
        let ps = PowerSpectrum::compute(&ds, &PowerSpectrumConfig::default()).unwrap();
        let slope = ps.slope().unwrap();
        assert!(slope.abs() < 0.5, "white-noise spectrum should be near flat, got {slope}");
        assert!(ps.fit().unwrap().is_valid());
    }

    #[test]
    fn test_compute_is_deterministic() {
        let ds = noise_image(11, 32, 32);
        let a = PowerSpectrum::compute(&ds, &PowerSpectrumConfig::default()).unwrap();
        let b = PowerSpectrum::compute(&ds, &PowerSpectrumConfig::default()).unwrap();
        assert_eq!(a.spectrum().y, b.spectrum().y);
        assert_eq!(a.fit().unwrap().parameters, b.fit().unwrap().parameters);
    }

    #[test]
    fn test_slope_invariant_under_rescaling() {
        let ds = noise_image(3, 48, 48);
        let scaled = Dataset::from_image(
            ds.data().clone().into_dimensionality::<Ix2>().unwrap().mapv(|v| 25.0 * v),
            1.0,
        )
        .unwrap();
        let cfg = PowerSpectrumConfig::default();
        let a = PowerSpectrum::compute(&ds, &cfg).unwrap();
        let b = PowerSpectrum::compute(&scaled, &cfg).unwrap();
        assert_relative_eq!(a.slope().unwrap(), b.slope().unwrap(), epsilon = 1e-9);
        let d = a.distance(&b).unwrap();
        assert!(d.combined < 1e-8, "rescaling must not move the slope, got {}", d.combined);
    }

    #[test]
    fn test_self_distance_and_symmetry() {
        let a = PowerSpectrum::compute(&noise_image(5, 32, 32), &PowerSpectrumConfig::default())
            .unwrap();
        let b = PowerSpectrum::compute(&noise_image(6, 32, 32), &PowerSpectrumConfig::default())
            .unwrap();
        assert!(a.distance(&a).unwrap().combined < 1e-12);
        let dab = a.distance(&b).unwrap().combined;
        let dba = b.distance(&a).unwrap().combined;
        assert_relative_eq!(dab, dba, epsilon = 1e-12);
    }

    #[test]
    fn test_different_fit_ranges_are_incompatible() {
        let ds = noise_image(9, 32, 32);
        let a = PowerSpectrum::compute(&ds, &PowerSpectrumConfig::default()).unwrap();
        let cfg = PowerSpectrumConfig {
            fit_range: Some((0.1, 0.45)),
            ..PowerSpectrumConfig::default()
        };
        let b = PowerSpectrum::compute(&ds, &cfg).unwrap();
        assert_eq!(a.distance(&b).unwrap_err().kind(), "IncompatibleInstances");
    }

    #[test]
    fn test_heavily_masked_input_is_insufficient() {
        let ds = noise_image(1, 32, 32);
        let mut mask = Array2::from_elem((32, 32), false);
        mask[[0, 0]] = true;
        mask[[4, 9]] = true;
        mask[[20, 20]] = true;
        let masked = ds.with_mask(mask.into_dyn()).unwrap();
        let err = PowerSpectrum::compute(&masked, &PowerSpectrumConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "InsufficientData");
    }

    #[test]
    fn test_rejects_bad_fit_range_config() {
        let ds = noise_image(2, 32, 32);
        let cfg = PowerSpectrumConfig {
            fit_range: Some((0.4, 0.1)),
            ..PowerSpectrumConfig::default()
        };
        assert_eq!(
            PowerSpectrum::compute(&ds, &cfg).unwrap_err().kind(),
            "Configuration"
        );
        // A range entirely outside the sampled frequencies is rejected too.
        let cfg = PowerSpectrumConfig {
            fit_range: Some((0.498, 0.499)),
            ..PowerSpectrumConfig::default()
        };
        assert!(PowerSpectrum::compute(&ds, &cfg).is_err());
    }
}
