//! Velocity channel analysis.
//!
//! The 2D spatial power spectrum of a cube's velocity channel maps,
//! averaged over channels, at a configurable channel thickness. Thickening
//! the channels (block-averaging adjacent ones) probes the transition from
//! velocity-dominated to density-dominated fluctuations; the slice
//! thickness is therefore part of the instance's identity and two VCA
//! instances at different thicknesses are not comparable.

use ndarray::{Array2, Ix2};
use serde::{Deserialize, Serialize};

use es_core::{Curve, Dataset, Error, FitResult, Result};

use crate::fourier::{power_spectrum_2d, Apodization, RadialBinning};
use crate::power_spectrum::fit_radial_spectrum;
use crate::resample::slope_t_distance;
use crate::statistic::{check_same_fit_range, DistanceValue, Statistic, StatisticName};

const MIN_IMAGE_DIM: usize = 16;
const MIN_CHANNELS: usize = 2;
const MIN_VALID_PIXELS: usize = 100;

/// Configuration for [`Vca`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VcaConfig {
    /// Number of native channels averaged into one analysis channel.
    pub channel_thickness: usize,
    /// Pre-transform taper.
    pub apodization: Apodization,
    /// Radial binning of the 2D spectrum.
    pub binning: RadialBinning,
    /// Fit interval in cycles per pixel; defaults per dataset.
    pub fit_range: Option<(f64, f64)>,
    /// Weight the fit by the per-bin scatter.
    pub weighted_fit: bool,
}

impl Default for VcaConfig {
    fn default() -> Self {
        Self {
            channel_thickness: 1,
            apodization: Apodization::default(),
            binning: RadialBinning::default(),
            fit_range: None,
            weighted_fit: false,
        }
    }
}

/// Velocity-channel-analysis instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vca {
    config: VcaConfig,
    spectrum: Curve,
    fit: FitResult,
    fit_range: (f64, f64),
    n_channels: usize,
}

impl Vca {
    /// The channel-averaged radial power spectrum.
    pub fn spectrum(&self) -> &Curve {
        &self.spectrum
    }

    /// Number of (thickened) channels that entered the average.
    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    /// Fitted spectral slope.
    pub fn slope(&self) -> Option<f64> {
        self.fit.slope()
    }
}

impl Statistic for Vca {
    type Config = VcaConfig;

    fn name() -> StatisticName {
        StatisticName::Vca
    }

    fn compute(dataset: &Dataset, config: &Self::Config) -> Result<Self> {
        if config.channel_thickness == 0 {
            return Err(Error::Configuration(
                "channel_thickness must be at least 1".to_string(),
            ));
        }
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
            return Err(Error::DataValidation("vca requires a spectral cube".to_string()));
        }
        if dataset.n_valid() < MIN_VALID_PIXELS {
            return Err(Error::insufficient("vca", MIN_VALID_PIXELS, dataset.n_valid()));
        }

        let cube = dataset.spectral_downsample(config.channel_thickness)?;
        let (data, _) = cube.cube_view()?;
        let (n_chan, ny, nx) = data.dim();
        if ny.min(nx) < MIN_IMAGE_DIM {
            return Err(Error::DataValidation(format!(
                "vca needs at least {MIN_IMAGE_DIM}x{MIN_IMAGE_DIM} channel maps, got {ny}x{nx}"
            )));
        }
        if n_chan < MIN_CHANNELS {
            return Err(Error::insufficient("vca channels", MIN_CHANNELS, n_chan));
        }

        let filled = cube.filled(0.0);
        let mut ps_sum = Array2::<f64>::zeros((ny, nx));
        for c in 0..n_chan {
            let channel = filled
                .index_axis(ndarray::Axis(0), c)
                .to_owned()
                .into_dimensionality::<Ix2>()
                .expect("channel map is 2D");
            let ps = power_spectrum_2d(&channel, &config.apodization)?;
            ps_sum += &ps;
        }
        ps_sum.mapv_inplace(|v| v / n_chan as f64);

        let (spectrum, fit, fit_range) = fit_radial_spectrum(
            &ps_sum,
            &config.binning,
            config.fit_range,
            config.weighted_fit,
            "vca",
        )?;

        Ok(Self { config: config.clone(), spectrum, fit, fit_range, n_channels: n_chan })
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }

    fn fit(&self) -> Option<&FitResult> {
        Some(&self.fit)
    }

    fn distance(&self, other: &Self) -> Result<DistanceValue> {
        if self.config.channel_thickness != other.config.channel_thickness {
            return Err(Error::IncompatibleInstances(format!(
                "vca: channel thicknesses differ ({} vs {})",
                self.config.channel_thickness, other.config.channel_thickness
            )));
        }
        check_same_fit_range(Self::name(), self.config.fit_range, other.config.fit_range)?;
        if self.config.binning.log_spacing != other.config.binning.log_spacing {
            return Err(Error::IncompatibleInstances(
                "vca: radial bin spacing differs".to_string(),
            ));
        }
        let d = slope_t_distance(&self.fit, &other.fit)?;
        DistanceValue::scalar("slope", d)
    }
}
