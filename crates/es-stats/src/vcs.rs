//! Velocity coordinate spectrum.
//!
//! The 1D power spectrum along the velocity axis of a cube, averaged over
//! spatial pixels. The spectrum characteristically steepens from a shallow
//! large-scale regime to a steep small-scale regime, so the default model
//! is the segmented power law with a free break.

use serde::{Deserialize, Serialize};

use es_core::{Curve, Dataset, Error, FitResult, Result};

use crate::fitting::fit_segmented_power_law;
use crate::fourier::{fft1, fft_freqs};
use crate::resample::parameter_t_distance;
use crate::statistic::{check_same_fit_range, DistanceValue, Statistic, StatisticName};

const MIN_CHANNELS: usize = 8;
const MIN_SPECTRA: usize = 25;
const MIN_SEG_POINTS: usize = 3;

/// Configuration for [`Vcs`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VcsConfig {
    /// Fit interval in cycles per channel; defaults to the full sampled
    /// range excluding the DC bin.
    pub fit_range: Option<(f64, f64)>,
    /// Minimum points required on each side of the break.
    pub min_segment_points: usize,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self { fit_range: None, min_segment_points: MIN_SEG_POINTS }
    }
}

/// Velocity-coordinate-spectrum instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vcs {
    config: VcsConfig,
    spectrum: Curve,
    fit: FitResult,
    n_spectra: usize,
}

impl Vcs {
    /// The pixel-averaged velocity power spectrum.
    pub fn spectrum(&self) -> &Curve {
        &self.spectrum
    }

    /// Number of spatial spectra that entered the average.
    pub fn n_spectra(&self) -> usize {
        self.n_spectra
    }

    /// Large-scale (pre-break) slope.
    pub fn slope1(&self) -> Option<f64> {
        self.fit.slope()
    }

    /// Small-scale (post-break) slope.
    pub fn slope2(&self) -> Option<f64> {
        self.fit.slope2()
    }
}

impl Statistic for Vcs {
    type Config = VcsConfig;

    fn name() -> StatisticName {
        StatisticName::Vcs
    }

    fn compute(dataset: &Dataset, config: &Self::Config) -> Result<Self> {
        if config.min_segment_points < 2 {
            return Err(Error::Configuration(
                "min_segment_points must be at least 2".to_string(),
            ));
        }
        if let Some((lo, hi)) = config.fit_range {
            if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && lo < hi) {
                return Err(Error::Configuration(format!(
                    "fit_range must satisfy 0 < low < high, got ({lo}, {hi})"
                )));
            }
        }
        if !dataset.is_cube() {
            return Err(Error::DataValidation("vcs requires a spectral cube".to_string()));
        }
        let (data, mask) = dataset.cube_view()?;
        let (n_chan, ny, nx) = data.dim();
        if n_chan < MIN_CHANNELS {
            return Err(Error::insufficient("vcs channels", MIN_CHANNELS, n_chan));
        }

        // Average |FFT_v|^2 over spatial pixels; a pixel contributes when
        // at least half of its channels are valid (invalid ones are
        // zero-filled before the transform).
        let mut power = vec![0.0; n_chan];
        let mut n_spectra = 0usize;
        let mut line = vec![0.0; n_chan];
        for y in 0..ny {
            for x in 0..nx {
                let mut n_ok = 0usize;
                for c in 0..n_chan {
                    if mask[[c, y, x]] {
                        line[c] = data[[c, y, x]];
                        n_ok += 1;
                    } else {
                        line[c] = 0.0;
                    }
                }
                if n_ok * 2 < n_chan {
                    continue;
                }
                let spec = fft1(&line);
                for (p, s) in power.iter_mut().zip(spec.iter()) {
                    *p += s.norm_sqr();
                }
                n_spectra += 1;
            }
        }
        if n_spectra < MIN_SPECTRA {
            return Err(Error::insufficient("vcs spectra", MIN_SPECTRA, n_spectra));
        }

        // Positive-frequency half, DC excluded.
        let freqs = fft_freqs(n_chan);
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for (i, &f) in freqs.iter().enumerate() {
            if f > 0.0 {
                xs.push(f);
                ys.push(power[i] / n_spectra as f64);
            }
        }
        let spectrum = Curve::new(xs, ys, None)?;

        let section = match config.fit_range {
            Some((lo, hi)) => spectrum.restrict(lo, hi)?,
            None => spectrum.clone(),
        };
        if section.len() < 2 * config.min_segment_points {
            return Err(Error::insufficient(
                "vcs fit",
                2 * config.min_segment_points,
                section.len(),
            ));
        }
        let fit =
            fit_segmented_power_law(&section.x, &section.y, None, config.min_segment_points);

        Ok(Self { config: config.clone(), spectrum, fit, n_spectra })
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }

    fn fit(&self) -> Option<&FitResult> {
        Some(&self.fit)
    }

    fn distance(&self, other: &Self) -> Result<DistanceValue> {
        check_same_fit_range(Self::name(), self.config.fit_range, other.config.fit_range)?;
        if !self.fit.is_valid() || !other.fit.is_valid() {
            return Err(Error::InvalidFit(
                "vcs distance requires valid segmented fits on both sides".to_string(),
            ));
        }
        let d1 = parameter_t_distance(
            self.fit.slope().expect("valid segmented fit has slope1"),
            self.fit.slope_uncertainty().expect("valid segmented fit has slope1 error"),
            other.fit.slope().expect("valid segmented fit has slope1"),
            other.fit.slope_uncertainty().expect("valid segmented fit has slope1 error"),
        )?;
        let d2 = parameter_t_distance(
            self.fit.slope2().expect("valid segmented fit has slope2"),
            self.fit.slope2_uncertainty().expect("valid segmented fit has slope2 error"),
            other.fit.slope2().expect("valid segmented fit has slope2"),
            other.fit.slope2_uncertainty().expect("valid segmented fit has slope2 error"),
        )?;
        DistanceValue::from_components(vec![("slope1", d1), ("slope2", d2)])
    }
}
