//! Spectral correlation function.
//!
//! For each spatial offset `l` up to a maximum lag, the SCF measures how
//! well spectra separated by `l` correlate:
//!
//! `S(l) = 1 - sqrt( sum (T(r) - T(r+l))^2 / sum (T(r)^2 + T(r+l)^2) )`
//!
//! with the sums running over velocity channels and all valid overlapping
//! pixel pairs under periodic wrapping. The descriptor is the full lag
//! surface plus its azimuthal average, fitted by a power law over lag.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use es_core::{Curve, Dataset, Error, FitResult, Result};

use crate::fitting::fit_power_law;
use crate::resample::{parameter_t_distance, slope_t_distance};
use crate::statistic::{check_same_fit_range, DistanceValue, Statistic, StatisticName};

const MIN_CHANNELS: usize = 2;
const MIN_VALID_PIXELS: usize = 100;

/// Configuration for [`Scf`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScfConfig {
    /// Maximum spatial lag in pixels (the surface spans
    /// `(2*max_lag+1)^2` offsets).
    pub max_lag: usize,
    /// Fit interval in pixels over the azimuthally averaged curve;
    /// defaults to the full positive-lag range.
    pub fit_range: Option<(f64, f64)>,
}

impl Default for ScfConfig {
    fn default() -> Self {
        Self { max_lag: 10, fit_range: None }
    }
}

/// Spectral-correlation-function instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scf {
    config: ScfConfig,
    surface: Vec<f64>,
    surface_dim: usize,
    curve: Curve,
    fit: FitResult,
}

impl Scf {
    /// The correlation surface, row-major over
    /// `(2*max_lag+1) x (2*max_lag+1)` offsets.
    pub fn surface(&self) -> (&[f64], usize) {
        (&self.surface, self.surface_dim)
    }

    /// Azimuthally averaged correlation vs lag.
    pub fn curve(&self) -> &Curve {
        &self.curve
    }

    /// Fitted power-law slope of the correlation curve.
    pub fn slope(&self) -> Option<f64> {
        self.fit.slope()
    }
}

impl Statistic for Scf {
    type Config = ScfConfig;

    fn name() -> StatisticName {
        StatisticName::Scf
    }

    fn compute(dataset: &Dataset, config: &Self::Config) -> Result<Self> {
        if config.max_lag == 0 {
            return Err(Error::Configuration("max_lag must be at least 1".to_string()));
        }
        if let Some((lo, hi)) = config.fit_range {
            if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && lo < hi) {
                return Err(Error::Configuration(format!(
                    "fit_range must satisfy 0 < low < high, got ({lo}, {hi})"
                )));
            }
        }
        if !dataset.is_cube() {
            return Err(Error::DataValidation("scf requires a spectral cube".to_string()));
        }
        let (data, mask) = dataset.cube_view()?;
        let (n_chan, ny, nx) = data.dim();
        if n_chan < MIN_CHANNELS {
            return Err(Error::insufficient("scf channels", MIN_CHANNELS, n_chan));
        }
        if 2 * config.max_lag >= ny.min(nx) {
            return Err(Error::Configuration(format!(
                "max_lag {} too large for {ny}x{nx} maps",
                config.max_lag
            )));
        }

        // Spatial validity: a pixel participates when any channel is valid;
        // invalid channels contribute zero to both sums.
        let mut spatial_ok = Array2::<bool>::from_elem((ny, nx), false);
        let mut n_ok = 0usize;
        for y in 0..ny {
            for x in 0..nx {
                let ok = (0..n_chan).any(|c| mask[[c, y, x]]);
                spatial_ok[[y, x]] = ok;
                if ok {
                    n_ok += 1;
                }
            }
        }
        if n_ok < MIN_VALID_PIXELS {
            return Err(Error::insufficient("scf", MIN_VALID_PIXELS, n_ok));
        }

        let dim = 2 * config.max_lag + 1;
        let mut surface = vec![0.0; dim * dim];
        let lag_max = config.max_lag as isize;
        for dy in -lag_max..=lag_max {
            for dx in -lag_max..=lag_max {
                let mut num = 0.0;
                let mut den = 0.0;
                for y in 0..ny {
                    for x in 0..nx {
                        if !spatial_ok[[y, x]] {
                            continue;
                        }
                        let ys = (y as isize + dy).rem_euclid(ny as isize) as usize;
                        let xs = (x as isize + dx).rem_euclid(nx as isize) as usize;
                        if !spatial_ok[[ys, xs]] {
                            continue;
                        }
                        for c in 0..n_chan {
                            let a = if mask[[c, y, x]] { data[[c, y, x]] } else { 0.0 };
                            let b = if mask[[c, ys, xs]] { data[[c, ys, xs]] } else { 0.0 };
                            let diff = a - b;
                            num += diff * diff;
                            den += a * a + b * b;
                        }
                    }
                }
                let s = if den > 0.0 { 1.0 - (num / den).sqrt() } else { 0.0 };
                let iy = (dy + lag_max) as usize;
                let ix = (dx + lag_max) as usize;
                surface[iy * dim + ix] = s;
            }
        }

        // Azimuthal average over lag radius, excluding the zero lag.
        let mut by_radius: Vec<(f64, f64, usize)> = Vec::new();
        for iy in 0..dim {
            for ix in 0..dim {
                let dy = iy as f64 - lag_max as f64;
                let dx = ix as f64 - lag_max as f64;
                let r = (dy * dy + dx * dx).sqrt();
                if r == 0.0 || r > lag_max as f64 {
                    continue;
                }
                // Half-pixel radial bins.
                let key = (r * 2.0).round() / 2.0;
                match by_radius.iter_mut().find(|(k, _, _)| *k == key) {
                    Some(entry) => {
                        entry.1 += surface[iy * dim + ix];
                        entry.2 += 1;
                    }
                    None => by_radius.push((key, surface[iy * dim + ix], 1)),
                }
            }
        }
        by_radius.sort_by(|a, b| a.0.total_cmp(&b.0));
        let xs: Vec<f64> = by_radius.iter().map(|(k, _, _)| *k).collect();
        let ys: Vec<f64> = by_radius.iter().map(|(_, s, n)| s / *n as f64).collect();
        let curve = Curve::new(xs, ys, None)?;

        let section = match config.fit_range {
            Some((lo, hi)) => curve.restrict(lo, hi)?,
            None => curve.clone(),
        };
        let fit = fit_power_law(&section.x, &section.y, None);

        Ok(Self {
            config: config.clone(),
            surface,
            surface_dim: dim,
            curve,
            fit,
        })
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }

    fn fit(&self) -> Option<&FitResult> {
        Some(&self.fit)
    }

    fn distance(&self, other: &Self) -> Result<DistanceValue> {
        if self.config.max_lag != other.config.max_lag {
            return Err(Error::IncompatibleInstances(format!(
                "scf: lag grids differ (max_lag {} vs {})",
                self.config.max_lag, other.config.max_lag
            )));
        }
        check_same_fit_range(Self::name(), self.config.fit_range, other.config.fit_range)?;

        // Primary: mean absolute difference over the shared lag surface.
        let n = self.surface.len() as f64;
        let surf: f64 = self
            .surface
            .iter()
            .zip(other.surface.iter())
            .map(|(a, b)| (a - b).abs())
            .sum::<f64>()
            / n;

        // Secondary: slope of the correlation curve, when both fits hold.
        // The surface term alone remains meaningful when a fit degrades, so
        // fall back to it rather than failing the whole metric.
        match slope_t_distance(&self.fit, &other.fit) {
            Ok(d_slope) => {
                DistanceValue::from_components(vec![("surface", surf), ("slope", d_slope)])
            }
            Err(Error::InvalidFit(msg)) => {
                log::warn!("scf: falling back to surface-only distance: {msg}");
                DistanceValue::scalar("surface", surf)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, StandardNormal};

    fn noise_cube(seed: u64) -> Dataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = Array3::from_shape_fn((4, 24, 24), |_| {
            <StandardNormal as Distribution<f64>>::sample(&StandardNormal, &mut rng)
        });
        Dataset::from_cube(data, 1.0, 1.0).unwrap()
    }

    fn small_cfg() -> ScfConfig {
        ScfConfig { max_lag: 5, ..ScfConfig::default() }
    }

    #[test]
    fn test_zero_lag_is_perfect_correlation() {
        let ds = noise_cube(1);
        let scf = Scf::compute(&ds, &small_cfg()).unwrap();
        let (surface, dim) = scf.surface();
        let center = surface[(dim / 2) * dim + dim / 2];
        assert!((center - 1.0).abs() < 1e-12, "S(0) must be 1, got {center}");
    }

    #[test]
    fn test_correlation_decreases_with_lag_on_smooth_field() {
        // Smooth gradient cube: nearby spectra are similar, distant less so.
        let data = Array3::from_shape_fn((4, 24, 24), |(c, y, x)| {
            1.0 + 0.1 * c as f64 + (y as f64 * 0.26).sin() + (x as f64 * 0.26).cos()
        });
        let ds = Dataset::from_cube(data, 1.0, 1.0).unwrap();
        let scf = Scf::compute(&ds, &small_cfg()).unwrap();
        let c = scf.curve();
        assert!(c.y[0] > c.y[c.len() - 1], "correlation should decay with lag");
    }

    #[test]
    fn test_self_distance_and_symmetry() {
        let a = Scf::compute(&noise_cube(5), &small_cfg()).unwrap();
        let b = Scf::compute(&noise_cube(6), &small_cfg()).unwrap();
        assert!(a.distance(&a).unwrap().combined < 1e-12);
        let dab = a.distance(&b).unwrap().combined;
        let dba = b.distance(&a).unwrap().combined;
        assert!((dab - dba).abs() < 1e-12);
    }

    #[test]
    fn test_lag_grid_mismatch_is_incompatible() {
        let a = Scf::compute(&noise_cube(5), &small_cfg()).unwrap();
        let b = Scf::compute(&noise_cube(5), &ScfConfig { max_lag: 4, ..ScfConfig::default() })
            .unwrap();
        assert_eq!(a.distance(&b).unwrap_err().kind(), "IncompatibleInstances");
    }
}
