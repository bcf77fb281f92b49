//! Hierarchical structure counts.
//!
//! Builds the merge hierarchy of local maxima by sweeping the intensity
//! field from its brightest valid pixel downward with a union-find: when
//! two growing regions touch, the one with the fainter peak dies and its
//! persistence (peak minus merge level) is recorded. The descriptor is the
//! number of structures whose persistence exceeds each value of a
//! log-spaced threshold ladder, plus the distribution of peak intensities.

use serde::{Deserialize, Serialize};

use es_core::{Curve, Dataset, Error, FitResult, Histogram, Result};

use crate::fitting::fit_power_law;
use crate::resample::{hellinger_distance, slope_t_distance};
use crate::statistic::{DistanceValue, Statistic, StatisticName};

const MIN_VALID_PIXELS: usize = 100;
const MIN_STRUCTURES: usize = 5;
const HIST_SPAN: f64 = 5.0;

/// Configuration for [`Dendrogram`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DendrogramConfig {
    /// Number of merge-threshold levels in the ladder.
    pub num_deltas: usize,
    /// Ladder extent as fractions of the field's dynamic range.
    pub delta_fraction_range: (f64, f64),
    /// Bins of the standardized peak-intensity histogram.
    pub num_bins: usize,
}

impl Default for DendrogramConfig {
    fn default() -> Self {
        Self { num_deltas: 20, delta_fraction_range: (0.01, 1.0), num_bins: 20 }
    }
}

/// Dendrogram instance: structure counts over the threshold ladder and the
/// standardized peak histogram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dendrogram {
    config: DendrogramConfig,
    counts: Curve,
    peak_histogram: Histogram,
    fit: FitResult,
    n_structures: usize,
}

impl Dendrogram {
    /// Number of surviving structures vs merge threshold.
    pub fn counts(&self) -> &Curve {
        &self.counts
    }

    /// Standardized peak-intensity histogram.
    pub fn peak_histogram(&self) -> &Histogram {
        &self.peak_histogram
    }

    /// Total number of structures in the merge hierarchy.
    pub fn n_structures(&self) -> usize {
        self.n_structures
    }
}

struct UnionFind {
    parent: Vec<u32>,
    peak: Vec<f64>,
}

impl UnionFind {
    fn find(&mut self, mut i: u32) -> u32 {
        while self.parent[i as usize] != i {
            let up = self.parent[self.parent[i as usize] as usize];
            self.parent[i as usize] = up;
            i = up;
        }
        i
    }
}

impl Statistic for Dendrogram {
    type Config = DendrogramConfig;

    fn name() -> StatisticName {
        StatisticName::Dendrogram
    }

    fn compute(dataset: &Dataset, config: &Self::Config) -> Result<Self> {
        if config.num_deltas < 3 {
            return Err(Error::Configuration(format!(
                "num_deltas must be at least 3, got {}",
                config.num_deltas
            )));
        }
        let (f_lo, f_hi) = config.delta_fraction_range;
        if !(f_lo > 0.0 && f_lo < f_hi && f_hi <= 1.0) {
            return Err(Error::Configuration(format!(
                "delta_fraction_range must satisfy 0 < low < high <= 1, got ({f_lo}, {f_hi})"
            )));
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
        if plane.n_valid() < MIN_VALID_PIXELS {
            return Err(Error::insufficient("dendrogram", MIN_VALID_PIXELS, plane.n_valid()));
        }

        // Valid pixels sorted from brightest to faintest.
        let mut order: Vec<(usize, usize)> = Vec::with_capacity(plane.n_valid());
        for ((y, x), &ok) in mask.indexed_iter() {
            if ok {
                order.push((y, x));
            }
        }
        order.sort_by(|&(ay, ax), &(by, bx)| data[[by, bx]].total_cmp(&data[[ay, ax]]));
        let v_max = data[[order[0].0, order[0].1]];
        let v_min = data[[order[order.len() - 1].0, order[order.len() - 1].1]];
        let range = v_max - v_min;
        if !(range.is_finite() && range > 0.0) {
            return Err(Error::DataValidation(
                "dendrogram is undefined for a constant field".to_string(),
            ));
        }

        // Persistence sweep: activate pixels in descending order; merging
        // two regions kills the one with the fainter peak.
        const INACTIVE: u32 = u32::MAX;
        let mut cell = vec![INACTIVE; ny * nx];
        let mut uf = UnionFind { parent: Vec::new(), peak: Vec::new() };
        let mut structures: Vec<(f64, f64)> = Vec::new(); // (peak, persistence)

        for &(y, x) in &order {
            let level = data[[y, x]];
            let id = uf.parent.len() as u32;
            uf.parent.push(id);
            uf.peak.push(level);
            cell[y * nx + x] = id;

            let neighbors = [
                (y.wrapping_sub(1), x),
                (y + 1, x),
                (y, x.wrapping_sub(1)),
                (y, x + 1),
            ];
            for (yn, xn) in neighbors {
                if yn >= ny || xn >= nx {
                    continue;
                }
                let other = cell[yn * nx + xn];
                if other == INACTIVE {
                    continue;
                }
                let ra = uf.find(cell[y * nx + x]);
                let rb = uf.find(other);
                if ra == rb {
                    continue;
                }
                // The fainter-peaked component dies at this level.
                let (winner, loser) = if uf.peak[ra as usize] >= uf.peak[rb as usize] {
                    (ra, rb)
                } else {
                    (rb, ra)
                };
                structures.push((uf.peak[loser as usize], uf.peak[loser as usize] - level));
                uf.parent[loser as usize] = winner;
            }
        }
        // Components alive at the end persist down to the faintest level.
        for i in 0..uf.parent.len() {
            if uf.parent[i] == i as u32 {
                structures.push((uf.peak[i], uf.peak[i] - v_min));
            }
        }
        let n_structures = structures.len();
        if n_structures < MIN_STRUCTURES {
            return Err(Error::insufficient("dendrogram structures", MIN_STRUCTURES, n_structures));
        }

        // Structure counts over the log-spaced merge-threshold ladder.
        let n_d = config.num_deltas;
        let (d_lo, d_hi) = (f_lo * range, f_hi * range);
        let mut xs = Vec::with_capacity(n_d);
        let mut ys = Vec::with_capacity(n_d);
        for i in 0..n_d {
            let delta =
                (d_lo.ln() + (d_hi.ln() - d_lo.ln()) * i as f64 / (n_d - 1) as f64).exp();
            let count = structures.iter().filter(|(_, p)| *p > delta).count();
            xs.push(delta);
            ys.push(count as f64);
        }
        let counts = Curve::new(xs, ys, None)?;
        let fit = fit_power_law(&counts.x, &counts.y, None);

        // Peak intensities standardized by the field's own moments.
        let vals = plane.valid_values();
        let n_val = vals.len() as f64;
        let mean = vals.iter().sum::<f64>() / n_val;
        let var = vals.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n_val;
        let std = var.sqrt().max(f64::MIN_POSITIVE);
        let peaks: Vec<f64> = structures.iter().map(|(p, _)| (p - mean) / std).collect();
        let peak_histogram =
            Histogram::from_values(&peaks, -HIST_SPAN, HIST_SPAN, config.num_bins)?;

        Ok(Self { config: config.clone(), counts, peak_histogram, fit, n_structures })
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }

    fn fit(&self) -> Option<&FitResult> {
        Some(&self.fit)
    }

    fn distance(&self, other: &Self) -> Result<DistanceValue> {
        if self.config.num_bins != other.config.num_bins {
            return Err(Error::IncompatibleInstances(
                "dendrogram: peak histogram binning differs".to_string(),
            ));
        }
        if self.config.num_deltas != other.config.num_deltas
            || self.config.delta_fraction_range != other.config.delta_fraction_range
        {
            return Err(Error::IncompatibleInstances(
                "dendrogram: threshold ladders differ".to_string(),
            ));
        }
        let d_hist = hellinger_distance(&self.peak_histogram, &other.peak_histogram)?;
        match slope_t_distance(&self.fit, &other.fit) {
            Ok(d_slope) => {
                DistanceValue::from_components(vec![("num_slope", d_slope), ("peaks", d_hist)])
            }
            Err(Error::InvalidFit(msg)) => {
                log::warn!("dendrogram: falling back to histogram-only distance: {msg}");
                DistanceValue::scalar("peaks", d_hist)
            }
            Err(e) => Err(e),
        }
    }
}
