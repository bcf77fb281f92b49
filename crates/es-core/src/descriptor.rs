//! Descriptor containers.
//!
//! Statistic algorithms reduce a dataset to one of a small set of
//! descriptor shapes: a [`Curve`] (paired x/y sequences, optionally with
//! per-point scatter), a [`Histogram`], or plain parameter vectors. These
//! containers validate their shape once at construction and are immutable
//! afterwards.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A sampled curve: strictly increasing finite `x`, one `y` per `x`,
/// optionally a per-point standard deviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    /// Independent variable, strictly increasing.
    pub x: Vec<f64>,
    /// Dependent variable.
    pub y: Vec<f64>,
    /// Optional 1-sigma scatter per point.
    pub stddev: Option<Vec<f64>>,
}

impl Curve {
    /// Build a curve, validating lengths and monotonicity of `x`.
    pub fn new(x: Vec<f64>, y: Vec<f64>, stddev: Option<Vec<f64>>) -> Result<Self> {
        if x.is_empty() {
            return Err(Error::DataValidation("curve must have at least one point".to_string()));
        }
        if x.len() != y.len() {
            return Err(Error::DataValidation(format!(
                "curve x/y length mismatch: {} vs {}",
                x.len(),
                y.len()
            )));
        }
        if let Some(s) = &stddev {
            if s.len() != x.len() {
                return Err(Error::DataValidation(format!(
                    "curve stddev length mismatch: {} vs {}",
                    s.len(),
                    x.len()
                )));
            }
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(Error::DataValidation("curve x values must be finite".to_string()));
        }
        for w in x.windows(2) {
            if w[1] <= w[0] {
                return Err(Error::DataValidation(format!(
                    "curve x values must be strictly increasing: {} then {}",
                    w[0], w[1]
                )));
            }
        }
        Ok(Self { x, y, stddev })
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Whether the curve has no points. Never true for a validated curve.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Domain of the curve: `(x_min, x_max)`.
    pub fn domain(&self) -> (f64, f64) {
        (self.x[0], *self.x.last().expect("curve is non-empty"))
    }

    /// Linear interpolation at `x0`; clamps outside the domain.
    pub fn interpolate(&self, x0: f64) -> f64 {
        if x0 <= self.x[0] {
            return self.y[0];
        }
        let last = self.x.len() - 1;
        if x0 >= self.x[last] {
            return self.y[last];
        }
        // partition_point: first index with x > x0
        let hi = self.x.partition_point(|&v| v <= x0);
        let lo = hi - 1;
        let t = (x0 - self.x[lo]) / (self.x[hi] - self.x[lo]);
        self.y[lo] + t * (self.y[hi] - self.y[lo])
    }

    /// Log-log linear interpolation at `x0` for power-law-shaped curves.
    ///
    /// Falls back to linear interpolation when either bracketing value is
    /// non-positive.
    pub fn log_interpolate(&self, x0: f64) -> f64 {
        if x0 <= self.x[0] {
            return self.y[0];
        }
        let last = self.x.len() - 1;
        if x0 >= self.x[last] {
            return self.y[last];
        }
        let hi = self.x.partition_point(|&v| v <= x0);
        let lo = hi - 1;
        if self.x[lo] <= 0.0 || self.y[lo] <= 0.0 || self.y[hi] <= 0.0 {
            return self.interpolate(x0);
        }
        let t = (x0.ln() - self.x[lo].ln()) / (self.x[hi].ln() - self.x[lo].ln());
        (self.y[lo].ln() + t * (self.y[hi].ln() - self.y[lo].ln())).exp()
    }

    /// Restrict to points with `lo <= x <= hi`.
    ///
    /// Errors with [`Error::Configuration`] when the interval does not
    /// intersect the curve's domain.
    pub fn restrict(&self, lo: f64, hi: f64) -> Result<Curve> {
        if lo >= hi {
            return Err(Error::Configuration(format!(
                "invalid restriction interval: [{lo}, {hi}]"
            )));
        }
        let mut x = Vec::new();
        let mut y = Vec::new();
        let mut s = self.stddev.as_ref().map(|_| Vec::new());
        for i in 0..self.x.len() {
            if self.x[i] >= lo && self.x[i] <= hi {
                x.push(self.x[i]);
                y.push(self.y[i]);
                if let (Some(out), Some(src)) = (s.as_mut(), self.stddev.as_ref()) {
                    out.push(src[i]);
                }
            }
        }
        if x.is_empty() {
            return Err(Error::Configuration(format!(
                "restriction interval [{lo}, {hi}] lies outside the curve domain {:?}",
                self.domain()
            )));
        }
        Curve::new(x, y, s)
    }

    /// Iterate over `(x, y)` pairs.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x.iter().copied().zip(self.y.iter().copied())
    }
}

/// A histogram over contiguous bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Bin edges, strictly increasing; `counts.len() + 1` entries.
    pub edges: Vec<f64>,
    /// Per-bin counts or masses.
    pub counts: Vec<f64>,
}

impl Histogram {
    /// Build a histogram, validating edge monotonicity and lengths.
    pub fn new(edges: Vec<f64>, counts: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::DataValidation("histogram needs at least one bin".to_string()));
        }
        if counts.len() + 1 != edges.len() {
            return Err(Error::DataValidation(format!(
                "histogram has {} edges but {} counts",
                edges.len(),
                counts.len()
            )));
        }
        for w in edges.windows(2) {
            if !(w[0].is_finite() && w[1].is_finite() && w[1] > w[0]) {
                return Err(Error::DataValidation(
                    "histogram edges must be finite and strictly increasing".to_string(),
                ));
            }
        }
        if counts.iter().any(|&c| !c.is_finite() || c < 0.0) {
            return Err(Error::DataValidation(
                "histogram counts must be finite and non-negative".to_string(),
            ));
        }
        Ok(Self { edges, counts })
    }

    /// Bin values into `n_bins` uniform bins over `[lo, hi]`.
    ///
    /// Values outside the range are clipped into the boundary bins.
    pub fn from_values(values: &[f64], lo: f64, hi: f64, n_bins: usize) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::Configuration("histogram needs at least one bin".to_string()));
        }
        if !(lo.is_finite() && hi.is_finite() && hi > lo) {
            return Err(Error::Configuration(format!(
                "invalid histogram range [{lo}, {hi}]"
            )));
        }
        let width = (hi - lo) / n_bins as f64;
        let edges: Vec<f64> = (0..=n_bins).map(|i| lo + i as f64 * width).collect();
        let mut counts = vec![0.0; n_bins];
        for &v in values {
            if !v.is_finite() {
                continue;
            }
            let idx = (((v - lo) / width).floor() as isize).clamp(0, n_bins as isize - 1);
            counts[idx as usize] += 1.0;
        }
        Self::new(edges, counts)
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    /// Total mass.
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Copy with counts scaled to unit total mass.
    ///
    /// A histogram with zero total mass is returned unchanged.
    pub fn normalized(&self) -> Histogram {
        let total = self.total();
        if total <= 0.0 {
            return self.clone();
        }
        Histogram {
            edges: self.edges.clone(),
            counts: self.counts.iter().map(|c| c / total).collect(),
        }
    }

    /// Cumulative distribution at the upper edge of each bin.
    pub fn cdf(&self) -> Vec<f64> {
        let total = self.total();
        let mut acc = 0.0;
        self.counts
            .iter()
            .map(|&c| {
                acc += c;
                if total > 0.0 {
                    acc / total
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Whether two histograms share identical bin edges (bin-wise metrics
    /// require this).
    pub fn same_edges(&self, other: &Histogram) -> bool {
        self.edges.len() == other.edges.len()
            && self
                .edges
                .iter()
                .zip(other.edges.iter())
                .all(|(a, b)| (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0))
    }
}

/// Empirical CDF support: sorts the samples and returns them with the CDF
/// value at (and including) each sample.
pub fn ecdf(values: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let ranks = (1..=n).map(|i| i as f64 / n as f64).collect();
    (sorted, ranks)
}
