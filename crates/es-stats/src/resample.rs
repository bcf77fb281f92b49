//! Curve resampling and the shared distance primitives.
//!
//! Every distance metric reduces to one of a few rules: a t-statistic on
//! fit parameters, a normalized curve discrepancy on a common grid, a
//! Kolmogorov-Smirnov statistic on empirical distributions, or a Hellinger
//! distance on aligned histograms. Each rule is symmetric in its arguments
//! and zero for identical inputs.

use es_core::{Curve, Error, FitResult, Histogram, Result};

/// Overlapping domain of two curves.
///
/// Errors with [`Error::IncompatibleInstances`] when the domains do not
/// intersect.
pub fn overlap_domain(a: &Curve, b: &Curve) -> Result<(f64, f64)> {
    let (alo, ahi) = a.domain();
    let (blo, bhi) = b.domain();
    let lo = alo.max(blo);
    let hi = ahi.min(bhi);
    if lo >= hi {
        return Err(Error::IncompatibleInstances(format!(
            "curve domains do not overlap: [{alo}, {ahi}] vs [{blo}, {bhi}]"
        )));
    }
    Ok((lo, hi))
}

/// Resample two curves onto `n` shared points over their overlapping
/// domain, by linear interpolation.
pub fn resample_to_common_grid(
    a: &Curve,
    b: &Curve,
    n: usize,
) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>)> {
    if n < 2 {
        return Err(Error::Configuration(format!(
            "common grid needs at least 2 points, got {n}"
        )));
    }
    let (lo, hi) = overlap_domain(a, b)?;
    let grid: Vec<f64> = (0..n).map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64).collect();
    let ya = grid.iter().map(|&x| a.interpolate(x)).collect();
    let yb = grid.iter().map(|&x| b.interpolate(x)).collect();
    Ok((grid, ya, yb))
}

fn trapezoid(grid: &[f64], values: &[f64]) -> f64 {
    let mut acc = 0.0;
    for i in 1..grid.len() {
        acc += 0.5 * (values[i] + values[i - 1]) * (grid[i] - grid[i - 1]);
    }
    acc
}

/// Normalized absolute-difference integral between two curves on their
/// common domain: the integral of `|ya - yb|` divided by the mean integral
/// of `|ya|` and `|yb|`.
///
/// Two curves that are both identically zero on the overlap compare as
/// zero distance.
pub fn curve_l1_distance(a: &Curve, b: &Curve, n_grid: usize) -> Result<f64> {
    let (grid, ya, yb) = resample_to_common_grid(a, b, n_grid)?;
    let diff: Vec<f64> = ya.iter().zip(yb.iter()).map(|(p, q)| (p - q).abs()).collect();
    let abs_a: Vec<f64> = ya.iter().map(|v| v.abs()).collect();
    let abs_b: Vec<f64> = yb.iter().map(|v| v.abs()).collect();

    let num = trapezoid(&grid, &diff);
    let denom = 0.5 * (trapezoid(&grid, &abs_a) + trapezoid(&grid, &abs_b));
    if denom <= 0.0 {
        if num <= 0.0 {
            return Ok(0.0);
        }
        return Err(Error::Computation(
            "curve distance is undefined: zero-mass curves with non-zero difference".to_string(),
        ));
    }
    let d = num / denom;
    if !d.is_finite() {
        return Err(Error::Computation(format!("curve distance is non-finite: {d}")));
    }
    Ok(d)
}

/// T-statistic-like distance on one fitted parameter:
/// `|p_a - p_b| / sqrt(e_a^2 + e_b^2)`.
pub fn parameter_t_distance(pa: f64, ea: f64, pb: f64, eb: f64) -> Result<f64> {
    let pooled = (ea * ea + eb * eb).sqrt();
    let diff = (pa - pb).abs();
    if pooled == 0.0 {
        if diff == 0.0 {
            return Ok(0.0);
        }
        return Err(Error::Computation(
            "parameter distance is undefined: zero pooled uncertainty with differing values"
                .to_string(),
        ));
    }
    let d = diff / pooled;
    if !d.is_finite() {
        return Err(Error::Computation(format!("parameter distance is non-finite: {d}")));
    }
    Ok(d)
}

/// Slope t-statistic between two fits.
///
/// Errors with [`Error::InvalidFit`] unless both fits are valid, and with
/// [`Error::IncompatibleInstances`] when the model families differ.
pub fn slope_t_distance(a: &FitResult, b: &FitResult) -> Result<f64> {
    if a.model != b.model {
        return Err(Error::IncompatibleInstances(format!(
            "fit models differ: {} vs {}",
            a.model, b.model
        )));
    }
    if !a.is_valid() || !b.is_valid() {
        return Err(Error::InvalidFit(
            "slope distance requires valid fits on both sides".to_string(),
        ));
    }
    let (sa, ea) = (a.slope(), a.slope_uncertainty());
    let (sb, eb) = (b.slope(), b.slope_uncertainty());
    match (sa, ea, sb, eb) {
        (Some(sa), Some(ea), Some(sb), Some(eb)) => parameter_t_distance(sa, ea, sb, eb),
        _ => Err(Error::InvalidFit("fit carries no slope parameter".to_string())),
    }
}

/// Hellinger distance between two histograms with identical bin edges.
pub fn hellinger_distance(a: &Histogram, b: &Histogram) -> Result<f64> {
    if !a.same_edges(b) {
        return Err(Error::IncompatibleInstances(
            "histogram bin edges differ; Hellinger distance requires aligned bins".to_string(),
        ));
    }
    let pa = a.normalized();
    let pb = b.normalized();
    let bc: f64 = pa
        .counts
        .iter()
        .zip(pb.counts.iter())
        .map(|(p, q)| (p * q).sqrt())
        .sum();
    Ok((1.0 - bc.min(1.0)).max(0.0).sqrt())
}

/// Two-sample Kolmogorov-Smirnov statistic between sorted sample sets.
pub fn ks_distance(sorted_a: &[f64], sorted_b: &[f64]) -> Result<f64> {
    if sorted_a.is_empty() || sorted_b.is_empty() {
        return Err(Error::Computation(
            "KS distance requires non-empty samples on both sides".to_string(),
        ));
    }
    let (na, nb) = (sorted_a.len() as f64, sorted_b.len() as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;
    while i < sorted_a.len() || j < sorted_b.len() {
        // Step past every sample tied at the current value on both sides
        // before comparing the empirical CDFs.
        let next = match (sorted_a.get(i), sorted_b.get(j)) {
            (Some(&xa), Some(&xb)) => xa.min(xb),
            (Some(&xa), None) => xa,
            (None, Some(&xb)) => xb,
            (None, None) => break,
        };
        while i < sorted_a.len() && sorted_a[i] <= next {
            i += 1;
        }
        while j < sorted_b.len() && sorted_b[j] <= next {
            j += 1;
        }
        d = d.max((i as f64 / na - j as f64 / nb).abs());
    }
    Ok(d)
}
