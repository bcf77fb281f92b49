//! FFT helpers for the spectral statistics.
//!
//! All transforms run through `rustfft`; planners are created per call so
//! every helper is a stateless pure function, safe under concurrent
//! per-statistic execution.

use ndarray::Array2;
use rustfft::{num_complex::Complex64, FftPlanner};
use serde::{Deserialize, Serialize};

use es_core::{Curve, Error, Result};

/// Windowing applied before a Fourier transform to suppress edge artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Apodization {
    /// No taper.
    None,
    /// Hanning (raised cosine) taper over the full extent.
    Hanning,
    /// Tukey taper: cosine lobes over a fraction `alpha` of the extent,
    /// flat in between.
    Tukey {
        /// Tapered fraction, in `(0, 1]`.
        alpha: f64,
    },
}

impl Apodization {
    /// Validate the window parameters.
    pub fn validate(&self) -> Result<()> {
        match self {
            Apodization::Tukey { alpha } if !(*alpha > 0.0 && *alpha <= 1.0) => {
                Err(Error::Configuration(format!(
                    "tukey alpha must be in (0, 1], got {alpha}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// 1D window of length `n`.
    fn window(&self, n: usize) -> Vec<f64> {
        use std::f64::consts::PI;
        if n == 1 {
            return vec![1.0];
        }
        let m = (n - 1) as f64;
        match *self {
            Apodization::None => vec![1.0; n],
            Apodization::Hanning => {
                (0..n).map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / m).cos())).collect()
            }
            Apodization::Tukey { alpha } => (0..n)
                .map(|i| {
                    let f = i as f64 / m;
                    if f < alpha / 2.0 {
                        0.5 * (1.0 + (PI * (2.0 * f / alpha - 1.0)).cos())
                    } else if f <= 1.0 - alpha / 2.0 {
                        1.0
                    } else {
                        0.5 * (1.0 + (PI * (2.0 * (1.0 - f) / alpha - 1.0)).cos())
                    }
                })
                .collect(),
        }
    }

    /// Separable 2D window for an image of the given shape.
    pub fn window_2d(&self, shape: (usize, usize)) -> Array2<f64> {
        let (ny, nx) = shape;
        let wy = self.window(ny);
        let wx = self.window(nx);
        Array2::from_shape_fn((ny, nx), |(y, x)| wy[y] * wx[x])
    }
}

impl Default for Apodization {
    fn default() -> Self {
        Apodization::Tukey { alpha: 0.3 }
    }
}

/// Full 2D complex FFT of a real image (rows, then columns).
pub fn fft2(img: &Array2<f64>) -> Array2<Complex64> {
    let (ny, nx) = img.dim();
    let mut planner = FftPlanner::new();
    let fft_row = planner.plan_fft_forward(nx);
    let fft_col = planner.plan_fft_forward(ny);

    let mut out = Array2::<Complex64>::zeros((ny, nx));
    let mut buf = vec![Complex64::new(0.0, 0.0); nx];
    for y in 0..ny {
        for x in 0..nx {
            buf[x] = Complex64::new(img[[y, x]], 0.0);
        }
        fft_row.process(&mut buf);
        for x in 0..nx {
            out[[y, x]] = buf[x];
        }
    }

    let mut buf = vec![Complex64::new(0.0, 0.0); ny];
    for x in 0..nx {
        for y in 0..ny {
            buf[y] = out[[y, x]];
        }
        fft_col.process(&mut buf);
        for y in 0..ny {
            out[[y, x]] = buf[y];
        }
    }
    out
}

/// Inverse 2D FFT, normalized so `ifft2(fft2(a)) == a`.
pub fn ifft2(spec: &Array2<Complex64>) -> Array2<Complex64> {
    let (ny, nx) = spec.dim();
    let mut planner = FftPlanner::new();
    let ifft_row = planner.plan_fft_inverse(nx);
    let ifft_col = planner.plan_fft_inverse(ny);

    let mut out = spec.clone();
    let mut buf = vec![Complex64::new(0.0, 0.0); nx];
    for y in 0..ny {
        for x in 0..nx {
            buf[x] = out[[y, x]];
        }
        ifft_row.process(&mut buf);
        for x in 0..nx {
            out[[y, x]] = buf[x];
        }
    }
    let mut buf = vec![Complex64::new(0.0, 0.0); ny];
    for x in 0..nx {
        for y in 0..ny {
            buf[y] = out[[y, x]];
        }
        ifft_col.process(&mut buf);
        for y in 0..ny {
            out[[y, x]] = buf[y];
        }
    }
    let norm = 1.0 / (ny * nx) as f64;
    out.mapv_inplace(|v| v * norm);
    out
}

/// 1D complex FFT of a real sequence.
pub fn fft1(values: &[f64]) -> Vec<Complex64> {
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(values.len());
    let mut buf: Vec<Complex64> = values.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    fft.process(&mut buf);
    buf
}

/// Sample frequencies for an `n`-point transform, in cycles per sample
/// (the usual DC-first layout with negative frequencies in the upper half).
pub fn fft_freqs(n: usize) -> Vec<f64> {
    let nf = n as f64;
    (0..n)
        .map(|i| {
            if i <= (n - 1) / 2 {
                i as f64 / nf
            } else {
                i as f64 / nf - 1.0
            }
        })
        .collect()
}

/// Signed wrap-around offset of index `i` on a periodic axis of length `n`.
pub(crate) fn wrap_delta(i: usize, n: usize) -> f64 {
    if i <= n / 2 {
        i as f64
    } else {
        i as f64 - n as f64
    }
}

/// Periodic convolution of an image with a kernel laid out wrap-around
/// (kernel origin at `[0, 0]`), via the convolution theorem.
pub fn convolve2(img: &Array2<f64>, kernel: &Array2<f64>) -> Array2<f64> {
    debug_assert_eq!(img.dim(), kernel.dim());
    let fi = fft2(img);
    let fk = fft2(kernel);
    let prod = Array2::from_shape_fn(fi.dim(), |idx| fi[idx] * fk[idx]);
    ifft2(&prod).mapv(|c| c.re)
}

/// 2D power spectrum `|FFT(window * img)|^2` (DC-first layout).
pub fn power_spectrum_2d(img: &Array2<f64>, apodization: &Apodization) -> Result<Array2<f64>> {
    apodization.validate()?;
    let windowed = match apodization {
        Apodization::None => img.clone(),
        _ => img * &apodization.window_2d(img.dim()),
    };
    Ok(fft2(&windowed).mapv(|c| c.norm_sqr()))
}

/// Binning policy for the azimuthally averaged 1D spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RadialBinning {
    /// Number of radial bins; defaults to half the smaller image dimension.
    pub n_bins: Option<usize>,
    /// Logarithmically spaced bins instead of linear.
    pub log_spacing: bool,
    /// Upper frequency limit in cycles per pixel; the Nyquist frequency by
    /// default.
    pub max_freq: f64,
}

impl Default for RadialBinning {
    fn default() -> Self {
        Self { n_bins: None, log_spacing: false, max_freq: 0.5 }
    }
}

impl RadialBinning {
    /// Validate the binning parameters.
    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.n_bins {
            if n < 2 {
                return Err(Error::Configuration(format!(
                    "radial binning needs at least 2 bins, got {n}"
                )));
            }
        }
        if !(self.max_freq > 0.0 && self.max_freq <= std::f64::consts::FRAC_1_SQRT_2) {
            return Err(Error::Configuration(format!(
                "max_freq must be in (0, 1/sqrt(2)], got {}",
                self.max_freq
            )));
        }
        Ok(())
    }
}

/// Azimuthally average a 2D power spectrum into a 1D spectrum.
///
/// The DC bin is always excluded; frequencies above `max_freq` are dropped.
/// Each bin carries the mean power and its scatter; empty bins are omitted.
pub fn radial_average(ps2d: &Array2<f64>, binning: &RadialBinning) -> Result<Curve> {
    binning.validate()?;
    let (ny, nx) = ps2d.dim();
    let fy = fft_freqs(ny);
    let fx = fft_freqs(nx);

    let f_min = 1.0 / ny.max(nx) as f64;
    if f_min >= binning.max_freq {
        return Err(Error::Configuration(format!(
            "image of shape ({ny}, {nx}) has no frequencies below max_freq {}",
            binning.max_freq
        )));
    }
    let n_bins = binning.n_bins.unwrap_or_else(|| (ny.min(nx) / 2).max(4));

    // Bin edges over [f_min, max_freq]; a small relaxation on the lower
    // edge keeps the first ring inside the first bin.
    let lo = f_min * (1.0 - 1e-12);
    let hi = binning.max_freq;
    let edges: Vec<f64> = if binning.log_spacing {
        let (llo, lhi) = (lo.ln(), hi.ln());
        (0..=n_bins)
            .map(|i| (llo + (lhi - llo) * i as f64 / n_bins as f64).exp())
            .collect()
    } else {
        (0..=n_bins)
            .map(|i| lo + (hi - lo) * i as f64 / n_bins as f64)
            .collect()
    };

    let mut sums = vec![0.0; n_bins];
    let mut sq_sums = vec![0.0; n_bins];
    let mut counts = vec![0usize; n_bins];
    for y in 0..ny {
        for x in 0..nx {
            let r = (fy[y] * fy[y] + fx[x] * fx[x]).sqrt();
            if r < lo || r > hi {
                continue;
            }
            let bin = if binning.log_spacing {
                let t = (r.ln() - lo.ln()) / (hi.ln() - lo.ln());
                ((t * n_bins as f64) as usize).min(n_bins - 1)
            } else {
                let t = (r - lo) / (hi - lo);
                ((t * n_bins as f64) as usize).min(n_bins - 1)
            };
            let p = ps2d[[y, x]];
            sums[bin] += p;
            sq_sums[bin] += p * p;
            counts[bin] += 1;
        }
    }

    let mut xs = Vec::with_capacity(n_bins);
    let mut ys = Vec::with_capacity(n_bins);
    let mut sd = Vec::with_capacity(n_bins);
    for b in 0..n_bins {
        if counts[b] == 0 {
            continue;
        }
        let nb = counts[b] as f64;
        let mean = sums[b] / nb;
        let var = (sq_sums[b] / nb - mean * mean).max(0.0);
        let center = if binning.log_spacing {
            (edges[b] * edges[b + 1]).sqrt()
        } else {
            0.5 * (edges[b] + edges[b + 1])
        };
        xs.push(center);
        ys.push(mean);
        sd.push(var.sqrt());
    }
    if xs.len() < 2 {
        return Err(Error::insufficient("radial spectrum", 2, xs.len()));
    }
    Curve::new(xs, ys, Some(sd))
}

/// Default fit interval for spectral statistics: from the largest scale
/// that fits half the image up to the Nyquist frequency.
pub fn default_fit_range(shape: (usize, usize)) -> (f64, f64) {
    let max_dim = shape.0.max(shape.1) as f64;
    (1.0 / (0.5 * max_dim), 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hanning_window_endpoints() {
        let w = Apodization::Hanning.window(8);
        assert_relative_eq!(w[0], 0.0);
        assert_relative_eq!(w[7], 0.0, epsilon = 1e-12);
        assert!(w[3] > 0.8);
    }

    #[test]
    fn test_tukey_alpha_validation() {
        assert!(Apodization::Tukey { alpha: 0.0 }.validate().is_err());
        assert!(Apodization::Tukey { alpha: 1.5 }.validate().is_err());
        assert!(Apodization::Tukey { alpha: 0.5 }.validate().is_ok());
        // alpha = 1 reduces to Hanning.
        let t = Apodization::Tukey { alpha: 1.0 }.window(16);
        let h = Apodization::Hanning.window(16);
        for (a, b) in t.iter().zip(h.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_fft2_parseval() {
        let img = Array2::from_shape_fn((8, 8), |(y, x)| ((y * 13 + x * 7) % 11) as f64 - 5.0);
        let spec = fft2(&img);
        let spatial: f64 = img.iter().map(|v| v * v).sum();
        let spectral: f64 = spec.iter().map(|c| c.norm_sqr()).sum::<f64>() / 64.0;
        assert_relative_eq!(spatial, spectral, epsilon = 1e-9);
    }

    #[test]
    fn test_ifft2_round_trip() {
        let img = Array2::from_shape_fn((6, 10), |(y, x)| (y as f64).sin() + (x as f64).cos());
        let back = ifft2(&fft2(&img));
        for (a, b) in img.iter().zip(back.iter()) {
            assert_relative_eq!(*a, b.re, epsilon = 1e-10);
            assert!(b.im.abs() < 1e-10);
        }
    }

    #[test]
    fn test_fft_freqs_layout() {
        let f = fft_freqs(4);
        assert_eq!(f, vec![0.0, 0.25, -0.5, -0.25]);
        let f = fft_freqs(5);
        assert_relative_eq!(f[2], 0.4);
        assert_relative_eq!(f[3], -0.4);
    }

    #[test]
    fn test_convolve2_with_delta_is_identity() {
        let img = Array2::from_shape_fn((8, 8), |(y, x)| (y * 8 + x) as f64);
        let mut delta = Array2::<f64>::zeros((8, 8));
        delta[[0, 0]] = 1.0;
        let out = convolve2(&img, &delta);
        for (a, b) in img.iter().zip(out.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_radial_average_flat_spectrum() {
        // Constant 2D power: every radial bin averages to the same value.
        let ps = Array2::from_elem((32, 32), 2.0);
        let curve = radial_average(&ps, &RadialBinning::default()).unwrap();
        assert!(curve.len() >= 4);
        for (_, y) in curve.points() {
            assert_relative_eq!(y, 2.0, epsilon = 1e-12);
        }
        // DC excluded: all bin centers strictly positive.
        assert!(curve.x[0] > 0.0);
    }

    #[test]
    fn test_radial_average_rejects_bad_config() {
        let ps = Array2::from_elem((16, 16), 1.0);
        let bad = RadialBinning { n_bins: Some(1), ..Default::default() };
        assert!(radial_average(&ps, &bad).is_err());
        let bad = RadialBinning { max_freq: 0.9, ..Default::default() };
        assert!(radial_average(&ps, &bad).is_err());
    }
}
