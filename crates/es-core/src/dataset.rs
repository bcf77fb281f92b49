//! The dataset adapter.
//!
//! A [`Dataset`] wraps an externally supplied 2D intensity map or 3D
//! position-position-velocity cube together with its sampling metadata and
//! a validity mask. Construction validates the input once; afterwards the
//! dataset is immutable and `Sync`, so it can be shared by reference across
//! concurrent statistic computations.
//!
//! Non-finite samples (NaN/Inf) are always treated as invalid, in addition
//! to whatever mask the caller supplies.

use ndarray::{Array2, Array3, ArrayD, ArrayView2, ArrayView3, Ix2, Ix3, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sampling metadata attached to a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatasetMeta {
    /// Spatial sampling per pixel (must be positive and finite).
    pub pixel_scale: f64,
    /// Spectral channel width. Required for cubes, absent for images.
    pub spectral_scale: Option<f64>,
}

impl DatasetMeta {
    /// Metadata for a 2D image.
    pub fn image(pixel_scale: f64) -> Self {
        Self { pixel_scale, spectral_scale: None }
    }

    /// Metadata for a 3D cube.
    pub fn cube(pixel_scale: f64, spectral_scale: f64) -> Self {
        Self { pixel_scale, spectral_scale: Some(spectral_scale) }
    }
}

/// A masked, immutable N-dimensional intensity field (N = 2 or 3).
///
/// Cubes are stored channel-first: shape `[n_chan, ny, nx]`.
#[derive(Debug, Clone)]
pub struct Dataset {
    data: ArrayD<f64>,
    mask: ArrayD<bool>,
    meta: DatasetMeta,
    n_valid: usize,
}

impl Dataset {
    /// Wrap a raw array and metadata into a dataset.
    ///
    /// Rejects dimensionalities other than 2 or 3, empty axes, non-positive
    /// or non-finite scales, cubes without a spectral scale, and fields with
    /// no valid sample at all.
    pub fn new(data: ArrayD<f64>, meta: DatasetMeta) -> Result<Self> {
        let mask = data.mapv(|v| v.is_finite());
        Self::from_parts(data, mask, meta)
    }

    /// Wrap a 2D image.
    pub fn from_image(data: Array2<f64>, pixel_scale: f64) -> Result<Self> {
        Self::new(data.into_dyn(), DatasetMeta::image(pixel_scale))
    }

    /// Wrap a 3D position-position-velocity cube (shape `[n_chan, ny, nx]`).
    pub fn from_cube(data: Array3<f64>, pixel_scale: f64, spectral_scale: f64) -> Result<Self> {
        Self::new(data.into_dyn(), DatasetMeta::cube(pixel_scale, spectral_scale))
    }

    /// Return a new dataset with an additional validity mask applied.
    ///
    /// The effective mask is the logical AND of `mask` with the finite-value
    /// mask; the original dataset is left untouched.
    pub fn with_mask(&self, mask: ArrayD<bool>) -> Result<Self> {
        if mask.shape() != self.data.shape() {
            return Err(Error::DataValidation(format!(
                "mask shape {:?} does not match data shape {:?}",
                mask.shape(),
                self.data.shape()
            )));
        }
        let mut combined = self.mask.clone();
        combined.zip_mut_with(&mask, |m, &u| *m = *m && u);
        Self::from_parts(self.data.clone(), combined, self.meta)
    }

    fn from_parts(data: ArrayD<f64>, mask: ArrayD<bool>, meta: DatasetMeta) -> Result<Self> {
        let ndim = data.ndim();
        if ndim != 2 && ndim != 3 {
            return Err(Error::DataValidation(format!(
                "dataset must be 2D or 3D, got {ndim}D"
            )));
        }
        if data.shape().iter().any(|&n| n == 0) {
            return Err(Error::DataValidation(format!(
                "dataset has an empty axis: shape {:?}",
                data.shape()
            )));
        }
        if !(meta.pixel_scale.is_finite() && meta.pixel_scale > 0.0) {
            return Err(Error::DataValidation(format!(
                "pixel_scale must be positive and finite, got {}",
                meta.pixel_scale
            )));
        }
        match (ndim, meta.spectral_scale) {
            (3, None) => {
                return Err(Error::DataValidation(
                    "3D dataset requires a spectral_scale".to_string(),
                ));
            }
            (_, Some(s)) if !(s.is_finite() && s > 0.0) => {
                return Err(Error::DataValidation(format!(
                    "spectral_scale must be positive and finite, got {s}"
                )));
            }
            _ => {}
        }
        debug_assert_eq!(data.shape(), mask.shape());

        let n_valid = mask.iter().filter(|&&m| m).count();
        if n_valid == 0 {
            return Err(Error::DataValidation(
                "dataset has no valid samples (fully masked or non-finite)".to_string(),
            ));
        }

        Ok(Self { data, mask, meta, n_valid })
    }

    /// Shape of the underlying array.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Number of dimensions (2 or 3).
    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Whether this dataset is a spectral cube.
    pub fn is_cube(&self) -> bool {
        self.data.ndim() == 3
    }

    /// Spatial sampling per pixel.
    pub fn pixel_scale(&self) -> f64 {
        self.meta.pixel_scale
    }

    /// Spectral channel width (cubes only).
    pub fn spectral_scale(&self) -> Option<f64> {
        self.meta.spectral_scale
    }

    /// Sampling metadata.
    pub fn meta(&self) -> DatasetMeta {
        self.meta
    }

    /// Read-only view of the raw data.
    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    /// Read-only view of the effective validity mask.
    pub fn mask(&self) -> &ArrayD<bool> {
        &self.mask
    }

    /// Number of valid samples.
    pub fn n_valid(&self) -> usize {
        self.n_valid
    }

    /// Fraction of samples that are valid.
    pub fn valid_fraction(&self) -> f64 {
        self.n_valid as f64 / self.data.len() as f64
    }

    /// Whether the sample at `index` is valid.
    pub fn is_valid(&self, index: &[usize]) -> bool {
        self.mask.get(IxDyn(index)).copied().unwrap_or(false)
    }

    /// Copy of the data with every invalid sample replaced by `fill`.
    pub fn filled(&self, fill: f64) -> ArrayD<f64> {
        let mut out = self.data.clone();
        out.zip_mut_with(&self.mask, |v, &m| {
            if !m {
                *v = fill;
            }
        });
        out
    }

    /// Flat vector of all valid samples, in iteration order.
    pub fn valid_values(&self) -> Vec<f64> {
        self.data
            .iter()
            .zip(self.mask.iter())
            .filter(|(_, &m)| m)
            .map(|(&v, _)| v)
            .collect()
    }

    /// 2D views of data and mask. Errors on cubes.
    pub fn image_view(&self) -> Result<(ArrayView2<'_, f64>, ArrayView2<'_, bool>)> {
        if self.is_cube() {
            return Err(Error::DataValidation(
                "expected a 2D image, got a spectral cube".to_string(),
            ));
        }
        let d = self
            .data
            .view()
            .into_dimensionality::<Ix2>()
            .expect("2D dataset reshapes to Ix2");
        let m = self
            .mask
            .view()
            .into_dimensionality::<Ix2>()
            .expect("2D dataset reshapes to Ix2");
        Ok((d, m))
    }

    /// 3D views of data and mask. Errors on images.
    pub fn cube_view(&self) -> Result<(ArrayView3<'_, f64>, ArrayView3<'_, bool>)> {
        if !self.is_cube() {
            return Err(Error::DataValidation(
                "expected a spectral cube, got a 2D image".to_string(),
            ));
        }
        let d = self
            .data
            .view()
            .into_dimensionality::<Ix3>()
            .expect("3D dataset reshapes to Ix3");
        let m = self
            .mask
            .view()
            .into_dimensionality::<Ix3>()
            .expect("3D dataset reshapes to Ix3");
        Ok((d, m))
    }

    /// Reduce to a 2D plane: images pass through unchanged, cubes are
    /// collapsed with [`Dataset::moment0`].
    pub fn to_plane(&self) -> Result<Dataset> {
        if self.is_cube() {
            self.moment0()
        } else {
            Ok(self.clone())
        }
    }

    /// Integrated-intensity (zeroth-moment) map of a cube.
    ///
    /// Each spatial pixel integrates its valid channels times the channel
    /// width; a pixel is valid if at least one contributing channel was.
    pub fn moment0(&self) -> Result<Dataset> {
        let (data, mask) = self.cube_view()?;
        let dv = self.meta.spectral_scale.expect("cube carries spectral_scale");
        let (n_chan, ny, nx) = data.dim();

        let mut m0 = Array2::<f64>::zeros((ny, nx));
        let mut m0_mask = Array2::<bool>::from_elem((ny, nx), false);
        for y in 0..ny {
            for x in 0..nx {
                let mut sum = 0.0;
                let mut any = false;
                for c in 0..n_chan {
                    if mask[[c, y, x]] {
                        sum += data[[c, y, x]] * dv;
                        any = true;
                    }
                }
                m0[[y, x]] = sum;
                m0_mask[[y, x]] = any;
            }
        }

        Self::from_parts(
            m0.into_dyn(),
            m0_mask.into_dyn(),
            DatasetMeta::image(self.meta.pixel_scale),
        )
    }

    /// Intensity-weighted mean-velocity (first-moment) map of a cube.
    ///
    /// Velocities are channel index times the channel width. Pixels whose
    /// integrated intensity is not positive are masked: a centroid is
    /// undefined there.
    pub fn centroid_map(&self) -> Result<Dataset> {
        let (data, mask) = self.cube_view()?;
        let dv = self.meta.spectral_scale.expect("cube carries spectral_scale");
        let (n_chan, ny, nx) = data.dim();

        let mut cen = Array2::<f64>::zeros((ny, nx));
        let mut cen_mask = Array2::<bool>::from_elem((ny, nx), false);
        for y in 0..ny {
            for x in 0..nx {
                let mut wsum = 0.0;
                let mut vsum = 0.0;
                for c in 0..n_chan {
                    if mask[[c, y, x]] {
                        let t = data[[c, y, x]];
                        wsum += t;
                        vsum += t * (c as f64 * dv);
                    }
                }
                if wsum > 0.0 {
                    cen[[y, x]] = vsum / wsum;
                    cen_mask[[y, x]] = true;
                }
            }
        }

        Self::from_parts(
            cen.into_dyn(),
            cen_mask.into_dyn(),
            DatasetMeta::image(self.meta.pixel_scale),
        )
    }

    /// Thicken velocity channels by block-averaging `factor` adjacent
    /// channels (the slice-thickness operation used by channel analysis).
    ///
    /// Trailing channels that do not fill a complete block are dropped. The
    /// spectral scale of the result grows by `factor`.
    pub fn spectral_downsample(&self, factor: usize) -> Result<Dataset> {
        let (data, mask) = self.cube_view()?;
        let (n_chan, ny, nx) = data.dim();
        if factor == 0 {
            return Err(Error::Configuration(
                "spectral downsample factor must be at least 1".to_string(),
            ));
        }
        if factor > n_chan {
            return Err(Error::Configuration(format!(
                "spectral downsample factor {factor} exceeds channel count {n_chan}"
            )));
        }
        if factor == 1 {
            return Ok(self.clone());
        }
        let n_out = n_chan / factor;
        let dv = self.meta.spectral_scale.expect("cube carries spectral_scale");

        let mut out = Array3::<f64>::zeros((n_out, ny, nx));
        let mut out_mask = Array3::<bool>::from_elem((n_out, ny, nx), false);
        for j in 0..n_out {
            for y in 0..ny {
                for x in 0..nx {
                    let mut sum = 0.0;
                    let mut count = 0usize;
                    for c in j * factor..(j + 1) * factor {
                        if mask[[c, y, x]] {
                            sum += data[[c, y, x]];
                            count += 1;
                        }
                    }
                    if count > 0 {
                        out[[j, y, x]] = sum / count as f64;
                        out_mask[[j, y, x]] = true;
                    }
                }
            }
        }

        Self::from_parts(
            out.into_dyn(),
            out_mask.into_dyn(),
            DatasetMeta::cube(self.meta.pixel_scale, dv * factor as f64),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr2, Array3};

    fn small_cube() -> Dataset {
        let mut data = Array3::<f64>::zeros((4, 3, 3));
        for c in 0..4 {
            for y in 0..3 {
                for x in 0..3 {
                    data[[c, y, x]] = (c + 1) as f64;
                }
            }
        }
        Dataset::from_cube(data, 1.0, 0.5).unwrap()
    }

    #[test]
    fn test_rejects_wrong_dimensionality() {
        let data = ndarray::ArrayD::<f64>::zeros(IxDyn(&[8]));
        let err = Dataset::new(data, DatasetMeta::image(1.0)).unwrap_err();
        assert_eq!(err.kind(), "DataValidation");
    }

    #[test]
    fn test_rejects_cube_without_spectral_scale() {
        let data = ndarray::ArrayD::<f64>::zeros(IxDyn(&[2, 4, 4]));
        let err = Dataset::new(data, DatasetMeta::image(1.0)).unwrap_err();
        assert_eq!(err.kind(), "DataValidation");
    }

    #[test]
    fn test_rejects_fully_masked() {
        let data = arr2(&[[f64::NAN, f64::NAN], [f64::NAN, f64::NAN]]);
        let err = Dataset::from_image(data, 1.0).unwrap_err();
        assert_eq!(err.kind(), "DataValidation");
    }

    #[test]
    fn test_nan_is_invalid() {
        let data = arr2(&[[1.0, f64::NAN], [3.0, 4.0]]);
        let ds = Dataset::from_image(data, 1.0).unwrap();
        assert_eq!(ds.n_valid(), 3);
        assert_relative_eq!(ds.valid_fraction(), 0.75);
        assert!(!ds.is_valid(&[0, 1]));
        assert!(ds.is_valid(&[1, 1]));
        assert_relative_eq!(ds.filled(0.0)[[0, 1]], 0.0);
    }

    #[test]
    fn test_with_mask_combines_and_rejects_empty() {
        let data = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        let ds = Dataset::from_image(data, 1.0).unwrap();

        let keep_one = arr2(&[[true, false], [false, false]]).into_dyn();
        let masked = ds.with_mask(keep_one).unwrap();
        assert_eq!(masked.n_valid(), 1);
        // Original untouched.
        assert_eq!(ds.n_valid(), 4);

        let none = arr2(&[[false, false], [false, false]]).into_dyn();
        assert_eq!(ds.with_mask(none).unwrap_err().kind(), "DataValidation");
    }

    #[test]
    fn test_moment0_integrates_channels() {
        let ds = small_cube();
        let m0 = ds.moment0().unwrap();
        assert_eq!(m0.shape(), &[3, 3]);
        // (1+2+3+4) * dv = 10 * 0.5 = 5
        assert_relative_eq!(m0.data()[[1, 1]], 5.0);
        assert!(!m0.is_cube());
    }

    #[test]
    fn test_centroid_map_is_intensity_weighted() {
        let ds = small_cube();
        let cen = ds.centroid_map().unwrap();
        // sum(c * dv * (c+1)) / sum(c+1) with dv=0.5:
        // (0*1 + 0.5*2 + 1.0*3 + 1.5*4) / 10 = 10/10 * ... = 1.0
        assert_relative_eq!(cen.data()[[0, 0]], 1.0);
    }

    #[test]
    fn test_spectral_downsample_blocks() {
        let ds = small_cube();
        let thick = ds.spectral_downsample(2).unwrap();
        assert_eq!(thick.shape(), &[2, 3, 3]);
        assert_relative_eq!(thick.spectral_scale().unwrap(), 1.0);
        // Block means: (1+2)/2 and (3+4)/2
        assert_relative_eq!(thick.data()[[0, 0, 0]], 1.5);
        assert_relative_eq!(thick.data()[[1, 0, 0]], 3.5);

        assert_eq!(ds.spectral_downsample(0).unwrap_err().kind(), "Configuration");
        assert_eq!(ds.spectral_downsample(9).unwrap_err().kind(), "Configuration");
    }
}
