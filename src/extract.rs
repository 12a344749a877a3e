use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::DetectorParams;
use crate::Result;

/// Single-channel float image used by the scale pyramid.
pub type GrayFloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Length of the descriptor vector produced for every keypoint.
pub const DESCRIPTOR_DIM: usize = 64;

/// Base smoothing scale of the first pyramid layer.
const BASE_SIGMA: f32 = 1.6;

/// A detected salient image location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    /// Column in original-image coordinates.
    pub x: f32,
    /// Row in original-image coordinates.
    pub y: f32,
    /// Diameter of the meaningful neighborhood.
    pub size: f32,
    /// Strength of the scale-space response at the detection.
    pub response: f32,
}

/// Filtered keypoints of one image together with their descriptor matrix
/// (one row per keypoint, [`DESCRIPTOR_DIM`] columns).
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    pub keypoints: Vec<KeyPoint>,
    pub descriptors: DMatrix<f32>,
}

impl Features {
    pub fn empty() -> Self {
        Self {
            keypoints: Vec::new(),
            descriptors: DMatrix::zeros(0, DESCRIPTOR_DIM),
        }
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Load an image from disk and convert it to 8-bit grayscale.
pub fn load_grayscale<P: AsRef<Path>>(path: P) -> Result<GrayImage> {
    Ok(image::open(path)?.to_luma8())
}

/// Pyramid determinant-of-Hessian keypoint detector with an upright
/// 64-dimensional gradient descriptor.
///
/// The detector owns no global state; construct one per run and pass it by
/// reference into batch loops.
#[derive(Debug, Clone)]
pub struct Detector {
    params: DetectorParams,
}

impl Detector {
    pub fn new(params: DetectorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Detect keypoints and compute their descriptors.
    ///
    /// Deterministic: the same image always yields the same features.
    pub fn detect(&self, image: &GrayImage) -> Features {
        let base = to_float(image);
        let mut keypoints = Vec::new();
        let mut flat: Vec<f32> = Vec::new();

        for octave in 0..self.params.octaves.max(1) {
            let scale = 1u32 << octave;
            let (w, h) = (base.width() / scale, base.height() / scale);
            if w < 8 || h < 8 {
                break;
            }
            let level = if octave == 0 {
                base.clone()
            } else {
                imageops::resize(&base, w, h, FilterType::Triangle)
            };

            let k = 2f32.powf(1.0 / self.params.layers.max(1) as f32);
            let mut sigma = BASE_SIGMA;
            for _ in 0..self.params.layers.max(1) {
                let smoothed = gaussian_blur_f32(&level, sigma);
                self.detect_in_layer(
                    &smoothed,
                    sigma,
                    scale as f32,
                    &mut keypoints,
                    &mut flat,
                );
                sigma *= k;
            }
        }

        let descriptors = DMatrix::from_row_slice(keypoints.len(), DESCRIPTOR_DIM, &flat);
        Features {
            keypoints,
            descriptors,
        }
    }

    fn detect_in_layer(
        &self,
        smoothed: &GrayFloatImage,
        sigma: f32,
        scale: f32,
        keypoints: &mut Vec<KeyPoint>,
        flat: &mut Vec<f32>,
    ) {
        let (w, h) = (smoothed.width() as i32, smoothed.height() as i32);
        let norm = sigma * sigma * sigma * sigma;
        let mut response = vec![0f32; (w * h) as usize];
        for y in 0..h {
            for x in 0..w {
                let c = px(smoothed, x, y);
                let dxx = px(smoothed, x + 1, y) + px(smoothed, x - 1, y) - 2.0 * c;
                let dyy = px(smoothed, x, y + 1) + px(smoothed, x, y - 1) - 2.0 * c;
                let dxy = (px(smoothed, x + 1, y + 1) + px(smoothed, x - 1, y - 1)
                    - px(smoothed, x + 1, y - 1)
                    - px(smoothed, x - 1, y + 1))
                    / 4.0;
                // SURF-style weighted determinant of the Hessian
                response[(y * w + x) as usize] = norm * (dxx * dyy - 0.81 * dxy * dxy);
            }
        }

        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let r = response[(y * w + x) as usize];
                if r <= self.params.threshold {
                    continue;
                }
                let mut is_max = true;
                'nbhd: for dy in -1..=1 {
                    for dx in -1..=1 {
                        if (dx != 0 || dy != 0)
                            && response[((y + dy) * w + x + dx) as usize] >= r
                        {
                            is_max = false;
                            break 'nbhd;
                        }
                    }
                }
                if !is_max {
                    continue;
                }
                keypoints.push(KeyPoint {
                    x: x as f32 * scale,
                    y: y as f32 * scale,
                    size: 2.0 * sigma * scale,
                    response: r,
                });
                describe(smoothed, x as f32, y as f32, sigma, flat);
            }
        }
    }
}

/// Accumulate the 64-dim upright descriptor for one keypoint into `flat`.
///
/// A 20x20 sample grid (step `sigma`) around the keypoint is split into 4x4
/// spatial cells; each cell contributes (sum dx, sum |dx|, sum dy, sum |dy|)
/// of the image gradient. The vector is L2-normalized.
fn describe(img: &GrayFloatImage, cx: f32, cy: f32, sigma: f32, flat: &mut Vec<f32>) {
    let mut desc = [0f32; DESCRIPTOR_DIM];
    let step = sigma.max(0.5);
    for sy in 0usize..20 {
        for sx in 0usize..20 {
            let u = cx + (sx as f32 - 9.5) * step;
            let v = cy + (sy as f32 - 9.5) * step;
            let (ui, vi) = (u.round() as i32, v.round() as i32);
            let dx = px(img, ui + 1, vi) - px(img, ui - 1, vi);
            let dy = px(img, ui, vi + 1) - px(img, ui, vi - 1);
            let cell = (sy / 5) * 4 + sx / 5;
            let base = cell * 4;
            desc[base] += dx;
            desc[base + 1] += dx.abs();
            desc[base + 2] += dy;
            desc[base + 3] += dy.abs();
        }
    }
    let norm = desc.iter().map(|d| d * d).sum::<f32>().sqrt();
    if norm > 0.0 {
        for d in desc.iter_mut() {
            *d /= norm;
        }
    }
    flat.extend_from_slice(&desc);
}

#[inline]
fn px(img: &GrayFloatImage, x: i32, y: i32) -> f32 {
    let x = x.clamp(0, img.width() as i32 - 1) as u32;
    let y = y.clamp(0, img.height() as i32 - 1) as u32;
    img.get_pixel(x, y)[0]
}

fn to_float(image: &GrayImage) -> GrayFloatImage {
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        Luma([image.get_pixel(x, y)[0] as f32 / 255.0])
    })
}

/// Keypoint filter predicate: keep a keypoint iff `|size| > min_size` and
/// `|response| > min_response`.
///
/// The two comparisons run as sequential independent passes (size first,
/// then response); the passes commute and the whole filter is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeypointFilter {
    pub min_size: f32,
    pub min_response: f32,
}

impl KeypointFilter {
    pub fn new(min_size: f32, min_response: f32) -> Self {
        Self {
            min_size,
            min_response,
        }
    }

    pub fn apply(&self, features: &Features) -> Features {
        let by_size = retain(features, |kp| kp.size.abs() > self.min_size);
        retain(&by_size, |kp| kp.response.abs() > self.min_response)
    }
}

impl From<&DetectorParams> for KeypointFilter {
    fn from(params: &DetectorParams) -> Self {
        Self::new(params.min_size, params.min_response)
    }
}

fn retain<F: Fn(&KeyPoint) -> bool>(features: &Features, pred: F) -> Features {
    let keep: Vec<usize> = features
        .keypoints
        .iter()
        .enumerate()
        .filter(|(_, kp)| pred(kp))
        .map(|(i, _)| i)
        .collect();
    let keypoints = keep.iter().map(|&i| features.keypoints[i]).collect();
    let mut descriptors = DMatrix::zeros(keep.len(), features.descriptors.ncols());
    for (row, &i) in keep.iter().enumerate() {
        descriptors.set_row(row, &features.descriptors.row(i));
    }
    Features {
        keypoints,
        descriptors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Synthetic test image: a few bright blobs on a dark background.
    fn blob_image(seed: u32) -> GrayImage {
        let centers = [
            (40.0 + seed as f32, 40.0),
            (110.0, 50.0 + seed as f32),
            (60.0, 120.0),
            (120.0, 110.0),
        ];
        ImageBuffer::from_fn(160, 160, |x, y| {
            let mut v = 0.0f32;
            for &(cx, cy) in centers.iter() {
                let d2 = (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2);
                v += 230.0 * (-d2 / 50.0).exp();
            }
            Luma([v.min(255.0) as u8])
        })
    }

    fn features(seed: u32) -> Features {
        let params = DetectorParams {
            threshold: 1e-6,
            ..DetectorParams::default()
        };
        Detector::new(params).detect(&blob_image(seed))
    }

    #[test]
    fn detects_blobs_with_descriptors() {
        let f = features(0);
        assert!(!f.is_empty());
        assert_eq!(f.descriptors.nrows(), f.keypoints.len());
        assert_eq!(f.descriptors.ncols(), DESCRIPTOR_DIM);
        // descriptors are unit length
        for i in 0..f.descriptors.nrows() {
            let n = f.descriptors.row(i).norm();
            assert!((n - 1.0).abs() < 1e-4, "row {} has norm {}", i, n);
        }
    }

    #[test]
    fn detection_is_deterministic() {
        assert_eq!(features(3), features(3));
    }

    #[test]
    fn filter_is_idempotent() {
        let f = features(1);
        let filter = KeypointFilter::new(4.0, 1e-5);
        let once = filter.apply(&f);
        let twice = filter.apply(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn filter_passes_commute() {
        let f = features(2);
        let size_only = KeypointFilter::new(4.0, 0.0);
        let resp_only = KeypointFilter::new(0.0, 1e-5);
        let a = resp_only.apply(&size_only.apply(&f));
        let b = size_only.apply(&resp_only.apply(&f));
        assert_eq!(a, b);
    }

    #[test]
    fn filter_uses_strict_comparison() {
        let mut f = features(0);
        assert!(!f.is_empty());
        let size = f.keypoints[0].size;
        f.keypoints.iter_mut().for_each(|kp| kp.size = size);
        let at_threshold = KeypointFilter::new(size, 0.0).apply(&f);
        assert!(at_threshold.is_empty());
    }
}
