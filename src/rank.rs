use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_circle_mut;
use log::warn;
use std::path::{Path, PathBuf};

use crate::corpus;
use crate::extract::{Features, KeyPoint};
use crate::store::{self, FeatureFile};
use crate::verify::{MatchVerifier, VerifierParams};
use crate::Result;

/// One corpus entry with its verification score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    /// Position of the feature file in the ascending scan order.
    pub index: usize,
    /// Path of the feature cache file.
    pub path: PathBuf,
    /// Verified inlier count against the query.
    pub score: usize,
}

/// Ranks every precomputed candidate in a directory against one query by
/// running the full match verifier and sorting on inlier count.
#[derive(Debug, Clone, Default)]
pub struct Ranker {
    verifier: MatchVerifier,
}

impl Ranker {
    pub fn new(params: VerifierParams) -> Self {
        Self {
            verifier: MatchVerifier::new(params),
        }
    }

    /// Score the query against every feature cache under `cache_dir` and
    /// return the full descending ranking.
    ///
    /// Candidates are scanned in ascending file-name order; the sort is
    /// stable, so equal scores keep that scan order. Unreadable cache
    /// files are logged and skipped without aborting the scan.
    pub fn rank(&self, query: &Features, cache_dir: &Path) -> Result<Vec<RankedCandidate>> {
        let files = corpus::list_with_extension(cache_dir, store::FEATURE_SUFFIX)?;
        let mut ranking: Vec<RankedCandidate> = Vec::with_capacity(files.len());
        for (index, path) in files.into_iter().enumerate() {
            let candidate = match FeatureFile::load(&path) {
                Ok(file) => file.into_features(),
                Err(err) => {
                    warn!("skipping {}: {}", path.display(), err);
                    continue;
                }
            };
            let score = self.verifier.verify(query, &candidate).score();
            ranking.push(RankedCandidate { index, path, score });
        }
        ranking.sort_by(|a, b| b.score.cmp(&a.score));
        Ok(ranking)
    }
}

/// Load an image from disk as RGB for overlay drawing and montages.
pub fn load_rgb<P: AsRef<Path>>(path: P) -> Result<RgbImage> {
    Ok(image::open(path)?.to_rgb8())
}

/// Draw a hollow circle of radius `size / 4` at every keypoint.
pub fn draw_keypoints(image: &mut RgbImage, keypoints: &[KeyPoint]) {
    for kp in keypoints {
        let radius = ((kp.size / 4.0).round() as i32).max(1);
        draw_hollow_circle_mut(
            image,
            (kp.x.round() as i32, kp.y.round() as i32),
            radius,
            Rgb([255, 0, 0]),
        );
    }
}

const SPACER: u32 = 20;

/// Combine images into one composite: two per row on a white background,
/// each scaled to the widest member.
pub fn montage(images: &[RgbImage]) -> RgbImage {
    let columns = 2usize;
    if images.is_empty() {
        return RgbImage::from_pixel(SPACER, SPACER, Rgb([255, 255, 255]));
    }

    let width_max = images.iter().map(|i| i.width()).max().unwrap();
    let scaled: Vec<RgbImage> = images
        .iter()
        .map(|img| {
            let height = img.height() * width_max / img.width().max(1);
            imageops::resize(img, width_max, height.max(1), FilterType::Triangle)
        })
        .collect();
    let height_max = scaled.iter().map(|i| i.height()).max().unwrap();

    let rows = (scaled.len() + columns - 1) / columns;
    let canvas_w = SPACER + (width_max + SPACER) * columns as u32;
    let canvas_h = SPACER + (height_max + SPACER) * rows as u32;
    let mut canvas = RgbImage::from_pixel(canvas_w, canvas_h, Rgb([255, 255, 255]));

    for (i, img) in scaled.iter().enumerate() {
        let col = (i % columns) as u32;
        let row = (i / columns) as u32;
        let x = SPACER + col * (width_max + SPACER);
        let y = SPACER + row * (height_max + SPACER);
        imageops::replace(&mut canvas, img, x as i64, y as i64);
    }
    canvas
}
