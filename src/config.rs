use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::Result;

/// Configuration for the keypoint detector and filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorParams {
    /// Sensitivity threshold on the scale-normalized Hessian response.
    /// Lower values admit more (weaker) keypoints.
    pub threshold: f32,

    /// Number of pyramid octaves.
    pub octaves: usize,

    /// Number of smoothing layers per octave.
    pub layers: usize,

    /// Keypoints with `|size| <= min_size` are discarded by the filter.
    pub min_size: f32,

    /// Keypoints with `|response| <= min_response` are discarded by the filter.
    pub min_response: f32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            threshold: 8e-4,
            octaves: 4,
            layers: 2,
            min_size: 0.0,
            min_response: 0.0,
        }
    }
}

impl DetectorParams {
    /// Read parameters from a line-oriented `key : value` file.
    ///
    /// A line is recognized by containing one of the known key substrings
    /// (`threshold`, `octaves`, `layers`, `min size`, `min response`); its
    /// value is the token after the line's last colon. Lines that fail to
    /// parse leave the corresponding default untouched.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Parse parameters from `key : value` text. See [`DetectorParams::from_file`].
    pub fn parse(text: &str) -> Self {
        let mut params = Self::default();
        for line in text.lines() {
            if line.contains("threshold") {
                if let Some(v) = value_after_last_colon(line) {
                    params.threshold = v;
                }
            }
            if line.contains("octaves") {
                if let Some(v) = value_after_last_colon(line) {
                    params.octaves = v as usize;
                }
            }
            if line.contains("layers") {
                if let Some(v) = value_after_last_colon(line) {
                    params.layers = v as usize;
                }
            }
            if line.contains("min size") {
                if let Some(v) = value_after_last_colon(line) {
                    params.min_size = v;
                }
            }
            if line.contains("min response") {
                if let Some(v) = value_after_last_colon(line) {
                    params.min_response = v;
                }
            }
        }
        params
    }
}

fn value_after_last_colon(line: &str) -> Option<f32> {
    let tail = &line[line.rfind(':')? + 1..];
    tail.split_whitespace().next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_keys_from_last_colon() {
        let text = "detector threshold : 0.002\n\
                    octaves : 5\n\
                    layers : 3\n\
                    min size : 12.5\n\
                    min response : 0.25\n";
        let params = DetectorParams::parse(text);
        assert!((params.threshold - 0.002).abs() < 1e-9);
        assert_eq!(params.octaves, 5);
        assert_eq!(params.layers, 3);
        assert!((params.min_size - 12.5).abs() < 1e-6);
        assert!((params.min_response - 0.25).abs() < 1e-6);
    }

    #[test]
    fn unknown_lines_and_bad_values_keep_defaults() {
        let text = "nonsense line\noctaves : not-a-number\n";
        let params = DetectorParams::parse(text);
        assert_eq!(params, DetectorParams::default());
    }

    #[test]
    fn takes_the_token_after_the_final_colon() {
        // keys may themselves contain a colon in free-form prose
        let params = DetectorParams::parse("note: octaves setting : 6");
        assert_eq!(params.octaves, 6);
    }
}
