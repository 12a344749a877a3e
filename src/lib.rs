use thiserror::Error;

/// Detector and keypoint-filter configuration, including the line-oriented
/// `key : value` parameter-file format.
pub mod config;

/// Corpus traversal helpers: sorted file listings and directory checks.
pub mod corpus;

/// Histogram-to-text-document encoding for downstream text indexing.
pub mod document;

/// Keypoint detection, descriptor computation, and the two-pass
/// size/response keypoint filter.
pub mod extract;

/// Fundamental-matrix estimation: normalized 8-point algorithm, Sampson
/// distance, and the RANSAC loop.
pub mod fundamental;

/// Timestamped event logging behind the `log` facade.
pub mod logger;

/// Bidirectional k=2 nearest-neighbor descriptor matching.
pub mod matching;

/// Retrieval ranking over a directory of precomputed feature files.
pub mod rank;

/// Structured storage: named-matrix store, per-image feature caches, and
/// word-document output.
pub mod store;

/// The three-stage match verifier: ratio test, symmetry test, RANSAC.
pub mod verify;

/// Visual vocabulary construction and histogram encoding,
/// which provides the main functionality of this crate.
pub mod vocab;

pub use config::DetectorParams;
pub use extract::{Detector, Features, KeyPoint, KeypointFilter};
pub use matching::MatchRecord;
pub use rank::{RankedCandidate, Ranker};
pub use store::MatStore;
pub use verify::{MatchVerifier, Verification, VerifierParams};
pub use vocab::{ClusterParams, VocabTrainer, Vocabulary, WeightMode};

/// Histogram of visual-word weights for an image or descriptor set.
///
/// Index: word id in the vocabulary.
///
/// Value: weight of that word in the provided features.
pub type Histogram = Vec<f32>;

/// Provides method(s) for comparing the histograms of two images.
pub trait HistogramExt {
    /// L1-based similarity score in `[0, 1]` for two normalized histograms.
    fn l1_similarity(&self, other: &Self) -> f32;
    /// Euclidean distance between two histograms.
    fn l2_distance(&self, other: &Self) -> f32;
}

impl HistogramExt for Histogram {
    fn l1_similarity(&self, other: &Self) -> f32 {
        1. - 0.5
            * (self
                .iter()
                .zip(other)
                .fold(0., |a, (b, c)| a + (b - c).abs()))
    }

    fn l2_distance(&self, other: &Self) -> f32 {
        self.iter()
            .zip(other)
            .fold(0., |a, (b, c)| a + (b - c) * (b - c))
            .sqrt()
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("{count} descriptors accumulated, need more than {requested} to cluster")]
    InsufficientData { count: usize, requested: usize },
    #[error("record `{0}` not found in store")]
    MissingRecord(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}
