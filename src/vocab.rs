use nalgebra::DMatrix;
use rand::distributions::WeightedIndex;
use rand::prelude::*;

use crate::store::MatStore;
use crate::{Histogram, Result, RetrievalError};

/// Convergence and restart settings for k-means clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterParams {
    /// Maximum Lloyd iterations per restart.
    pub max_iterations: usize,
    /// Stop when no centroid moves further than this between iterations.
    pub epsilon: f32,
    /// Number of independent restarts; the lowest-cost run wins.
    pub restarts: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            epsilon: 1e-3,
            restarts: 1,
        }
    }
}

/// Accumulates keypoint descriptors across a corpus and clusters them into
/// a [`Vocabulary`] of K visual words.
///
/// The trainer moves through two phases: accumulation (`add`) and a single
/// `cluster` call once the corpus traversal is complete. Re-clustering the
/// same accumulator is unsupported.
#[derive(Debug, Clone)]
pub struct VocabTrainer {
    k: usize,
    params: ClusterParams,
    dim: usize,
    data: Vec<f32>,
    count: usize,
}

impl VocabTrainer {
    pub fn new(k: usize) -> Self {
        Self::with_params(k, ClusterParams::default())
    }

    pub fn with_params(k: usize, params: ClusterParams) -> Self {
        Self {
            k,
            params,
            dim: 0,
            data: Vec::new(),
            count: 0,
        }
    }

    /// Append a batch of descriptor rows to the accumulator. No
    /// deduplication is performed; empty batches are ignored.
    pub fn add(&mut self, descriptors: &DMatrix<f32>) {
        if descriptors.nrows() == 0 {
            return;
        }
        if self.dim == 0 {
            self.dim = descriptors.ncols();
        }
        assert_eq!(
            descriptors.ncols(),
            self.dim,
            "descriptor dimensionality changed mid-accumulation"
        );
        for r in 0..descriptors.nrows() {
            for c in 0..self.dim {
                self.data.push(descriptors[(r, c)]);
            }
        }
        self.count += descriptors.nrows();
    }

    /// Number of descriptors accumulated so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Cluster the accumulated descriptors into `k` centroids.
    ///
    /// Runs k-means++-seeded Lloyd iterations for each configured restart
    /// and keeps the lowest-cost run. Fails with
    /// [`RetrievalError::InsufficientData`] when the accumulator holds no
    /// more than `k` descriptors; the caller decides whether to gather more
    /// data or abort.
    pub fn cluster(&self) -> Result<Vocabulary> {
        if self.k == 0 {
            return Err(RetrievalError::Config(
                "vocabulary size must be positive".to_string(),
            ));
        }
        if self.count <= self.k {
            return Err(RetrievalError::InsufficientData {
                count: self.count,
                requested: self.k,
            });
        }
        let mut rng = thread_rng();
        let mut best: Option<(Vec<f32>, f64)> = None;
        for _ in 0..self.params.restarts.max(1) {
            let (centers, cost) = self.run_kmeans(&mut rng);
            if best.as_ref().map_or(true, |(_, c)| cost < *c) {
                best = Some((centers, cost));
            }
        }
        let (centers, _) = best.unwrap();
        Ok(Vocabulary::from_words(DMatrix::from_row_slice(
            self.k, self.dim, &centers,
        )))
    }

    fn run_kmeans<R: Rng>(&self, rng: &mut R) -> (Vec<f32>, f64) {
        let mut centers = self.seed_kmeans_pp(rng);
        let mut assignment = vec![0usize; self.count];

        for _ in 0..self.params.max_iterations.max(1) {
            // assignment step
            for i in 0..self.count {
                assignment[i] = nearest_center(self.row(i), &centers, self.dim).0;
            }

            // update step; empty clusters keep their previous centroid
            let mut sums = vec![0f32; self.k * self.dim];
            let mut sizes = vec![0usize; self.k];
            for i in 0..self.count {
                let a = assignment[i];
                sizes[a] += 1;
                for (s, v) in sums[a * self.dim..(a + 1) * self.dim]
                    .iter_mut()
                    .zip(self.row(i))
                {
                    *s += v;
                }
            }
            let mut shift = 0f32;
            for c in 0..self.k {
                if sizes[c] == 0 {
                    continue;
                }
                let inv = 1.0 / sizes[c] as f32;
                let old = &mut centers[c * self.dim..(c + 1) * self.dim];
                let mut moved = 0f32;
                for (o, s) in old.iter_mut().zip(&sums[c * self.dim..(c + 1) * self.dim]) {
                    let n = s * inv;
                    moved += (n - *o) * (n - *o);
                    *o = n;
                }
                shift = shift.max(moved.sqrt());
            }
            if shift < self.params.epsilon {
                break;
            }
        }

        let cost = (0..self.count)
            .map(|i| nearest_center(self.row(i), &centers, self.dim).1 as f64)
            .sum();
        (centers, cost)
    }

    /// k-means++ seeding: the first center is uniform, each further center
    /// is drawn with probability proportional to its squared distance from
    /// the nearest chosen center.
    fn seed_kmeans_pp<R: Rng>(&self, rng: &mut R) -> Vec<f32> {
        let mut centers = Vec::with_capacity(self.k * self.dim);
        let first = rng.gen_range(0..self.count);
        centers.extend_from_slice(self.row(first));

        let mut d2: Vec<f32> = (0..self.count)
            .map(|i| dist2(self.row(i), self.row(first)))
            .collect();

        while centers.len() < self.k * self.dim {
            let pick = match WeightedIndex::new(&d2) {
                Ok(dist) => dist.sample(rng),
                // all remaining points coincide with a center
                Err(_) => rng.gen_range(0..self.count),
            };
            let start = centers.len();
            centers.extend_from_slice(self.row(pick));
            let new_center = centers[start..].to_vec();
            for (i, d) in d2.iter_mut().enumerate() {
                *d = d.min(dist2(self.row(i), &new_center));
            }
        }
        centers
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }
}

fn dist2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest_center(point: &[f32], centers: &[f32], dim: usize) -> (usize, f32) {
    let mut best = (0usize, f32::MAX);
    for (c, center) in centers.chunks_exact(dim).enumerate() {
        let d = dist2(point, center);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

/// Output weighting for histogram encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightMode {
    /// L1-normalized histogram; sums to 1 for non-empty input.
    Normalized,
    /// Normalized histogram scaled by the descriptor count (raw counts).
    ScaledByCount,
    /// Normalized histogram scaled by the vocabulary size.
    ScaledByVocabSize,
}

/// Visual vocabulary built from a collection of image keypoint descriptors.
/// Can be:
/// 1. Created by a [`VocabTrainer`].
/// 2. Saved to / loaded from a named record in a [`MatStore`].
/// 3. Used to encode a new set of descriptors into a [`Histogram`] (and
///    optionally get the descriptor indices assigned to each word).
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    words: DMatrix<f32>,
}

impl Vocabulary {
    pub fn from_words(words: DMatrix<f32>) -> Self {
        Self { words }
    }

    /// Number of visual words.
    pub fn len(&self) -> usize {
        self.words.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.words.nrows() == 0
    }

    /// Descriptor dimensionality.
    pub fn dim(&self) -> usize {
        self.words.ncols()
    }

    pub fn words(&self) -> &DMatrix<f32> {
        &self.words
    }

    /// Nearest visual word for every descriptor row (exact linear search).
    pub fn assign(&self, descriptors: &DMatrix<f32>) -> Vec<usize> {
        (0..descriptors.nrows())
            .map(|i| self.nearest_word(descriptors, i))
            .collect()
    }

    /// Encode descriptors as a histogram over the vocabulary.
    ///
    /// Zero descriptor rows produce an all-zero histogram, not an error.
    pub fn encode(&self, descriptors: &DMatrix<f32>, mode: WeightMode) -> Histogram {
        self.encode_with_assignments(descriptors, mode).0
    }

    /// Like [`Vocabulary::encode`], additionally returning, per word, the
    /// list of descriptor indices assigned to it.
    pub fn encode_with_assignments(
        &self,
        descriptors: &DMatrix<f32>,
        mode: WeightMode,
    ) -> (Histogram, Vec<Vec<usize>>) {
        let mut histogram: Histogram = vec![0.0; self.len()];
        let mut clusters: Vec<Vec<usize>> = vec![Vec::new(); self.len()];
        for i in 0..descriptors.nrows() {
            let word = self.nearest_word(descriptors, i);
            histogram[word] += 1.0;
            clusters[word].push(i);
        }

        let total = descriptors.nrows() as f32;
        if total > 0.0 {
            let scale = match mode {
                WeightMode::Normalized => 1.0 / total,
                WeightMode::ScaledByCount => 1.0,
                WeightMode::ScaledByVocabSize => self.len() as f32 / total,
            };
            for w in histogram.iter_mut() {
                *w *= scale;
            }
        }
        (histogram, clusters)
    }

    /// Persist the word matrix as a named record.
    pub fn save(&self, store: &MatStore, name: &str) -> Result<()> {
        store.write(name, &self.words)
    }

    /// Load a vocabulary previously written with [`Vocabulary::save`].
    pub fn load(store: &MatStore, name: &str) -> Result<Self> {
        Ok(Self::from_words(store.read(name)?))
    }

    fn nearest_word(&self, descriptors: &DMatrix<f32>, i: usize) -> usize {
        let mut best = (0usize, f32::MAX);
        for w in 0..self.words.nrows() {
            let d = (descriptors.row(i) - self.words.row(w)).norm_squared();
            if d < best.1 {
                best = (w, d);
            }
        }
        best.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn random_batch(rows: usize, dim: usize, seed: u64) -> DMatrix<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        DMatrix::from_fn(rows, dim, |_, _| rng.gen_range(-1.0..1.0))
    }

    #[test]
    fn clustering_returns_k_centroids_of_dim_d() {
        let mut trainer = VocabTrainer::new(50);
        for seed in 0..200 {
            trainer.add(&random_batch(3, 16, seed));
        }
        assert_eq!(trainer.count(), 600);
        let vocabulary = trainer.cluster().unwrap();
        assert_eq!(vocabulary.len(), 50);
        assert_eq!(vocabulary.dim(), 16);
    }

    #[test]
    fn insufficient_data_is_reported_not_clustered() {
        let mut trainer = VocabTrainer::new(1000);
        trainer.add(&random_batch(500, 8, 0));
        match trainer.cluster() {
            Err(RetrievalError::InsufficientData { count, requested }) => {
                assert_eq!(count, 500);
                assert_eq!(requested, 1000);
            }
            other => panic!("expected InsufficientData, got {:?}", other.map(|_| ())),
        }
        // the failure is non-fatal: more data makes the same trainer usable
        trainer.add(&random_batch(501, 8, 1));
        assert!(trainer.cluster().is_ok());
    }

    #[test]
    fn empty_batches_are_ignored() {
        let mut trainer = VocabTrainer::new(2);
        trainer.add(&DMatrix::zeros(0, 16));
        assert_eq!(trainer.count(), 0);
    }

    #[test]
    fn restarts_keep_a_valid_solution() {
        let params = ClusterParams {
            restarts: 3,
            ..ClusterParams::default()
        };
        let mut trainer = VocabTrainer::with_params(4, params);
        trainer.add(&random_batch(80, 8, 3));
        let vocabulary = trainer.cluster().unwrap();
        assert_eq!(vocabulary.len(), 4);
    }

    #[test]
    fn encoding_is_deterministic() {
        let vocabulary = Vocabulary::from_words(random_batch(10, 8, 4));
        let descriptors = random_batch(40, 8, 5);
        let a = vocabulary.encode(&descriptors, WeightMode::Normalized);
        let b = vocabulary.encode(&descriptors, WeightMode::Normalized);
        assert_eq!(a, b);
    }

    #[test]
    fn normalized_histogram_sums_to_one() {
        let vocabulary = Vocabulary::from_words(random_batch(12, 8, 6));
        let descriptors = random_batch(33, 8, 7);
        let histogram = vocabulary.encode(&descriptors, WeightMode::Normalized);
        assert!(histogram.iter().all(|&w| w >= 0.0));
        let sum: f32 = histogram.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_descriptor_set_gives_all_zero_histogram() {
        let vocabulary = Vocabulary::from_words(random_batch(12, 8, 8));
        let histogram = vocabulary.encode(&DMatrix::zeros(0, 8), WeightMode::Normalized);
        assert_eq!(histogram.len(), 12);
        assert!(histogram.iter().all(|&w| w == 0.0));
    }

    #[test]
    fn weighted_modes_scale_the_normalized_histogram() {
        let vocabulary = Vocabulary::from_words(random_batch(5, 4, 9));
        let descriptors = random_batch(20, 4, 10);
        let normalized = vocabulary.encode(&descriptors, WeightMode::Normalized);
        let by_count = vocabulary.encode(&descriptors, WeightMode::ScaledByCount);
        let by_size = vocabulary.encode(&descriptors, WeightMode::ScaledByVocabSize);
        for i in 0..5 {
            assert!((by_count[i] - normalized[i] * 20.0).abs() < 1e-4);
            assert!((by_size[i] - normalized[i] * 5.0).abs() < 1e-4);
        }
    }

    #[test]
    fn assignments_trace_descriptors_to_words() {
        let vocabulary = Vocabulary::from_words(random_batch(6, 4, 11));
        let descriptors = random_batch(25, 4, 12);
        let (histogram, clusters) =
            vocabulary.encode_with_assignments(&descriptors, WeightMode::ScaledByCount);
        let assigned: usize = clusters.iter().map(|c| c.len()).sum();
        assert_eq!(assigned, 25);
        for (word, members) in clusters.iter().enumerate() {
            assert!((histogram[word] - members.len() as f32).abs() < 1e-5);
        }
        // the flat assignment agrees with the per-word index lists
        let words = vocabulary.assign(&descriptors);
        for (i, &word) in words.iter().enumerate() {
            assert!(clusters[word].contains(&i));
        }
    }
}
