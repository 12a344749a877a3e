use nalgebra::{Matrix3, Point2};
use rand::{thread_rng, Rng};

use crate::extract::Features;
use crate::fundamental::{self, RansacParams, MIN_SAMPLE};
use crate::matching::{knn2_bidirectional, KnnMatches, MatchRecord};

/// Configuration for the three-stage match verifier.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifierParams {
    /// Nearest-neighbor distance ratio above which a match is ambiguous.
    pub ratio: f32,
    pub ransac: RansacParams,
}

impl Default for VerifierParams {
    fn default() -> Self {
        Self {
            ratio: 0.8,
            ransac: RansacParams::default(),
        }
    }
}

/// Result of verifying a candidate against a query.
///
/// An empty inlier set with no matrix is the legitimate "no match"
/// outcome; the inlier count is the similarity score used for ranking.
#[derive(Debug, Clone)]
pub struct Verification {
    pub inliers: Vec<MatchRecord>,
    pub fundamental: Option<Matrix3<f64>>,
}

impl Verification {
    pub fn no_match() -> Self {
        Self {
            inliers: Vec::new(),
            fundamental: None,
        }
    }

    pub fn score(&self) -> usize {
        self.inliers.len()
    }
}

/// Clear every candidate list with fewer than two neighbors or whose
/// best/second-best distance ratio exceeds `ratio`. Returns the number of
/// cleared lists.
///
/// Raising `ratio` never clears more lists.
pub fn ratio_test(matches: &mut KnnMatches, ratio: f32) -> usize {
    let mut removed = 0;
    for list in matches.iter_mut() {
        if list.len() < 2 {
            if !list.is_empty() {
                list.clear();
            }
            removed += 1;
        } else if list[0].distance / list[1].distance > ratio {
            list.clear();
            removed += 1;
        }
    }
    removed
}

/// Keep a correspondence `(qa, qb)` only when the forward direction's top
/// surviving match for `qa` is `qb` and the backward direction's top
/// surviving match for `qb` points back to `qa`.
///
/// The output is mutually consistent and free of duplicates.
pub fn symmetry_test(forward: &KnnMatches, backward: &KnnMatches) -> Vec<MatchRecord> {
    let mut symmetric = Vec::new();
    for list in forward {
        let top = match list.first() {
            Some(m) => m,
            None => continue,
        };
        let reverse = match backward.get(top.candidate).and_then(|l| l.first()) {
            Some(m) => m,
            None => continue,
        };
        if reverse.candidate == top.query {
            symmetric.push(*top);
        }
    }
    symmetric
}

/// Three-stage robust match verifier: ratio test in both directions,
/// symmetry test, then RANSAC fundamental-matrix estimation with an
/// 8-point refinement from the inliers.
#[derive(Debug, Clone, Default)]
pub struct MatchVerifier {
    params: VerifierParams,
}

impl MatchVerifier {
    pub fn new(params: VerifierParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &VerifierParams {
        &self.params
    }

    /// Verify `candidate` against `query` using a thread-local RNG.
    pub fn verify(&self, query: &Features, candidate: &Features) -> Verification {
        self.verify_with_rng(query, candidate, &mut thread_rng())
    }

    /// Deterministic variant of [`MatchVerifier::verify`] for a caller-provided RNG.
    pub fn verify_with_rng<R: Rng + ?Sized>(
        &self,
        query: &Features,
        candidate: &Features,
        rng: &mut R,
    ) -> Verification {
        if query.is_empty() || candidate.is_empty() {
            return Verification::no_match();
        }

        let (mut forward, mut backward) =
            knn2_bidirectional(&query.descriptors, &candidate.descriptors);
        ratio_test(&mut forward, self.params.ratio);
        ratio_test(&mut backward, self.params.ratio);

        let vetted = symmetry_test(&forward, &backward);
        if vetted.is_empty() {
            return Verification::no_match();
        }

        let p1: Vec<Point2<f64>> = vetted
            .iter()
            .map(|m| point_of(&query.keypoints[m.query]))
            .collect();
        let p2: Vec<Point2<f64>> = vetted
            .iter()
            .map(|m| point_of(&candidate.keypoints[m.candidate]))
            .collect();

        let fit = match fundamental::ransac(&p1, &p2, &self.params.ransac, rng) {
            Some(fit) => fit,
            None => return Verification::no_match(),
        };

        let inliers: Vec<MatchRecord> = vetted
            .iter()
            .zip(&fit.inliers)
            .filter(|(_, &keep)| keep)
            .map(|(m, _)| *m)
            .collect();

        // recompute the matrix from all surviving matches with the direct method
        let refined = if inliers.len() >= MIN_SAMPLE {
            let r1: Vec<Point2<f64>> = inliers
                .iter()
                .map(|m| point_of(&query.keypoints[m.query]))
                .collect();
            let r2: Vec<Point2<f64>> = inliers
                .iter()
                .map(|m| point_of(&candidate.keypoints[m.candidate]))
                .collect();
            fundamental::eight_point(&r1, &r2).unwrap_or(fit.matrix)
        } else {
            fit.matrix
        };

        Verification {
            inliers,
            fundamental: Some(refined),
        }
    }
}

fn point_of(kp: &crate::extract::KeyPoint) -> Point2<f64> {
    Point2::new(kp.x as f64, kp.y as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{KeyPoint, DESCRIPTOR_DIM};
    use crate::matching::{knn2, MatchRecord};
    use nalgebra::DMatrix;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use smallvec::smallvec;

    fn record(query: usize, candidate: usize, distance: f32) -> MatchRecord {
        MatchRecord {
            query,
            candidate,
            distance,
        }
    }

    /// Random keypoints with well-separated random descriptors.
    fn random_features(count: usize, seed: u64) -> Features {
        let mut rng = StdRng::seed_from_u64(seed);
        let keypoints = (0..count)
            .map(|_| KeyPoint {
                x: rng.gen_range(0.0..400.0),
                y: rng.gen_range(0.0..400.0),
                size: rng.gen_range(4.0..30.0),
                response: rng.gen_range(0.001..0.1),
            })
            .collect();
        let descriptors = DMatrix::from_fn(count, DESCRIPTOR_DIM, |_, _| rng.gen_range(-1.0..1.0));
        Features {
            keypoints,
            descriptors,
        }
    }

    /// Features whose descriptors are scaled axis vectors on disjoint axes
    /// per instance: every cross-set distance is identical, so the ratio
    /// test removes everything.
    fn axis_features(count: usize, first_axis: usize) -> Features {
        let keypoints = (0..count)
            .map(|i| KeyPoint {
                x: 10.0 * i as f32,
                y: 7.0 * i as f32,
                size: 10.0,
                response: 0.01,
            })
            .collect();
        let descriptors = DMatrix::from_fn(count, DESCRIPTOR_DIM, |r, c| {
            if c == first_axis + r {
                10.0
            } else {
                0.0
            }
        });
        Features {
            keypoints,
            descriptors,
        }
    }

    #[test]
    fn ratio_test_clears_ambiguous_and_short_lists() {
        let mut matches = vec![
            smallvec![record(0, 0, 1.0), record(0, 1, 10.0)], // unambiguous
            smallvec![record(1, 2, 9.0), record(1, 3, 10.0)], // ambiguous
            smallvec![record(2, 4, 1.0)],                     // single neighbor
        ];
        let removed = ratio_test(&mut matches, 0.8);
        assert_eq!(removed, 2);
        assert_eq!(matches[0].len(), 2);
        assert!(matches[1].is_empty());
        assert!(matches[2].is_empty());
    }

    #[test]
    fn ratio_test_is_monotonic_in_the_threshold() {
        let a = random_features(40, 1);
        let b = random_features(40, 2);
        let mut survivors = Vec::new();
        for ratio in [0.5, 0.7, 0.9, 1.0] {
            let mut m = knn2(&a.descriptors, &b.descriptors);
            ratio_test(&mut m, ratio);
            survivors.push(m.iter().filter(|l| !l.is_empty()).count());
        }
        assert!(survivors.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn symmetry_test_keeps_only_mutual_matches() {
        // forward: 0 -> 1, 1 -> 0; backward: 0 -> 0 (breaks 1 -> 0), 1 -> 0
        let forward = vec![
            smallvec![record(0, 1, 1.0), record(0, 0, 5.0)],
            smallvec![record(1, 0, 1.0), record(1, 1, 5.0)],
        ];
        let backward = vec![
            smallvec![record(0, 0, 1.0), record(0, 1, 5.0)],
            smallvec![record(1, 0, 1.0), record(1, 1, 5.0)],
        ];
        let sym = symmetry_test(&forward, &backward);
        assert_eq!(sym.len(), 1);
        assert_eq!((sym[0].query, sym[0].candidate), (0, 1));
        // every retained pair agrees in both directions
        for m in &sym {
            assert_eq!(backward[m.candidate][0].candidate, m.query);
        }
    }

    #[test]
    fn self_match_keeps_every_keypoint() {
        let f = random_features(30, 5);
        let verifier = MatchVerifier::default();
        let mut rng = StdRng::seed_from_u64(9);
        let v = verifier.verify_with_rng(&f, &f, &mut rng);
        assert_eq!(v.score(), f.len());
        assert!(v.fundamental.is_some());
        for m in &v.inliers {
            assert_eq!(m.query, m.candidate);
        }
    }

    #[test]
    fn unrelated_sets_yield_no_match() {
        // disjoint axis descriptors: all cross distances tie, ratio = 1
        let a = axis_features(12, 0);
        let b = axis_features(12, 30);
        let verifier = MatchVerifier::default();
        let mut rng = StdRng::seed_from_u64(4);
        let v = verifier.verify_with_rng(&a, &b, &mut rng);
        assert_eq!(v.score(), 0);
        assert!(v.fundamental.is_none());
    }

    #[test]
    fn empty_features_are_a_valid_no_match() {
        let verifier = MatchVerifier::default();
        let empty = Features::empty();
        let full = random_features(10, 8);
        let v = verifier.verify(&empty, &full);
        assert_eq!(v.score(), 0);
        assert!(v.fundamental.is_none());
    }
}
