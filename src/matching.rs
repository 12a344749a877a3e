use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A single nearest-neighbor correspondence between two descriptor sets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Row index in the query descriptor matrix.
    pub query: usize,
    /// Row index in the candidate descriptor matrix.
    pub candidate: usize,
    /// Euclidean distance between the two descriptors.
    pub distance: f32,
}

/// Up to two nearest candidates for one query descriptor, closest first.
pub type CandidateList = SmallVec<[MatchRecord; 2]>;

/// One [`CandidateList`] per query descriptor, indexed by query row.
pub type KnnMatches = Vec<CandidateList>;

/// Brute-force two-nearest-neighbor search from every row of `query` into
/// the rows of `candidates`.
///
/// The output always has one entry per query row; entries hold fewer than
/// two records when the candidate set is too small.
pub fn knn2(query: &DMatrix<f32>, candidates: &DMatrix<f32>) -> KnnMatches {
    (0..query.nrows())
        .map(|qi| {
            let mut best: Option<(usize, f32)> = None;
            let mut second: Option<(usize, f32)> = None;
            for ci in 0..candidates.nrows() {
                let d2 = (query.row(qi) - candidates.row(ci)).norm_squared();
                match best {
                    None => best = Some((ci, d2)),
                    Some((_, bd)) if d2 < bd => {
                        second = best;
                        best = Some((ci, d2));
                    }
                    _ => match second {
                        None => second = Some((ci, d2)),
                        Some((_, sd)) if d2 < sd => second = Some((ci, d2)),
                        _ => {}
                    },
                }
            }
            let mut list = CandidateList::new();
            for (ci, d2) in best.into_iter().chain(second) {
                list.push(MatchRecord {
                    query: qi,
                    candidate: ci,
                    distance: d2.sqrt(),
                });
            }
            list
        })
        .collect()
}

/// Run [`knn2`] in both directions: `a` against `b` and `b` against `a`.
pub fn knn2_bidirectional(a: &DMatrix<f32>, b: &DMatrix<f32>) -> (KnnMatches, KnnMatches) {
    (knn2(a, b), knn2(b, a))
}
