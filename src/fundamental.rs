use nalgebra::{DMatrix, Matrix3, Point2, Vector3};
use rand::Rng;

/// Minimal correspondence count for the 8-point solver.
pub const MIN_SAMPLE: usize = 8;

/// Configuration for robust fundamental-matrix estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct RansacParams {
    /// Inlier threshold: maximum point-to-epipolar distance in pixels.
    pub distance: f64,
    /// Target probability of having drawn one all-inlier sample.
    pub confidence: f64,
    /// Upper bound on sampling iterations.
    pub max_iterations: usize,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            distance: 3.0,
            confidence: 0.99,
            max_iterations: 1000,
        }
    }
}

/// Outcome of a successful RANSAC run.
#[derive(Debug, Clone)]
pub struct RansacFit {
    pub matrix: Matrix3<f64>,
    /// Per-correspondence inlier flags, same order as the input slices.
    pub inliers: Vec<bool>,
    pub inlier_count: usize,
    pub iterations: usize,
}

/// Robustly estimate a fundamental matrix from point correspondences.
///
/// Returns `None` when fewer than [`MIN_SAMPLE`] correspondences are
/// provided or no sample produces a valid model; both are legitimate
/// no-match outcomes, not errors.
pub fn ransac<R: Rng + ?Sized>(
    p1: &[Point2<f64>],
    p2: &[Point2<f64>],
    params: &RansacParams,
    rng: &mut R,
) -> Option<RansacFit> {
    debug_assert_eq!(p1.len(), p2.len());
    let n = p1.len();
    if n < MIN_SAMPLE {
        return None;
    }

    let mut best: Option<(Matrix3<f64>, Vec<bool>, usize)> = None;
    let mut bound = params.max_iterations.max(1);
    let mut iterations = 0;

    while iterations < bound {
        iterations += 1;

        let sample = rand::seq::index::sample(rng, n, MIN_SAMPLE);
        let s1: Vec<Point2<f64>> = sample.iter().map(|i| p1[i]).collect();
        let s2: Vec<Point2<f64>> = sample.iter().map(|i| p2[i]).collect();
        let model = match eight_point(&s1, &s2) {
            Some(m) => m,
            None => continue,
        };

        let mask = inlier_mask(&model, p1, p2, params.distance);
        let count = mask.iter().filter(|&&m| m).count();
        if best.as_ref().map_or(true, |(_, _, c)| count > *c) {
            best = Some((model, mask, count));

            // shrink the iteration bound from the observed inlier ratio
            let w = count as f64 / n as f64;
            let fail = (1.0 - w.powi(MIN_SAMPLE as i32)).max(f64::EPSILON);
            if fail < 1.0 {
                let needed = ((1.0 - params.confidence).ln() / fail.ln()).ceil();
                if needed.is_finite() && needed >= 0.0 {
                    bound = bound.min((needed as usize).max(iterations));
                }
            }
        }
    }

    best.map(|(matrix, inliers, inlier_count)| RansacFit {
        matrix,
        inliers,
        inlier_count,
        iterations,
    })
}

/// Flag every correspondence whose Sampson distance to the epipolar
/// geometry of `f` is within `distance` pixels.
pub fn inlier_mask(
    f: &Matrix3<f64>,
    p1: &[Point2<f64>],
    p2: &[Point2<f64>],
    distance: f64,
) -> Vec<bool> {
    let threshold = distance * distance;
    p1.iter()
        .zip(p2)
        .map(|(a, b)| sampson_error(f, a, b) <= threshold)
        .collect()
}

/// Estimate a fundamental matrix with the direct (non-robust) 8-point
/// algorithm: Hartley normalization, homogeneous least squares via SVD,
/// rank-2 enforcement, denormalization.
///
/// Returns `None` for degenerate input (fewer than 8 pairs, or collapsed
/// point configurations).
pub fn eight_point(p1: &[Point2<f64>], p2: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    if p1.len() != p2.len() || p1.len() < MIN_SAMPLE {
        return None;
    }
    let (n1, t1) = normalize_hartley(p1)?;
    let (n2, t2) = normalize_hartley(p2)?;

    let n = n1.len();
    let mut a = DMatrix::<f64>::zeros(n, 9);
    for i in 0..n {
        let (x1, y1) = (n1[i].x, n1[i].y);
        let (x2, y2) = (n2[i].x, n2[i].y);
        a[(i, 0)] = x2 * x1;
        a[(i, 1)] = x2 * y1;
        a[(i, 2)] = x2;
        a[(i, 3)] = y2 * x1;
        a[(i, 4)] = y2 * y1;
        a[(i, 5)] = y2;
        a[(i, 6)] = x1;
        a[(i, 7)] = y1;
        a[(i, 8)] = 1.0;
    }

    let svd = a.svd(false, true);
    let vt = svd.v_t?;
    let fvec = vt.row(vt.nrows() - 1);
    let f0 = Matrix3::new(
        fvec[0], fvec[1], fvec[2], fvec[3], fvec[4], fvec[5], fvec[6], fvec[7], fvec[8],
    );
    let f = enforce_rank2(&f0)?;
    Some(t2.transpose() * f * t1)
}

/// Hartley normalization: translate the centroid to the origin and scale so
/// the mean distance from it is `sqrt(2)`. Returns the normalized points and
/// the applied 3x3 transform. `None` when the points collapse to one spot.
fn normalize_hartley(pts: &[Point2<f64>]) -> Option<(Vec<Point2<f64>>, Matrix3<f64>)> {
    let n = pts.len() as f64;
    let mx = pts.iter().map(|p| p.x).sum::<f64>() / n;
    let my = pts.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - mx).powi(2) + (p.y - my).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist <= 1e-12 {
        return None;
    }

    let s = 2f64.sqrt() / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * mx, 0.0, s, -s * my, 0.0, 0.0, 1.0);
    let out = pts
        .iter()
        .map(|p| {
            let v = t * Vector3::new(p.x, p.y, 1.0);
            Point2::new(v[0], v[1])
        })
        .collect();
    Some((out, t))
}

/// Project onto the rank-2 manifold by zeroing the smallest singular value.
fn enforce_rank2(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let vt = svd.v_t?;
    let sigma = Matrix3::new(
        svd.singular_values[0],
        0.0,
        0.0,
        0.0,
        svd.singular_values[1],
        0.0,
        0.0,
        0.0,
        0.0,
    );
    Some(u * sigma * vt)
}

/// First-order geometric (Sampson) error of a correspondence against `f`,
/// in squared pixels.
pub fn sampson_error(f: &Matrix3<f64>, p1: &Point2<f64>, p2: &Point2<f64>) -> f64 {
    let x1 = Vector3::new(p1.x, p1.y, 1.0);
    let x2 = Vector3::new(p2.x, p2.y, 1.0);
    let fx1 = f * x1;
    let ftx2 = f.transpose() * x2;
    let num = x2.dot(&fx1);
    let denom = fx1[0] * fx1[0] + fx1[1] * fx1[1] + ftx2[0] * ftx2[0] + ftx2[1] * ftx2[1];
    if denom <= 1e-18 {
        f64::INFINITY
    } else {
        num * num / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Correspondences under a pure translation `t`: the true fundamental
    /// matrix is the skew form of `(t.x, t.y, 0)`.
    fn translated_pairs(
        count: usize,
        t: (f64, f64),
        rng: &mut StdRng,
    ) -> (Vec<Point2<f64>>, Vec<Point2<f64>>) {
        let p1: Vec<Point2<f64>> = (0..count)
            .map(|_| Point2::new(rng.gen_range(0.0..300.0), rng.gen_range(0.0..300.0)))
            .collect();
        let p2 = p1.iter().map(|p| Point2::new(p.x + t.0, p.y + t.1)).collect();
        (p1, p2)
    }

    fn skew_translation(t: (f64, f64)) -> Matrix3<f64> {
        Matrix3::new(0.0, 0.0, t.1, 0.0, 0.0, -t.0, -t.1, t.0, 0.0)
    }

    #[test]
    fn eight_point_recovers_epipolar_constraint() {
        let mut rng = StdRng::seed_from_u64(7);
        let (p1, p2) = translated_pairs(24, (12.0, -5.0), &mut rng);
        let f = eight_point(&p1, &p2).unwrap();
        for (a, b) in p1.iter().zip(&p2) {
            assert!(sampson_error(&f, a, b) < 1e-6);
        }
    }

    #[test]
    fn eight_point_rejects_degenerate_input() {
        let same = vec![Point2::new(1.0, 1.0); 10];
        assert!(eight_point(&same, &same).is_none());
        let few = vec![Point2::new(0.0, 0.0); 5];
        assert!(eight_point(&few, &few).is_none());
    }

    #[test]
    fn ransac_separates_planted_outliers() {
        let mut rng = StdRng::seed_from_u64(11);
        let (mut p1, mut p2) = translated_pairs(60, (8.0, 3.0), &mut rng);
        for _ in 0..20 {
            p1.push(Point2::new(rng.gen_range(0.0..300.0), rng.gen_range(0.0..300.0)));
            p2.push(Point2::new(rng.gen_range(0.0..300.0), rng.gen_range(0.0..300.0)));
        }
        let fit = ransac(&p1, &p2, &RansacParams::default(), &mut rng).unwrap();
        assert!(fit.inlier_count >= 60, "found {} inliers", fit.inlier_count);
        assert!(fit.inliers[..60].iter().all(|&i| i));
    }

    #[test]
    fn ransac_needs_a_minimal_sample() {
        let mut rng = StdRng::seed_from_u64(0);
        let (p1, p2) = translated_pairs(MIN_SAMPLE - 1, (1.0, 0.0), &mut rng);
        assert!(ransac(&p1, &p2, &RansacParams::default(), &mut rng).is_none());
    }

    #[test]
    fn inlier_count_grows_with_threshold() {
        let mut rng = StdRng::seed_from_u64(3);
        let t = (10.0, 0.0);
        let (p1, mut p2) = translated_pairs(50, t, &mut rng);
        // add noise of increasing magnitude
        for (i, p) in p2.iter_mut().enumerate() {
            p.y += i as f64 * 0.2;
        }
        let f = skew_translation(t);
        let mut last = 0;
        for distance in [0.5, 1.0, 3.0, 6.0, 12.0] {
            let count = inlier_mask(&f, &p1, &p2, distance)
                .iter()
                .filter(|&&m| m)
                .count();
            assert!(count >= last);
            last = count;
        }
        assert!(last > 0);
    }
}
