/// Euclidean projection onto the probability simplex `{w >= 0, sum(w) = 1}`.
///
/// Equivalent to solving `min 1/2 ||w - v||^2` under the simplex constraints,
/// done by sorting instead of running a QP solver.
pub fn project_onto_simplex(v: &[f64]) -> Vec<f64> {
    let n = v.len();
    if n == 0 {
        return Vec::new();
    }
    let mut sorted = v.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));

    // theta is set by the largest prefix whose members stay positive after the shift
    let mut cumulative = 0.;
    let mut theta = sorted[0] - 1.;
    for (i, u) in sorted.iter().enumerate() {
        cumulative += u;
        let candidate = (cumulative - 1.) / (i + 1) as f64;
        if u - candidate > 0. {
            theta = candidate;
        }
    }

    let projected = v.iter().map(|w| (w - theta).max(0.)).collect::<Vec<f64>>();
    let total = projected.iter().sum::<f64>();
    if !total.is_finite() || total.abs() < 1e-10 * n as f64 {
        vec![1. / n as f64; n]
    } else {
        // renormalize for stability
        projected.into_iter().map(|w| w / total).collect()
    }
}

/// Projection onto `{lower <= w_i <= upper, sum(w) = 1}`.
///
/// The solution is `clamp(v_i - tau, lower, upper)` for the shift `tau` that
/// makes the weights sum to one, found by bisection. The caller guarantees
/// `n * lower <= 1 <= n * upper`.
pub fn project_onto_box_simplex(v: &[f64], lower: f64, upper: f64) -> Vec<f64> {
    let n = v.len();
    if n == 0 {
        return Vec::new();
    }
    let shifted_sum = |tau: f64| v.iter().map(|x| (x - tau).clamp(lower, upper)).sum::<f64>();

    let max = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = v.iter().copied().fold(f64::INFINITY, f64::min);
    if !max.is_finite() || !min.is_finite() {
        return vec![1. / n as f64; n];
    }
    // everything at `upper` on the low end, everything at `lower` on the high end
    let mut low = min - upper;
    let mut high = max - lower;
    for _ in 0..200 {
        let mid = 0.5 * (low + high);
        if shifted_sum(mid) > 1. {
            low = mid;
        } else {
            high = mid;
        }
        if high - low < 1e-15 {
            break;
        }
    }
    let tau = 0.5 * (low + high);
    v.iter().map(|x| (x - tau).clamp(lower, upper)).collect()
}
