use itertools::Itertools;

/// Number of non-empty subsets of `n` assets holding at most `max_size` members.
/// Saturates at `u64::MAX`.
pub fn subset_count(n: usize, max_size: usize) -> u64 {
    let mut total: u64 = 0;
    let mut binomial: u128 = 1;
    for k in 1..=max_size.min(n) {
        // C(n, k) = C(n, k - 1) * (n - k + 1) / k
        binomial = match binomial.checked_mul((n - k + 1) as u128) {
            Some(product) => product / k as u128,
            None => return u64::MAX,
        };
        if binomial > u64::MAX as u128 {
            return u64::MAX;
        }
        total = total.saturating_add(binomial as u64);
    }
    total
}

/// Index subsets ordered by size, then lexically.
///
/// Assets are indexed in symbol order, so the lexical order of index lists
/// is the lexical order of the symbol sets.
pub fn exhaustive_subsets(n: usize, max_size: usize) -> impl Iterator<Item = Vec<usize>> {
    (1..=max_size.min(n)).flat_map(move |k| (0..n).combinations(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subset_count() {
        assert_eq!(subset_count(3, 3), 7);
        assert_eq!(subset_count(4, 2), 10);
        assert_eq!(subset_count(20, 20), (1 << 20) - 1);
        assert_eq!(subset_count(5, 0), 0);
        assert_eq!(subset_count(400, 400), u64::MAX);
    }

    #[test]
    fn test_exhaustive_subsets_order() {
        let subsets = exhaustive_subsets(3, 2).collect::<Vec<_>>();
        assert_eq!(
            subsets,
            vec![
                vec![0],
                vec![1],
                vec![2],
                vec![0, 1],
                vec![0, 2],
                vec![1, 2]
            ]
        );
    }
}
