//! Sort and permutation utilities shared by the tree engines.
//!
//! Items are never sorted directly. A sort permutation is computed
//! from the key vector first and then applied out-of-place to keys and
//! items alike, serially or in parallel blocks.

use rayon::prelude::*;

use crate::constants::PARALLEL_GRAIN_SIZE;
use crate::types::WideKeyType;

/// Compute the stable sort permutation of `keys`.
///
/// Returns `p` with `keys[p[i]] <= keys[p[i + 1]]`, where `p` is a
/// permutation of `0..keys.len()` and items with equal keys keep their
/// relative order.
pub fn sort_permutation<K: Ord>(keys: &[K]) -> Vec<usize> {
    let mut permutation: Vec<usize> = (0..keys.len()).collect();
    permutation.sort_by_key(|&index| &keys[index]);
    permutation
}

/// Compute the stable sort permutation of `keys` with a data-parallel sort.
pub fn par_sort_permutation<K: Ord + Sync>(keys: &[K]) -> Vec<usize> {
    let mut permutation: Vec<usize> = (0..keys.len()).collect();
    permutation.par_sort_by_key(|&index| &keys[index]);
    permutation
}

/// Apply a sort permutation out-of-place: `out[i] = values[permutation[i]]`.
pub fn apply_permutation<T: Copy>(permutation: &[usize], values: &[T]) -> Vec<T> {
    debug_assert_eq!(permutation.len(), values.len());
    permutation.iter().map(|&index| values[index]).collect()
}

/// Apply a sort permutation with block-partitioned parallel writes.
pub fn par_apply_permutation<T: Copy + Send + Sync>(permutation: &[usize], values: &[T]) -> Vec<T> {
    debug_assert_eq!(permutation.len(), values.len());
    permutation
        .par_iter()
        .with_min_len(PARALLEL_GRAIN_SIZE)
        .map(|&index| values[index])
        .collect()
}

/// Counting sort over 8-bit keys.
///
/// Returns the stable sort permutation of `keys` together with a
/// 257-entry prefix table whose `i`-th entry is the index of the first
/// key `>= i` in sorted order; the final entry is `keys.len()`.
pub fn counting_sort(keys: &[WideKeyType]) -> (Vec<usize>, [usize; 257]) {
    let mut table = [0usize; 257];
    for &key in keys {
        table[key as usize + 1] += 1;
    }
    for i in 1..257 {
        table[i] += table[i - 1];
    }

    let mut next = table;
    let mut permutation = vec![0usize; keys.len()];
    for (index, &key) in keys.iter().enumerate() {
        permutation[next[key as usize]] = index;
        next[key as usize] += 1;
    }

    (permutation, table)
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;
    use rand::prelude::*;

    use super::*;

    fn random_wide_keys(n: usize, seed: u64) -> Vec<WideKeyType> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen::<WideKeyType>()).collect()
    }

    fn assert_is_permutation(permutation: &[usize]) {
        let mut sorted = permutation.to_vec();
        sorted.sort_unstable();
        assert!(sorted.into_iter().eq(0..permutation.len()));
    }

    #[test]
    fn test_sort_permutation_sorts() {
        let keys = [5u32, 1, 4, 1, 5, 9, 2, 6];
        let permutation = sort_permutation(&keys);
        assert_is_permutation(&permutation);
        assert!(permutation
            .iter()
            .tuple_windows()
            .all(|(&i, &j)| keys[i] <= keys[j]));
    }

    #[test]
    fn test_sort_permutation_is_stable() {
        let keys = [1u32, 0, 1, 0, 1];
        assert_eq!(vec![1, 3, 0, 2, 4], sort_permutation(&keys));
    }

    #[test]
    fn test_parallel_sort_permutation_matches_the_serial_one() {
        let keys = random_wide_keys(10_000, 7);
        assert_eq!(sort_permutation(&keys), par_sort_permutation(&keys));
    }

    #[test]
    fn test_apply_permutation_gathers() {
        let values = ['a', 'b', 'c', 'd'];
        let permutation = [2usize, 0, 3, 1];
        assert_eq!(vec!['c', 'a', 'd', 'b'], apply_permutation(&permutation, &values));
    }

    #[test]
    fn test_parallel_apply_permutation_matches_the_serial_one() {
        let keys = random_wide_keys(5_000, 11);
        let permutation = sort_permutation(&keys);
        assert_eq!(
            apply_permutation(&permutation, &keys),
            par_apply_permutation(&permutation, &keys)
        );
    }

    #[test]
    fn test_counting_sort_sorts() {
        let keys = random_wide_keys(1_000, 3);
        let (permutation, _) = counting_sort(&keys);
        assert_is_permutation(&permutation);
        let sorted = apply_permutation(&permutation, &keys);
        assert!(sorted.iter().tuple_windows().all(|(a, b)| a <= b));
    }

    #[test]
    fn test_counting_sort_matches_the_comparison_sort() {
        let keys = random_wide_keys(1_000, 5);
        let (permutation, _) = counting_sort(&keys);
        assert_eq!(sort_permutation(&keys), permutation);
    }

    #[test]
    fn test_counting_sort_table_is_monotone() {
        let keys = random_wide_keys(1_000, 9);
        let (_, table) = counting_sort(&keys);
        assert!(table.iter().tuple_windows().all(|(a, b)| a <= b));
        assert_eq!(0, table[0]);
        assert_eq!(keys.len(), table[256]);
    }

    #[test]
    fn test_counting_sort_table_points_at_the_first_key_not_below() {
        let keys = [3u8, 0, 3, 7, 0, 255];
        let (permutation, table) = counting_sort(&keys);
        let sorted = apply_permutation(&permutation, &keys);
        for value in 0..=256usize {
            let expected = sorted
                .iter()
                .position(|&key| key as usize >= value)
                .unwrap_or(keys.len());
            assert_eq!(expected, table[value]);
        }
    }

    #[test]
    fn test_counting_sort_of_nothing() {
        let (permutation, table) = counting_sort(&[]);
        assert!(permutation.is_empty());
        assert_eq!([0usize; 257], table);
    }
}
