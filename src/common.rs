pub(crate) mod error;

/// The load factor of the bucket arrays. A table grows before its number of
/// occupied buckets would exceed `buckets * LOAD_FACTOR`.
pub(crate) const LOAD_FACTOR: f64 = 0.7;

/// A table that is less populated than `buckets * MIN_LOAD_FACTOR` is
/// compacted when it is cloned.
pub(crate) const MIN_LOAD_FACTOR: f64 = 0.5;

/// The number of buckets allocated on the first insertion, and after a clear.
/// Must be a power of two.
pub(crate) const INITIAL_BUCKETS: usize = 8;

/// The default maximum number of buckets in a single bucket array.
pub(crate) const MAX_BUCKETS: usize = 1 << 30;

/// Returns the number of buckets needed to hold `count` entries without
/// growing, or `None` if that number does not fit in a `usize`.
pub(crate) fn buckets_for(count: usize) -> Option<usize> {
    // The float to int cast saturates.
    let wanted = (count as f64 / LOAD_FACTOR) as usize;
    wanted
        .checked_add(1)?
        .max(INITIAL_BUCKETS)
        .checked_next_power_of_two()
}

/// Returns the number of entries a bucket array of `buckets` length can hold.
pub(crate) fn max_count_for(buckets: usize) -> usize {
    (buckets as f64 * LOAD_FACTOR) as usize
}

#[cfg(test)]
mod tests {
    use super::{buckets_for, max_count_for, INITIAL_BUCKETS};

    #[test]
    fn sizing() {
        assert_eq!(buckets_for(0), Some(INITIAL_BUCKETS));
        assert_eq!(buckets_for(5), Some(INITIAL_BUCKETS));
        assert_eq!(buckets_for(6), Some(16));
        assert_eq!(buckets_for(100), Some(256));

        assert_eq!(max_count_for(8), 5);
        assert_eq!(max_count_for(16), 11);

        for n in [1, 7, 33, 1000, 4096] {
            assert!(max_count_for(buckets_for(n).unwrap()) >= n);
        }
    }

    #[test]
    fn sizing_does_not_overflow() {
        assert_eq!(buckets_for(usize::MAX), None);
        assert_eq!(buckets_for(usize::MAX / 2), None);
        assert_eq!(buckets_for(1 << 62), Some(1 << 63));
        assert_eq!(buckets_for(1 << 40), Some(1 << 41));
    }
}
