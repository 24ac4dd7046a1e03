//! Occupancy estimation over the producer/consumer progress counters.
//!
//! The two counters belong to independent queue sides and are read at
//! different instants, so any result is a best-effort snapshot, not a
//! linearizable size. Emptiness is the two counters agreeing; see
//! [`crate::Occupancy`] for the reading discipline.

/// Best-effort element count from one read of each progress counter.
///
/// Uses the raw difference and clamps at zero: a consumer that advanced
/// between the two reads can make the difference momentarily negative, and
/// no retry or correction is attempted.
#[inline]
pub(crate) fn estimate(producer: u64, consumer: u64) -> usize {
    let diff = producer.wrapping_sub(consumer) as i64;
    if diff < 0 { 0 } else { diff as usize }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_indices_mean_zero() {
        assert_eq!(estimate(0, 0), 0);
        assert_eq!(estimate(12_345, 12_345), 0);
    }

    #[test]
    fn difference_is_the_size() {
        assert_eq!(estimate(8, 0), 8);
        assert_eq!(estimate(1_000_007, 1_000_000), 7);
    }

    #[test]
    fn momentary_inversion_clamps_to_zero() {
        // The consumer index can be read after a pop that the producer read
        // predates; the estimate must not go negative.
        assert_eq!(estimate(5, 6), 0);
        assert_eq!(estimate(0, u64::MAX), 0);
    }
}
