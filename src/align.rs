//! # Size Alignment
//!
//! The single rounding primitive used by the mmap sizer and the page pool
//! layout math. Rounds a size up to the next multiple of a power-of-two
//! alignment with one add and one mask, no branches.

/// Rounds `size` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two; this is checked in debug builds and
/// assumed in release builds.
///
/// Guarantees for valid inputs: the result is a multiple of `alignment`,
/// `align_to(size, a) >= size`, and `align_to(size, a) < size + a`.
#[inline]
pub const fn align_to(size: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());

    (size + alignment - 1) & !(alignment - 1)
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// For any size and power-of-two alignment: result is aligned, is
        /// at least `size`, and overshoots by strictly less than one
        /// alignment unit.
        #[test]
        fn round_up_contract(size in 0u64..(1 << 50), shift in 0u32..31) {
            let a = 1u64 << shift;
            let r = align_to(size, a);

            prop_assert_eq!(r % a, 0);
            prop_assert!(r >= size);
            prop_assert!(r < size + a);
            // Idempotence.
            prop_assert_eq!(align_to(r, a), r);
        }
    }
}
