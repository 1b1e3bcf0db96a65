#![doc = include_str!("../README.md")]

mod broadword;
pub use broadword::{select64, count_nonzero_pairs};

mod bitvec;
pub use bitvec::{BitAccess, BitVec, BitVector, BitOnes};

mod rank;
pub use rank::{Rank, Rank9, RankCompact};

mod select;
pub use select::{Select, SelectZero, SpanSelect, SelectOnes, SelectZeros, SelectedBits};

/// Returns ceil of `n/d`.
#[inline(always)] pub const fn ceiling_div(n: usize, d: usize) -> usize { (n+d-1)/d }

/// Returns the 0..01..1 mask with `how_many` lowest bits set. `how_many` must be in range [0, 63].
#[inline(always)] pub const fn n_lowest_bits(how_many: u8) -> u64 { (1u64 << how_many).wrapping_sub(1) }

/// Returns the 0..01..1 mask with `how_many` lowest bits set. `how_many` must be in range [0, 64].
///
/// A bit slower than [`n_lowest_bits`].
#[inline(always)] pub const fn n_lowest_bits_0_64(how_many: u8) -> u64 {
    if how_many >= 64 { return u64::MAX; }
    n_lowest_bits(how_many)
}

/// Calculates the minimal number of bits needed to store values from `0` to given `max_value`.
///
/// # Example
///
/// ```
/// use bitr::bits_to_store;
///
/// assert_eq!(bits_to_store(0u8), 0);
/// assert_eq!(bits_to_store(1u16), 1);
/// assert_eq!(bits_to_store(7u32), 3);
/// assert_eq!(bits_to_store(8u64), 4);
/// ```
#[inline] pub fn bits_to_store<V: Into<u64>>(max_value: V) -> u8 {
    max_value.into().checked_ilog2().map_or(0, |v| v as u8 + 1)
}
