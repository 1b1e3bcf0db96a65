use std::ops::Deref;

use dyn_size_of::GetSize;

use crate::{ceiling_div, n_lowest_bits, n_lowest_bits_0_64, select64};

/// Constant-time (in expectation) search for the position of the `rank`-th one.
pub trait Select {
    /// Returns the position of the `rank`-th one (counting from 0),
    /// or [`None`] if there are not that many ones.
    fn try_select(&self, rank: usize) -> Option<usize>;

    /// Returns the position of the `rank`-th one (counting from 0).
    /// Panics if there are not that many ones.
    #[inline(always)] fn select(&self, rank: usize) -> usize {
        self.try_select(rank).expect("cannot select the rank-th one as there are not that many ones")
    }
}

/// Constant-time (in expectation) search for the position of the `rank`-th zero.
pub trait SelectZero {
    /// Returns the position of the `rank`-th zero (counting from 0),
    /// or [`None`] if there are not that many zeros.
    fn try_select0(&self, rank: usize) -> Option<usize>;

    /// Returns the position of the `rank`-th zero (counting from 0).
    /// Panics if there are not that many zeros.
    #[inline(always)] fn select0(&self, rank: usize) -> usize {
        self.try_select0(rank).expect("cannot select the rank-th zero as there are not that many zeros")
    }
}

/// Two-level select index over ones (`ZERO = false`) or zeros (`ZERO = true`).
///
/// The index holds no content; queries receive the indexed words, which must
/// be the ones the index was built over. This allows a single copy of the
/// words to be shared by several indexes (as the Elias-Fano sequence does).
///
/// Structure: the *inventory* stores the absolute position of every
/// 2^`log2_per_inventory`-th item, the spacing derived from the item density
/// at construction. For spans narrower than 2^16 bits, a *subinventory* of
/// 16-bit deltas points at every 2^`log2_per_sub16`-th item inside; the query
/// finishes with a word-by-word popcount scan and [`select64`]. Wider spans
/// are marked with the sign bit of their inventory entry and store the exact
/// position of each of their items in a *spill* array.
///
/// The space overhead is below 25% of the indexed words for any content, with
/// the spill array bounded by the inventory spacing.
///
/// When selecting zeros, words are complemented on the fly and the padding of
/// the last word past `len` is masked off, so it is never reported; when
/// selecting ones, the bits past `len` must be zero (the tail invariant of
/// [`BitVector`](crate::BitVector)).
#[derive(Clone)]
pub struct SpanSelect<const ZERO: bool> {
    len: usize,
    num_items: usize,
    log2_per_inventory: u8,
    log2_per_sub16: u8,
    inventory: Box<[u64]>,
    sub16: Box<[u16]>,
    spill: Box<[u64]>,
}

/// Select index over ones; see [`SpanSelect`].
pub type SelectOnes = SpanSelect<false>;

/// Select index over zeros; see [`SpanSelect`].
pub type SelectZeros = SpanSelect<true>;

/// Inventory entry flag marking a span whose items are stored in the spill array.
const SPILLED: u64 = 1 << 63;

/// Spans of at least that many bits are spilled.
const MAX_SPAN: u64 = 1 << 16;

/// Subinventory slots per inventory span.
const SUB_SLOTS: usize = 32;

/// Returns the `index`-th word of the item sequence: the content word for
/// ones, the complemented word with masked padding for zeros.
#[inline(always)] fn item_word<const ZERO: bool>(bits: &[u64], index: usize, len: usize) -> u64 {
    if ZERO {
        let w = !bits[index];
        if (index + 1) * 64 > len { w & n_lowest_bits_0_64((len - index * 64) as u8) } else { w }
    } else {
        bits[index]
    }
}

impl<const ZERO: bool> SpanSelect<ZERO> {
    /// Builds the index over the `len` lowest bits of `bits`.
    pub fn new(bits: &[u64], len: usize) -> Self {
        assert!(len <= bits.len() * 64, "{} bits do not fit in {} words", len, bits.len());
        let words = ceiling_div(len, 64);
        let num_items: usize = (0..words).map(|i| item_word::<ZERO>(bits, i, len).count_ones() as usize).sum();

        // spacing that keeps the expected span close to 8192 bits
        let log2_per_inventory = if num_items == 0 { 6u8 }
            else { 13 - (len / num_items).ilog2().min(7) as u8 };
        let log2_per_sub16 = log2_per_inventory - 5;    // SUB_SLOTS deltas per span
        let per_inventory = 1usize << log2_per_inventory;
        let per_sub16 = 1usize << log2_per_sub16;

        let mut inventory = Vec::with_capacity(ceiling_div(num_items, per_inventory) + 1);
        let mut next_quantum = 0;
        let mut past = 0;
        for i in 0..words {
            let w = item_word::<ZERO>(bits, i, len);
            let ones = w.count_ones() as usize;
            while past + ones > next_quantum {
                inventory.push((i * 64) as u64 + select64(w, (next_quantum - past) as u8) as u64);
                next_quantum += per_inventory;
            }
            past += ones;
        }
        debug_assert_eq!(past, num_items);
        inventory.push(len as u64);

        let spans = inventory.len() - 1;
        let mut sub16 = vec![0u16; spans * SUB_SLOTS];
        let mut spill = Vec::new();
        for s in 0..spans {
            let begin = inventory[s];
            let span_items = if s + 1 < spans { per_inventory } else { num_items - s * per_inventory };
            let spilled = inventory[s + 1] - begin >= MAX_SPAN;
            if spilled { inventory[s] = SPILLED | spill.len() as u64; }
            let mut i = begin as usize / 64;
            let mut w = item_word::<ZERO>(bits, i, len) & !n_lowest_bits((begin % 64) as u8);
            for rank_in_span in 0..span_items {
                while w == 0 { i += 1; w = item_word::<ZERO>(bits, i, len); }
                let pos = (i * 64) as u64 + w.trailing_zeros() as u64;
                w &= w - 1;
                if spilled {
                    spill.push(pos);
                } else if rank_in_span % per_sub16 == 0 {
                    sub16[s * SUB_SLOTS + rank_in_span / per_sub16] = (pos - begin) as u16;
                }
            }
        }

        Self {
            len, num_items, log2_per_inventory, log2_per_sub16,
            inventory: inventory.into_boxed_slice(),
            sub16: sub16.into_boxed_slice(),
            spill: spill.into_boxed_slice(),
        }
    }

    /// Returns the number of indexed items (ones or zeros).
    #[inline(always)] pub fn num_items(&self) -> usize { self.num_items }

    /// Returns the length of the indexed sequence in bits.
    #[inline(always)] pub fn len(&self) -> usize { self.len }

    /// Returns whether the indexed sequence has no items.
    #[inline(always)] pub fn is_empty(&self) -> bool { self.num_items == 0 }

    /// Returns the position of the `rank`-th item in `bits`,
    /// or [`None`] if there are not that many items.
    /// `bits` must be the words the index was built over.
    pub fn try_select_in(&self, bits: &[u64], rank: usize) -> Option<usize> {
        (rank < self.num_items).then(|| unsafe { self.select_in_unchecked(bits, rank) })
    }

    /// Returns the position of the `rank`-th item in `bits`.
    /// The result is undefined if `rank >= num_items()`.
    pub unsafe fn select_in_unchecked(&self, bits: &[u64], rank: usize) -> usize {
        let s = rank >> self.log2_per_inventory;
        let in_span = rank & ((1 << self.log2_per_inventory) - 1);
        let entry = self.inventory[s];
        if entry & SPILLED != 0 {
            return self.spill[(entry & !SPILLED) as usize + in_span] as usize;
        }
        let begin = entry as usize + self.sub16[s * SUB_SLOTS + (in_span >> self.log2_per_sub16)] as usize;
        let mut residual = in_span & ((1 << self.log2_per_sub16) - 1);
        let mut word = begin / 64;
        let mut w = item_word::<ZERO>(bits, word, self.len) & !n_lowest_bits((begin % 64) as u8);
        loop {
            let ones = w.count_ones() as usize;
            if residual < ones { return word * 64 + select64(w, residual as u8) as usize; }
            residual -= ones;
            word += 1;
            w = item_word::<ZERO>(bits, word, self.len);
        }
    }

    /// Fills `dest` with the positions of the items of ranks
    /// `first_rank..first_rank + dest.len()`, streaming the content once.
    /// Panics if the rank range exceeds the number of items.
    pub fn fill_select_in(&self, bits: &[u64], first_rank: usize, dest: &mut [u64]) {
        if dest.is_empty() { return; }
        assert!(first_rank + dest.len() <= self.num_items,
            "rank range {first_rank}..{} out of bounds of {} items", first_rank + dest.len(), self.num_items);
        let first = unsafe { self.select_in_unchecked(bits, first_rank) };
        dest[0] = first as u64;
        let mut word = first / 64;
        let mut w = item_word::<ZERO>(bits, word, self.len) & !n_lowest_bits_0_64((first % 64) as u8 + 1);
        for slot in &mut dest[1..] {
            while w == 0 { word += 1; w = item_word::<ZERO>(bits, word, self.len); }
            *slot = (word * 64) as u64 + w.trailing_zeros() as u64;
            w &= w - 1;
        }
    }
}

impl<const ZERO: bool> GetSize for SpanSelect<ZERO> {
    fn size_bytes_dyn(&self) -> usize {
        self.inventory.size_bytes_dyn() + self.sub16.size_bytes_dyn() + self.spill.size_bytes_dyn()
    }
    const USES_DYN_MEM: bool = true;
}

/// Words bundled with their [`SpanSelect`] index; implements [`Select`] or
/// [`SelectZero`] depending on `ZERO`.
#[derive(Clone)]
pub struct SelectedBits<const ZERO: bool = false, B = Box<[u64]>> {
    bits: B,
    index: SpanSelect<ZERO>,
}

impl<const ZERO: bool, B: Deref<Target = [u64]>> SelectedBits<ZERO, B> {
    /// Builds the index over the `len` lowest bits of `bits` and takes ownership of them.
    pub fn new(bits: B, len: usize) -> Self {
        let index = SpanSelect::new(&bits, len);
        Self { bits, index }
    }

    /// Returns the indexed words.
    #[inline(always)] pub fn bits(&self) -> &[u64] { &self.bits }

    /// Returns the number of indexed items (ones or zeros).
    #[inline(always)] pub fn num_items(&self) -> usize { self.index.num_items() }

    /// See [`SpanSelect::fill_select_in`].
    #[inline] pub fn fill_select(&self, first_rank: usize, dest: &mut [u64]) {
        self.index.fill_select_in(&self.bits, first_rank, dest)
    }
}

impl<B: Deref<Target = [u64]>> Select for SelectedBits<false, B> {
    #[inline] fn try_select(&self, rank: usize) -> Option<usize> {
        self.index.try_select_in(&self.bits, rank)
    }
}

impl<B: Deref<Target = [u64]>> SelectZero for SelectedBits<true, B> {
    #[inline] fn try_select0(&self, rank: usize) -> Option<usize> {
        self.index.try_select_in(&self.bits, rank)
    }
}

impl<const ZERO: bool, B: GetSize> GetSize for SelectedBits<ZERO, B> {
    fn size_bytes_dyn(&self) -> usize { self.bits.size_bytes_dyn() + self.index.size_bytes_dyn() }
    const USES_DYN_MEM: bool = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BitAccess, BitVector, Rank, Rank9};

    fn check_rank_select_laws(words: &[u64], len: usize) {
        let rank = Rank9::new(words, len);
        let select = SpanSelect::<false>::new(words, len);
        assert_eq!(select.num_items(), rank.num_ones());
        for r in 0..select.num_items() {
            let p = select.try_select_in(words, r).unwrap();
            assert_eq!(rank.rank(p), r, "rank(select({r}))");
            assert!(words.get_bit(p), "select({r}) must point at a one");
        }
        for p in 0..len {
            let r = rank.rank(p);
            if r < select.num_items() {
                // the rank(p)-th one is at p when bit p is set, past p otherwise
                let s = select.try_select_in(words, r).unwrap();
                assert!(s >= p, "select(rank({p})) = {s}");
                assert_eq!(s == p, words.get_bit(p));
            }
        }
        assert_eq!(select.try_select_in(words, select.num_items()), None);
    }

    #[test]
    fn select_basic() {
        // bits [1,0,1,1,0,0,0]
        let v: BitVector = [true, false, true, true, false, false, false].into_iter().collect();
        let rank = Rank9::new(v.words(), v.len());
        assert_eq!(rank.rank(0), 0);
        assert_eq!(rank.rank(1), 1);
        assert_eq!(rank.rank(3), 2);
        assert_eq!(rank.rank(4), 3);
        assert_eq!(rank.rank(7), 3);
        let sel = SelectedBits::<false, _>::new(v.words(), v.len());
        assert_eq!(sel.try_select(0), Some(0));
        assert_eq!(sel.try_select(1), Some(2));
        assert_eq!(sel.try_select(2), Some(3));
        assert_eq!(sel.try_select(3), None);
    }

    #[test]
    fn select_zero_basic() {
        let v: BitVector = [true, false, true, true, false, false, false].into_iter().collect();
        let sel0 = SelectedBits::<true, _>::new(v.words(), v.len());
        assert_eq!(sel0.num_items(), 4);
        assert_eq!(sel0.try_select0(0), Some(1));
        assert_eq!(sel0.try_select0(1), Some(4));
        assert_eq!(sel0.try_select0(2), Some(5));
        assert_eq!(sel0.try_select0(3), Some(6));
        // padding zeros of the tail word are not selectable
        assert_eq!(sel0.try_select0(4), None);
    }

    #[test]
    fn select_zero_tail_not_counted() {
        // 70 ones: the only zeros a select0 may see would be padding
        let mut v = BitVector::with_zeroed_len(70);
        v.fill(0, 70, true);
        let sel0 = SpanSelect::<true>::new(v.words(), v.len());
        assert_eq!(sel0.num_items(), 0);
        assert_eq!(sel0.try_select_in(v.words(), 0), None);
    }

    #[test]
    fn select_every_third() {
        let mut v = BitVector::with_zeroed_len(10_000);
        for i in (0..10_000).step_by(3) { v.set(i, true); }
        let sel = SpanSelect::<false>::new(v.words(), v.len());
        for r in 0..sel.num_items() {
            assert_eq!(sel.try_select_in(v.words(), r), Some(3 * r));
        }
        check_rank_select_laws(v.words(), v.len());
    }

    #[test]
    fn select_dense_and_lengths_around_word_boundary() {
        for len in [63, 64, 65, 127, 128, 129, 511, 512, 513] {
            let mut v = BitVector::with_zeroed_len(len);
            for i in 0..len { if i % 2 == 0 || i % 7 == 0 { v.set(i, true); } }
            check_rank_select_laws(v.words(), v.len());
            let sel0 = SpanSelect::<true>::new(v.words(), len);
            let zeros: Vec<usize> = (0..len).filter(|&i| !v.get(i)).collect();
            assert_eq!(sel0.num_items(), zeros.len());
            for (r, &p) in zeros.iter().enumerate() {
                assert_eq!(sel0.try_select_in(v.words(), r), Some(p));
            }
        }
    }

    #[test]
    fn select_spilled_spans() {
        // two ones separated by far more than 2^16 bits force the spill path
        let mut v = BitVector::with_zeroed_len(1 << 20);
        let ones = [0usize, 70_000, 1_000_000, (1 << 20) - 1];
        for &i in &ones { v.set(i, true); }
        let sel = SpanSelect::<false>::new(v.words(), v.len());
        assert_eq!(sel.num_items(), ones.len());
        for (r, &p) in ones.iter().enumerate() {
            assert_eq!(sel.try_select_in(v.words(), r), Some(p), "select({r})");
        }
        check_rank_select_laws(v.words(), v.len());
    }

    #[test]
    fn select_single_item() {
        let mut v = BitVector::with_zeroed_len(100_000);
        v.set(99_999, true);
        let sel = SpanSelect::<false>::new(v.words(), v.len());
        assert_eq!(sel.try_select_in(v.words(), 0), Some(99_999));
        assert_eq!(sel.try_select_in(v.words(), 1), None);
    }

    #[test]
    fn fill_select_matches_single() {
        let mut v = BitVector::with_zeroed_len(5_000);
        for i in 0..5_000 { if i % 5 == 1 || i % 11 == 3 { v.set(i, true); } }
        let sel = SpanSelect::<false>::new(v.words(), v.len());
        let n = sel.num_items();
        let mut bulk = vec![0u64; n];
        sel.fill_select_in(v.words(), 0, &mut bulk);
        for r in 0..n {
            assert_eq!(bulk[r], sel.try_select_in(v.words(), r).unwrap() as u64);
        }
        // from a nonzero starting rank
        let mut part = vec![0u64; n - 7];
        sel.fill_select_in(v.words(), 7, &mut part);
        assert_eq!(&bulk[7..], &part[..]);
    }

    #[test]
    fn select_empty() {
        let sel = SpanSelect::<false>::new(&[], 0);
        assert_eq!(sel.num_items(), 0);
        assert_eq!(sel.try_select_in(&[], 0), None);
    }
}
