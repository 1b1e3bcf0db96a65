use std::hash::Hash;

use seedable_hash::{map64_to_64, BuildSeededHasher};

/// 192-bit keyed signature of a key: three independently seeded 64-bit hashes.
///
/// The first word drives the bucket assignment, so spill files partitioned by
/// its top byte keep the bucket order (the multiply-shift reduction is
/// monotone in `sig[0]`). All three words feed the hyperedge derivation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Signature(pub [u64; 3]);

impl Signature {
    /// Computes the signature of `key` under the given hasher family and `seed`.
    pub fn of<K: Hash + ?Sized, S: BuildSeededHasher>(hash: &S, key: &K, seed: u32) -> Self {
        Self([
            hash.hash_one(key, (seed ^ 0x9E37_79B9) as u64),
            hash.hash_one(key, (seed ^ 0x7F4A_7C15) as u64),
            hash.hash_one(key, (seed ^ 0x85EB_CA6B) as u64),
        ])
    }

    /// Returns the index of the signature's bucket among `num_buckets`,
    /// by modulo-free range reduction of the first word.
    #[inline(always)] pub fn bucket(&self, num_buckets: usize) -> usize {
        map64_to_64(self.0[0], num_buckets as u64) as usize
    }

    /// Returns the index of the spill file covering the signature.
    #[inline(always)] pub(crate) fn file(&self) -> usize {
        (self.0[0] >> 56) as usize
    }
}

/// Finalizer of the splitmix64 generator, used to derive retry sub-seeds.
#[inline] fn remix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Derives the key's 3-uniform hyperedge within a bucket of `3 * third`
/// vertices: one vertex per segment of `third`, so the three are distinct.
/// `attempt` is the bucket's retry sub-seed; attempt 0 reduces the raw
/// signature words.
#[inline] pub(crate) fn edge(sig: &Signature, attempt: u32, third: usize) -> [u32; 3] {
    let mut e = [0u32; 3];
    for i in 0..3 {
        let mut h = sig.0[i];
        if attempt != 0 { h = remix(h ^ (attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)); }
        e[i] = (i * third + map64_to_64(h, third as u64) as usize) as u32;
    }
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedable_hash::BuildDefaultSeededHasher;

    #[test]
    fn signature_is_deterministic_and_seed_dependent() {
        let h = BuildDefaultSeededHasher::default();
        let a = Signature::of(&h, "key", 1);
        let b = Signature::of(&h, "key", 1);
        assert_eq!(a, b);
        assert_ne!(a, Signature::of(&h, "key", 2));
        assert_ne!(a, Signature::of(&h, "yek", 1));
    }

    #[test]
    fn buckets_are_in_range_and_monotone_in_sig0() {
        let h = BuildDefaultSeededHasher::default();
        let mut sigs: Vec<Signature> = (0..1000u32).map(|k| Signature::of(&h, &k, 0)).collect();
        sigs.sort();
        let mut prev = 0;
        for s in &sigs {
            let b = s.bucket(37);
            assert!(b < 37);
            assert!(b >= prev);
            prev = b;
        }
    }

    #[test]
    fn edge_vertices_fall_into_segments() {
        let h = BuildDefaultSeededHasher::default();
        for k in 0..100u32 {
            let sig = Signature::of(&h, &k, 7);
            for attempt in 0..4 {
                let e = edge(&sig, attempt, 11);
                for i in 0..3 {
                    assert!((e[i] as usize) >= i * 11 && (e[i] as usize) < (i + 1) * 11);
                }
            }
        }
    }
}
