use std::borrow::Borrow;
use std::hash::Hash;
use std::io;

use binout::{AsIs, Serializer, VByte};
use bitr::{count_nonzero_pairs, n_lowest_bits, BitAccess, BitVec};
use dyn_size_of::GetSize;
use seedable_hash::{BuildDefaultSeededHasher, BuildSeededHasher};

use crate::builder::{solve_buckets, third_of_vertices, BuildConf};
use crate::graph::peel;
use crate::sig::edge;
use crate::stats::BuildStatsCollector;
use crate::store::SigStore;
use crate::{Error, Signature};

/// Vertices per key, in percent. Peeling of a random 3-uniform hypergraph
/// succeeds with high probability above 1.22 vertices per edge.
const EXPANSION_PERCENT: usize = 123;

/// Rank index over the "nonzero 2-bit cell" predicate of a packed array:
/// an absolute count per 8-word block, finished with
/// [`count_nonzero_pairs`] scans.
#[derive(Clone)]
struct PairRank {
    counts: Box<[u64]>,
}

impl PairRank {
    fn new(values: &[u64]) -> Self {
        let mut counts = Vec::with_capacity(values.len() / 8 + 1);
        let mut total = 0u64;
        for (i, w) in values.iter().enumerate() {
            if i % 8 == 0 { counts.push(total); }
            total += count_nonzero_pairs(*w) as u64;
        }
        Self { counts: counts.into_boxed_slice() }
    }

    /// Returns the number of nonzero lanes before lane `lane`.
    fn rank(&self, values: &[u64], lane: usize) -> usize {
        let word = lane / 32;
        let mut r = self.counts[word / 8] as usize;
        for w in (word & !7)..word { r += count_nonzero_pairs(values[w]) as usize; }
        r + count_nonzero_pairs(values[word] & n_lowest_bits(((lane % 32) * 2) as u8)) as usize
    }
}

/// Solves one bucket: derives hyperedges, peels, and assigns 2-bit digits so
/// that the digit sum of each edge selects, modulo 3, the position of its
/// hinge (the vertex the peeling matched to the edge). A hinge digit of 0 is
/// stored as 3 (still 0 modulo 3), making "nonzero cell" exactly the hinge
/// predicate.
fn try_solve_bucket(sigs: &[Signature], bucket_attempts: u32) -> Option<(u32, usize, Box<[u64]>)> {
    let third = third_of_vertices(sigs.len(), EXPANSION_PERCENT);
    let num_vertices = 3 * third;
    for attempt in 0..bucket_attempts {
        let edges: Vec<[u32; 3]> = sigs.iter().map(|s| edge(s, attempt, third)).collect();
        let (order, core) = peel(&edges, num_vertices);
        if !core.is_empty() { continue; }
        let mut values = Box::with_zeroed_bits(2 * num_vertices);
        for &(e, v) in order.iter().rev() {
            let [a, b, c] = edges[e as usize];
            let hinge = if v == a { 0u64 } else if v == b { 1 } else { 2 };
            let mut others = 0u64;
            for u in [a, b, c] {
                if u != v { others += values.get_fragment(u as usize, 2); }
            }
            let digit = (hinge + 3 - others % 3) % 3;
            values.set_fragment(v as usize, if digit == 0 { 3 } else { digit }, 2);
        }
        return Some((attempt, num_vertices, values));
    }
    None
}

/// Minimal perfect hash function: maps each of the `n` input keys to a
/// distinct value in `[0, n)`, in about 2.3 bits per key. For a key outside
/// the input set an arbitrary value from the range is returned.
///
/// Keys are split by their 192-bit signatures into buckets of about
/// [`BuildConf::bucket_size`] keys, staged on disk by [`SigStore`]; each
/// bucket is solved independently (in parallel) as a linear system modulo 3
/// on a random 3-uniform hypergraph, and the per-bucket solutions are
/// concatenated into one packed 2-bit array whose occupied cells are ranked
/// by a [`count_nonzero_pairs`] index. Per-bucket vertex offsets are kept as
/// an Elias-Fano sequence.
///
/// The construction follows:
/// - M. Genuzio, G. Ottaviano, S. Vigna, "Fast Scalable Construction of
///   (Minimal Perfect Hash) Functions", SEA 2016.
pub struct Mphf<S = BuildDefaultSeededHasher> {
    seed: u32,
    num_keys: usize,
    num_buckets: usize,
    values: Box<[u64]>,
    offsets: efseq::Sequence,
    attempts: Box<[u64]>,   // 4-bit retry sub-seed per bucket
    pair_rank: PairRank,
    hash_builder: S,
}

impl<S: BuildSeededHasher + Clone + Sync> Mphf<S> {
    /// Tries to construct [`Mphf`] for the keys produced by the iterator that
    /// the `keys` function returns (it is re-invoked on every global retry),
    /// reporting build events to `stats`.
    pub fn try_with_conf_stats<K, I, F, BS>(keys: F, conf: BuildConf<S>, stats: &mut BS) -> Result<Self, Error>
    where
        K: Hash + ?Sized,
        I: IntoIterator,
        I::Item: Borrow<K>,
        F: Fn() -> I,
        BS: BuildStatsCollector,
    {
        conf.validate();
        let mut last = Error::TooManyCollisions(conf.global_attempts);
        for master in 0..conf.global_attempts {
            if master != 0 { stats.global_retry(master); }
            match Self::try_build_once(&keys, &conf, master, stats) {
                Ok(result) => { stats.end(); return Ok(result); }
                Err(e) if e.is_retryable() => last = e,
                Err(e) => return Err(e),
            }
        }
        Err(if matches!(last, Error::DuplicateKey) { last } else { Error::TooManyCollisions(conf.global_attempts) })
    }

    /// Tries to construct [`Mphf`] for the keys produced by the iterator that
    /// the `keys` function returns.
    #[inline] pub fn try_with_conf<K, I, F>(keys: F, conf: BuildConf<S>) -> Result<Self, Error>
    where K: Hash + ?Sized, I: IntoIterator, I::Item: Borrow<K>, F: Fn() -> I {
        Self::try_with_conf_stats(keys, conf, &mut ())
    }

    /// Tries to construct [`Mphf`] for the given slice of keys.
    #[inline] pub fn try_from_slice<K: Hash>(keys: &[K], conf: BuildConf<S>) -> Result<Self, Error> {
        Self::try_with_conf::<K, _, _>(|| keys.iter(), conf)
    }

    fn try_build_once<K, I, F, BS>(keys: &F, conf: &BuildConf<S>, master: u32, stats: &mut BS) -> Result<Self, Error>
    where
        K: Hash + ?Sized,
        I: IntoIterator,
        I::Item: Borrow<K>,
        F: Fn() -> I,
        BS: BuildStatsCollector,
    {
        let seed = master.wrapping_mul(0x2545_F491);
        let mut store = SigStore::<()>::new(conf.scratch_dir.as_deref())?;
        for key in keys() {
            if conf.is_cancelled() { return Err(Error::Cancelled); }
            store.add(Signature::of(&conf.hash_builder, key.borrow(), seed), ())?;
        }
        let num_keys = store.len();
        let buckets = store.into_buckets(conf.bucket_size)?;
        let num_buckets = buckets.num_buckets();
        let solutions = solve_buckets(buckets, conf, stats, |bucket| {
            try_solve_bucket(&bucket.sigs, conf.bucket_attempts)
        })?;

        let mut vertices_of = vec![0u64; num_buckets];
        let mut attempts = Box::with_zeroed_bits((4 * num_buckets).max(1));
        for s in &solutions {
            vertices_of[s.index] = s.vertices as u64;
            attempts.init_fragment(s.index, s.attempt as u64, 4);
        }
        let total: u64 = vertices_of.iter().sum();
        let mut offsets = efseq::Builder::new(num_buckets + 1, total + 1);
        offsets.push(0);
        let mut acc = 0;
        for v in &vertices_of { acc += v; offsets.push(acc); }
        let offsets = offsets.finish();
        let mut values = Box::with_zeroed_bits((2 * total as usize).max(1));
        for s in &solutions {
            let off = offsets.get_or_panic(s.index) as usize;
            for i in 0..s.vertices {
                let digit = s.values.get_fragment(i, 2);
                if digit != 0 { values.init_fragment(off + i, digit, 2); }
            }
        }
        let pair_rank = PairRank::new(&values);
        Ok(Self {
            seed, num_keys, num_buckets, values, offsets, attempts, pair_rank,
            hash_builder: conf.hash_builder.clone(),
        })
    }
}

impl Mphf {
    /// Constructs [`Mphf`] for the given slice of keys with the default
    /// configuration. Panics if the construction fails; then it is almost
    /// certain that the input contains duplicate keys.
    pub fn from_slice<K: Hash>(keys: &[K]) -> Self {
        Self::try_from_slice(keys, Default::default())
            .expect("constructing Mphf failed; the input probably contains duplicate keys")
    }

    /// Reads [`Mphf`] written by [`Self::write`].
    /// Only functions that use the default hasher can be read by this method.
    pub fn read(input: &mut dyn io::Read) -> Result<Self, Error> {
        Self::read_with_hasher(input, Default::default())
    }
}

impl<S: BuildSeededHasher> Mphf<S> {
    const SERIAL_VERSION: u8 = 1;

    /// Returns the value assigned to the given `key`.
    ///
    /// For an input key the result is its unique index in `[0, n)`; for any
    /// other key it is an arbitrary value from that range.
    pub fn get<K: Hash + ?Sized>(&self, key: &K) -> u64 {
        let sig = Signature::of(&self.hash_builder, key, self.seed);
        let bucket = sig.bucket(self.num_buckets);
        let offset = self.offsets.get_or_panic(bucket) as usize;
        let third = (self.offsets.get_or_panic(bucket + 1) as usize - offset) / 3;
        if third == 0 { return 0; }
        let attempt = self.attempts.get_fragment(bucket, 4) as u32;
        let e = edge(&sig, attempt, third);
        let sum: u64 = e.iter().map(|&v| self.values.get_fragment(offset + v as usize, 2)).sum();
        let chosen = offset + e[(sum % 3) as usize] as usize;
        self.pair_rank.rank(&self.values, chosen) as u64
    }

    /// Returns the number of keys in the input collection.
    #[inline] pub fn len(&self) -> usize { self.num_keys }

    /// Returns whether the input collection was empty.
    #[inline] pub fn is_empty(&self) -> bool { self.num_keys == 0 }

    /// Returns the (approximate) total size of the structure in bits.
    pub fn num_bits(&self) -> usize { 8 * self.size_bytes() }

    /// Returns number of bytes which `write` will write.
    pub fn write_bytes(&self) -> usize {
        AsIs::size(Self::SERIAL_VERSION) + AsIs::size(self.seed)
            + VByte::size(self.num_keys) + VByte::size(self.num_buckets)
            + self.offsets.write_bytes()
            + AsIs::array_size(&self.attempts)
            + AsIs::array_size(&self.values)
    }

    /// Writes `self` to the `output`. The nonzero-pair rank index is rebuilt on read.
    pub fn write(&self, output: &mut dyn io::Write) -> io::Result<()> {
        AsIs::write(output, Self::SERIAL_VERSION)?;
        AsIs::write(output, self.seed)?;
        VByte::write(output, self.num_keys)?;
        VByte::write(output, self.num_buckets)?;
        self.offsets.write(output)?;
        AsIs::write_array(output, &self.attempts)?;
        AsIs::write_array(output, &self.values)
    }

    /// Reads [`Mphf`] written by [`Self::write`]
    /// (`hasher` must equal the one used for construction).
    pub fn read_with_hasher(input: &mut dyn io::Read, hasher: S) -> Result<Self, Error> {
        let version: u8 = AsIs::read(input)?;
        if version != Self::SERIAL_VERSION {
            return Err(Error::IncompatibleFormat { expected: Self::SERIAL_VERSION, found: version });
        }
        let seed = AsIs::read(input)?;
        let num_keys = VByte::read(input)?;
        let num_buckets = VByte::read(input)?;
        let offsets = efseq::Sequence::read(input)?;
        let attempts = AsIs::read_array(input)?;
        let values: Box<[u64]> = AsIs::read_array(input)?;
        let pair_rank = PairRank::new(&values);
        Ok(Self { seed, num_keys, num_buckets, values, offsets, attempts, pair_rank, hash_builder: hasher })
    }
}

impl<S> GetSize for Mphf<S> {
    fn size_bytes_dyn(&self) -> usize {
        self.values.size_bytes_dyn() + self.offsets.size_bytes_dyn()
            + self.attempts.size_bytes_dyn() + self.pair_rank.counts.size_bytes_dyn()
    }
    const USES_DYN_MEM: bool = true;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Checks that `mphf` restricted to `keys` is a bijection onto [0, n).
    pub(crate) fn check_bijection<K: Hash + std::fmt::Display>(keys: impl IntoIterator<Item = K>, len: usize, get: impl Fn(&K) -> u64) {
        let mut seen = Box::<[u64]>::with_zeroed_bits(len.max(1));
        for key in keys {
            let index = get(&key);
            assert!((index as usize) < len, "value {index} for key {key} is out of [0, {len})");
            assert!(!seen.get_bit(index as usize), "value {index} assigned to key {key} and to an earlier key");
            seen.set_bit(index as usize);
        }
    }

    #[test]
    fn small_key_sets() {
        for n in [1usize, 2, 10, 100] {
            let keys: Vec<u64> = (0..n as u64).collect();
            let mphf = Mphf::try_from_slice(&keys, BuildConf::mt(false)).unwrap();
            assert_eq!(mphf.len(), n);
            check_bijection(keys.iter(), n, |k| mphf.get(k));
        }
    }

    #[test]
    fn string_keys_and_round_trip() {
        let keys: Vec<String> = (0..1000).map(|k| k.to_string()).collect();
        let mphf = Mphf::try_from_slice(&keys, BuildConf::mt(false)).unwrap();
        assert_eq!(mphf.len(), 1000);
        check_bijection(keys.iter(), 1000, |k| mphf.get(*k));
        assert!(mphf.num_bits() > 0);

        let mut buff = Vec::new();
        mphf.write(&mut buff).unwrap();
        assert_eq!(buff.len(), mphf.write_bytes());
        let read = Mphf::read(&mut &buff[..]).unwrap();
        assert_eq!(read.len(), 1000);
        for key in &keys { assert_eq!(mphf.get(key), read.get(key)); }
        check_bijection(keys.iter(), 1000, |k| read.get(*k));
    }

    #[test]
    fn incompatible_version_is_rejected() {
        let mphf = Mphf::from_slice(&[1u64, 2, 3]);
        let mut buff = Vec::new();
        mphf.write(&mut buff).unwrap();
        buff[0] = 99;
        assert!(matches!(Mphf::read(&mut &buff[..]), Err(Error::IncompatibleFormat { found: 99, .. })));
    }

    #[test]
    fn multiple_buckets_multithreaded() {
        let keys: Vec<u64> = (0..20_000).collect();
        let mphf = Mphf::from_slice(&keys);
        check_bijection(keys.iter(), keys.len(), |k| mphf.get(k));
    }

    #[test]
    fn small_buckets() {
        let keys: Vec<u32> = (0..5_000).collect();
        let mphf = Mphf::try_from_slice(&keys, BuildConf::bs(35)).unwrap();
        check_bijection(keys.iter(), keys.len(), |k| mphf.get(k));
    }

    #[test]
    fn empty_key_set() {
        let mphf = Mphf::try_from_slice::<u64>(&[], Default::default()).unwrap();
        assert_eq!(mphf.len(), 0);
        assert!(mphf.is_empty());
    }

    #[test]
    fn duplicate_keys_are_reported() {
        let result = Mphf::try_from_slice(&[1u64, 2, 3, 1, 4], Default::default());
        assert!(matches!(result, Err(Error::DuplicateKey)));
    }

    #[test]
    fn cancellation_is_observed() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;
        let keys: Vec<u64> = (0..1000).collect();
        let conf = BuildConf {
            cancel: Some(Arc::new(AtomicBool::new(true))),
            ..Default::default()
        };
        assert!(matches!(Mphf::try_from_slice(&keys, conf), Err(Error::Cancelled)));
    }

    #[test]
    #[ignore = "uses much memory and time"]
    fn large_key_set() {
        let keys: Vec<u64> = (0..10_000_000).collect();
        let mphf = Mphf::from_slice(&keys);
        check_bijection(keys.iter(), keys.len(), |k| mphf.get(k));
        // about 2.3 bits per key plus index overheads
        assert!(mphf.num_bits() < 4 * keys.len());
    }
}
