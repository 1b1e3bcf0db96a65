use std::borrow::Borrow;
use std::hash::Hash;
use std::io;

use binout::{AsIs, Serializer, VByte};
use bitr::{bits_to_store, BitAccess, BitVec};
use dyn_size_of::GetSize;
use seedable_hash::{BuildDefaultSeededHasher, BuildSeededHasher};

use crate::builder::{solve_buckets, third_of_vertices, BuildConf};
use crate::graph::peel;
use crate::sig::edge;
use crate::stats::BuildStatsCollector;
use crate::store::SigStore;
use crate::{Error, Signature};

/// Vertices per key, in percent. With the dense fallback for the 2-core,
/// XOR systems on random 3-uniform hypergraphs are solvable with high
/// probability already at 1.10 vertices per edge.
const EXPANSION_PERCENT: usize = 110;

/// Gaussian elimination over GF(2) for the 2-core equations
/// `x_a ^ x_b ^ x_c = value`: bitset rows over the bucket vertices with
/// w-bit constants. Assigns the core vertices in `cells`; returns whether
/// the core is consistent.
fn solve_core(
    edges: &[[u32; 3]], constants: &[u64], core: &[u32],
    num_vertices: usize, bits_per_value: u8, cells: &mut [u64],
) -> bool {
    let mut rows: Vec<(Box<[u64]>, u64)> = core.iter().map(|&e| {
        let mut row = Box::with_zeroed_bits(num_vertices);
        for &v in &edges[e as usize] { row.set_bit(v as usize); }
        (row, constants[e as usize])
    }).collect();
    let mut pivots: Vec<(usize, usize)> = Vec::new();    // (row, vertex)
    for i in 0..rows.len() {
        for &(j, var) in &pivots {
            if rows[i].0.get_bit(var) {
                let (pivot_row, pivot_constant) = { let r = &rows[j]; (r.0.clone(), r.1) };
                for (a, b) in rows[i].0.iter_mut().zip(pivot_row.iter()) { *a ^= b; }
                rows[i].1 ^= pivot_constant;
            }
        }
        let first = rows[i].0.trailing_zero_bits();
        if first >= num_vertices {
            if rows[i].1 != 0 { return false; }
        } else {
            pivots.push((i, first));
        }
    }
    for &(i, var) in pivots.iter().rev() {
        let mut x = rows[i].1;
        for v in rows[i].0.bit_ones() {
            if v != var { x ^= cells.get_fragment(v, bits_per_value); }
        }
        cells.set_fragment(var, x, bits_per_value);
    }
    true
}

/// Solves one bucket: peels the hypergraph, solves the residual core densely
/// over GF(2), then assigns the peeled vertices in reverse order so that the
/// XOR over every edge reproduces its value.
fn try_solve_bucket(
    sigs: &[Signature], constants: &[u64], bits_per_value: u8, bucket_attempts: u32,
) -> Option<(u32, usize, Box<[u64]>)> {
    let third = third_of_vertices(sigs.len(), EXPANSION_PERCENT);
    let num_vertices = 3 * third;
    for attempt in 0..bucket_attempts {
        let edges: Vec<[u32; 3]> = sigs.iter().map(|s| edge(s, attempt, third)).collect();
        let (order, core) = peel(&edges, num_vertices);
        let mut cells = Box::with_zeroed_bits((num_vertices * bits_per_value as usize).max(1));
        if !core.is_empty()
            && !solve_core(&edges, constants, &core, num_vertices, bits_per_value, &mut cells)
        {
            continue;
        }
        for &(e, v) in order.iter().rev() {
            let mut x = constants[e as usize];
            for u in edges[e as usize] {
                if u != v { x ^= cells.get_fragment(u as usize, bits_per_value); }
            }
            cells.set_fragment(v as usize, x, bits_per_value);
        }
        return Some((attempt, num_vertices, cells));
    }
    None
}

/// Static function: maps each input key to its value of `bits_per_value`
/// bits, in about `1.1 * bits_per_value` bits per key. For a key outside the
/// input set an arbitrary value is returned.
///
/// The pipeline is shared with [`Mphf`](crate::Mphf): signatures staged by
/// [`SigStore`], buckets solved independently, per-bucket cells concatenated,
/// vertex offsets in an Elias-Fano sequence. Each bucket is the XOR system
/// `cell[v0] ^ cell[v1] ^ cell[v2] = value` over its hyperedges, solved by
/// peeling with a dense GF(2) fallback for the 2-core.
pub struct Function<S = BuildDefaultSeededHasher> {
    seed: u32,
    num_keys: usize,
    num_buckets: usize,
    bits_per_value: u8,
    values: Box<[u64]>,
    offsets: efseq::Sequence,
    attempts: Box<[u64]>,   // 4-bit retry sub-seed per bucket
    hash_builder: S,
}

impl<S: BuildSeededHasher + Clone + Sync> Function<S> {
    /// Tries to construct [`Function`] for the key-value pairs produced by
    /// the iterator that the `kv` function returns (it is re-invoked on every
    /// global retry), reporting build events to `stats`.
    ///
    /// Each value must fit `bits_per_value` bits; `bits_per_value` must be at
    /// most 63. With `bits_per_value == 0` the function maps every key to 0
    /// without solving anything.
    pub fn try_with_conf_stats<K, KB, I, F, BS>(
        kv: F, bits_per_value: u8, conf: BuildConf<S>, stats: &mut BS,
    ) -> Result<Self, Error>
    where
        K: Hash + ?Sized,
        KB: Borrow<K>,
        I: IntoIterator<Item = (KB, u64)>,
        F: Fn() -> I,
        BS: BuildStatsCollector,
    {
        conf.validate();
        assert!(bits_per_value <= 63, "bits per value {bits_per_value} out of the supported range [0, 63]");
        if bits_per_value == 0 {
            return Ok(Self::always_zero(kv().into_iter().count(), conf.hash_builder.clone()));
        }
        let mut last = Error::TooManyCollisions(conf.global_attempts);
        for master in 0..conf.global_attempts {
            if master != 0 { stats.global_retry(master); }
            match Self::try_build_once(&kv, bits_per_value, &conf, master, stats) {
                Ok(result) => { stats.end(); return Ok(result); }
                Err(e) if e.is_retryable() => last = e,
                Err(e) => return Err(e),
            }
        }
        Err(if matches!(last, Error::DuplicateKey) { last } else { Error::TooManyCollisions(conf.global_attempts) })
    }

    /// Tries to construct [`Function`] for the key-value pairs produced by
    /// the iterator that the `kv` function returns.
    #[inline] pub fn try_with_conf<K, KB, I, F>(kv: F, bits_per_value: u8, conf: BuildConf<S>) -> Result<Self, Error>
    where K: Hash + ?Sized, KB: Borrow<K>, I: IntoIterator<Item = (KB, u64)>, F: Fn() -> I {
        Self::try_with_conf_stats(kv, bits_per_value, conf, &mut ())
    }

    /// Tries to construct [`Function`] mapping `keys[i]` to `values[i]`,
    /// with the value width fitting the largest value.
    pub fn try_from_slices<K: Hash, V: Into<u64> + Copy>(
        keys: &[K], values: &[V], conf: BuildConf<S>,
    ) -> Result<Self, Error> {
        assert_eq!(keys.len(), values.len(), "every key needs a value");
        let bits_per_value = bits_to_store(values.iter().map(|v| (*v).into()).max().unwrap_or(0));
        Self::try_with_conf::<K, _, _, _>(
            || keys.iter().zip(values.iter().map(|v| (*v).into())),
            bits_per_value, conf)
    }

    /// Returns a [`Function`] that assigns 0 to every key.
    fn always_zero(num_keys: usize, hash_builder: S) -> Self {
        Self {
            seed: 0,
            num_keys,
            num_buckets: 1,
            bits_per_value: 0,
            values: Box::default(),
            offsets: efseq::Sequence::with_items_from_slice(&[0u64, 0]),
            attempts: vec![0].into_boxed_slice(),
            hash_builder,
        }
    }

    fn try_build_once<K, KB, I, F, BS>(
        kv: &F, bits_per_value: u8, conf: &BuildConf<S>, master: u32, stats: &mut BS,
    ) -> Result<Self, Error>
    where
        K: Hash + ?Sized,
        KB: Borrow<K>,
        I: IntoIterator<Item = (KB, u64)>,
        F: Fn() -> I,
        BS: BuildStatsCollector,
    {
        let seed = master.wrapping_mul(0x2545_F491);
        let mut store = SigStore::<u64>::new(conf.scratch_dir.as_deref())?;
        for (key, value) in kv() {
            if conf.is_cancelled() { return Err(Error::Cancelled); }
            assert_eq!(value >> bits_per_value, 0, "value {value} does not fit {bits_per_value} bits");
            store.add(Signature::of(&conf.hash_builder, key.borrow(), seed), value)?;
        }
        let num_keys = store.len();
        let buckets = store.into_buckets(conf.bucket_size)?;
        let num_buckets = buckets.num_buckets();
        let solutions = solve_buckets(buckets, conf, stats, |bucket| {
            try_solve_bucket(&bucket.sigs, &bucket.values, bits_per_value, conf.bucket_attempts)
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
        let mut values = Box::with_zeroed_bits((total as usize * bits_per_value as usize).max(1));
        for s in &solutions {
            let off = offsets.get_or_panic(s.index) as usize;
            for i in 0..s.vertices {
                let cell = s.values.get_fragment(i, bits_per_value);
                if cell != 0 { values.init_fragment(off + i, cell, bits_per_value); }
            }
        }
        Ok(Self {
            seed, num_keys, num_buckets, bits_per_value, values, offsets, attempts,
            hash_builder: conf.hash_builder.clone(),
        })
    }
}

impl Function {
    /// Constructs [`Function`] mapping `keys[i]` to `values[i]` with the
    /// default configuration. Panics if the construction fails; then it is
    /// almost certain that the input contains duplicate keys.
    pub fn from_slices<K: Hash, V: Into<u64> + Copy>(keys: &[K], values: &[V]) -> Self {
        Self::try_from_slices(keys, values, Default::default())
            .expect("constructing Function failed; the input probably contains duplicate keys")
    }

    /// Reads [`Function`] written by [`Self::write`].
    /// Only functions that use the default hasher can be read by this method.
    pub fn read(input: &mut dyn io::Read) -> Result<Self, Error> {
        Self::read_with_hasher(input, Default::default())
    }
}

impl<S: BuildSeededHasher> Function<S> {
    const SERIAL_VERSION: u8 = 1;

    /// Returns the value assigned to the given `key`.
    ///
    /// For an input key the result is the value it was built with; for any
    /// other key it is an arbitrary `bits_per_value`-bit value.
    pub fn get<K: Hash + ?Sized>(&self, key: &K) -> u64 {
        if self.bits_per_value == 0 { return 0; }
        let sig = Signature::of(&self.hash_builder, key, self.seed);
        let bucket = sig.bucket(self.num_buckets);
        let offset = self.offsets.get_or_panic(bucket) as usize;
        let third = (self.offsets.get_or_panic(bucket + 1) as usize - offset) / 3;
        if third == 0 { return 0; }
        let attempt = self.attempts.get_fragment(bucket, 4) as u32;
        let e = edge(&sig, attempt, third);
        self.values.get_fragment(offset + e[0] as usize, self.bits_per_value)
            ^ self.values.get_fragment(offset + e[1] as usize, self.bits_per_value)
            ^ self.values.get_fragment(offset + e[2] as usize, self.bits_per_value)
    }

    /// Returns the number of keys in the input collection.
    #[inline] pub fn len(&self) -> usize { self.num_keys }

    /// Returns whether the input collection was empty.
    #[inline] pub fn is_empty(&self) -> bool { self.num_keys == 0 }

    /// Returns the number of bits of each value.
    #[inline] pub fn bits_per_value(&self) -> u8 { self.bits_per_value }

    /// Returns the (approximate) total size of the structure in bits.
    pub fn num_bits(&self) -> usize { 8 * self.size_bytes() }

    /// Returns number of bytes which `write` will write.
    pub fn write_bytes(&self) -> usize {
        AsIs::size(Self::SERIAL_VERSION) + AsIs::size(self.seed) + AsIs::size(self.bits_per_value)
            + VByte::size(self.num_keys) + VByte::size(self.num_buckets)
            + self.offsets.write_bytes()
            + AsIs::array_size(&self.attempts)
            + AsIs::array_size(&self.values)
    }

    /// Writes `self` to the `output`.
    pub fn write(&self, output: &mut dyn io::Write) -> io::Result<()> {
        AsIs::write(output, Self::SERIAL_VERSION)?;
        AsIs::write(output, self.seed)?;
        AsIs::write(output, self.bits_per_value)?;
        VByte::write(output, self.num_keys)?;
        VByte::write(output, self.num_buckets)?;
        self.offsets.write(output)?;
        AsIs::write_array(output, &self.attempts)?;
        AsIs::write_array(output, &self.values)
    }

    /// Reads [`Function`] written by [`Self::write`]
    /// (`hasher` must equal the one used for construction).
    pub fn read_with_hasher(input: &mut dyn io::Read, hasher: S) -> Result<Self, Error> {
        let version: u8 = AsIs::read(input)?;
        if version != Self::SERIAL_VERSION {
            return Err(Error::IncompatibleFormat { expected: Self::SERIAL_VERSION, found: version });
        }
        let seed = AsIs::read(input)?;
        let bits_per_value = AsIs::read(input)?;
        let num_keys = VByte::read(input)?;
        let num_buckets = VByte::read(input)?;
        let offsets = efseq::Sequence::read(input)?;
        let attempts = AsIs::read_array(input)?;
        let values = AsIs::read_array(input)?;
        Ok(Self { seed, num_keys, num_buckets, bits_per_value, values, offsets, attempts, hash_builder: hasher })
    }
}

impl<S> GetSize for Function<S> {
    fn size_bytes_dyn(&self) -> usize {
        self.values.size_bytes_dyn() + self.offsets.size_bytes_dyn() + self.attempts.size_bytes_dyn()
    }
    const USES_DYN_MEM: bool = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_small_values() {
        let keys: Vec<u64> = (0..1000).collect();
        let values: Vec<u8> = keys.iter().map(|k| (k % 17) as u8).collect();
        let f = Function::try_from_slices(&keys, &values, BuildConf::mt(false)).unwrap();
        assert_eq!(f.bits_per_value(), 5);
        assert_eq!(f.len(), 1000);
        for (k, v) in keys.iter().zip(values.iter()) {
            assert_eq!(f.get(k), *v as u64, "get({k})");
        }
    }

    #[test]
    fn maps_wide_values_multithreaded() {
        let keys: Vec<String> = (0..10_000).map(|k| format!("key{k}")).collect();
        let values: Vec<u32> = (0..10_000).map(|k| k as u32 ^ 0xDEAD_BEEF).collect();
        let f = Function::try_from_slices(&keys, &values, Default::default()).unwrap();
        for (k, v) in keys.iter().zip(values.iter()) {
            assert_eq!(f.get(k), *v as u64);
        }
    }

    #[test]
    fn round_trip() {
        let keys: Vec<u16> = (0..500).collect();
        let values: Vec<u16> = keys.iter().map(|k| k.wrapping_mul(31)).collect();
        let f = Function::from_slices(&keys, &values);
        let mut buff = Vec::new();
        f.write(&mut buff).unwrap();
        assert_eq!(buff.len(), f.write_bytes());
        let read = Function::read(&mut &buff[..]).unwrap();
        assert_eq!(read.bits_per_value(), f.bits_per_value());
        for k in &keys { assert_eq!(f.get(k), read.get(k)); }
        buff[0] = 200;
        assert!(matches!(Function::read(&mut &buff[..]), Err(Error::IncompatibleFormat { .. })));
    }

    #[test]
    fn zero_width_values() {
        let keys: Vec<u64> = (0..100).collect();
        let values = vec![0u8; 100];
        let f = Function::from_slices(&keys, &values);
        assert_eq!(f.bits_per_value(), 0);
        for k in &keys { assert_eq!(f.get(k), 0); }
    }

    #[test]
    fn duplicate_keys_are_reported() {
        let result = Function::try_from_slices(&[1u64, 2, 1], &[1u8, 2, 3], Default::default());
        assert!(matches!(result, Err(Error::DuplicateKey)));
    }

    #[test]
    fn core_solver_handles_consistent_and_inconsistent_cores() {
        // two identical edges: unpeelable, consistent only with equal values
        let edges = [[0u32, 1, 2], [0, 1, 2]];
        let core = [0u32, 1];
        let mut cells = Box::<[u64]>::with_zeroed_bits(3 * 8);
        assert!(solve_core(&edges, &[5, 5], &core, 3, 8, &mut cells));
        let got = cells.get_fragment(0, 8) ^ cells.get_fragment(1, 8) ^ cells.get_fragment(2, 8);
        assert_eq!(got, 5);
        let mut cells = Box::<[u64]>::with_zeroed_bits(3 * 8);
        assert!(!solve_core(&edges, &[5, 6], &core, 3, 8, &mut cells));
    }

    #[test]
    fn core_solver_dense_cycle() {
        // the complete 2-core on four vertices: every triple is an edge
        let edges = [[0u32, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
        let core = [0u32, 1, 2, 3];
        let constants = [3u64, 5, 6, 7];
        let mut cells = Box::<[u64]>::with_zeroed_bits(4 * 4);
        assert!(solve_core(&edges, &constants, &core, 4, 4, &mut cells));
        for (e, c) in edges.iter().zip(constants.iter()) {
            let got = cells.get_fragment(e[0] as usize, 4)
                ^ cells.get_fragment(e[1] as usize, 4)
                ^ cells.get_fragment(e[2] as usize, 4);
            assert_eq!(got, *c);
        }
    }
}
