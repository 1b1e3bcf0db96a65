//! Build configuration and the bucket-by-bucket construction driver.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;

use rayon::prelude::*;
use seedable_hash::BuildDefaultSeededHasher;

use crate::stats::BuildStatsCollector;
use crate::store::{Bucket, Buckets, StoreValue};
use crate::Error;

pub(crate) use bitr::ceiling_div;

/// Build configuration accepted by [`Function`](crate::Function) and
/// [`Mphf`](crate::Mphf) constructors. See field descriptions for details.
#[derive(Clone)]
pub struct BuildConf<S = BuildDefaultSeededHasher> {
    /// The family of hash functions used for the 192-bit key signatures.
    pub hash_builder: S,

    /// Target number of keys per bucket. (default: 256)
    ///
    /// Smaller buckets speed up construction and parallelize better; larger
    /// buckets amortize the per-bucket offset storage.
    pub bucket_size: usize,

    /// Whether to solve buckets on the rayon thread pool. (default: `true`)
    pub use_multiple_threads: bool,

    /// Retries with fresh sub-seeds per bucket before the whole build
    /// restarts. At most 16, as the chosen sub-seed is stored on 4 bits per
    /// bucket. (default: 16)
    pub bucket_attempts: u32,

    /// Restarts of the whole build with a fresh master seed (re-hashing the
    /// input) before giving up. (default: 4)
    pub global_attempts: u32,

    /// Directory for the signature spill files (the system temporary
    /// directory if [`None`]). (default: [`None`])
    pub scratch_dir: Option<PathBuf>,

    /// Cooperative cancellation flag, checked between buckets; a cancelled
    /// build fails with [`Error::Cancelled`] and removes its scratch files.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for BuildConf {
    fn default() -> Self {
        Self {
            hash_builder: Default::default(),
            bucket_size: 256,
            use_multiple_threads: true,
            bucket_attempts: 16,
            global_attempts: 4,
            scratch_dir: None,
            cancel: None,
        }
    }
}

impl BuildConf {
    /// Returns the default configuration.
    pub fn new() -> Self { Default::default() }

    /// Returns a configuration that potentially uses multiple threads.
    pub fn mt(use_multiple_threads: bool) -> Self {
        Self { use_multiple_threads, ..Default::default() }
    }

    /// Returns a configuration with a custom target bucket size.
    pub fn bs(bucket_size: usize) -> Self {
        Self { bucket_size, ..Default::default() }
    }
}

impl<S> BuildConf<S> {
    /// Returns a configuration with a custom hasher family.
    pub fn hash(hash_builder: S) -> Self {
        Self {
            hash_builder,
            bucket_size: 256,
            use_multiple_threads: true,
            bucket_attempts: 16,
            global_attempts: 4,
            scratch_dir: None,
            cancel: None,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.load(Relaxed))
    }

    pub(crate) fn validate(&self) {
        assert!(self.bucket_size > 0 && self.bucket_size <= 1 << 30,
            "bucket size {} out of the supported range", self.bucket_size);
        assert!(self.bucket_attempts >= 1 && self.bucket_attempts <= 16,
            "bucket attempts {} out of range [1, 16]", self.bucket_attempts);
        assert!(self.global_attempts >= 1, "at least one global attempt is required");
    }
}

/// Solution of one bucket: the sub-seed that worked, the vertex count and the
/// packed per-vertex values.
pub(crate) struct BucketSolution {
    pub index: usize,
    pub attempt: u32,
    pub keys: usize,
    pub vertices: usize,
    pub values: Box<[u64]>,
}

/// Number of keys solved together between cancellation checks.
const BATCH_KEYS: usize = 1 << 16;

/// Drains `buckets`, solving each with `solve` (in parallel within batches if
/// configured) and returns the solutions in increasing bucket order.
///
/// `solve` receives a bucket and returns `(attempt, vertices, values)`, or
/// [`None`] when every sub-seed failed, which makes the whole pass fail with
/// [`Error::TooManyCollisions`] (the caller restarts with a fresh master seed).
pub(crate) fn solve_buckets<V, S, F, BS>(
    buckets: Buckets<V>, conf: &BuildConf<S>, stats: &mut BS, solve: F,
) -> Result<Vec<BucketSolution>, Error>
where
    V: StoreValue + Sync,
    F: Fn(&Bucket<V>) -> Option<(u32, usize, Box<[u64]>)> + Sync,
    BS: BuildStatsCollector,
{
    let mut solutions = Vec::new();
    let mut batch: Vec<Bucket<V>> = Vec::new();
    let mut batch_keys = 0;
    let mut buckets = buckets.peekable();
    loop {
        if conf.is_cancelled() { return Err(Error::Cancelled); }
        if let Some(bucket) = buckets.next() {
            let bucket = bucket?;
            batch_keys += bucket.sigs.len();
            batch.push(bucket);
        }
        let drained = buckets.peek().is_none();
        if !drained && batch_keys < BATCH_KEYS { continue; }
        if batch.is_empty() { if drained { break; } else { continue; } }
        let solved: Vec<Option<BucketSolution>> = if conf.use_multiple_threads {
            batch.par_iter().map(|bucket| {
                solve(bucket).map(|(attempt, vertices, values)| BucketSolution {
                    index: bucket.index, attempt, keys: bucket.sigs.len(), vertices, values,
                })
            }).collect()
        } else {
            batch.iter().map(|bucket| {
                solve(bucket).map(|(attempt, vertices, values)| BucketSolution {
                    index: bucket.index, attempt, keys: bucket.sigs.len(), vertices, values,
                })
            }).collect()
        };
        for solution in solved {
            let solution = solution.ok_or(Error::TooManyCollisions(conf.bucket_attempts))?;
            stats.bucket(solution.keys, solution.vertices, solution.attempt);
            solutions.push(solution);
        }
        batch.clear();
        batch_keys = 0;
        if drained { break; }
    }
    Ok(solutions)
}

/// Returns a third of the vertex count for a bucket of `keys` keys and the
/// given expansion (in percent): `3 * third >= c/100 * keys`.
///
/// The second bound keeps tiny buckets workable: with fewer than `keys + 2`
/// vertices the segments are so small that distinct keys are likely (for two
/// keys in one-vertex segments, certain) to derive identical hyperedges,
/// which no retry can fix.
#[inline] pub(crate) fn third_of_vertices(keys: usize, expansion_percent: usize) -> usize {
    ceiling_div(keys * expansion_percent, 300).max(ceiling_div(keys + 2, 3))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_counts() {
        assert_eq!(third_of_vertices(1, 123), 1);
        assert_eq!(third_of_vertices(2, 123), 2);
        assert_eq!(third_of_vertices(2, 110), 2);
        assert_eq!(third_of_vertices(100, 123), 41);
        assert_eq!(third_of_vertices(256, 123), 105);
        assert_eq!(third_of_vertices(256, 110), 94);
        assert_eq!(third_of_vertices(1000, 110), 367);
        assert!(3 * third_of_vertices(1000, 110) >= 1100);
    }
}
