//! Disk-backed bucketed store of key signatures.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use binout::{AsIs, Serializer};
use tempfile::TempDir;

use crate::{Error, Signature};

/// Number of spill files; records are partitioned by the top byte of `sig[0]`.
const NUM_FILES: usize = 256;

/// Fixed-width satellite value stored beside each signature.
pub trait StoreValue: Copy + Send {
    /// On-disk size of the value in bytes.
    const BYTES: usize;

    fn write<W: io::Write + ?Sized>(&self, output: &mut W) -> io::Result<()>;
    fn read<R: io::Read + ?Sized>(input: &mut R) -> io::Result<Self>;
}

/// No satellite data (minimal perfect hashing).
impl StoreValue for () {
    const BYTES: usize = 0;
    #[inline(always)] fn write<W: io::Write + ?Sized>(&self, _output: &mut W) -> io::Result<()> { Ok(()) }
    #[inline(always)] fn read<R: io::Read + ?Sized>(_input: &mut R) -> io::Result<Self> { Ok(()) }
}

/// 64-bit satellite values (static functions).
impl StoreValue for u64 {
    const BYTES: usize = 8;
    #[inline(always)] fn write<W: io::Write + ?Sized>(&self, output: &mut W) -> io::Result<()> {
        AsIs::write(output, *self)
    }
    #[inline(always)] fn read<R: io::Read + ?Sized>(input: &mut R) -> io::Result<Self> {
        AsIs::read(input)
    }
}

/// Stages `(signature, value)` records on disk before bucket-wise processing.
///
/// Records go to one of 256 fixed-record spill files inside an owned scratch
/// directory, partitioned by the top byte of `sig[0]`; since the bucket of a
/// signature is monotone in `sig[0]`, each file covers a contiguous range of
/// buckets and [`Self::into_buckets`] can deliver buckets in increasing index
/// order while holding at most one file in memory.
///
/// The store is single-writer. Dropping it (or the [`Buckets`] iterator made
/// from it) removes the scratch directory.
///
/// The layout follows the signature stores used by bucketed MPHF builders,
/// cf. `sig_store` in sux-rs and the disk sharding of ptr-hash.
pub struct SigStore<V = ()> {
    dir: TempDir,
    writers: Vec<BufWriter<File>>,
    counts: Vec<usize>,
    len: usize,
    _value: PhantomData<V>,
}

#[inline] fn file_path(dir: &TempDir, nr: usize) -> PathBuf {
    dir.path().join(format!("sigs-{nr:03}"))
}

impl<V: StoreValue> SigStore<V> {
    /// Creates a store with spill files under `scratch_dir`
    /// (the system temporary directory if [`None`]).
    pub fn new(scratch_dir: Option<&Path>) -> Result<Self, Error> {
        let dir = match scratch_dir {
            Some(p) => TempDir::new_in(p).map_err(|e| Error::io_at(p, e))?,
            None => TempDir::new()?,
        };
        let mut writers = Vec::with_capacity(NUM_FILES);
        for nr in 0..NUM_FILES {
            let path = file_path(&dir, nr);
            let file = File::create(&path).map_err(|e| Error::io_at(&path, e))?;
            writers.push(BufWriter::new(file));
        }
        Ok(Self { dir, writers, counts: vec![0; NUM_FILES], len: 0, _value: PhantomData })
    }

    /// Returns the number of stored records.
    #[inline] pub fn len(&self) -> usize { self.len }

    /// Returns whether the store is empty.
    #[inline] pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Appends a record.
    pub fn add(&mut self, sig: Signature, value: V) -> Result<(), Error> {
        let nr = sig.file();
        let w = &mut self.writers[nr];
        (|| {
            AsIs::write(w, sig.0[0])?;
            AsIs::write(w, sig.0[1])?;
            AsIs::write(w, sig.0[2])?;
            value.write(w)
        })().map_err(|e| Error::io_at(&file_path(&self.dir, nr), e))?;
        self.counts[nr] += 1;
        self.len += 1;
        Ok(())
    }

    /// Finalizes the store and returns the iterator over its buckets, with
    /// `ceil(len / bucket_size)` buckets (at least one).
    ///
    /// Fails with [`Error::TooLarge`] if the bucket count does not fit a
    /// signed 32-bit index.
    pub fn into_buckets(mut self, bucket_size: usize) -> Result<Buckets<V>, Error> {
        assert!(bucket_size > 0, "bucket size must be positive");
        for (nr, w) in self.writers.iter_mut().enumerate() {
            w.flush().map_err(|e| Error::io_at(&file_path(&self.dir, nr), e))?;
        }
        let num_buckets = bitr::ceiling_div(self.len.max(1), bucket_size).max(1);
        if num_buckets > i32::MAX as usize {
            return Err(Error::TooLarge(num_buckets));
        }
        drop(self.writers);
        Ok(Buckets {
            dir: self.dir,
            counts: self.counts,
            num_keys: self.len,
            num_buckets,
            next_file: 0,
            chunk: Vec::new(),
            chunk_pos: 0,
            pending: None,
        })
    }
}

/// A bucket delivered by [`Buckets`]: all records whose signatures map to
/// `index`, sorted by signature (the order queries will re-derive).
pub struct Bucket<V> {
    pub index: usize,
    pub sigs: Vec<Signature>,
    pub values: Vec<V>,
}

/// Iterator over the buckets of a finalized [`SigStore`], in increasing
/// bucket-index order; empty buckets are skipped.
///
/// Yields [`Error::DuplicateKey`] when two records share all 192 signature
/// bits, and I/O errors of the spill files.
pub struct Buckets<V> {
    dir: TempDir,
    counts: Vec<usize>,
    num_keys: usize,
    num_buckets: usize,
    next_file: usize,
    chunk: Vec<(Signature, V)>,
    chunk_pos: usize,
    pending: Option<Bucket<V>>,
}

impl<V: StoreValue> Buckets<V> {
    /// Returns the total number of buckets (including empty ones).
    #[inline] pub fn num_buckets(&self) -> usize { self.num_buckets }

    /// Returns the total number of records.
    #[inline] pub fn num_keys(&self) -> usize { self.num_keys }

    /// Loads and sorts the records of the next non-empty spill file.
    fn load_next_file(&mut self) -> Result<bool, Error> {
        while self.next_file < NUM_FILES && self.counts[self.next_file] == 0 {
            self.next_file += 1;
        }
        if self.next_file == NUM_FILES { return Ok(false); }
        let nr = self.next_file;
        self.next_file += 1;
        let path = file_path(&self.dir, nr);
        let mut reader = BufReader::new(File::open(&path).map_err(|e| Error::io_at(&path, e))?);
        let mut chunk = Vec::with_capacity(self.counts[nr]);
        for _ in 0..self.counts[nr] {
            let record = (|| -> io::Result<(Signature, V)> {
                let sig = Signature([AsIs::read(&mut reader)?, AsIs::read(&mut reader)?, AsIs::read(&mut reader)?]);
                Ok((sig, V::read(&mut reader)?))
            })().map_err(|e| Error::io_at(&path, e))?;
            chunk.push(record);
        }
        chunk.sort_unstable_by_key(|r| r.0);
        self.chunk = chunk;
        self.chunk_pos = 0;
        Ok(true)
    }
}

impl<V: StoreValue> Iterator for Buckets<V> {
    type Item = Result<Bucket<V>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.chunk_pos == self.chunk.len() {
                match self.load_next_file() {
                    Err(e) => return Some(Err(e)),
                    Ok(false) => return self.pending.take().map(Ok),
                    Ok(true) => continue,
                }
            }
            let start = self.chunk_pos;
            let index = self.chunk[start].0.bucket(self.num_buckets);
            let mut end = start + 1;
            while end < self.chunk.len() && self.chunk[end].0.bucket(self.num_buckets) == index {
                if self.chunk[end].0 == self.chunk[end - 1].0 {
                    self.chunk_pos = self.chunk.len();      // poison further iteration of this chunk
                    return Some(Err(Error::DuplicateKey));
                }
                end += 1;
            }
            self.chunk_pos = end;
            let group = &self.chunk[start..end];
            match &mut self.pending {
                // a bucket can straddle a file boundary; merge its parts
                Some(p) if p.index == index => {
                    p.sigs.extend(group.iter().map(|r| r.0));
                    p.values.extend(group.iter().map(|r| r.1));
                }
                _ => {
                    let bucket = Bucket {
                        index,
                        sigs: group.iter().map(|r| r.0).collect(),
                        values: group.iter().map(|r| r.1).collect(),
                    };
                    if let Some(done) = self.pending.replace(bucket) {
                        return Some(Ok(done));
                    }
                }
            }
        }
    }
}
