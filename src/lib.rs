//! A single-machine MapReduce engine computing the maximum recorded
//! temperature for every coordinate in a corpus of weather observations.
//!
//! Input files are cut into line-aligned splits, mapped in parallel, combined
//! locally, shuffled into reduce shards by key hash and reduced in parallel.
//! The per-record logic lives in a [`Workload`]; the engine only knows the
//! function signatures below.

use bytes::Bytes;
use std::hash::Hasher;

pub mod error;
pub mod source;
pub mod standalone;
pub mod utils;
pub mod workload;

pub use error::{JobError, Phase};

/////////////////////////////////////////////////////////////////////////////
// MapReduce application types
/////////////////////////////////////////////////////////////////////////////

/// The output of an application map function.
///
/// There are 2 layers of [`anyhow::Result`]s here. The outer layer
/// accounts for errors that arise while creating the iterator.
/// The inner layer accounts for errors that occur during iteration.
pub type MapOutput = anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<KeyValue>>>>;

/// A map function takes one record and auxiliary arguments.
///
/// The record key is `<path>:<byte offset>` and the record value is the raw
/// line without its terminator. It returns an iterator that yields zero or
/// more intermediate key-value pairs.
pub type MapFn = fn(kv: KeyValue, aux: Bytes) -> MapOutput;

/// A reduce function takes in a key, an iterator over values for that key,
/// and an auxiliary argument. It returns an [`anyhow::Result`]
/// containing a single output value.
///
/// The same signature is used for combiners, so the returned value must be
/// acceptable as input to a further reduction.
pub type ReduceFn = fn(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    aux: Bytes,
) -> anyhow::Result<Bytes>;

/// Routes a key to a shard in `[0, n_reduce)`. Must depend on the key only.
pub type PartitionFn = fn(key: &[u8], n_reduce: u32) -> u32;

/// Turns a reduced value into the text written after the key in an output
/// partition. Returning `None` drops the key from the output.
pub type RenderFn = fn(key: &Bytes, value: Bytes, aux: Bytes) -> anyhow::Result<Option<String>>;

/// A map reduce application.
#[derive(Copy, Clone)]
pub struct Workload {
    pub map_fn: MapFn,
    /// Optional local pre-reduction run inside map tasks.
    pub combine_fn: Option<ReduceFn>,
    pub reduce_fn: ReduceFn,
    pub partition_fn: PartitionFn,
    pub render_fn: RenderFn,
}

/////////////////////////////////////////////////////////////////////////////
// Key-value pairs
/////////////////////////////////////////////////////////////////////////////

/// A single key-value pair.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct KeyValue {
    /// The key.
    pub key: Bytes,
    /// The value.
    pub value: Bytes,
}

impl KeyValue {
    /// Construct a new key-value pair from the given key and value.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }

    /// Get the key of this key-value pair.
    ///
    /// This method is cheap, since [`Bytes`] are cheaply cloneable.
    #[inline]
    pub fn key(&self) -> Bytes {
        self.key.clone()
    }

    /// Get the value of this key-value pair.
    ///
    /// This method is cheap, since [`Bytes`] are cheaply cloneable.
    #[inline]
    pub fn value(&self) -> Bytes {
        self.value.clone()
    }

    /// Consumes the key-value pair and returns the value.
    #[inline]
    pub fn into_value(self) -> Bytes {
        self.value
    }
}

/// Hashes an intermediate key. Compute a reduce bucket for a given key
/// by calculating `ihash(key) % n_reduce`.
pub fn ihash(key: &[u8]) -> u32 {
    let mut hasher = fnv::FnvHasher::with_key(0);
    hasher.write(key);
    (hasher.finish() & 0x7fff_ffff) as u32
}

/// Default partitioner: `ihash(key) % n_reduce`.
pub fn hash_partition(key: &[u8], n_reduce: u32) -> u32 {
    ihash(key) % n_reduce
}
