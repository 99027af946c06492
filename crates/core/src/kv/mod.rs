//! The narrow key-value interface the store is built on.
//!
//! Everything persistent goes through [`KvStore`]: six named column
//! families, atomic write batches, lexicographic prefix/range iteration and
//! point-in-time snapshots. [`rocks::RocksBackend`] is the production
//! engine; [`memory::MemoryBackend`] backs tests and ephemeral stores.

pub mod memory;
pub mod rocks;

use triad_model::Result;

/// The store's column families. `Derived` is reserved for materialized
/// inference and is never written by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    Id2Str,
    Str2Id,
    Spo,
    Pos,
    Osp,
    Derived,
}

impl ColumnFamily {
    pub const ALL: [ColumnFamily; 6] = [
        ColumnFamily::Id2Str,
        ColumnFamily::Str2Id,
        ColumnFamily::Spo,
        ColumnFamily::Pos,
        ColumnFamily::Osp,
        ColumnFamily::Derived,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ColumnFamily::Id2Str => "id2str",
            ColumnFamily::Str2Id => "str2id",
            ColumnFamily::Spo => "spo",
            ColumnFamily::Pos => "pos",
            ColumnFamily::Osp => "osp",
            ColumnFamily::Derived => "derived",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            ColumnFamily::Id2Str => 0,
            ColumnFamily::Str2Id => 1,
            ColumnFamily::Spo => 2,
            ColumnFamily::Pos => 3,
            ColumnFamily::Osp => 4,
            ColumnFamily::Derived => 5,
        }
    }
}

/// One operation of an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put {
        cf: ColumnFamily,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: ColumnFamily,
        key: Vec<u8>,
    },
}

impl BatchOp {
    pub fn put(cf: ColumnFamily, key: Vec<u8>, value: Vec<u8>) -> Self {
        BatchOp::Put { cf, key, value }
    }

    pub fn delete(cf: ColumnFamily, key: Vec<u8>) -> Self {
        BatchOp::Delete { cf, key }
    }
}

pub type KvIter<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + 'a>;

/// Read-side operations, shared by live handles and snapshots.
pub trait KvRead: Send + Sync {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All keys starting with `prefix`, in lexicographic order. An empty
    /// prefix scans the whole column family.
    fn prefix_iter(&self, cf: ColumnFamily, prefix: &[u8]) -> Result<KvIter<'_>>;

    /// All keys in `[start, end)`, in lexicographic order. `None` end means
    /// unbounded.
    fn range_iter(&self, cf: ColumnFamily, start: &[u8], end: Option<&[u8]>)
        -> Result<KvIter<'_>>;

    fn exists(&self, cf: ColumnFamily, key: &[u8]) -> Result<bool> {
        Ok(self.get(cf, key)?.is_some())
    }
}

/// A point-in-time view. Dropping the handle releases the underlying
/// engine snapshot.
pub trait KvSnapshot: KvRead {}

/// The full store interface.
pub trait KvStore: KvRead {
    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> Result<()>;

    /// Apply `ops` atomically: either every operation is visible or none
    /// is. `sync` forces the write-ahead log to disk before returning.
    fn write_batch(&self, ops: Vec<BatchOp>, sync: bool) -> Result<()>;

    fn snapshot(&self) -> Result<Box<dyn KvSnapshot>>;

    fn flush_wal(&self, sync: bool) -> Result<()>;

    fn is_open(&self) -> bool;
}

/// The smallest byte string strictly greater than every key with this
/// prefix, or `None` when the prefix is all `0xff`.
pub(crate) fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}
