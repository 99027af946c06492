//! RocksDB backend.
//!
//! Six column families, an 8-byte prefix extractor on the triple indices
//! (every scan prefix is a whole number of 8-byte ids), atomic flushes so a
//! crash never leaves the families mutually inconsistent.

use super::{prefix_end, BatchOp, ColumnFamily, KvIter, KvRead, KvSnapshot, KvStore};
use rocksdb::{
    ColumnFamilyDescriptor, Direction, IteratorMode, Options, ReadOptions, SliceTransform,
    WriteBatch, WriteOptions, DB,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use triad_model::{Result, StoreError};

pub struct RocksBackend {
    db: Arc<DB>,
    path: PathBuf,
}

impl RocksBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path).map_err(|e| StoreError::OpenFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        // A crash must never leave the six families mutually inconsistent.
        db_opts.set_atomic_flush(true);
        db_opts.set_keep_log_file_num(10);

        let cfs: Vec<ColumnFamilyDescriptor> = ColumnFamily::ALL
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.name(), cf_options(*cf)))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, &path, cfs).map_err(|e| {
            StoreError::OpenFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        log::info!("opened rocksdb store at {}", path.display());
        Ok(Arc::new(Self {
            db: Arc::new(db),
            path,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cf(&self, cf: ColumnFamily) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf.name())
            .ok_or_else(|| StoreError::Internal(format!("missing column family {}", cf.name())))
    }
}

fn cf_options(cf: ColumnFamily) -> Options {
    let mut opts = Options::default();
    if matches!(
        cf,
        ColumnFamily::Spo | ColumnFamily::Pos | ColumnFamily::Osp
    ) {
        // Scan prefixes are always whole 8-byte ids.
        opts.set_prefix_extractor(SliceTransform::create_fixed_prefix(8));
        opts.set_memtable_prefix_bloom_ratio(0.2);
    }
    opts
}

fn map_err(e: rocksdb::Error) -> StoreError {
    match e.kind() {
        rocksdb::ErrorKind::Corruption => StoreError::CorruptionDetected {
            context: "rocksdb".into(),
            detail: e.to_string(),
        },
        _ => StoreError::Io(e.to_string()),
    }
}

fn read_options(end: Option<&[u8]>) -> ReadOptions {
    let mut opts = ReadOptions::default();
    // Scans may cross prefix-extractor boundaries (full scans, 16-byte
    // prefixes); total-order seek keeps them exhaustive.
    opts.set_total_order_seek(true);
    if let Some(end) = end {
        opts.set_iterate_upper_bound(end.to_vec());
    }
    opts
}

impl KvRead for RocksBackend {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db.get_cf(self.cf(cf)?, key).map_err(map_err)
    }

    fn prefix_iter(&self, cf: ColumnFamily, prefix: &[u8]) -> Result<KvIter<'_>> {
        let end = prefix_end(prefix);
        self.range_iter(cf, prefix, end.as_deref())
    }

    fn range_iter(
        &self,
        cf: ColumnFamily,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<KvIter<'_>> {
        let iter = self.db.iterator_cf_opt(
            self.cf(cf)?,
            read_options(end),
            IteratorMode::From(start, Direction::Forward),
        );
        Ok(Box::new(iter.map(|item| {
            item.map(|(k, v)| (k.into_vec(), v.into_vec())).map_err(map_err)
        })))
    }
}

impl KvStore for RocksBackend {
    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put_cf(self.cf(cf)?, key, value).map_err(map_err)
    }

    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> Result<()> {
        self.db.delete_cf(self.cf(cf)?, key).map_err(map_err)
    }

    fn write_batch(&self, ops: Vec<BatchOp>, sync: bool) -> Result<()> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                BatchOp::Put { cf, key, value } => batch.put_cf(self.cf(cf)?, key, value),
                BatchOp::Delete { cf, key } => batch.delete_cf(self.cf(cf)?, key),
            }
        }
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(sync);
        self.db.write_opt(batch, &write_opts).map_err(map_err)
    }

    fn snapshot(&self) -> Result<Box<dyn KvSnapshot>> {
        let inner = self.db.snapshot();
        // SAFETY: the transmute erases the borrow of `self.db`. The
        // snapshot struct holds its own Arc to the database and declares
        // `inner` first, so the snapshot is dropped (and unregistered from
        // the engine) strictly before the database it points into can be.
        let inner: rocksdb::Snapshot<'static> = unsafe { std::mem::transmute(inner) };
        Ok(Box::new(RocksSnapshot {
            inner,
            db: self.db.clone(),
        }))
    }

    fn flush_wal(&self, sync: bool) -> Result<()> {
        self.db.flush_wal(sync).map_err(map_err)
    }

    fn is_open(&self) -> bool {
        true
    }
}

struct RocksSnapshot {
    // Field order matters: `inner` must drop before `db`.
    inner: rocksdb::Snapshot<'static>,
    db: Arc<DB>,
}

// SAFETY: a RocksDB snapshot is an immutable sequence-number view; the C
// API allows concurrent reads from any thread as long as the DB outlives
// it, which the owned Arc guarantees.
unsafe impl Send for RocksSnapshot {}
unsafe impl Sync for RocksSnapshot {}

impl RocksSnapshot {
    fn cf(&self, cf: ColumnFamily) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf.name())
            .ok_or_else(|| StoreError::Internal(format!("missing column family {}", cf.name())))
    }
}

impl KvRead for RocksSnapshot {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get_cf(self.cf(cf)?, key).map_err(map_err)
    }

    fn prefix_iter(&self, cf: ColumnFamily, prefix: &[u8]) -> Result<KvIter<'_>> {
        let end = prefix_end(prefix);
        self.range_iter(cf, prefix, end.as_deref())
    }

    fn range_iter(
        &self,
        cf: ColumnFamily,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<KvIter<'_>> {
        let iter = self.inner.iterator_cf_opt(
            self.cf(cf)?,
            read_options(end),
            IteratorMode::From(start, Direction::Forward),
        );
        Ok(Box::new(iter.map(|item| {
            item.map(|(k, v)| (k.into_vec(), v.into_vec())).map_err(map_err)
        })))
    }
}

impl KvSnapshot for RocksSnapshot {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<RocksBackend>) {
        let dir = TempDir::with_prefix("triad-rocks-test").unwrap();
        let kv = RocksBackend::open(dir.path().join("db")).unwrap();
        (dir, kv)
    }

    #[test]
    fn put_get_roundtrip_across_families() {
        let (_dir, kv) = setup();
        kv.put(ColumnFamily::Id2Str, b"k", b"id2str").unwrap();
        kv.put(ColumnFamily::Spo, b"k", b"spo").unwrap();
        assert_eq!(
            kv.get(ColumnFamily::Id2Str, b"k").unwrap(),
            Some(b"id2str".to_vec())
        );
        assert_eq!(kv.get(ColumnFamily::Pos, b"k").unwrap(), None);
    }

    #[test]
    fn prefix_iteration_is_lexicographic() {
        let (_dir, kv) = setup();
        for key in [&b"aa"[..], b"ab", b"ac", b"b"] {
            kv.put(ColumnFamily::Spo, key, b"").unwrap();
        }
        let keys: Vec<_> = kv
            .prefix_iter(ColumnFamily::Spo, b"a")
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, vec![b"aa".to_vec(), b"ab".to_vec(), b"ac".to_vec()]);
    }

    #[test]
    fn snapshot_survives_later_writes() {
        let (_dir, kv) = setup();
        kv.put(ColumnFamily::Spo, b"k", b"old").unwrap();
        let snapshot = kv.snapshot().unwrap();
        kv.put(ColumnFamily::Spo, b"k", b"new").unwrap();
        assert_eq!(
            snapshot.get(ColumnFamily::Spo, b"k").unwrap(),
            Some(b"old".to_vec())
        );
    }

    #[test]
    fn batches_reopen_durably() {
        let dir = TempDir::with_prefix("triad-rocks-test").unwrap();
        let path = dir.path().join("db");
        {
            let kv = RocksBackend::open(&path).unwrap();
            kv.write_batch(
                vec![
                    BatchOp::put(ColumnFamily::Spo, b"a".to_vec(), vec![]),
                    BatchOp::put(ColumnFamily::Pos, b"b".to_vec(), vec![]),
                ],
                true,
            )
            .unwrap();
        }
        let kv = RocksBackend::open(&path).unwrap();
        assert!(kv.exists(ColumnFamily::Spo, b"a").unwrap());
        assert!(kv.exists(ColumnFamily::Pos, b"b").unwrap());
    }
}
