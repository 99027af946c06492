//! In-memory backend over sorted maps.
//!
//! Snapshots clone the whole state, which is exactly the point-in-time
//! semantics the interface promises and cheap at test scale. Scans copy the
//! matching range out so no lock is held while the caller iterates; key
//! order within one scan is stable, as required.

use super::{prefix_end, BatchOp, ColumnFamily, KvIter, KvRead, KvSnapshot, KvStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use triad_model::{Result, StoreError};

type CfMap = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Default, Clone)]
struct State {
    cfs: [CfMap; 6],
}

impl State {
    fn cf(&self, cf: ColumnFamily) -> &CfMap {
        &self.cfs[cf.index()]
    }

    fn cf_mut(&mut self, cf: ColumnFamily) -> &mut CfMap {
        &mut self.cfs[cf.index()]
    }

    fn collect_range(
        &self,
        cf: ColumnFamily,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let upper = match end {
            Some(end) => Bound::Excluded(end.to_vec()),
            None => Bound::Unbounded,
        };
        self.cf(cf)
            .range((Bound::Included(start.to_vec()), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<State>,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::StoreClosed);
        }
        Ok(())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl KvRead for MemoryBackend {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.state.read().cf(cf).get(key).cloned())
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
        self.check_open()?;
        let rows = self.state.read().collect_range(cf, start, end);
        Ok(Box::new(rows.into_iter().map(Ok)))
    }
}

impl KvStore for MemoryBackend {
    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        self.state
            .write()
            .cf_mut(cf)
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> Result<()> {
        self.check_open()?;
        self.state.write().cf_mut(cf).remove(key);
        Ok(())
    }

    fn write_batch(&self, ops: Vec<BatchOp>, _sync: bool) -> Result<()> {
        self.check_open()?;
        // One lock acquisition makes the batch atomic for every reader.
        let mut state = self.state.write();
        for op in ops {
            match op {
                BatchOp::Put { cf, key, value } => {
                    state.cf_mut(cf).insert(key, value);
                }
                BatchOp::Delete { cf, key } => {
                    state.cf_mut(cf).remove(&key);
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<Box<dyn KvSnapshot>> {
        self.check_open()?;
        Ok(Box::new(MemorySnapshot {
            state: self.state.read().clone(),
        }))
    }

    fn flush_wal(&self, _sync: bool) -> Result<()> {
        self.check_open()
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

struct MemorySnapshot {
    state: State,
}

impl KvRead for MemorySnapshot {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.state.cf(cf).get(key).cloned())
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
        let rows = self.state.collect_range(cf, start, end);
        Ok(Box::new(rows.into_iter().map(Ok)))
    }
}

impl KvSnapshot for MemorySnapshot {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_is_atomic_and_ordered() {
        let kv = MemoryBackend::new();
        kv.write_batch(
            vec![
                BatchOp::put(ColumnFamily::Spo, b"b".to_vec(), vec![]),
                BatchOp::put(ColumnFamily::Spo, b"a".to_vec(), vec![]),
                BatchOp::put(ColumnFamily::Spo, b"c".to_vec(), vec![]),
                BatchOp::delete(ColumnFamily::Spo, b"c".to_vec()),
            ],
            false,
        )
        .unwrap();
        let keys: Vec<_> = kv
            .prefix_iter(ColumnFamily::Spo, b"")
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn snapshot_is_a_frozen_view() {
        let kv = MemoryBackend::new();
        kv.put(ColumnFamily::Spo, b"k", b"v1").unwrap();
        let snapshot = kv.snapshot().unwrap();
        kv.put(ColumnFamily::Spo, b"k", b"v2").unwrap();
        kv.put(ColumnFamily::Spo, b"new", b"x").unwrap();

        assert_eq!(snapshot.get(ColumnFamily::Spo, b"k").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(snapshot.get(ColumnFamily::Spo, b"new").unwrap(), None);
        assert_eq!(kv.get(ColumnFamily::Spo, b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn closed_store_refuses_access() {
        let kv = MemoryBackend::new();
        kv.close();
        assert!(matches!(
            kv.get(ColumnFamily::Spo, b"k"),
            Err(StoreError::StoreClosed)
        ));
        assert!(!kv.is_open());
    }

    #[test]
    fn column_families_are_disjoint() {
        let kv = MemoryBackend::new();
        kv.put(ColumnFamily::Spo, b"k", b"spo").unwrap();
        kv.put(ColumnFamily::Pos, b"k", b"pos").unwrap();
        assert_eq!(kv.get(ColumnFamily::Spo, b"k").unwrap(), Some(b"spo".to_vec()));
        assert_eq!(kv.get(ColumnFamily::Osp, b"k").unwrap(), None);
    }
}
