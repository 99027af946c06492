//! A bounded LRU cache from query fingerprint to prepared plan.
//!
//! Any write that changed at least one triple clears the cache in full. A
//! stale plan would still be correct, just possibly suboptimal; the blanket
//! invalidation keeps the reasoning trivial.

use crate::metrics::METRICS;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use triad_vm::Query;

/// An optimized query together with the statistics generation it was
/// planned against.
#[derive(Debug, Clone)]
pub struct PreparedPlan {
    pub query: Query,
    pub stats_generation: u64,
}

pub struct PlanCache {
    inner: Mutex<IndexMap<u64, Arc<PreparedPlan>>>,
    capacity: usize,
    label: String,
}

impl PlanCache {
    pub fn new(capacity: usize, label: String) -> Self {
        Self {
            inner: Mutex::new(IndexMap::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            label,
        }
    }

    pub fn get(&self, fingerprint: u64) -> Option<Arc<PreparedPlan>> {
        let mut cache = self.inner.lock();
        // Promote on hit: move to the back, evict from the front.
        match cache.shift_remove(&fingerprint) {
            Some(plan) => {
                cache.insert(fingerprint, plan.clone());
                METRICS
                    .plan_cache_hits
                    .with_label_values(&[&self.label])
                    .inc();
                Some(plan)
            }
            None => {
                METRICS
                    .plan_cache_misses
                    .with_label_values(&[&self.label])
                    .inc();
                None
            }
        }
    }

    pub fn insert(&self, fingerprint: u64, plan: PreparedPlan) -> Arc<PreparedPlan> {
        let plan = Arc::new(plan);
        let mut cache = self.inner.lock();
        cache.shift_remove(&fingerprint);
        while cache.len() >= self.capacity {
            cache.shift_remove_index(0);
        }
        cache.insert(fingerprint, plan.clone());
        plan
    }

    /// Full invalidation; called after every effective write.
    pub fn invalidate_all(&self) {
        let mut cache = self.inner.lock();
        if !cache.is_empty() {
            cache.clear();
            METRICS
                .plan_cache_invalidations
                .with_label_values(&[&self.label])
                .inc();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
