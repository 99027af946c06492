//! Store metrics, labelled per database so several stores in one process
//! stay distinguishable.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, IntCounterVec, IntGaugeVec,
};

pub struct StoreMetrics {
    /// Specialized numeric range scans taken instead of scan-and-filter.
    pub range_scans: IntCounterVec,
    /// Index keys touched by specialized range scans.
    pub range_keys_scanned: IntCounterVec,
    /// Index keys touched by ordinary pattern scans.
    pub keys_scanned: IntCounterVec,
    pub plan_cache_hits: IntCounterVec,
    pub plan_cache_misses: IntCounterVec,
    pub plan_cache_invalidations: IntCounterVec,
    /// Property-path / DESCRIBE resource bounds tripped, by kind.
    pub query_truncations: IntCounterVec,
    pub snapshots_created: IntCounterVec,
    pub snapshots_force_released: IntCounterVec,
    pub writes_applied: IntCounterVec,
    pub triples_loaded: IntCounterVec,
    pub open_snapshots: IntGaugeVec,
}

pub static METRICS: Lazy<StoreMetrics> = Lazy::new(|| StoreMetrics {
    range_scans: register_int_counter_vec!(
        "triad_range_scans_total",
        "Specialized numeric range scans taken",
        &["db"]
    )
    .unwrap(),
    range_keys_scanned: register_int_counter_vec!(
        "triad_range_keys_scanned_total",
        "Index keys touched by range scans",
        &["db"]
    )
    .unwrap(),
    keys_scanned: register_int_counter_vec!(
        "triad_keys_scanned_total",
        "Index keys touched by pattern scans",
        &["db"]
    )
    .unwrap(),
    plan_cache_hits: register_int_counter_vec!(
        "triad_plan_cache_hits_total",
        "Plan cache hits",
        &["db"]
    )
    .unwrap(),
    plan_cache_misses: register_int_counter_vec!(
        "triad_plan_cache_misses_total",
        "Plan cache misses",
        &["db"]
    )
    .unwrap(),
    plan_cache_invalidations: register_int_counter_vec!(
        "triad_plan_cache_invalidations_total",
        "Plan cache full invalidations",
        &["db"]
    )
    .unwrap(),
    query_truncations: register_int_counter_vec!(
        "triad_query_truncations_total",
        "Resource bounds tripped with partial results",
        &["db", "kind"]
    )
    .unwrap(),
    snapshots_created: register_int_counter_vec!(
        "triad_snapshots_created_total",
        "Snapshots registered",
        &["db"]
    )
    .unwrap(),
    snapshots_force_released: register_int_counter_vec!(
        "triad_snapshots_force_released_total",
        "Snapshots force-released after TTL expiry",
        &["db"]
    )
    .unwrap(),
    writes_applied: register_int_counter_vec!(
        "triad_writes_applied_total",
        "Write requests that changed at least one triple",
        &["db"]
    )
    .unwrap(),
    triples_loaded: register_int_counter_vec!(
        "triad_triples_loaded_total",
        "Triples durably stored by the bulk loader",
        &["db"]
    )
    .unwrap(),
    open_snapshots: register_int_gauge_vec!(
        "triad_open_snapshots",
        "Currently registered snapshots",
        &["db"]
    )
    .unwrap(),
});
