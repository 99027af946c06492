pub mod coordinator;
pub mod dictionary;
pub mod estimation;
pub mod index;
pub mod loader;
pub mod plan_cache;
pub mod reader;
pub mod snapshot_registry;
pub mod stats;
pub mod triple_db;
