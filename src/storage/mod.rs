//! Audio cache: coalescing manager, persisted store and its SQLite plumbing

pub mod cache;
pub mod db;
pub mod migrations;
pub mod store;

// Re-exports for convenience
pub use cache::{CacheManager, CacheStats, CachedAudio};
pub use db::{create_memory_pool, create_pool, DbPool};
pub use store::{CacheRecord, CacheStore, MemoryCacheStore, SqliteCacheStore, StoreError};
