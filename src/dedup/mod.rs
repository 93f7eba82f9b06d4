//! Response deduplication.
//!
//! # Responsibilities
//! - Fingerprint logical requests (URL, method, body, agent, session, window)
//! - Serve identical requests from a TTL-bounded cache
//! - Bound the cache by entry count, evicting the oldest insertion
//! - Report hit rate, duplicates blocked and approximate memory
//!
//! # Data Flow
//! ```text
//! RequestDescriptor → Fingerprint::compute → FingerprintCache::lookup
//!                                              ├── hit  → copy of stored response
//!                                              └── miss → caller executes, then insert
//! ```
//!
//! # Design Decisions
//! - Entries and insertion order live under one mutex; lookups are short
//! - Stored and served values are owned copies, never shared handles
//! - TTL is captured per entry, so a TTL change affects later stores only

pub mod cache;
pub mod fingerprint;

pub use cache::{CacheLookup, CacheStats, FingerprintCache};
pub use fingerprint::{Fingerprint, RequestDescriptor};
