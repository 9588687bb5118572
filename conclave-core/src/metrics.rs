//! Observability hooks for the message cache.

/// Optional instrumentation callbacks for cache payload memory.
///
/// All methods default to no-ops; embedders that account consensus memory
/// against an external instrumentation system override what they need.
/// These hooks are observability only — nothing in the cache's behavior
/// depends on them.
pub trait CacheMetrics {
    /// `bytes` of message payload became referenced by the cache.
    fn payload_added(&self, bytes: u64) {
        let _ = bytes;
    }

    /// `bytes` of message payload stopped being referenced by the cache.
    fn payload_freed(&self, bytes: u64) {
        let _ = bytes;
    }

    /// The cache was shut down and released everything it held.
    fn cache_shutdown(&self) {}
}
