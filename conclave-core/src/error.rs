//! Error types for the conclave core.

use thiserror::Error;

use crate::synode::Synode;

/// Errors surfaced by the consensus core.
///
/// Most core operations are pure memory bookkeeping and cannot fail; the
/// error surface is correspondingly small. Cache exhaustion is the
/// important one: it is *not* retried internally and translates to
/// backpressure on consensus progress for the affected synode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConclaveError {
    /// No cache slot could be reclaimed for the given synode, even under
    /// forced eviction — every candidate was busy.
    ///
    /// Callers on must-not-fail paths treat this as fatal resource
    /// exhaustion, not as a normal empty lookup.
    #[error("message cache exhausted: no reclaimable slot for {synode}")]
    CacheExhausted {
        /// The synode for which no slot was available.
        synode: Synode,
    },

    /// A configuration value failed validation.
    #[error("invalid cache configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with the configuration.
        reason: String,
    },
}
