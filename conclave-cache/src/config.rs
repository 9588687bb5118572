//! Cache tuning configuration.

use std::time::Duration;

use conclave_core::ConclaveError;

/// Sentinel byte limit meaning "no limit configured".
pub const UNLIMITED: u64 = u64::MAX;

/// Tuning knobs for the message cache.
///
/// ## Tuning Guidelines
///
/// - `increment` is both the slot-provisioning batch and every shard's
///   bucket count. Bigger batches mean fewer, larger growth steps and
///   shorter bucket chains.
/// - `cache_limit` bounds the *payload bytes* referenced by cached
///   machines, not the slot count: slots are cheap, payloads are not.
/// - The four `dec_*`/`min_*` knobs gate the slow slot-count decrease.
///   They are deliberately conservative — giving capacity back is rare
///   and hysteresis-guarded, since re-growing under load costs more than
///   holding spare slots. There is no universally right setting; these
///   defaults favor stability over minimum footprint.
/// - `install_grace` keeps anything governed by a freshly installed
///   membership from being reclaimed before delivery acknowledgements
///   from every member have had time to arrive.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Slots provisioned per growth step; also each shard's bucket count.
    pub increment: usize,

    /// Maximum evictions per [`shrink`](crate::Cache::shrink) pass.
    pub size_decrement: usize,

    /// Payload byte limit, or [`UNLIMITED`].
    pub cache_limit: u64,

    /// Slot-count decrease is considered only above this total length.
    pub dec_threshold_length: usize,

    /// Occupancy fraction below which the cache counts as under-used.
    pub min_target_occupation: f64,

    /// Fraction of the byte limit above which no decrease happens (the
    /// cache is still ramping toward its limit).
    pub dec_threshold_size: f64,

    /// After removing a batch, occupation must still fit within this
    /// fraction of the remaining length.
    pub min_length_threshold: f64,

    /// Period of the maintenance task.
    pub maintenance_tick: Duration,

    /// Minimum age of a site before its rounds may be reclaimed.
    pub install_grace: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            increment: 10_000,
            size_decrement: 1_000,
            cache_limit: 1_000_000_000,
            dec_threshold_length: 500_000,
            min_target_occupation: 0.7,
            dec_threshold_size: 0.95,
            min_length_threshold: 0.9,
            maintenance_tick: Duration::from_millis(100),
            install_grace: Duration::from_secs(5),
        }
    }
}

impl CacheConfig {
    /// A small configuration for tests: tiny batches, no byte limit, no
    /// install grace, fast ticks.
    pub fn for_testing() -> Self {
        Self {
            increment: 8,
            size_decrement: 2,
            cache_limit: UNLIMITED,
            dec_threshold_length: 8,
            min_target_occupation: 0.7,
            dec_threshold_size: 0.95,
            min_length_threshold: 0.9,
            maintenance_tick: Duration::from_millis(10),
            install_grace: Duration::ZERO,
        }
    }

    /// Check the configuration for nonsensical values.
    pub fn validate(&self) -> Result<(), ConclaveError> {
        fn fail(reason: &str) -> Result<(), ConclaveError> {
            Err(ConclaveError::InvalidConfig {
                reason: reason.to_owned(),
            })
        }

        if self.increment == 0 {
            return fail("increment must be at least 1");
        }
        if self.size_decrement == 0 || self.size_decrement > self.increment {
            return fail("size_decrement must be in 1..=increment");
        }
        for (name, value) in [
            ("min_target_occupation", self.min_target_occupation),
            ("dec_threshold_size", self.dec_threshold_size),
            ("min_length_threshold", self.min_length_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return fail(&format!("{name} must be within (0, 1]"));
            }
        }
        if self.maintenance_tick.is_zero() {
            return fail("maintenance_tick must be non-zero");
        }
        Ok(())
    }
}
