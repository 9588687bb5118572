//! The cooperative cache-maintenance task.
//!
//! A single background loop keeps the cache inside its limits without
//! blocking message processing: every tick it either enforces the byte
//! limit ([`Cache::shrink`]) or, when comfortably under it, considers
//! handing slot capacity back ([`Cache::check_decrease`]).
//!
//! The loop follows the cache's single-context model: the cache is
//! shared as `Rc<RefCell<_>>` with the message-processing tasks on the
//! same local task set, and the loop borrows it only for the duration of
//! one synchronous pass — the await points (tick sleep, shutdown watch)
//! hold no borrow.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::watch;
use tracing::{debug, info};

use conclave_core::GroupEnv;

use crate::cache::Cache;

/// One maintenance pass: shrink if over the byte limit, otherwise see
/// whether slot capacity can be given back. Returns the number of
/// machines evicted (zero on decrease-only passes).
pub fn maintenance_pass<E: GroupEnv>(cache: &mut Cache<E>) -> usize {
    if cache.above_limit() {
        cache.shrink()
    } else {
        if cache.check_decrease() {
            debug!(length = cache.length(), "maintenance released capacity");
        }
        0
    }
}

/// Run the maintenance loop until `shutdown` flips to `true` (or its
/// sender is dropped).
///
/// Ticks every [`CacheConfig::maintenance_tick`](crate::CacheConfig::maintenance_tick).
/// The shutdown flag is checked once per tick, which bounds how long
/// shutdown can lag behind the signal.
pub async fn run_maintenance<E: GroupEnv>(
    cache: Rc<RefCell<Cache<E>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let tick = cache.borrow().config().maintenance_tick;
    info!(?tick, "cache maintenance task started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(tick) => {
                let evicted = maintenance_pass(&mut cache.borrow_mut());
                if evicted > 0 {
                    debug!(evicted, "maintenance pass evicted machines");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("cache maintenance task stopped");
}
