//! The environment bundle the consensus core runs against.
//!
//! The cache and dispatch layers are generic over one [`GroupEnv`] bound
//! instead of four separate trait parameters; any type implementing the
//! four collaborator traits gets the bundle for free.
//!
//! [`InMemoryGroupEnv`] is the in-process implementation: a `Clone`
//! handle with shared interior state, so a test (or a single-process
//! embedder) can keep a handle and steer sites, watermarks, and the clock
//! while the cache owns another handle.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::CacheMetrics;
use crate::site::{DeliveryTracker, SiteDef, SiteDirectory};
use crate::synode::Synode;
use crate::time::Clock;

/// Everything the consensus core consumes from its surroundings:
/// site resolution, delivery watermarks, a monotonic clock, and the
/// optional cache instrumentation hooks.
pub trait GroupEnv: SiteDirectory + DeliveryTracker + Clock + CacheMetrics {}

impl<T: SiteDirectory + DeliveryTracker + Clock + CacheMetrics> GroupEnv for T {}

#[derive(Debug)]
struct EnvInner {
    sites: RefCell<Vec<Arc<SiteDef>>>,
    delivered: Cell<Synode>,
    min_delivered: Cell<Synode>,
    now: Cell<Duration>,
}

/// In-memory [`GroupEnv`] for tests and single-process embedding.
///
/// Cloning yields another handle to the same state. The clock is a
/// settable counter starting at zero; watermarks start at the null
/// synode ("nothing provably delivered"), which keeps eviction
/// conservative until the embedder reports progress.
#[derive(Debug, Clone)]
pub struct InMemoryGroupEnv {
    inner: Rc<EnvInner>,
}

impl InMemoryGroupEnv {
    /// Create an empty environment: no sites, null watermarks, time zero.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(EnvInner {
                sites: RefCell::new(Vec::new()),
                delivered: Cell::new(Synode::NULL),
                min_delivered: Cell::new(Synode::NULL),
                now: Cell::new(Duration::ZERO),
            }),
        }
    }

    /// Install a site. The most recently installed site is "current".
    pub fn install_site(&self, site: SiteDef) {
        self.inner.sites.borrow_mut().push(Arc::new(site));
    }

    /// Set this node's delivered watermark.
    pub fn set_delivered(&self, synode: Synode) {
        self.inner.delivered.set(synode);
    }

    /// Set the cluster-wide minimum delivered watermark.
    pub fn set_min_delivered(&self, synode: Synode) {
        self.inner.min_delivered.set(synode);
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.inner.now.set(self.inner.now.get() + by);
    }

    /// Set the clock to an absolute value.
    pub fn set_now(&self, now: Duration) {
        self.inner.now.set(now);
    }
}

impl Default for InMemoryGroupEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteDirectory for InMemoryGroupEnv {
    fn find_site(&self, synode: &Synode) -> Option<Arc<SiteDef>> {
        // The governing site is the one with the greatest start not above
        // the synode, within the same group.
        self.inner
            .sites
            .borrow()
            .iter()
            .filter(|site| {
                matches!(
                    site.start.partial_cmp(synode),
                    Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
                )
            })
            .max_by_key(|site| site.start.msgno)
            .cloned()
    }

    fn current_site(&self) -> Option<Arc<SiteDef>> {
        self.inner.sites.borrow().last().cloned()
    }
}

impl DeliveryTracker for InMemoryGroupEnv {
    fn delivered_msg(&self) -> Synode {
        self.inner.delivered.get()
    }

    fn min_delivered_msg(&self, _site: &SiteDef) -> Synode {
        self.inner.min_delivered.get()
    }
}

impl Clock for InMemoryGroupEnv {
    fn now(&self) -> Duration {
        self.inner.now.get()
    }
}

impl CacheMetrics for InMemoryGroupEnv {}
