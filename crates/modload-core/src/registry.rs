//! Process-wide diagnostic list of live loaders.
//!
//! Off by default. While enabled, every loader built registers a weak handle
//! here so tooling can snapshot all of them at once. Loaders built while
//! tracking is off are never listed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use modload_types::env_flag;
use parking_lot::Mutex;
use tracing::debug;

use crate::loader::{LoaderInner, LoaderStats};

static TRACKING: AtomicBool = AtomicBool::new(false);
static LOADERS: Mutex<Vec<Weak<LoaderInner>>> = parking_lot::const_mutex(Vec::new());

pub fn enable_tracking() {
    TRACKING.store(true, Ordering::SeqCst);
    debug!("loader tracking enabled");
}

/// Stop tracking and forget every loader seen so far.
pub fn disable_tracking() {
    TRACKING.store(false, Ordering::SeqCst);
    LOADERS.lock().clear();
    debug!("loader tracking disabled");
}

/// Enable tracking if `MODLOAD_TRACK_LOADERS` is set to a true value.
pub fn init_from_env() -> bool {
    let enabled = env_flag("MODLOAD_TRACK_LOADERS");
    if enabled {
        enable_tracking();
    }
    enabled
}

pub fn is_tracking() -> bool {
    TRACKING.load(Ordering::SeqCst)
}

/// Stats for every tracked loader still alive.
pub fn tracked_loaders() -> Vec<LoaderStats> {
    let mut loaders = LOADERS.lock();
    loaders.retain(|weak| weak.strong_count() > 0);
    loaders
        .iter()
        .filter_map(Weak::upgrade)
        .map(|inner| inner.stats())
        .collect()
}

pub(crate) fn register(inner: &Arc<LoaderInner>) {
    if is_tracking() {
        LOADERS.lock().push(Arc::downgrade(inner));
    }
}
