//! Process-wide registry of open stores.
//!
//! Constructors append a weak handle; an `atexit` hook closes whatever is
//! still open when the process ends, most recently opened first. Stores that
//! were closed or dropped normally upgrade to nothing and are skipped, so
//! the hook only matters for leaked or long-lived static stores.

use std::sync::{Arc, Once, Weak};

use lazy_static::lazy_static;
use log::warn;
use parking_lot::Mutex;

use crate::db::Shared;

lazy_static! {
  static ref OPEN_STORES: Mutex<Vec<Weak<Shared>>> = Mutex::new(Vec::new());
}

static INSTALL_HOOK: Once = Once::new();

extern "C" fn close_open_stores_at_exit() {
  close_all();
}

/// Tracks a newly opened store so process exit can close it.
pub(crate) fn register(shared: &Arc<Shared>) {
  INSTALL_HOOK.call_once(|| unsafe {
    libc::atexit(close_open_stores_at_exit);
  });
  let mut stores = OPEN_STORES.lock();
  stores.retain(|weak| weak.strong_count() > 0);
  stores.push(Arc::downgrade(shared));
}

/// Closes every store still open, in reverse open order.
pub(crate) fn close_all() {
  let alive: Vec<Arc<Shared>> = {
    let mut stores = OPEN_STORES.lock();
    let alive = stores.iter().rev().filter_map(Weak::upgrade).collect();
    stores.clear();
    alive
  };
  for shared in alive {
    if let Err(err) = shared.close() {
      warn!("failed to close store at exit: {err}");
    }
  }
}
