//! The background worker that moves the overlay into the engine.
//!
//! One worker per store. It wakes on a timer, on demand (`flush_now`, the
//! high-water barrier) and on shutdown, snapshots the overlay into a single
//! atomic batch, commits it, and retires the covered entries. Batches are
//! issued strictly one at a time, so cross-batch ordering follows issue
//! order.
//!
//! Epoch accounting: every demand bumps `issued`; after a commit attempt the
//! worker advances `completed` to the epoch it picked up. A waiter whose
//! target epoch is completed knows every write staged before its request has
//! been through a commit attempt. `completed` advances on failure too - the
//! entries are still safely pending, and the waiter receives the error
//! instead of hanging.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{debug, error};
use parking_lot::{Condvar, Mutex};

use crate::db::Shared;
use crate::engine::BatchOp;
use crate::errors::{Errors, Result};

#[derive(Debug, Default)]
struct FlushState {
  issued: u64,
  completed: u64,
  stop: bool,
  stalled: bool,
  stall_reason: String,
  last_error: Option<Errors>,
}

/// Shared signaling between user threads and the flush worker.
pub(crate) struct FlushControl {
  state: Mutex<FlushState>,
  /// Wakes the worker.
  wake: Condvar,
  /// Wakes threads blocked in `wait_for`.
  done: Condvar,
}

impl FlushControl {
  pub fn new() -> Self {
    FlushControl {
      state: Mutex::new(FlushState::default()),
      wake: Condvar::new(),
      done: Condvar::new(),
    }
  }

  /// Demands a flush and returns the epoch to wait on.
  pub fn request(&self) -> u64 {
    let mut state = self.state.lock();
    state.issued += 1;
    let target = state.issued;
    self.wake.notify_one();
    target
  }

  /// Blocks until the given epoch has been flushed, surfacing any captured
  /// flush error exactly once.
  pub fn wait_for(&self, target: u64, deadline: Option<Instant>) -> Result<()> {
    let mut state = self.state.lock();
    while state.completed < target {
      match deadline {
        Some(at) => {
          if self.done.wait_until(&mut state, at).timed_out() {
            return Err(Errors::Timeout);
          }
        }
        None => self.done.wait(&mut state),
      }
    }
    match state.last_error.take() {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  /// Takes the error left behind by a failed background flush, if any.
  pub fn take_error(&self) -> Option<Errors> {
    self.state.lock().last_error.take()
  }

  /// The cause of the current stall, when the last commit attempt failed and
  /// no commit has succeeded since.
  pub fn stall_cause(&self) -> Option<String> {
    let state = self.state.lock();
    if state.stalled {
      Some(state.stall_reason.clone())
    } else {
      None
    }
  }

  /// Tells the worker to finish the in-flight commit, run one final flush
  /// and exit.
  pub fn begin_shutdown(&self) {
    let mut state = self.state.lock();
    state.stop = true;
    state.issued += 1;
    self.wake.notify_all();
  }

  /// Releases waiters whose demand arrived after the worker read its final
  /// epoch. Called once the worker has exited.
  pub fn finish_shutdown(&self) {
    let mut state = self.state.lock();
    if state.completed < state.issued {
      state.completed = state.issued;
    }
    self.done.notify_all();
  }
}

/// Starts the flush worker for a store.
pub(crate) fn spawn(shared: Arc<Shared>) -> std::io::Result<thread::JoinHandle<()>> {
  thread::Builder::new()
    .name("flaxkv-flush".to_string())
    .spawn(move || run(shared))
}

fn run(shared: Arc<Shared>) {
  let interval = shared.options.flush_interval;
  loop {
    let (stop, target) = {
      let mut state = shared.control.state.lock();
      if !state.stop && state.issued == state.completed {
        shared.control.wake.wait_for(&mut state, interval);
      }
      (state.stop, state.issued)
    };
    flush_once(&shared, target);
    if stop {
      break;
    }
  }
  debug!("flush worker exited");
}

/// Commits the pending batch and retires the entries it covered, leaving
/// the outcome in the control state for user threads to observe.
///
/// The overlay keeps its entries while the commit runs: a reader that
/// misses the overlay can only reach records the engine already made
/// durable, and a failed commit simply leaves everything pending.
fn flush_once(shared: &Shared, target: u64) {
  let batch = { shared.overlay.lock().pending_batch() };
  let result = if batch.is_empty() {
    Ok(())
  } else {
    commit(shared, &batch)
  };
  match result {
    Ok(()) => {
      if !batch.is_empty() {
        shared.overlay.lock().retire(&batch);
        debug!("flushed {} operations", batch.len());
      }
      let mut state = shared.control.state.lock();
      state.stalled = false;
      state.stall_reason.clear();
      if state.completed < target {
        state.completed = target;
      }
      shared.control.done.notify_all();
    }
    Err(err) => {
      error!(
        "flush failed, keeping {} operations pending: {err}",
        batch.len()
      );
      let mut state = shared.control.state.lock();
      state.stalled = true;
      state.stall_reason = err.to_string();
      state.last_error = Some(err);
      if state.completed < target {
        state.completed = target;
      }
      shared.control.done.notify_all();
    }
  }
}

fn commit(shared: &Shared, batch: &[BatchOp]) -> Result<()> {
  let engine = shared.engine.read();
  match engine.as_deref() {
    Some(engine) => engine.commit_batch(batch),
    None => Err(Errors::Closed),
  }
}
