//! The public store: a mapping-like surface over the overlay, the flusher
//! and the engine.
//!
//! Lock discipline: the overlay mutex guards only O(1) in-memory work and is
//! never held across an engine point read or a batch commit. The engine
//! sits behind a reader-writer lock whose writer side is taken exactly once,
//! at close, to release it; both engines serve concurrent MVCC reads while
//! the flusher commits. `flush_now` and the high-water barrier wait on the
//! flusher's completion condvar.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{error, info};
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::codec::{decode_value, encode_key, encode_value, Key, Value};
use crate::engine::{self, Engine, EngineStat};
use crate::errors::{Errors, Result};
use crate::flusher::{self, FlushControl};
use crate::iterator::{Keys, StoreIterator, Values};
use crate::meta;
use crate::option::{IteratorOptions, Options};
use crate::overlay::{Lookup, Overlay};
use crate::registry;

/// Merged statistics: the logical entry count plus the raw overlay and
/// engine numbers behind it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stat {
  /// Logical number of keys in the merged view.
  pub count: usize,
  /// Pending writes in the overlay.
  pub buffer: usize,
  /// Pending deletes in the overlay.
  pub marked_delete: usize,
  /// Raw engine counters.
  pub engine: EngineStat,
}

pub(crate) struct Shared {
  pub(crate) options: Options,
  pub(crate) overlay: Mutex<Overlay>,
  pub(crate) engine: RwLock<Option<Box<dyn Engine>>>,
  pub(crate) control: FlushControl,
  closed: AtomicBool,
  worker: Mutex<Option<JoinHandle<()>>>,
}

/// A persistent key-value store with buffered writes.
///
/// Writes stage into an in-memory overlay and return immediately; a
/// background flusher moves them into the engine in atomic batches. Reads
/// always see this store's own writes. `close` (or drop, or process exit)
/// drains the overlay one final time before releasing the engine.
pub struct Store {
  shared: Arc<Shared>,
}

impl Store {
  /// Opens (or creates) a store at `options.dir_path`.
  pub fn open(options: Options) -> Result<Store> {
    if options.high_water == 0 {
      return Err(Errors::InvalidOptions(
        "high_water must be at least 1".to_string(),
      ));
    }
    if options.flush_interval.is_zero() {
      return Err(Errors::InvalidOptions(
        "flush_interval must be non-zero".to_string(),
      ));
    }
    if let Err(e) = fs::create_dir_all(&options.dir_path) {
      error!(
        "failed to create database dir {}: {e}",
        options.dir_path.display()
      );
      return Err(Errors::FailedToCreateDatabaseDir);
    }

    meta::load_or_init(&options.dir_path, options.engine_type, options.rebuild)?;

    let engine = engine::new_engine(&options)?;
    if options.rebuild {
      engine.drop_all()?;
    }

    let shared = Arc::new(Shared {
      overlay: Mutex::new(Overlay::new()),
      engine: RwLock::new(Some(engine)),
      control: FlushControl::new(),
      closed: AtomicBool::new(false),
      worker: Mutex::new(None),
      options,
    });

    let worker = flusher::spawn(Arc::clone(&shared)).map_err(|e| {
      error!("failed to spawn flush worker: {e}");
      Errors::Engine(e.to_string())
    })?;
    *shared.worker.lock() = Some(worker);

    registry::register(&shared);
    info!(
      "opened {:?} store at {}",
      shared.options.engine_type,
      shared.options.dir_path.display()
    );
    Ok(Store { shared })
  }

  /// Stages a write. Returns as soon as the entry is in the overlay; blocks
  /// only while the overlay is at the high-water mark.
  pub fn put(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
    self.check_open()?;
    self.poll_flush_error()?;
    let key = encode_key(&key.into())?;
    let value = encode_value(&value.into())?;
    let mut overlay = self.lock_with_room()?;
    overlay.stage_put(key, value);
    self.after_stage(overlay);
    Ok(())
  }

  /// Returns the latest value for a key, from the overlay or the engine.
  pub fn get(&self, key: impl Into<Key>) -> Result<Value> {
    self.check_open()?;
    self.poll_flush_error()?;
    let key = encode_key(&key.into())?;
    let staged = { self.shared.overlay.lock().lookup(&key) };
    match staged {
      Lookup::Hit(value) => decode_value(&value),
      Lookup::Tombstoned => Err(Errors::KeyNotFound),
      Lookup::Miss => match self.with_engine(|engine| engine.get(&key))? {
        Some(value) => decode_value(&value),
        None => Err(Errors::KeyNotFound),
      },
    }
  }

  /// Reads several keys in input order; absent keys yield `None`.
  pub fn get_batch<I>(&self, keys: I) -> Result<Vec<Option<Value>>>
  where
    I: IntoIterator,
    I::Item: Into<Key>,
  {
    self.check_open()?;
    self.poll_flush_error()?;
    let mut values = Vec::new();
    for key in keys {
      let key = encode_key(&key.into())?;
      let staged = { self.shared.overlay.lock().lookup(&key) };
      let value = match staged {
        Lookup::Hit(value) => Some(decode_value(&value)?),
        Lookup::Tombstoned => None,
        Lookup::Miss => match self.with_engine(|engine| engine.get(&key))? {
          Some(value) => Some(decode_value(&value)?),
          None => None,
        },
      };
      values.push(value);
    }
    Ok(values)
  }

  /// The encoded engine record for a key, bypassing the overlay. Pending
  /// writes are not visible here until they flush.
  pub fn get_db_value(&self, key: impl Into<Key>) -> Result<Option<Bytes>> {
    self.check_open()?;
    self.poll_flush_error()?;
    let key = encode_key(&key.into())?;
    self.with_engine(|engine| engine.get(&key))
  }

  /// Stages a delete. Deleting a key absent from both the overlay and the
  /// engine is an error.
  pub fn delete(&self, key: impl Into<Key>) -> Result<()> {
    self.check_open()?;
    self.poll_flush_error()?;
    let key = encode_key(&key.into())?;
    let staged = { self.shared.overlay.lock().lookup(&key) };
    match staged {
      Lookup::Tombstoned => return Err(Errors::KeyNotFound),
      Lookup::Miss => {
        if !self.with_engine(|engine| engine.contains(&key))? {
          return Err(Errors::KeyNotFound);
        }
      }
      Lookup::Hit(_) => {}
    }
    let mut overlay = self.lock_with_room()?;
    // the key may have been deleted while we were blocked on the barrier
    if let Lookup::Tombstoned = overlay.lookup(&key) {
      return Err(Errors::KeyNotFound);
    }
    overlay.stage_delete(key);
    self.after_stage(overlay);
    Ok(())
  }

  /// Removes a key and returns its value, atomically with respect to other
  /// operations on the same key.
  pub fn pop(&self, key: impl Into<Key>) -> Result<Value> {
    self.check_open()?;
    self.poll_flush_error()?;
    let key = encode_key(&key.into())?;
    loop {
      let staged = { self.shared.overlay.lock().lookup(&key) };
      match staged {
        Lookup::Tombstoned => return Err(Errors::KeyNotFound),
        Lookup::Hit(_) => {
          let mut overlay = self.lock_with_room()?;
          match overlay.lookup(&key) {
            Lookup::Hit(value) => {
              overlay.stage_delete(key.clone());
              self.after_stage(overlay);
              return decode_value(&value);
            }
            Lookup::Tombstoned => return Err(Errors::KeyNotFound),
            // flushed to the engine while we waited; take the engine path
            Lookup::Miss => continue,
          }
        }
        Lookup::Miss => {
          let found = self.with_engine(|engine| engine.get(&key))?;
          let Some(raw) = found else {
            return Err(Errors::KeyNotFound);
          };
          let mut overlay = self.lock_with_room()?;
          match overlay.lookup(&key) {
            Lookup::Miss => {
              overlay.stage_delete(key.clone());
              self.after_stage(overlay);
              return decode_value(&raw);
            }
            // another writer got there first; restart from its state
            _ => continue,
          }
        }
      }
    }
  }

  /// True when the key is present in the merged view.
  pub fn contains(&self, key: impl Into<Key>) -> Result<bool> {
    self.check_open()?;
    self.poll_flush_error()?;
    let key = encode_key(&key.into())?;
    let staged = { self.shared.overlay.lock().lookup(&key) };
    match staged {
      Lookup::Hit(_) => Ok(true),
      Lookup::Tombstoned => Ok(false),
      Lookup::Miss => self.with_engine(|engine| engine.contains(&key)),
    }
  }

  /// Returns the existing value for a key, or stages `default` and returns
  /// it. Check-and-insert is atomic per key.
  pub fn setdefault(&self, key: impl Into<Key>, default: impl Into<Value>) -> Result<Value> {
    self.check_open()?;
    self.poll_flush_error()?;
    let default = default.into();
    let key = encode_key(&key.into())?;
    let staged_value = encode_value(&default)?;
    loop {
      let staged = { self.shared.overlay.lock().lookup(&key) };
      match staged {
        Lookup::Hit(value) => return decode_value(&value),
        Lookup::Tombstoned => {
          let mut overlay = self.lock_with_room()?;
          match overlay.lookup(&key) {
            Lookup::Tombstoned => {
              overlay.stage_put(key.clone(), staged_value.clone());
              self.after_stage(overlay);
              return Ok(default);
            }
            _ => continue,
          }
        }
        Lookup::Miss => match self.with_engine(|engine| engine.get(&key))? {
          Some(raw) => {
            let unchanged = matches!(self.shared.overlay.lock().lookup(&key), Lookup::Miss);
            if unchanged {
              return decode_value(&raw);
            }
            continue;
          }
          None => {
            let mut overlay = self.lock_with_room()?;
            match overlay.lookup(&key) {
              Lookup::Miss => {
                overlay.stage_put(key.clone(), staged_value.clone());
                self.after_stage(overlay);
                return Ok(default);
              }
              _ => continue,
            }
          }
        },
      }
    }
  }

  /// Stages every entry. Entries become visible one by one; there is no
  /// cross-key atomicity.
  pub fn update<I>(&self, entries: I) -> Result<()>
  where
    I: IntoIterator<Item = (Key, Value)>,
  {
    self.check_open()?;
    self.poll_flush_error()?;
    for (key, value) in entries {
      let key = encode_key(&key)?;
      let value = encode_value(&value)?;
      let mut overlay = self.lock_with_room()?;
      overlay.stage_put(key, value);
      self.after_stage(overlay);
    }
    Ok(())
  }

  /// Number of keys in the merged view.
  ///
  /// Best-effort while the flusher is moving entries: the engine count and
  /// the per-key probes are not taken under one lock. Call
  /// [`Store::flush_now`] first for an exact count.
  pub fn len(&self) -> Result<usize> {
    self.check_open()?;
    self.poll_flush_error()?;
    let (buffered, deleted) = { self.shared.overlay.lock().pending_keys() };
    self.with_engine(|engine| {
      let stat = engine.stat()?;
      let mut count = stat.entry_count as i64;
      for key in &buffered {
        if !engine.contains(key)? {
          count += 1;
        }
      }
      for key in &deleted {
        if engine.contains(key)? {
          count -= 1;
        }
      }
      Ok(count.max(0) as usize)
    })
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Merged and raw statistics. Subject to the same caveat as [`Store::len`].
  pub fn stat(&self) -> Result<Stat> {
    self.check_open()?;
    self.poll_flush_error()?;
    let (buffered, deleted) = { self.shared.overlay.lock().pending_keys() };
    self.with_engine(|engine| {
      let engine_stat = engine.stat()?;
      let mut count = engine_stat.entry_count as i64;
      for key in &buffered {
        if !engine.contains(key)? {
          count += 1;
        }
      }
      for key in &deleted {
        if engine.contains(key)? {
          count -= 1;
        }
      }
      Ok(Stat {
        count: count.max(0) as usize,
        buffer: buffered.len(),
        marked_delete: deleted.len(),
        engine: engine_stat,
      })
    })
  }

  /// A lazy scan over the merged view in encoded-key order.
  ///
  /// The snapshot is taken when this returns: mutations staged afterwards
  /// are not observed, staged writes override engine records, and pending
  /// deletes are suppressed.
  pub fn iterate(&self, options: IteratorOptions) -> Result<StoreIterator> {
    self.check_open()?;
    self.poll_flush_error()?;
    let overlay = self.shared.overlay.lock();
    // both views under the overlay lock, so the flusher cannot move entries
    // between them; snapshot creation itself does no disk I/O
    let scan = self.with_engine(|engine| engine.scan(options.reverse))?;
    let snapshot = overlay.snapshot();
    drop(overlay);
    Ok(StoreIterator::new(scan, snapshot, options.reverse))
  }

  /// `iterate` with default options.
  pub fn items(&self) -> Result<StoreIterator> {
    self.iterate(IteratorOptions::default())
  }

  pub fn keys(&self) -> Result<Keys> {
    Ok(Keys::new(self.items()?))
  }

  pub fn values(&self) -> Result<Values> {
    Ok(Values::new(self.items()?))
  }

  /// Blocks until every write staged before this call has been through a
  /// commit. With a timeout, returns `Timeout` on expiry; the commit itself
  /// keeps running.
  pub fn flush_now(&self, timeout: Option<Duration>) -> Result<()> {
    self.check_open()?;
    let deadline = timeout.map(|t| Instant::now() + t);
    let target = self.shared.control.request();
    self.shared.control.wait_for(target, deadline)
  }

  /// Alias of `flush_now` without a deadline.
  pub fn write_immediately(&self) -> Result<()> {
    self.flush_now(None)
  }

  /// Discards pending mutations and removes every persisted record. The
  /// store stays open and empty.
  pub fn clear(&self) -> Result<()> {
    self.check_open()?;
    self.poll_flush_error()?;
    {
      self.shared.overlay.lock().reset();
    }
    // a batch snapshotted before the reset may still be committing; let it
    // land before wiping the engine so it cannot resurrect anything
    self.flush_now(None)?;
    self.with_engine(|engine| engine.drop_all())
  }

  /// Closes the store without a final write and deletes its directory.
  pub fn destroy(self) -> Result<()> {
    {
      self.shared.overlay.lock().reset();
    }
    let dir_path = self.shared.options.dir_path.clone();
    self.shared.close()?;
    fs::remove_dir_all(&dir_path).map_err(|e| {
      error!("failed to remove database dir {}: {e}", dir_path.display());
      Errors::FailedToRemoveDatabaseDir
    })?;
    info!("destroyed database at {}", dir_path.display());
    Ok(())
  }

  /// Drains and commits the overlay, stops the flusher and releases the
  /// engine. Safe to call more than once and from several threads; later
  /// calls return immediately.
  pub fn close(&self) -> Result<()> {
    self.shared.close()
  }

  pub fn path(&self) -> &Path {
    &self.shared.options.dir_path
  }

  fn check_open(&self) -> Result<()> {
    if self.shared.closed.load(Ordering::SeqCst) {
      return Err(Errors::Closed);
    }
    Ok(())
  }

  /// Surfaces the error of a failed background flush on the next user
  /// operation, once.
  fn poll_flush_error(&self) -> Result<()> {
    match self.shared.control.take_error() {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  fn with_engine<T>(&self, f: impl FnOnce(&dyn Engine) -> Result<T>) -> Result<T> {
    let guard = self.shared.engine.read();
    match guard.as_deref() {
      Some(engine) => f(engine),
      None => Err(Errors::Closed),
    }
  }

  /// Acquires the overlay with room for one more entry, waiting on the
  /// flush barrier while it sits at the high-water mark. Fails fast with
  /// `CapacityExceeded` when the flusher is stalled on a failing engine.
  fn lock_with_room(&self) -> Result<MutexGuard<'_, Overlay>> {
    loop {
      let overlay = self.shared.overlay.lock();
      if overlay.len() < self.shared.options.high_water {
        return Ok(overlay);
      }
      drop(overlay);
      if let Some(cause) = self.shared.control.stall_cause() {
        return Err(Errors::CapacityExceeded(cause));
      }
      self.check_open()?;
      let target = self.shared.control.request();
      self.shared.control.wait_for(target, None)?;
    }
  }

  /// Post-staging bookkeeping: kick the flusher once the overlay reaches
  /// the high-water mark so the next writer does not have to block.
  fn after_stage(&self, overlay: MutexGuard<'_, Overlay>) {
    let full = overlay.len() >= self.shared.options.high_water;
    drop(overlay);
    if full {
      self.shared.control.request();
    }
  }
}

impl Shared {
  pub(crate) fn close(&self) -> Result<()> {
    if self.closed.swap(true, Ordering::SeqCst) {
      return Ok(());
    }
    self.control.begin_shutdown();
    let worker = self.worker.lock().take();
    if let Some(worker) = worker {
      if worker.join().is_err() {
        error!("flush worker panicked during close");
      }
    }
    self.control.finish_shutdown();
    *self.engine.write() = None;
    info!("closed store at {}", self.options.dir_path.display());
    match self.control.take_error() {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}

impl Drop for Store {
  fn drop(&mut self) {
    if let Err(err) = self.shared.close() {
      error!("failed to close store on drop: {err}");
    }
  }
}
