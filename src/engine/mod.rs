//! The ordered-KV contract the store needs from an embedded engine, and the
//! adapters that provide it.
//!
//! Any engine must offer atomic batch commits that are durable once
//! `commit_batch` returns, a stable byte-wise key order for scans, and reads
//! that can proceed concurrently with a write batch (both bundled engines are
//! MVCC, so readers see a consistent snapshot without extra locking).

pub mod btree;
pub mod lsm;

use bytes::Bytes;

use crate::errors::Result;
use crate::option::{EngineType, Options};

/// A single operation inside an atomic engine batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
  Put { key: Bytes, value: Bytes },
  Delete { key: Bytes },
}

/// Raw engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStat {
  pub entry_count: u64,
  pub size_bytes: u64,
}

/// A finite, non-restartable scan over engine records. Dropping it releases
/// the underlying read snapshot.
pub type ScanIter = Box<dyn Iterator<Item = Result<(Bytes, Bytes)>>>;

pub trait Engine: Send + Sync {
  /// Point read of an encoded key.
  fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

  fn contains(&self, key: &[u8]) -> Result<bool>;

  /// Full scan in byte order of the encoded keys (reversed on request),
  /// taken against a read snapshot.
  fn scan(&self, reverse: bool) -> Result<ScanIter>;

  /// Applies the batch atomically; the data is durable when this returns.
  fn commit_batch(&self, batch: &[BatchOp]) -> Result<()>;

  fn stat(&self) -> Result<EngineStat>;

  /// Removes every record, for rebuild-on-open.
  fn drop_all(&self) -> Result<()>;
}

/// Opens the engine selected by the options, rooted in `options.dir_path`.
pub fn new_engine(options: &Options) -> Result<Box<dyn Engine>> {
  match options.engine_type {
    EngineType::MmapBtree => Ok(Box::new(btree::BtreeEngine::open(options)?)),
    EngineType::Lsm => Ok(Box::new(lsm::LsmEngine::open(options)?)),
  }
}
