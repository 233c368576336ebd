use lazy_static::lazy_static;
use std::path::PathBuf;
use std::time::Duration;

lazy_static! {
  pub static ref DEFAULT_DIR_PATH: PathBuf = std::env::temp_dir().join("flaxkv");
}

#[derive(Debug, Clone)]
pub struct Options {
  /// Directory holding the metadata header and the engine's files.
  pub dir_path: PathBuf,

  /// Which embedded engine persists the data.
  pub engine_type: EngineType,

  /// How often the background flusher drains the write buffer.
  pub flush_interval: Duration,

  /// Maximum number of pending overlay entries before writers block on a
  /// flush barrier.
  pub high_water: usize,

  /// Drop all persisted data when opening.
  pub rebuild: bool,

  /// Memory sizing hint handed to the engine (cache / map budget, bytes).
  pub map_size_hint: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineType {
  /// Memory-mapped B+tree engine (single-file, LMDB-class).
  MmapBtree,

  /// Log-structured merge tree engine (LevelDB-class).
  Lsm,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      dir_path: DEFAULT_DIR_PATH.clone(),
      engine_type: EngineType::MmapBtree,
      flush_interval: Duration::from_millis(300),
      high_water: 200,
      rebuild: false,
      map_size_hint: 1024 * 1024 * 1024, // 1GB
    }
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IteratorOptions {
  pub reverse: bool,
}
