//! FlaxKV: a persistent key-value store with a dictionary-like interface.
//!
//! Writes land in an in-memory overlay (a write buffer plus a tombstone set)
//! and return at memory speed; a background flusher coalesces them into
//! atomic batches against an embedded ordered engine. Reads consult the
//! overlay first, so a store always observes its own writes, and closing
//! (explicitly, by drop, or at process exit) drains the overlay one final
//! time.
//!
//! # Features
//!
//! * Buffered writes that never block on disk I/O, bounded by a high-water mark
//! * Read-your-writes consistency within a store instance
//! * Two embedded engines: a memory-mapped B+tree and an LSM tree
//! * Rich keys (integers, floats, booleans, text, bytes, groups) with a
//!   canonical byte encoding
//! * Rich values including nested sequences, maps and dense numeric arrays
//! * Snapshot-consistent iteration over the merged view
//!
//! # Basic Usage
//!
//! ```
//! use flaxkv::{Options, Store, Value};
//!
//! let mut opts = Options::default();
//! opts.dir_path = std::env::temp_dir().join("flaxkv-doc");
//! opts.rebuild = true;
//! let store = Store::open(opts).expect("failed to open store");
//!
//! store.put("hello", "world").expect("failed to put");
//! assert_eq!(
//!   store.get("hello").expect("failed to get"),
//!   Value::Str("world".to_string())
//! );
//!
//! store.delete("hello").expect("failed to delete");
//! store.close().expect("failed to close");
//! ```

mod flusher;
mod meta;
mod overlay;
mod registry;

pub mod codec;
pub mod db;
pub mod engine;
pub mod errors;
pub mod iterator;
pub mod option;
pub mod util;

pub use codec::{Dtype, Key, NdArray, Value};
pub use db::{Stat, Store};
pub use errors::{Errors, Result};
pub use option::{EngineType, IteratorOptions, Options};
