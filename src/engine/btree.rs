//! Memory-mapped B+tree engine backed by `redb`.
//!
//! All records live in one table of one database file. Write transactions
//! commit atomically and fsync before returning; read transactions are MVCC
//! snapshots, so scans and point reads never block the flusher.

use std::fmt::Display;
use std::fs;
use std::path::PathBuf;

use bytes::Bytes;
use log::error;
use redb::{Database, ReadableTableMetadata, TableDefinition};

use super::{BatchOp, Engine, EngineStat, ScanIter};
use crate::errors::{Errors, Result};
use crate::option::Options;

const DATA_FILE_NAME: &str = "data.redb";
const DATA_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("flaxkv");

pub struct BtreeEngine {
  db: Database,
  file_path: PathBuf,
}

impl BtreeEngine {
  pub fn open(options: &Options) -> Result<Self> {
    let file_path = options.dir_path.join(DATA_FILE_NAME);
    let db = Database::builder()
      .set_cache_size(options.map_size_hint)
      .create(&file_path)
      .map_err(|e| {
        error!("failed to open btree engine at {}: {e}", file_path.display());
        Errors::Engine(e.to_string())
      })?;

    // create the table up front so reads never race its first appearance
    let txn = db.begin_write().map_err(engine_err)?;
    {
      txn.open_table(DATA_TABLE).map_err(engine_err)?;
    }
    txn.commit().map_err(engine_err)?;

    Ok(BtreeEngine { db, file_path })
  }
}

impl Engine for BtreeEngine {
  fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
    let txn = self.db.begin_read().map_err(engine_err)?;
    let table = txn.open_table(DATA_TABLE).map_err(engine_err)?;
    let found = table.get(key).map_err(engine_err)?;
    Ok(found.map(|guard| Bytes::copy_from_slice(guard.value())))
  }

  fn contains(&self, key: &[u8]) -> Result<bool> {
    let txn = self.db.begin_read().map_err(engine_err)?;
    let table = txn.open_table(DATA_TABLE).map_err(engine_err)?;
    Ok(table.get(key).map_err(engine_err)?.is_some())
  }

  fn scan(&self, reverse: bool) -> Result<ScanIter> {
    let txn = self.db.begin_read().map_err(engine_err)?;
    let table = txn.open_table(DATA_TABLE).map_err(engine_err)?;
    let range = table.range::<&[u8]>(..).map_err(engine_err)?;
    let entries = range.map(|item| {
      item
        .map(|(k, v)| {
          (
            Bytes::copy_from_slice(k.value()),
            Bytes::copy_from_slice(v.value()),
          )
        })
        .map_err(|e| Errors::Engine(e.to_string()))
    });
    if reverse {
      Ok(Box::new(entries.rev()))
    } else {
      Ok(Box::new(entries))
    }
  }

  fn commit_batch(&self, batch: &[BatchOp]) -> Result<()> {
    let txn = self.db.begin_write().map_err(engine_err)?;
    {
      let mut table = txn.open_table(DATA_TABLE).map_err(engine_err)?;
      for op in batch {
        match op {
          BatchOp::Put { key, value } => {
            table.insert(key.as_ref(), value.as_ref()).map_err(engine_err)?;
          }
          BatchOp::Delete { key } => {
            table.remove(key.as_ref()).map_err(engine_err)?;
          }
        }
      }
    }
    txn.commit().map_err(engine_err)
  }

  fn stat(&self) -> Result<EngineStat> {
    let txn = self.db.begin_read().map_err(engine_err)?;
    let table = txn.open_table(DATA_TABLE).map_err(engine_err)?;
    let entry_count = table.len().map_err(engine_err)?;
    let size_bytes = fs::metadata(&self.file_path).map(|m| m.len()).unwrap_or(0);
    Ok(EngineStat {
      entry_count,
      size_bytes,
    })
  }

  fn drop_all(&self) -> Result<()> {
    let txn = self.db.begin_write().map_err(engine_err)?;
    txn.delete_table(DATA_TABLE).map_err(engine_err)?;
    {
      txn.open_table(DATA_TABLE).map_err(engine_err)?;
    }
    txn.commit().map_err(engine_err)
  }
}

fn engine_err<E: Display>(e: E) -> Errors {
  Errors::Engine(e.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn open_test_engine(dir: &std::path::Path) -> BtreeEngine {
    let mut options = Options::default();
    options.dir_path = dir.to_path_buf();
    BtreeEngine::open(&options).expect("failed to open btree engine")
  }

  fn put(key: &str, value: &str) -> BatchOp {
    BatchOp::Put {
      key: Bytes::copy_from_slice(key.as_bytes()),
      value: Bytes::copy_from_slice(value.as_bytes()),
    }
  }

  fn delete(key: &str) -> BatchOp {
    BatchOp::Delete {
      key: Bytes::copy_from_slice(key.as_bytes()),
    }
  }

  #[test]
  fn test_batch_then_read() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_test_engine(dir.path());

    engine
      .commit_batch(&[put("a", "1"), put("b", "2"), put("a", "3")])
      .unwrap();

    assert_eq!(engine.get(b"a").unwrap(), Some(Bytes::from_static(b"3")));
    assert_eq!(engine.get(b"b").unwrap(), Some(Bytes::from_static(b"2")));
    assert_eq!(engine.get(b"c").unwrap(), None);
    assert!(engine.contains(b"a").unwrap());
    assert!(!engine.contains(b"c").unwrap());

    engine.commit_batch(&[delete("a")]).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), None);
  }

  #[test]
  fn test_scan_is_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_test_engine(dir.path());

    engine
      .commit_batch(&[put("c", "3"), put("a", "1"), put("b", "2")])
      .unwrap();

    let forward: Vec<Bytes> = engine
      .scan(false)
      .unwrap()
      .map(|item| item.unwrap().0)
      .collect();
    assert_eq!(forward, vec!["a", "b", "c"]);

    let backward: Vec<Bytes> = engine
      .scan(true)
      .unwrap()
      .map(|item| item.unwrap().0)
      .collect();
    assert_eq!(backward, vec!["c", "b", "a"]);
  }

  #[test]
  fn test_stat_and_drop_all() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_test_engine(dir.path());

    engine
      .commit_batch(&[put("a", "1"), put("b", "2")])
      .unwrap();
    let stat = engine.stat().unwrap();
    assert_eq!(stat.entry_count, 2);
    assert!(stat.size_bytes > 0);

    engine.drop_all().unwrap();
    assert_eq!(engine.stat().unwrap().entry_count, 0);
    assert_eq!(engine.get(b"a").unwrap(), None);
  }

  #[test]
  fn test_reopen_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    {
      let engine = open_test_engine(dir.path());
      engine.commit_batch(&[put("k", "v")]).unwrap();
    }
    let engine = open_test_engine(dir.path());
    assert_eq!(engine.get(b"k").unwrap(), Some(Bytes::from_static(b"v")));
  }
}
