//! Log-structured merge tree engine backed by `fjall`.
//!
//! One keyspace, one partition. Batches commit through the journal and are
//! fsynced before `commit_batch` returns; iterators read from an MVCC
//! snapshot of the tree.

use std::fmt::Display;

use bytes::Bytes;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use log::error;

use super::{BatchOp, Engine, EngineStat, ScanIter};
use crate::errors::{Errors, Result};
use crate::option::Options;

const LSM_DIR_NAME: &str = "lsm";
const PARTITION_NAME: &str = "flaxkv";

pub struct LsmEngine {
  keyspace: Keyspace,
  partition: PartitionHandle,
}

impl LsmEngine {
  pub fn open(options: &Options) -> Result<Self> {
    let path = options.dir_path.join(LSM_DIR_NAME);
    let keyspace = Config::new(&path).open().map_err(|e| {
      error!("failed to open lsm engine at {}: {e}", path.display());
      Errors::Engine(e.to_string())
    })?;
    let partition = keyspace
      .open_partition(PARTITION_NAME, PartitionCreateOptions::default())
      .map_err(engine_err)?;
    Ok(LsmEngine {
      keyspace,
      partition,
    })
  }

  fn persist(&self) -> Result<()> {
    self
      .keyspace
      .persist(PersistMode::SyncAll)
      .map_err(engine_err)
  }
}

impl Engine for LsmEngine {
  fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
    let found = self.partition.get(key).map_err(engine_err)?;
    Ok(found.map(|slice| Bytes::copy_from_slice(&slice)))
  }

  fn contains(&self, key: &[u8]) -> Result<bool> {
    self.partition.contains_key(key).map_err(engine_err)
  }

  fn scan(&self, reverse: bool) -> Result<ScanIter> {
    let entries = self.partition.iter().map(|item| {
      item
        .map(|(k, v)| (Bytes::copy_from_slice(&k), Bytes::copy_from_slice(&v)))
        .map_err(|e| Errors::Engine(e.to_string()))
    });
    if reverse {
      Ok(Box::new(entries.rev()))
    } else {
      Ok(Box::new(entries))
    }
  }

  fn commit_batch(&self, batch: &[BatchOp]) -> Result<()> {
    let mut wb = self.keyspace.batch();
    for op in batch {
      match op {
        BatchOp::Put { key, value } => wb.insert(&self.partition, key.as_ref(), value.as_ref()),
        BatchOp::Delete { key } => wb.remove(&self.partition, key.as_ref()),
      }
    }
    wb.commit().map_err(engine_err)?;
    self.persist()
  }

  fn stat(&self) -> Result<EngineStat> {
    let entry_count = self.partition.len().map_err(engine_err)? as u64;
    let size_bytes = self.keyspace.disk_space();
    Ok(EngineStat {
      entry_count,
      size_bytes,
    })
  }

  fn drop_all(&self) -> Result<()> {
    let keys: Vec<Bytes> = self
      .scan(false)?
      .map(|item| item.map(|(k, _)| k))
      .collect::<Result<_>>()?;
    if keys.is_empty() {
      return Ok(());
    }
    let mut wb = self.keyspace.batch();
    for key in &keys {
      wb.remove(&self.partition, key.as_ref());
    }
    wb.commit().map_err(engine_err)?;
    self.persist()
  }
}

fn engine_err<E: Display>(e: E) -> Errors {
  Errors::Engine(e.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn open_test_engine(dir: &std::path::Path) -> LsmEngine {
    let mut options = Options::default();
    options.dir_path = dir.to_path_buf();
    LsmEngine::open(&options).expect("failed to open lsm engine")
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
      .commit_batch(&[put("a", "1"), put("b", "2"), delete("b")])
      .unwrap();

    assert_eq!(engine.get(b"a").unwrap(), Some(Bytes::from_static(b"1")));
    assert_eq!(engine.get(b"b").unwrap(), None);
    assert!(engine.contains(b"a").unwrap());
    assert!(!engine.contains(b"b").unwrap());
  }

  #[test]
  fn test_scan_is_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_test_engine(dir.path());

    engine
      .commit_batch(&[put("b", "2"), put("a", "1"), put("c", "3")])
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
    assert_eq!(engine.stat().unwrap().entry_count, 2);

    engine.drop_all().unwrap();
    assert_eq!(engine.stat().unwrap().entry_count, 0);
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
