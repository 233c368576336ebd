//! Snapshot-consistent iteration over the merged view.
//!
//! The iterator two-pointer-merges an engine scan with a sorted overlay
//! snapshot, both taken at the same instant. Staged writes override engine
//! records with the same encoded key, tombstones suppress them, and nothing
//! staged after the snapshot is ever observed. Dropping the iterator
//! releases the engine read snapshot.

use std::collections::HashSet;

use bytes::Bytes;

use crate::codec::{decode_key, decode_value, Key, Value};
use crate::engine::ScanIter;
use crate::errors::Result;
use crate::overlay::OverlaySnapshot;

pub struct StoreIterator {
  engine: ScanIter,
  staged: std::vec::IntoIter<(Bytes, Bytes)>,
  tombstones: HashSet<Bytes>,
  reverse: bool,
  pending_engine: Option<(Bytes, Bytes)>,
  pending_staged: Option<(Bytes, Bytes)>,
  finished: bool,
}

impl StoreIterator {
  pub(crate) fn new(engine: ScanIter, snapshot: OverlaySnapshot, reverse: bool) -> Self {
    let mut staged: Vec<(Bytes, Bytes)> = snapshot.buffer.into_iter().collect();
    if reverse {
      staged.reverse();
    }
    StoreIterator {
      engine,
      staged: staged.into_iter(),
      tombstones: snapshot.tombstones,
      reverse,
      pending_engine: None,
      pending_staged: None,
      finished: false,
    }
  }

  fn next_engine(&mut self) -> Result<Option<(Bytes, Bytes)>> {
    if let Some(entry) = self.pending_engine.take() {
      return Ok(Some(entry));
    }
    match self.engine.next() {
      Some(Ok(entry)) => Ok(Some(entry)),
      Some(Err(err)) => Err(err),
      None => Ok(None),
    }
  }

  fn next_staged(&mut self) -> Option<(Bytes, Bytes)> {
    self.pending_staged.take().or_else(|| self.staged.next())
  }

  fn next_merged(&mut self) -> Result<Option<(Bytes, Bytes)>> {
    loop {
      let engine_entry = self.next_engine()?;
      let staged_entry = self.next_staged();
      match (engine_entry, staged_entry) {
        (None, None) => return Ok(None),
        (Some(entry), None) => {
          if self.tombstones.contains(&entry.0) {
            continue;
          }
          return Ok(Some(entry));
        }
        (None, Some(entry)) => return Ok(Some(entry)),
        (Some(engine_kv), Some(staged_kv)) => {
          // flip the comparison when scanning backwards so `Less` always
          // means "the engine entry comes out first"
          let ord = if self.reverse {
            staged_kv.0.cmp(&engine_kv.0)
          } else {
            engine_kv.0.cmp(&staged_kv.0)
          };
          match ord {
            std::cmp::Ordering::Equal => return Ok(Some(staged_kv)),
            std::cmp::Ordering::Less => {
              self.pending_staged = Some(staged_kv);
              if self.tombstones.contains(&engine_kv.0) {
                continue;
              }
              return Ok(Some(engine_kv));
            }
            std::cmp::Ordering::Greater => {
              self.pending_engine = Some(engine_kv);
              return Ok(Some(staged_kv));
            }
          }
        }
      }
    }
  }
}

impl Iterator for StoreIterator {
  type Item = Result<(Key, Value)>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }
    match self.next_merged() {
      Ok(Some((key, value))) => {
        let decoded =
          decode_key(&key).and_then(|key| decode_value(&value).map(|value| (key, value)));
        if decoded.is_err() {
          self.finished = true;
        }
        Some(decoded)
      }
      Ok(None) => {
        self.finished = true;
        None
      }
      Err(err) => {
        self.finished = true;
        Some(Err(err))
      }
    }
  }
}

/// Keys-only projection of a merged scan.
pub struct Keys {
  inner: StoreIterator,
}

impl Keys {
  pub(crate) fn new(inner: StoreIterator) -> Self {
    Keys { inner }
  }
}

impl Iterator for Keys {
  type Item = Result<Key>;

  fn next(&mut self) -> Option<Self::Item> {
    self.inner.next().map(|item| item.map(|(key, _)| key))
  }
}

/// Values-only projection of a merged scan.
pub struct Values {
  inner: StoreIterator,
}

impl Values {
  pub(crate) fn new(inner: StoreIterator) -> Self {
    Values { inner }
  }
}

impl Iterator for Values {
  type Item = Result<Value>;

  fn next(&mut self) -> Option<Self::Item> {
    self.inner.next().map(|item| item.map(|(_, value)| value))
  }
}
