//! The in-memory delta held in front of the engine: a write buffer plus a
//! tombstone set, with the insertion order preserved for flushing.
//!
//! An encoded key lives in at most one of the two containers at any instant;
//! staging an operation for a key always replaces whatever was staged
//! before. Entries stay in place while a flush batch commits and are only
//! retired afterwards, so readers never fall through to the engine before
//! the data is durable, and a failed commit leaves everything pending.

use std::collections::{BTreeMap, HashMap, HashSet};

use bytes::Bytes;

use crate::engine::BatchOp;

/// Result of consulting the overlay for one encoded key.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Lookup {
  /// A pending write; the payload is the encoded value.
  Hit(Bytes),
  /// A pending delete: the key is absent no matter what the engine holds.
  Tombstoned,
  /// The overlay knows nothing about this key.
  Miss,
}

#[derive(Debug, Default)]
pub(crate) struct Overlay {
  buffer: HashMap<Bytes, Bytes>,
  tombstones: HashSet<Bytes>,
  /// Keys in first-staged order. A key is queued once, when it first enters
  /// either container, and leaves when it is retired.
  order: Vec<Bytes>,
}

/// A point-in-time copy of the overlay for merge scans. The buffer view is
/// sorted by encoded key so it can be merged against an ordered engine scan.
#[derive(Debug)]
pub(crate) struct OverlaySnapshot {
  pub buffer: BTreeMap<Bytes, Bytes>,
  pub tombstones: HashSet<Bytes>,
}

impl Overlay {
  pub fn new() -> Self {
    Self::default()
  }

  /// Stages a write, displacing any pending delete for the same key.
  pub fn stage_put(&mut self, key: Bytes, value: Bytes) {
    let was_tombstoned = self.tombstones.remove(&key);
    if !was_tombstoned && !self.buffer.contains_key(&key) {
      self.order.push(key.clone());
    }
    self.buffer.insert(key, value);
  }

  /// Stages a delete, displacing any pending write for the same key.
  pub fn stage_delete(&mut self, key: Bytes) {
    let was_buffered = self.buffer.remove(&key).is_some();
    if !was_buffered && !self.tombstones.contains(&key) {
      self.order.push(key.clone());
    }
    self.tombstones.insert(key);
  }

  pub fn lookup(&self, key: &[u8]) -> Lookup {
    if self.tombstones.contains(key) {
      return Lookup::Tombstoned;
    }
    match self.buffer.get(key) {
      Some(value) => Lookup::Hit(value.clone()),
      None => Lookup::Miss,
    }
  }

  pub fn len(&self) -> usize {
    self.buffer.len() + self.tombstones.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty() && self.tombstones.is_empty()
  }

  /// The current contents as a commit-ready batch in first-staged order.
  /// Entries stay in the overlay; pair with [`Overlay::retire`] once the
  /// batch has committed.
  pub fn pending_batch(&self) -> Vec<BatchOp> {
    let mut batch = Vec::with_capacity(self.order.len());
    for key in &self.order {
      if let Some(value) = self.buffer.get(key) {
        batch.push(BatchOp::Put {
          key: key.clone(),
          value: value.clone(),
        });
      } else if self.tombstones.contains(key) {
        batch.push(BatchOp::Delete { key: key.clone() });
      }
    }
    batch
  }

  /// Removes the entries a committed batch covered. An entry that changed
  /// since the batch was taken (a different value, or the other container)
  /// is newer intent and stays pending.
  pub fn retire(&mut self, batch: &[BatchOp]) {
    for op in batch {
      match op {
        BatchOp::Put { key, value } => {
          if self.buffer.get(key) == Some(value) {
            self.buffer.remove(key);
          }
        }
        BatchOp::Delete { key } => {
          self.tombstones.remove(key);
        }
      }
    }
    let buffer = &self.buffer;
    let tombstones = &self.tombstones;
    self
      .order
      .retain(|key| buffer.contains_key(key) || tombstones.contains(key));
  }

  pub fn snapshot(&self) -> OverlaySnapshot {
    OverlaySnapshot {
      buffer: self
        .buffer
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
      tombstones: self.tombstones.clone(),
    }
  }

  /// The pending write keys and pending delete keys, for merged counting.
  pub fn pending_keys(&self) -> (Vec<Bytes>, Vec<Bytes>) {
    (
      self.buffer.keys().cloned().collect(),
      self.tombstones.iter().cloned().collect(),
    )
  }

  pub fn reset(&mut self) {
    self.buffer.clear();
    self.tombstones.clear();
    self.order.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
  }

  fn val(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
  }

  #[test]
  fn test_lookup_three_way() {
    let mut overlay = Overlay::new();
    assert_eq!(overlay.lookup(b"a"), Lookup::Miss);

    overlay.stage_put(key("a"), val("1"));
    assert_eq!(overlay.lookup(b"a"), Lookup::Hit(val("1")));

    overlay.stage_delete(key("a"));
    assert_eq!(overlay.lookup(b"a"), Lookup::Tombstoned);
  }

  #[test]
  fn test_put_delete_mutual_exclusion() {
    let mut overlay = Overlay::new();
    for _ in 0..10 {
      overlay.stage_put(key("a"), val("1"));
      overlay.stage_delete(key("a"));
      overlay.stage_put(key("a"), val("2"));
    }
    assert_eq!(overlay.len(), 1);
    assert_eq!(overlay.lookup(b"a"), Lookup::Hit(val("2")));
  }

  #[test]
  fn test_latest_write_wins() {
    let mut overlay = Overlay::new();
    overlay.stage_put(key("a"), val("1"));
    overlay.stage_put(key("a"), val("2"));
    overlay.stage_put(key("a"), val("3"));
    assert_eq!(overlay.len(), 1);

    let batch = overlay.pending_batch();
    assert_eq!(
      batch,
      vec![BatchOp::Put {
        key: key("a"),
        value: val("3")
      }]
    );
  }

  #[test]
  fn test_pending_batch_preserves_insertion_order() {
    let mut overlay = Overlay::new();
    overlay.stage_put(key("b"), val("1"));
    overlay.stage_delete(key("a"));
    overlay.stage_put(key("c"), val("2"));
    // restaging b keeps its original slot
    overlay.stage_put(key("b"), val("9"));

    let batch = overlay.pending_batch();
    assert_eq!(
      batch,
      vec![
        BatchOp::Put {
          key: key("b"),
          value: val("9")
        },
        BatchOp::Delete { key: key("a") },
        BatchOp::Put {
          key: key("c"),
          value: val("2")
        },
      ]
    );
    // nothing was detached
    assert_eq!(overlay.len(), 3);
  }

  #[test]
  fn test_retire_empties_an_untouched_overlay() {
    let mut overlay = Overlay::new();
    overlay.stage_put(key("a"), val("1"));
    overlay.stage_delete(key("b"));

    let batch = overlay.pending_batch();
    overlay.retire(&batch);
    assert!(overlay.is_empty());
    assert_eq!(overlay.lookup(b"a"), Lookup::Miss);
    assert_eq!(overlay.lookup(b"b"), Lookup::Miss);
  }

  #[test]
  fn test_retire_keeps_entries_staged_since_the_batch() {
    let mut overlay = Overlay::new();
    overlay.stage_put(key("a"), val("old"));
    overlay.stage_delete(key("b"));
    let batch = overlay.pending_batch();

    // the user moved on while the batch was committing
    overlay.stage_put(key("a"), val("new"));
    overlay.stage_put(key("b"), val("revived"));

    overlay.retire(&batch);
    assert_eq!(overlay.lookup(b"a"), Lookup::Hit(val("new")));
    assert_eq!(overlay.lookup(b"b"), Lookup::Hit(val("revived")));
    assert_eq!(overlay.len(), 2);

    // the kept entries flush on the next round
    let next = overlay.pending_batch();
    overlay.retire(&next);
    assert!(overlay.is_empty());
  }

  #[test]
  fn test_retire_keeps_a_delete_staged_over_a_committed_put() {
    let mut overlay = Overlay::new();
    overlay.stage_put(key("a"), val("1"));
    let batch = overlay.pending_batch();

    overlay.stage_delete(key("a"));
    overlay.retire(&batch);

    assert_eq!(overlay.lookup(b"a"), Lookup::Tombstoned);
    assert_eq!(overlay.len(), 1);
  }

  #[test]
  fn test_failed_commit_leaves_everything_pending() {
    let mut overlay = Overlay::new();
    overlay.stage_put(key("a"), val("1"));
    overlay.stage_delete(key("b"));

    // commit failed: retire is never called
    let _batch = overlay.pending_batch();
    assert_eq!(overlay.len(), 2);
    assert_eq!(overlay.lookup(b"a"), Lookup::Hit(val("1")));
    assert_eq!(overlay.lookup(b"b"), Lookup::Tombstoned);
  }

  #[test]
  fn test_snapshot_is_isolated() {
    let mut overlay = Overlay::new();
    overlay.stage_put(key("a"), val("1"));
    overlay.stage_delete(key("x"));

    let snapshot = overlay.snapshot();
    overlay.stage_put(key("a"), val("2"));
    overlay.stage_put(key("b"), val("3"));

    assert_eq!(snapshot.buffer.get(&key("a")), Some(&val("1")));
    assert!(!snapshot.buffer.contains_key(&key("b")));
    assert!(snapshot.tombstones.contains(&key("x")));
  }

  #[test]
  fn test_snapshot_buffer_is_sorted() {
    let mut overlay = Overlay::new();
    overlay.stage_put(key("c"), val("3"));
    overlay.stage_put(key("a"), val("1"));
    overlay.stage_put(key("b"), val("2"));

    let snapshot = overlay.snapshot();
    let keys: Vec<Bytes> = snapshot.buffer.keys().cloned().collect();
    assert_eq!(keys, vec![key("a"), key("b"), key("c")]);
  }
}
