//! The per-directory metadata header.
//!
//! A 16-byte file next to the engine data recording magic, codec version,
//! engine kind and creation time. It is read before the engine opens so an
//! incompatible directory is refused instead of corrupted.

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use log::error;

use crate::errors::{Errors, Result};
use crate::option::EngineType;

pub(crate) const CODEC_VERSION: u8 = 1;

const META_FILE_NAME: &str = "flaxkv.meta";
const MAGIC: &[u8; 6] = b"FLAXKV";
const META_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DbMeta {
  pub engine_type: EngineType,
  pub codec_version: u8,
  pub created_at: u64,
}

/// Reads and validates the header, or writes a fresh one when the directory
/// is new or being rebuilt.
pub(crate) fn load_or_init(dir_path: &Path, engine_type: EngineType, rebuild: bool) -> Result<DbMeta> {
  let path = dir_path.join(META_FILE_NAME);
  if rebuild || !path.is_file() {
    let meta = DbMeta {
      engine_type,
      codec_version: CODEC_VERSION,
      created_at: unix_now(),
    };
    write_meta(&path, &meta)?;
    return Ok(meta);
  }

  let meta = read_meta(&path)?;
  if meta.codec_version != CODEC_VERSION {
    return Err(Errors::Incompatible(format!(
      "codec version {} on disk, this build supports {}",
      meta.codec_version, CODEC_VERSION
    )));
  }
  if meta.engine_type != engine_type {
    return Err(Errors::Incompatible(format!(
      "directory was created with the {:?} engine, not {:?}",
      meta.engine_type, engine_type
    )));
  }
  Ok(meta)
}

fn write_meta(path: &Path, meta: &DbMeta) -> Result<()> {
  let mut raw = Vec::with_capacity(META_LEN);
  raw.extend_from_slice(MAGIC);
  raw.push(meta.codec_version);
  raw.push(engine_tag(meta.engine_type));
  raw.extend_from_slice(&meta.created_at.to_be_bytes());
  fs::write(path, raw).map_err(|e| {
    error!("failed to write metadata header: {e}");
    Errors::Engine(e.to_string())
  })
}

fn read_meta(path: &Path) -> Result<DbMeta> {
  let raw = fs::read(path).map_err(|e| {
    error!("failed to read metadata header: {e}");
    Errors::Engine(e.to_string())
  })?;
  if raw.len() != META_LEN || &raw[..MAGIC.len()] != MAGIC {
    return Err(Errors::Incompatible(
      "metadata header is malformed".to_string(),
    ));
  }
  let codec_version = raw[6];
  let engine_type = engine_from_tag(raw[7])
    .ok_or_else(|| Errors::Incompatible(format!("unknown engine tag {}", raw[7])))?;
  let created_at = u64::from_be_bytes(raw[8..16].try_into().unwrap());
  Ok(DbMeta {
    engine_type,
    codec_version,
    created_at,
  })
}

fn engine_tag(engine_type: EngineType) -> u8 {
  match engine_type {
    EngineType::MmapBtree => 1,
    EngineType::Lsm => 2,
  }
}

fn engine_from_tag(tag: u8) -> Option<EngineType> {
  match tag {
    1 => Some(EngineType::MmapBtree),
    2 => Some(EngineType::Lsm),
    _ => None,
  }
}

fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}
