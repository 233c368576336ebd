//! Canonical byte encoding for logical keys.
//!
//! Every key encodes to a self-delimiting byte string: a tag byte followed by
//! a canonical payload. Two keys encode to the same bytes if and only if they
//! are logically equal, and the tag keeps distinct types apart (the integer
//! `1`, the float `1.0` and the text `"1"` are three different keys).

use bytes::{Buf, BufMut, Bytes};

use crate::errors::{Errors, Result};

/// Hard cap on the encoded key length (LMDB-class engines reject keys around
/// this size).
pub const MAX_ENCODED_KEY_SIZE: usize = 511;

const TAG_INT: u8 = b'I';
const TAG_FLOAT: u8 = b'F';
const TAG_BOOL: u8 = b'B';
const TAG_STR: u8 = b'S';
const TAG_BYTES: u8 = b'Y';
const TAG_GROUP: u8 = b'T';

/// A logical key. Integers are normalized to `i64` before encoding, so
/// `1u8`, `1i32` and `1i64` are the same key.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
  Int(i64),
  Float(f64),
  Bool(bool),
  Str(String),
  Bytes(Vec<u8>),
  Group(Vec<Key>),
}

impl From<i64> for Key {
  fn from(v: i64) -> Self {
    Key::Int(v)
  }
}

impl From<i32> for Key {
  fn from(v: i32) -> Self {
    Key::Int(v as i64)
  }
}

impl From<u32> for Key {
  fn from(v: u32) -> Self {
    Key::Int(v as i64)
  }
}

impl From<f64> for Key {
  fn from(v: f64) -> Self {
    Key::Float(v)
  }
}

impl From<bool> for Key {
  fn from(v: bool) -> Self {
    Key::Bool(v)
  }
}

impl From<&str> for Key {
  fn from(v: &str) -> Self {
    Key::Str(v.to_string())
  }
}

impl From<String> for Key {
  fn from(v: String) -> Self {
    Key::Str(v)
  }
}

impl From<Vec<u8>> for Key {
  fn from(v: Vec<u8>) -> Self {
    Key::Bytes(v)
  }
}

impl From<&[u8]> for Key {
  fn from(v: &[u8]) -> Self {
    Key::Bytes(v.to_vec())
  }
}

impl From<Vec<Key>> for Key {
  fn from(v: Vec<Key>) -> Self {
    Key::Group(v)
  }
}

/// Encodes a key into its canonical byte form.
pub fn encode_key(key: &Key) -> Result<Bytes> {
  let mut buf = Vec::with_capacity(16);
  write_key(key, &mut buf)?;
  if buf.len() > MAX_ENCODED_KEY_SIZE {
    return Err(Errors::Encoding(format!(
      "encoded key is {} bytes, limit is {}",
      buf.len(),
      MAX_ENCODED_KEY_SIZE
    )));
  }
  Ok(Bytes::from(buf))
}

/// Decodes a canonical byte form back into a key.
pub fn decode_key(data: &[u8]) -> Result<Key> {
  let mut buf = data;
  let key = read_key(&mut buf)?;
  if !buf.is_empty() {
    return Err(Errors::Encoding("trailing bytes after key".to_string()));
  }
  Ok(key)
}

fn write_key(key: &Key, buf: &mut Vec<u8>) -> Result<()> {
  match key {
    Key::Int(v) => {
      buf.put_u8(TAG_INT);
      let width = int_width(*v);
      buf.put_u8(width);
      let be = v.to_be_bytes();
      buf.extend_from_slice(&be[8 - width as usize..]);
    }
    Key::Float(v) => {
      if v.is_nan() {
        return Err(Errors::Encoding("NaN is not a valid key".to_string()));
      }
      // -0.0 == 0.0, so both must encode to the same bytes
      let v = if *v == 0.0 { 0.0 } else { *v };
      buf.put_u8(TAG_FLOAT);
      buf.put_f64(v);
    }
    Key::Bool(v) => {
      buf.put_u8(TAG_BOOL);
      buf.put_u8(*v as u8);
    }
    Key::Str(s) => {
      buf.put_u8(TAG_STR);
      put_len(buf, s.len())?;
      buf.extend_from_slice(s.as_bytes());
    }
    Key::Bytes(b) => {
      buf.put_u8(TAG_BYTES);
      put_len(buf, b.len())?;
      buf.extend_from_slice(b);
    }
    Key::Group(items) => {
      buf.put_u8(TAG_GROUP);
      put_len(buf, items.len())?;
      for item in items {
        write_key(item, buf)?;
      }
    }
  }
  Ok(())
}

fn read_key(buf: &mut &[u8]) -> Result<Key> {
  need(buf, 1)?;
  let tag = buf.get_u8();
  match tag {
    TAG_INT => {
      need(buf, 1)?;
      let width = buf.get_u8() as usize;
      if !matches!(width, 1 | 2 | 4 | 8) {
        return Err(Errors::Encoding(format!("invalid integer width {width}")));
      }
      need(buf, width)?;
      let negative = buf.chunk()[0] & 0x80 != 0;
      let mut be = if negative { [0xff; 8] } else { [0; 8] };
      buf.copy_to_slice(&mut be[8 - width..]);
      Ok(Key::Int(i64::from_be_bytes(be)))
    }
    TAG_FLOAT => {
      need(buf, 8)?;
      Ok(Key::Float(buf.get_f64()))
    }
    TAG_BOOL => {
      need(buf, 1)?;
      Ok(Key::Bool(buf.get_u8() != 0))
    }
    TAG_STR => {
      let len = get_len(buf)?;
      need(buf, len)?;
      let mut raw = vec![0; len];
      buf.copy_to_slice(&mut raw);
      String::from_utf8(raw)
        .map(Key::Str)
        .map_err(|_| Errors::Encoding("key is not valid UTF-8".to_string()))
    }
    TAG_BYTES => {
      let len = get_len(buf)?;
      need(buf, len)?;
      let mut raw = vec![0; len];
      buf.copy_to_slice(&mut raw);
      Ok(Key::Bytes(raw))
    }
    TAG_GROUP => {
      let count = get_len(buf)?;
      let mut items = Vec::with_capacity(count);
      for _ in 0..count {
        items.push(read_key(buf)?);
      }
      Ok(Key::Group(items))
    }
    other => Err(Errors::Encoding(format!("unknown key tag {other:#04x}"))),
  }
}

fn int_width(v: i64) -> u8 {
  if v >= i8::MIN as i64 && v <= i8::MAX as i64 {
    1
  } else if v >= i16::MIN as i64 && v <= i16::MAX as i64 {
    2
  } else if v >= i32::MIN as i64 && v <= i32::MAX as i64 {
    4
  } else {
    8
  }
}

fn put_len(buf: &mut Vec<u8>, len: usize) -> Result<()> {
  let len = u16::try_from(len)
    .map_err(|_| Errors::Encoding(format!("length {len} does not fit in a key")))?;
  buf.put_u16(len);
  Ok(())
}

fn get_len(buf: &mut &[u8]) -> Result<usize> {
  need(buf, 2)?;
  Ok(buf.get_u16() as usize)
}

fn need(buf: &&[u8], len: usize) -> Result<()> {
  if buf.remaining() < len {
    return Err(Errors::Encoding("truncated key".to_string()));
  }
  Ok(())
}
