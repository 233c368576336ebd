//! Byte encoding for values.
//!
//! Values are encoded as a msgpack tree. Dense numeric arrays ride in
//! extension type 1 as `[dtype-code, shape, raw little-endian buffer]` so a
//! million-element array costs one buffer copy, not a million tagged
//! elements.
//!
//! The model is deliberately closed: there is no set or tuple variant, so
//! collection values of that shape are expressed (and round-trip) as
//! [`Value::Seq`].

use bytes::Bytes;

use crate::errors::{Errors, Result};

const EXT_NDARRAY: i8 = 1;

/// A storable value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Int(i64),
  Float(f64),
  Bool(bool),
  Str(String),
  Bytes(Vec<u8>),
  Seq(Vec<Value>),
  Map(Vec<(Value, Value)>),
  Array(NdArray),
}

/// A dense n-dimensional numeric array: element type, shape and one raw
/// little-endian buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
  pub dtype: Dtype,
  pub shape: Vec<u64>,
  pub data: Vec<u8>,
}

impl NdArray {
  /// Builds an array, checking that the buffer length matches the shape.
  pub fn new(dtype: Dtype, shape: Vec<u64>, data: Vec<u8>) -> Result<Self> {
    let elements: u64 = shape.iter().product();
    let expected = elements as usize * dtype.item_size();
    if data.len() != expected {
      return Err(Errors::Encoding(format!(
        "array buffer is {} bytes, shape {:?} of {} needs {}",
        data.len(),
        shape,
        dtype.code(),
        expected
      )));
    }
    Ok(NdArray { dtype, shape, data })
  }
}

/// Array element types, named by their serialized codes (numpy-style
/// byte-order/kind/size strings).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
  Bool,
  I8,
  I16,
  I32,
  I64,
  U8,
  U16,
  U32,
  U64,
  F32,
  F64,
}

impl Dtype {
  pub fn code(&self) -> &'static str {
    match self {
      Dtype::Bool => "|b1",
      Dtype::I8 => "|i1",
      Dtype::I16 => "<i2",
      Dtype::I32 => "<i4",
      Dtype::I64 => "<i8",
      Dtype::U8 => "|u1",
      Dtype::U16 => "<u2",
      Dtype::U32 => "<u4",
      Dtype::U64 => "<u8",
      Dtype::F32 => "<f4",
      Dtype::F64 => "<f8",
    }
  }

  pub fn from_code(code: &str) -> Result<Self> {
    match code {
      "|b1" => Ok(Dtype::Bool),
      "|i1" => Ok(Dtype::I8),
      "<i2" => Ok(Dtype::I16),
      "<i4" => Ok(Dtype::I32),
      "<i8" => Ok(Dtype::I64),
      "|u1" => Ok(Dtype::U8),
      "<u2" => Ok(Dtype::U16),
      "<u4" => Ok(Dtype::U32),
      "<u8" => Ok(Dtype::U64),
      "<f4" => Ok(Dtype::F32),
      "<f8" => Ok(Dtype::F64),
      other => Err(Errors::Encoding(format!("unknown dtype code {other:?}"))),
    }
  }

  pub fn item_size(&self) -> usize {
    match self {
      Dtype::Bool | Dtype::I8 | Dtype::U8 => 1,
      Dtype::I16 | Dtype::U16 => 2,
      Dtype::I32 | Dtype::U32 | Dtype::F32 => 4,
      Dtype::I64 | Dtype::U64 | Dtype::F64 => 8,
    }
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self {
    Value::Int(v)
  }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self {
    Value::Int(v as i64)
  }
}

impl From<u32> for Value {
  fn from(v: u32) -> Self {
    Value::Int(v as i64)
  }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self {
    Value::Float(v)
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Value::Bool(v)
  }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self {
    Value::Str(v.to_string())
  }
}

impl From<String> for Value {
  fn from(v: String) -> Self {
    Value::Str(v)
  }
}

impl From<Vec<u8>> for Value {
  fn from(v: Vec<u8>) -> Self {
    Value::Bytes(v)
  }
}

impl From<&[u8]> for Value {
  fn from(v: &[u8]) -> Self {
    Value::Bytes(v.to_vec())
  }
}

impl From<Vec<Value>> for Value {
  fn from(v: Vec<Value>) -> Self {
    Value::Seq(v)
  }
}

impl From<NdArray> for Value {
  fn from(v: NdArray) -> Self {
    Value::Array(v)
  }
}

/// Encodes a value into its msgpack byte form.
pub fn encode_value(value: &Value) -> Result<Bytes> {
  let tree = to_msgpack(value)?;
  let mut buf = Vec::with_capacity(32);
  rmpv::encode::write_value(&mut buf, &tree).map_err(|e| Errors::Encoding(e.to_string()))?;
  Ok(Bytes::from(buf))
}

/// Decodes msgpack bytes back into a value.
pub fn decode_value(data: &[u8]) -> Result<Value> {
  let mut rd = data;
  let tree = rmpv::decode::read_value(&mut rd).map_err(|e| Errors::Encoding(e.to_string()))?;
  if !rd.is_empty() {
    return Err(Errors::Encoding("trailing bytes after value".to_string()));
  }
  from_msgpack(tree)
}

fn to_msgpack(value: &Value) -> Result<rmpv::Value> {
  Ok(match value {
    Value::Null => rmpv::Value::Nil,
    Value::Int(v) => rmpv::Value::from(*v),
    Value::Float(v) => rmpv::Value::F64(*v),
    Value::Bool(v) => rmpv::Value::Boolean(*v),
    Value::Str(s) => rmpv::Value::String(s.as_str().into()),
    Value::Bytes(b) => rmpv::Value::Binary(b.clone()),
    Value::Seq(items) => {
      let items: Vec<rmpv::Value> = items.iter().map(to_msgpack).collect::<Result<_>>()?;
      rmpv::Value::Array(items)
    }
    Value::Map(entries) => {
      let mut encoded = Vec::with_capacity(entries.len());
      for (k, v) in entries {
        encoded.push((to_msgpack(k)?, to_msgpack(v)?));
      }
      rmpv::Value::Map(encoded)
    }
    Value::Array(arr) => {
      let payload = rmpv::Value::Array(vec![
        rmpv::Value::String(arr.dtype.code().into()),
        rmpv::Value::Array(arr.shape.iter().map(|d| rmpv::Value::from(*d)).collect()),
        rmpv::Value::Binary(arr.data.clone()),
      ]);
      let mut raw = Vec::with_capacity(arr.data.len() + 32);
      rmpv::encode::write_value(&mut raw, &payload).map_err(|e| Errors::Encoding(e.to_string()))?;
      rmpv::Value::Ext(EXT_NDARRAY, raw)
    }
  })
}

fn from_msgpack(tree: rmpv::Value) -> Result<Value> {
  Ok(match tree {
    rmpv::Value::Nil => Value::Null,
    rmpv::Value::Boolean(b) => Value::Bool(b),
    rmpv::Value::Integer(n) => Value::Int(
      n.as_i64()
        .ok_or_else(|| Errors::Encoding("integer does not fit in i64".to_string()))?,
    ),
    rmpv::Value::F32(f) => Value::Float(f as f64),
    rmpv::Value::F64(f) => Value::Float(f),
    rmpv::Value::String(s) => Value::Str(
      s.into_str()
        .ok_or_else(|| Errors::Encoding("string is not valid UTF-8".to_string()))?,
    ),
    rmpv::Value::Binary(b) => Value::Bytes(b),
    rmpv::Value::Array(items) => {
      let items: Vec<Value> = items.into_iter().map(from_msgpack).collect::<Result<_>>()?;
      Value::Seq(items)
    }
    rmpv::Value::Map(entries) => {
      let mut decoded = Vec::with_capacity(entries.len());
      for (k, v) in entries {
        decoded.push((from_msgpack(k)?, from_msgpack(v)?));
      }
      Value::Map(decoded)
    }
    rmpv::Value::Ext(EXT_NDARRAY, raw) => decode_ndarray(&raw)?,
    rmpv::Value::Ext(tag, _) => {
      return Err(Errors::Encoding(format!("unknown extension type {tag}")))
    }
  })
}

fn decode_ndarray(raw: &[u8]) -> Result<Value> {
  let mut rd = raw;
  let payload = rmpv::decode::read_value(&mut rd).map_err(|e| Errors::Encoding(e.to_string()))?;
  let mut fields = match payload {
    rmpv::Value::Array(fields) if fields.len() == 3 => fields,
    _ => return Err(Errors::Encoding("malformed array extension".to_string())),
  };
  let data = match fields.pop() {
    Some(rmpv::Value::Binary(data)) => data,
    _ => return Err(Errors::Encoding("array extension has no buffer".to_string())),
  };
  let shape = match fields.pop() {
    Some(rmpv::Value::Array(dims)) => dims
      .into_iter()
      .map(|d| {
        d.as_u64()
          .ok_or_else(|| Errors::Encoding("invalid array dimension".to_string()))
      })
      .collect::<Result<Vec<u64>>>()?,
    _ => return Err(Errors::Encoding("array extension has no shape".to_string())),
  };
  let dtype = match fields.pop() {
    Some(rmpv::Value::String(code)) => Dtype::from_code(
      code
        .as_str()
        .ok_or_else(|| Errors::Encoding("invalid dtype code".to_string()))?,
    )?,
    _ => return Err(Errors::Encoding("array extension has no dtype".to_string())),
  };
  NdArray::new(dtype, shape, data).map(Value::Array)
}
