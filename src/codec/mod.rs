//! Deterministic encoding between logical keys/values and engine bytes.

pub mod key;
pub mod value;

pub use key::{decode_key, encode_key, Key, MAX_ENCODED_KEY_SIZE};
pub use value::{decode_value, encode_value, Dtype, NdArray, Value};
