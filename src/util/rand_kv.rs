use crate::codec::{Key, Value};

/// Deterministic test key for index `i`.
pub fn get_test_key(i: usize) -> Key {
  Key::Str(format!("flaxkv-key-{:09}", i))
}

/// Deterministic test value for index `i`.
pub fn get_test_value(i: usize) -> Value {
  Value::Str(format!("flaxkv-value-{:09}", i))
}
