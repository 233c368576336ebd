use std::result;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Errors {
  #[error("key not found in database")]
  KeyNotFound,

  #[error("failed to encode or decode data: {0}")]
  Encoding(String),

  #[error("storage engine error: {0}")]
  Engine(String),

  #[error("store is closed")]
  Closed,

  #[error("flush wait deadline exceeded")]
  Timeout,

  #[error("write buffer is full and the flusher is stalled: {0}")]
  CapacityExceeded(String),

  #[error("database directory is incompatible: {0}")]
  Incompatible(String),

  #[error("invalid database options: {0}")]
  InvalidOptions(String),

  #[error("failed to create database directory")]
  FailedToCreateDatabaseDir,

  #[error("failed to remove database directory")]
  FailedToRemoveDatabaseDir,
}

pub type Result<T> = result::Result<T, Errors>;
