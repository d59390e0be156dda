//! Типизированные ошибки хранилища.
//!
//! Публичный API возвращает `anyhow::Result`, а конкретное условие лежит внутри
//! как `StoreError`. Вызывающий код различает их через
//! `err.downcast_ref::<StoreError>()`.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("out of capacity: requested {requested} page(s), {free} free")]
    OutOfCapacity { requested: u32, free: u32 },

    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("handle already freed")]
    HandleAlreadyFreed,

    #[error("payload of {len} bytes exceeds handle capacity of {capacity} bytes")]
    SizeMismatch { capacity: usize, len: usize },

    #[error("concurrency conflict on page {page}: expected tag {expected}, found {found}")]
    ConcurrencyConflict {
        page: u32,
        expected: String,
        found: String,
    },

    #[error("timed out after {timeout:?} acquiring lock '{name}'")]
    LockTimeout { name: String, timeout: Duration },

    #[error("insufficient storage space: need {required} bytes, {available} available")]
    InsufficientStorageSpace { required: u64, available: u64 },

    #[error("{0} is already closed")]
    AlreadyClosed(&'static str),

    #[error("storage corruption: {0}")]
    Corruption(String),

    #[error("storage format: {0}")]
    Format(String),
}

impl StoreError {
    /// Нарушение структурного инварианта (не ошибка вызывающего).
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Corruption(_))
    }

    /// Достать `StoreError` из `anyhow::Error`, если он там есть.
    pub fn of(err: &anyhow::Error) -> Option<&StoreError> {
        err.downcast_ref::<StoreError>()
    }
}
