#![allow(non_snake_case)]

// Формат файла
pub mod consts;
pub mod error;
pub mod layout;
pub mod meta;
pub mod page;   // src/page/mod.rs
pub mod tag;

// Отображение, блокировки, место на диске
pub mod region;
pub mod lock;
pub mod space;

// Аллокатор и handle
pub mod handle;
pub mod alloc;  // src/alloc/{mod,bitmap,segment}.rs

// Хранилище и транзакции
pub mod pager;  // src/pager/{mod,core,alloc,io,commit}.rs
pub mod tx;

pub mod config;
pub mod metrics;
pub mod doctor;

// Удобные реэкспорты
pub use alloc::{AllocatorKind, AllocatorStats, PageAllocator};
pub use config::{PagerBuilder, PagerConfig};
pub use doctor::CheckReport;
pub use error::StoreError;
pub use handle::{DataHandle, Segment};
pub use layout::{Layout, PageSet};
pub use lock::{LockGuard, LockMode, NamedLock};
pub use meta::StorageHeader;
pub use pager::{PageView, Pager, PagerStats};
pub use space::{FsSpaceProbe, SpaceProbe};
pub use tag::IdentityTag;
pub use tx::Transaction;
