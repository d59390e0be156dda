//! pager — хранилище поверх одного отображённого файла, модульная разбивка.
//!
//! Подмодули:
//! - core.rs   — структура Pager, open/create/reopen, close/flush, stats.
//! - alloc.rs  — allocate/free под allocation lock.
//! - io.rs     — get/get_in/set (чтение/запись байтов handle).
//! - commit.rs — new_transaction/delete/commit.

pub mod core;
pub mod alloc;
pub mod io;
pub mod commit;

pub use self::core::{Pager, PagerStats};
pub use self::io::PageView;
