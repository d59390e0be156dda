//! Общие константы формата хранилища (signature, header, page header, locks).

use std::time::Duration;

// -------- Signature --------
// GUID 7BC6F5FD-FC3F-4139-85B6-E8C88CA13F90 в mixed-endian порядке байт
// (первые три поля LE, хвост как есть).
pub const SIGNATURE: [u8; 16] = [
    0xFD, 0xF5, 0xC6, 0x7B, 0x3F, 0xFC, 0x39, 0x41, 0x85, 0xB6, 0xE8, 0xC8, 0x8C, 0xA1, 0x3F, 0x90,
];
pub const SIGNATURE_SIZE: usize = 16;

// -------- Storage header --------
pub const FORMAT_VERSION: u32 = 2;
// [version u32][page_data_size u32][total_pages u32][free_pages u32][last_free_page u32]
// [bitmap_off u64][phys_table_off u64][hdr_table_off u64][owner_table_off u64]
pub const STORAGE_HEADER_SIZE: usize = 5 * 4 + 4 * 8;

// -------- Tables --------
pub const BITMAP_ENTRY_SIZE: usize = 1;
pub const OFFSET_ENTRY_SIZE: usize = 8;
// метка выделения страницы: [ticks u64][seq u32]; нули — страница ничья
pub const OWNER_ENTRY_SIZE: usize = 12;

pub const PAGE_FREE: u8 = 0;
pub const PAGE_ALLOCATED: u8 = 1;

// -------- Page header --------
pub const TAG_SIZE: usize = 40;
// [tag 40B][data_size u32]
pub const PAGE_HEADER_SIZE: usize = TAG_SIZE + 4;

// -------- Defaults --------
/// Размер данных страницы по умолчанию (байт).
pub const DEFAULT_PAGE_DATA_SIZE: u32 = 8;
/// Ёмкость по умолчанию: 8 GiB.
pub const DEFAULT_CAPACITY: u64 = 8 * 1024 * 1024 * 1024;
/// Запас свободного места на диске при создании (x1.1 от размера файла).
pub const FREE_SPACE_MARGIN: f64 = 1.1;
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(60_000);

// -------- Named locks --------
pub const PAGE_CHANGE_LOCK_SUFFIX: &str = "changes.lock";
pub const TRANSACTION_LOCK_SUFFIX: &str = "tx.lock";

