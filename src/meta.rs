// src/meta.rs — заголовок хранилища (StorageHeader v2)
//
// Формат (LE), сразу после 16-байтной сигнатуры:
// u32 version          = 2
// u32 page_data_size
// u32 total_page_count
// u32 free_page_count
// u32 last_free_page_num (подсказка для сканирования, не источник истины)
// u64 bitmap_off
// u64 phys_table_off
// u64 hdr_table_off
// u64 owner_table_off
//
// Политика:
// - Все поля читаются/пишутся прямо в отображении (между процессами значения
//   не кэшируются).
// - Смещения таблиц при повторном открытии сверяются с пересчитанной раскладкой.

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::consts::{FORMAT_VERSION, SIGNATURE, SIGNATURE_SIZE, STORAGE_HEADER_SIZE};
use crate::error::StoreError;
use crate::layout::Layout;
use crate::region::Region;

// Смещения полей относительно начала заголовка.
const OFF_VERSION: u64 = 0;
const OFF_PAGE_DATA_SIZE: u64 = 4;
const OFF_TOTAL_PAGES: u64 = 8;
const OFF_FREE_PAGES: u64 = 12;
const OFF_LAST_FREE: u64 = 16;
const OFF_BITMAP: u64 = 20;
const OFF_PHYS_TABLE: u64 = 28;
const OFF_HDR_TABLE: u64 = 36;
const OFF_OWNER_TABLE: u64 = 44;

/// Снимок заголовка (копия значений из отображения).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StorageHeader {
    pub version: u32,
    pub page_data_size: u32,
    pub total_page_count: u32,
    pub free_page_count: u32,
    pub last_free_page_num: u32,
    pub bitmap_off: u64,
    pub phys_table_off: u64,
    pub hdr_table_off: u64,
    pub owner_table_off: u64,
}

impl StorageHeader {
    pub fn new_for(layout: &Layout) -> Self {
        Self {
            version: FORMAT_VERSION,
            page_data_size: layout.page_data_size,
            total_page_count: layout.page_count,
            free_page_count: layout.page_count,
            last_free_page_num: 0,
            bitmap_off: layout.bitmap_off,
            phys_table_off: layout.phys_table_off,
            hdr_table_off: layout.hdr_table_off,
            owner_table_off: layout.owner_table_off,
        }
    }

    pub fn allocated_pages(&self) -> u32 {
        self.total_page_count.saturating_sub(self.free_page_count)
    }
}

pub fn has_signature(region: &Region) -> Result<bool> {
    Ok(region.slice(0, SIGNATURE_SIZE)? == SIGNATURE)
}

pub fn write_signature(region: &mut Region) -> Result<()> {
    region.write_bytes(0, &SIGNATURE)
}

/// Прочитать заголовок целиком (базовое смещение = SIGNATURE_SIZE).
pub fn read_header(region: &Region) -> Result<StorageHeader> {
    let b = SIGNATURE_SIZE as u64;
    Ok(StorageHeader {
        version: region.read_u32(b + OFF_VERSION)?,
        page_data_size: region.read_u32(b + OFF_PAGE_DATA_SIZE)?,
        total_page_count: region.read_u32(b + OFF_TOTAL_PAGES)?,
        free_page_count: region.read_u32(b + OFF_FREE_PAGES)?,
        last_free_page_num: region.read_u32(b + OFF_LAST_FREE)?,
        bitmap_off: region.read_u64(b + OFF_BITMAP)?,
        phys_table_off: region.read_u64(b + OFF_PHYS_TABLE)?,
        hdr_table_off: region.read_u64(b + OFF_HDR_TABLE)?,
        owner_table_off: region.read_u64(b + OFF_OWNER_TABLE)?,
    })
}

pub fn write_header(region: &mut Region, h: &StorageHeader) -> Result<()> {
    let b = SIGNATURE_SIZE as u64;
    region.write_u32(b + OFF_VERSION, h.version)?;
    region.write_u32(b + OFF_PAGE_DATA_SIZE, h.page_data_size)?;
    region.write_u32(b + OFF_TOTAL_PAGES, h.total_page_count)?;
    region.write_u32(b + OFF_FREE_PAGES, h.free_page_count)?;
    region.write_u32(b + OFF_LAST_FREE, h.last_free_page_num)?;
    region.write_u64(b + OFF_BITMAP, h.bitmap_off)?;
    region.write_u64(b + OFF_PHYS_TABLE, h.phys_table_off)?;
    region.write_u64(b + OFF_HDR_TABLE, h.hdr_table_off)?;
    region.write_u64(b + OFF_OWNER_TABLE, h.owner_table_off)?;
    Ok(())
}

/// Прочитать заголовок из файла без отображения (CLI, open_existing).
pub fn read_header_file(path: &Path) -> Result<StorageHeader> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut buf = [0u8; SIGNATURE_SIZE + STORAGE_HEADER_SIZE];
    f.read_exact(&mut buf).map_err(|_| {
        anyhow::Error::from(StoreError::Format(format!(
            "{} is too small for a storage header",
            path.display()
        )))
    })?;
    if buf[..SIGNATURE_SIZE] != SIGNATURE {
        return Err(StoreError::Format(format!("bad signature in {}", path.display())).into());
    }
    let b = &buf[SIGNATURE_SIZE..];
    let u32_at = |off: u64| LittleEndian::read_u32(&b[off as usize..off as usize + 4]);
    let u64_at = |off: u64| LittleEndian::read_u64(&b[off as usize..off as usize + 8]);
    Ok(StorageHeader {
        version: u32_at(OFF_VERSION),
        page_data_size: u32_at(OFF_PAGE_DATA_SIZE),
        total_page_count: u32_at(OFF_TOTAL_PAGES),
        free_page_count: u32_at(OFF_FREE_PAGES),
        last_free_page_num: u32_at(OFF_LAST_FREE),
        bitmap_off: u64_at(OFF_BITMAP),
        phys_table_off: u64_at(OFF_PHYS_TABLE),
        hdr_table_off: u64_at(OFF_HDR_TABLE),
        owner_table_off: u64_at(OFF_OWNER_TABLE),
    })
}

// ---- Точечные аксессоры горячих полей (аллокатор) ----

pub fn free_page_count(region: &Region) -> Result<u32> {
    region.read_u32(SIGNATURE_SIZE as u64 + OFF_FREE_PAGES)
}

pub fn set_free_page_count(region: &mut Region, v: u32) -> Result<()> {
    region.write_u32(SIGNATURE_SIZE as u64 + OFF_FREE_PAGES, v)
}

pub fn last_free_page_num(region: &Region) -> Result<u32> {
    region.read_u32(SIGNATURE_SIZE as u64 + OFF_LAST_FREE)
}

pub fn set_last_free_page_num(region: &mut Region, v: u32) -> Result<()> {
    region.write_u32(SIGNATURE_SIZE as u64 + OFF_LAST_FREE, v)
}

/// Сверить заголовок существующего хранилища с ожидаемой раскладкой.
pub fn validate_header(h: &StorageHeader, page_data_size: u32) -> Result<Layout> {
    if h.version != FORMAT_VERSION {
        return Err(StoreError::Format(format!(
            "unsupported version {} (expected {})",
            h.version, FORMAT_VERSION
        ))
        .into());
    }
    if h.page_data_size != page_data_size {
        return Err(StoreError::Format(format!(
            "page_data_size {} differs from configured {}",
            h.page_data_size, page_data_size
        ))
        .into());
    }
    if h.total_page_count == 0 {
        return Err(StoreError::Format("total_page_count is 0".into()).into());
    }
    if h.free_page_count > h.total_page_count {
        return Err(StoreError::Corruption(format!(
            "free_page_count {} > total_page_count {}",
            h.free_page_count, h.total_page_count
        ))
        .into());
    }
    let layout = Layout::new(h.total_page_count, h.page_data_size);
    if h.bitmap_off != layout.bitmap_off
        || h.phys_table_off != layout.phys_table_off
        || h.hdr_table_off != layout.hdr_table_off
        || h.owner_table_off != layout.owner_table_off
    {
        return Err(StoreError::Format(format!(
            "table offsets ({}, {}, {}, {}) do not match layout ({}, {}, {}, {})",
            h.bitmap_off,
            h.phys_table_off,
            h.hdr_table_off,
            h.owner_table_off,
            layout.bitmap_off,
            layout.phys_table_off,
            layout.hdr_table_off,
            layout.owner_table_off
        ))
        .into());
    }
    Ok(layout)
}
