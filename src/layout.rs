//! layout — чистая математика раскладки файла хранилища.
//!
//! Формат (все целые LE, без выравнивания):
//! [signature 16B][storage header][free bitmap: N x u8]
//! [phys offset table: N x u64][header offset table: N x u64]
//! [owner table: N x 12B]
//! [Set A: N page headers][Set A: N x page_data_size]
//! [Set B: N page headers][Set B: N x page_data_size]
//!
//! Раскладка — функция только от (page_count, page_data_size), поэтому
//! при повторном открытии пересчитывается идентично.

use anyhow::{anyhow, Result};

use crate::consts::{
    BITMAP_ENTRY_SIZE, OFFSET_ENTRY_SIZE, OWNER_ENTRY_SIZE, PAGE_HEADER_SIZE, SIGNATURE_SIZE,
    STORAGE_HEADER_SIZE,
};

/// Одна из двух физических копий страниц.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PageSet {
    A,
    B,
}

impl PageSet {
    pub fn other(self) -> PageSet {
        match self {
            PageSet::A => PageSet::B,
            PageSet::B => PageSet::A,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub page_count: u32,
    pub page_data_size: u32,
    pub header_off: u64,
    pub bitmap_off: u64,
    pub phys_table_off: u64,
    pub hdr_table_off: u64,
    pub owner_table_off: u64,
    pub set_a_headers_off: u64,
    pub set_a_data_off: u64,
    pub set_b_headers_off: u64,
    pub set_b_data_off: u64,
    pub total_size: u64,
}

impl Layout {
    /// Раскладка для ёмкости `capacity` байт: page_count = capacity / page_data_size.
    pub fn for_capacity(capacity: u64, page_data_size: u32) -> Result<Self> {
        if page_data_size == 0 {
            return Err(anyhow!("page_data_size must be > 0"));
        }
        let pages = capacity / page_data_size as u64;
        if pages == 0 {
            return Err(anyhow!(
                "capacity {} is smaller than one page of {} bytes",
                capacity,
                page_data_size
            ));
        }
        let page_count = u32::try_from(pages)
            .map_err(|_| anyhow!("capacity {} yields too many pages ({})", capacity, pages))?;
        Ok(Self::new(page_count, page_data_size))
    }

    pub fn new(page_count: u32, page_data_size: u32) -> Self {
        let n = page_count as u64;
        let ps = page_data_size as u64;

        let header_off = SIGNATURE_SIZE as u64;
        let bitmap_off = header_off + STORAGE_HEADER_SIZE as u64;
        let phys_table_off = bitmap_off + BITMAP_ENTRY_SIZE as u64 * n;
        let hdr_table_off = phys_table_off + OFFSET_ENTRY_SIZE as u64 * n;

        let headers_len = PAGE_HEADER_SIZE as u64 * n;
        let data_len = ps * n;

        let owner_table_off = hdr_table_off + OFFSET_ENTRY_SIZE as u64 * n;
        let set_a_headers_off = owner_table_off + OWNER_ENTRY_SIZE as u64 * n;
        let set_a_data_off = set_a_headers_off + headers_len;
        let set_b_headers_off = set_a_data_off + data_len;
        let set_b_data_off = set_b_headers_off + headers_len;
        let total_size = set_b_data_off + data_len;

        Self {
            page_count,
            page_data_size,
            header_off,
            bitmap_off,
            phys_table_off,
            hdr_table_off,
            owner_table_off,
            set_a_headers_off,
            set_a_data_off,
            set_b_headers_off,
            set_b_data_off,
            total_size,
        }
    }

    /// Полезная ёмкость данных (одна копия).
    pub fn data_capacity(&self) -> u64 {
        self.page_count as u64 * self.page_data_size as u64
    }

    /// Граница между Set A и Set B: всё, что >= неё, принадлежит Set B.
    #[inline]
    pub fn set_boundary(&self) -> u64 {
        self.set_b_headers_off
    }

    #[inline]
    pub fn bitmap_entry(&self, page: u32) -> u64 {
        self.bitmap_off + page as u64 * BITMAP_ENTRY_SIZE as u64
    }

    #[inline]
    pub fn phys_entry(&self, page: u32) -> u64 {
        self.phys_table_off + page as u64 * OFFSET_ENTRY_SIZE as u64
    }

    #[inline]
    pub fn hdr_entry(&self, page: u32) -> u64 {
        self.hdr_table_off + page as u64 * OFFSET_ENTRY_SIZE as u64
    }

    /// Запись таблицы владельцев: метка handle, которому выдана страница.
    #[inline]
    pub fn owner_entry(&self, page: u32) -> u64 {
        self.owner_table_off + page as u64 * OWNER_ENTRY_SIZE as u64
    }

    /// Смещение заголовка страницы `page` в наборе `set`.
    #[inline]
    pub fn page_header_off(&self, set: PageSet, page: u32) -> u64 {
        let base = match set {
            PageSet::A => self.set_a_headers_off,
            PageSet::B => self.set_b_headers_off,
        };
        base + page as u64 * PAGE_HEADER_SIZE as u64
    }

    /// Смещение данных страницы `page` в наборе `set`.
    #[inline]
    pub fn page_data_off(&self, set: PageSet, page: u32) -> u64 {
        let base = match set {
            PageSet::A => self.set_a_data_off,
            PageSet::B => self.set_b_data_off,
        };
        base + page as u64 * self.page_data_size as u64
    }

    /// К какому набору относится физическое смещение.
    #[inline]
    pub fn set_of(&self, offset: u64) -> PageSet {
        if offset >= self.set_boundary() {
            PageSet::B
        } else {
            PageSet::A
        }
    }
}
