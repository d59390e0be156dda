//! page — заголовок страницы и пары физических смещений.
//!
//! Формат заголовка (PAGE_HEADER_SIZE = 44 B):
//!   [tag 40B: "ticks-counter" ASCII, нулевое дополнение][data_size u32 LE]
//!
//! Заголовков две копии на страницу (Set A / Set B), см. `layout`.

use anyhow::Result;

use crate::consts::{PAGE_HEADER_SIZE, TAG_SIZE};
use crate::error::StoreError;
use crate::layout::{Layout, PageSet};
use crate::region::Region;
use crate::tag::IdentityTag;

const OFF_TAG: u64 = 0;
const OFF_DATA_SIZE: u64 = TAG_SIZE as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub tag: Option<IdentityTag>,
    pub data_size: u32,
}

impl PageHeader {
    pub const BLANK: PageHeader = PageHeader {
        tag: None,
        data_size: 0,
    };
}

/// Физическое расположение одной копии страницы.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOffsets {
    pub header: u64,
    pub data: u64,
}

impl PageOffsets {
    pub fn in_set(layout: &Layout, set: PageSet, page: u32) -> Self {
        Self {
            header: layout.page_header_off(set, page),
            data: layout.page_data_off(set, page),
        }
    }
}

pub fn read_page_header(region: &Region, off: u64) -> Result<PageHeader> {
    let tag = IdentityTag::decode(region.slice(off + OFF_TAG, TAG_SIZE)?)?;
    let data_size = region.read_u32(off + OFF_DATA_SIZE)?;
    Ok(PageHeader { tag, data_size })
}

pub fn write_page_header(region: &mut Region, off: u64, h: &PageHeader) -> Result<()> {
    match h.tag {
        Some(t) => region.write_bytes(off + OFF_TAG, &t.encode())?,
        None => region.fill(off + OFF_TAG, TAG_SIZE, 0)?,
    }
    region.write_u32(off + OFF_DATA_SIZE, h.data_size)
}

/// Сырой tag-поле без разбора (для doctor/CLI).
pub fn raw_tag_field(region: &Region, off: u64) -> Result<&[u8]> {
    region.slice(off + OFF_TAG, TAG_SIZE)
}

/// Текущие (канонические) смещения страницы из таблиц смещений.
pub fn canonical_offsets(region: &Region, layout: &Layout, page: u32) -> Result<PageOffsets> {
    check_page(layout, page)?;
    Ok(PageOffsets {
        header: region.read_u64(layout.hdr_entry(page))?,
        data: region.read_u64(layout.phys_entry(page))?,
    })
}

pub fn set_canonical_offsets(
    region: &mut Region,
    layout: &Layout,
    page: u32,
    offs: PageOffsets,
) -> Result<()> {
    check_page(layout, page)?;
    region.write_u64(layout.hdr_entry(page), offs.header)?;
    region.write_u64(layout.phys_entry(page), offs.data)
}

/// Скопировать заголовок и данные страницы как есть.
pub fn copy_page(region: &mut Region, layout: &Layout, from: PageOffsets, to: PageOffsets) -> Result<()> {
    region.copy_within(from.header, to.header, PAGE_HEADER_SIZE)?;
    region.copy_within(from.data, to.data, layout.page_data_size as usize)
}

#[inline]
pub fn check_page(layout: &Layout, page: u32) -> Result<()> {
    if page >= layout.page_count {
        return Err(StoreError::InvalidHandle(format!(
            "page {} out of range (page_count={})",
            page, layout.page_count
        ))
        .into());
    }
    Ok(())
}
