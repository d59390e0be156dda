//! alloc — стратегии выделения страниц поверх общего free-bitmap.
//!
//! Подмодули:
//! - bitmap.rs  — основной аллокатор: линейный скан bitmap от курсора
//!   `last_free_page_num`, откат при нехватке места.
//! - segment.rs — buddy-вариант: блоки 2^k страниц, слияние «бадди» неявное
//!   (разбиение пересчитывается из bitmap на каждом вызове).
//!
//! Обе стратегии работают только через `PageSpace` (bitmap + поля заголовка в
//! отображении) и сами по себе состояния не держат, поэтому безопасны при
//! совместном использовании файла несколькими процессами. Вызовы выполняются
//! под allocation lock (см. pager/alloc.rs).

use anyhow::Result;
use std::fmt;
use std::str::FromStr;

use crate::consts::{OWNER_ENTRY_SIZE, PAGE_ALLOCATED, PAGE_FREE};
use crate::error::StoreError;
use crate::handle::{DataHandle, Segment};
use crate::layout::Layout;
use crate::meta;
use crate::page::{self, PageHeader};
use crate::region::Region;
use crate::tag::IdentityTag;

pub mod bitmap;
pub mod segment;

pub use bitmap::BitmapAllocator;
pub use segment::SegmentAllocator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum AllocatorKind {
    Bitmap,
    Segment,
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocatorKind::Bitmap => write!(f, "bitmap"),
            AllocatorKind::Segment => write!(f, "segment"),
        }
    }
}

impl FromStr for AllocatorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bitmap" => Ok(AllocatorKind::Bitmap),
            "segment" | "buddy" => Ok(AllocatorKind::Segment),
            other => Err(anyhow::anyhow!("unknown allocator '{}'", other)),
        }
    }
}

/// Результат выделения: упорядоченные номера страниц (+ блок для buddy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub pages: Vec<u32>,
    pub segment: Option<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AllocatorStats {
    pub kind: AllocatorKind,
    pub total_pages: u32,
    pub free_pages: u32,
    pub last_free_page_num: u32,
    pub largest_free_run: u32,
    /// Только для segment: число свободных buddy-блоков по порядку (индекс = order).
    pub free_blocks_by_order: Vec<u32>,
}

pub trait PageAllocator: Send + Sync {
    fn kind(&self) -> AllocatorKind;

    /// Выделить `pages` страниц. При неудаче bitmap остаётся нетронутым.
    fn allocate(&self, space: &mut PageSpace<'_>, pages: u32) -> Result<Allocation>;

    /// Вернуть страницы handle в bitmap и инвалидировать его.
    fn free(&self, space: &mut PageSpace<'_>, handle: &mut DataHandle) -> Result<()> {
        release_pages(space, handle)
    }

    fn describe(&self, space: &PageSpace<'_>) -> Result<AllocatorStats>;
}

pub fn allocator_for(kind: AllocatorKind, scan_wrap: bool) -> Box<dyn PageAllocator> {
    match kind {
        AllocatorKind::Bitmap => Box::new(BitmapAllocator::new(scan_wrap)),
        AllocatorKind::Segment => Box::new(SegmentAllocator),
    }
}

/// Количество страниц под `size` байт (минимум одна).
pub fn pages_for(size: usize, page_data_size: u32) -> Result<u32> {
    let ps = page_data_size as usize;
    let pages = size.div_ceil(ps).max(1);
    u32::try_from(pages).map_err(|_| {
        anyhow::Error::from(StoreError::OutOfCapacity {
            requested: u32::MAX,
            free: 0,
        })
    })
}

// ---------------- PageSpace ----------------

/// Вид на структуры аллокатора внутри отображения: bitmap, счётчик свободных
/// страниц, курсор и канонические заголовки страниц.
pub struct PageSpace<'a> {
    region: &'a mut Region,
    layout: &'a Layout,
}

impl<'a> PageSpace<'a> {
    pub fn new(region: &'a mut Region, layout: &'a Layout) -> Self {
        Self { region, layout }
    }

    pub fn layout(&self) -> &Layout {
        self.layout
    }

    pub fn page_count(&self) -> u32 {
        self.layout.page_count
    }

    pub fn is_free(&self, page: u32) -> Result<bool> {
        is_page_free(self.region, self.layout, page)
    }

    pub fn mark(&mut self, page: u32, allocated: bool) -> Result<()> {
        page::check_page(self.layout, page)?;
        let v = if allocated { PAGE_ALLOCATED } else { PAGE_FREE };
        self.region.write_u8(self.layout.bitmap_entry(page), v)
    }

    pub fn free_count(&self) -> Result<u32> {
        meta::free_page_count(self.region)
    }

    pub fn set_free_count(&mut self, v: u32) -> Result<()> {
        meta::set_free_page_count(self.region, v)
    }

    pub fn cursor(&self) -> Result<u32> {
        meta::last_free_page_num(self.region)
    }

    pub fn set_cursor(&mut self, v: u32) -> Result<()> {
        meta::set_last_free_page_num(self.region, v)
    }

    pub fn owner(&self, page: u32) -> Result<Option<IdentityTag>> {
        page_owner(self.region, self.layout, page)
    }

    /// Записать (или стереть при `None`) метку владельца страницы.
    pub fn set_owner(&mut self, page: u32, owner: Option<IdentityTag>) -> Result<()> {
        page::check_page(self.layout, page)?;
        let off = self.layout.owner_entry(page);
        match owner {
            Some(t) => {
                self.region.write_u64(off, t.ticks())?;
                self.region.write_u32(off + 8, t.seq())
            }
            None => self.region.fill(off, OWNER_ENTRY_SIZE, 0),
        }
    }

    /// Сбросить канонический заголовок страницы (пустая метка, data_size = 0).
    pub fn clear_page(&mut self, page: u32) -> Result<()> {
        let offs = page::canonical_offsets(self.region, self.layout, page)?;
        page::write_page_header(self.region, offs.header, &PageHeader::BLANK)
    }

    /// Длина максимального непрерывного свободного участка.
    pub fn largest_free_run(&self) -> Result<u32> {
        let mut best = 0u32;
        let mut run = 0u32;
        for p in 0..self.page_count() {
            if self.is_free(p)? {
                run += 1;
                best = best.max(run);
            } else {
                run = 0;
            }
        }
        Ok(best)
    }

    /// Завершить успешное выделение: счётчик, курсор, заголовки.
    fn commit_allocation(&mut self, pages: &[u32]) -> Result<()> {
        let free = self.free_count()?;
        let n = pages.len() as u32;
        if n > free {
            return Err(StoreError::Corruption(format!(
                "allocated {} page(s) but header counts only {} free",
                n, free
            ))
            .into());
        }
        self.set_free_count(free - n)?;
        if let Some(&max) = pages.iter().max() {
            self.set_cursor(max)?;
        }
        for &p in pages {
            self.clear_page(p)?;
        }
        Ok(())
    }

    /// Откатить отметки, сделанные в рамках неудачного выделения.
    fn rollback(&mut self, pages: &[u32]) -> Result<()> {
        for &p in pages {
            self.mark(p, false)?;
        }
        Ok(())
    }
}

pub fn is_page_free(region: &Region, layout: &Layout, page: u32) -> Result<bool> {
    page::check_page(layout, page)?;
    match region.read_u8(layout.bitmap_entry(page))? {
        PAGE_FREE => Ok(true),
        PAGE_ALLOCATED => Ok(false),
        other => Err(StoreError::Corruption(format!(
            "bitmap entry for page {} holds {:#04x}",
            page, other
        ))
        .into()),
    }
}

pub fn page_owner(region: &Region, layout: &Layout, page: u32) -> Result<Option<IdentityTag>> {
    page::check_page(layout, page)?;
    let off = layout.owner_entry(page);
    let ticks = region.read_u64(off)?;
    let seq = region.read_u32(off + 8)?;
    if ticks == 0 && seq == 0 {
        return Ok(None);
    }
    Ok(Some(IdentityTag::from_parts(ticks, seq)))
}

/// Все страницы handle заняты и выданы именно этому выделению.
pub fn owns_pages(region: &Region, layout: &Layout, handle: &DataHandle) -> Result<bool> {
    for &p in handle.pages() {
        if is_page_free(region, layout, p)? {
            return Ok(false);
        }
        if page_owner(region, layout, p)? != Some(handle.allocation_tag()) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Общий путь освобождения для обеих стратегий.
pub fn release_pages(space: &mut PageSpace<'_>, handle: &mut DataHandle) -> Result<()> {
    if !handle.is_valid() {
        return Err(StoreError::HandleAlreadyFreed.into());
    }
    let pages = handle.pages();
    // Сначала проверяем все страницы, потом меняем bitmap.
    for &p in pages {
        if space.is_free(p)? || space.owner(p)? != Some(handle.allocation_tag()) {
            return Err(StoreError::HandleAlreadyFreed.into());
        }
    }
    let free = space.free_count()?;
    let allocated = space.page_count().saturating_sub(free);
    if pages.len() as u64 > allocated as u64 {
        return Err(StoreError::Corruption(format!(
            "handle claims {} page(s) but only {} are allocated",
            pages.len(),
            allocated
        ))
        .into());
    }
    for &p in pages {
        space.mark(p, false)?;
        space.set_owner(p, None)?;
    }
    space.set_free_count(free + pages.len() as u32)?;
    if let Some(&min) = pages.iter().min() {
        space.set_cursor(min)?;
    }
    handle.invalidate();
    Ok(())
}
