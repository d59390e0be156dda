//! alloc/bitmap — основной аллокатор фиксированных страниц.
//!
//! Правила:
//! - Скан bitmap начинается с курсора `last_free_page_num` и идёт вперёд.
//! - По умолчанию до конца таблицы без заворота (как в исходном формате);
//!   `scan_wrap = true` продолжает с 0 до курсора.
//! - Если страниц не хватило — все отметки этого вызова откатываются,
//!   счётчик свободных страниц не меняется, ошибка OutOfCapacity.
//! - При успехе курсор = максимальный выделенный номер.

use anyhow::Result;
use log::debug;

use crate::error::StoreError;

use super::{Allocation, AllocatorKind, AllocatorStats, PageAllocator, PageSpace};

#[derive(Debug, Clone, Copy, Default)]
pub struct BitmapAllocator {
    scan_wrap: bool,
}

impl BitmapAllocator {
    pub fn new(scan_wrap: bool) -> Self {
        Self { scan_wrap }
    }

    pub fn scan_wrap(&self) -> bool {
        self.scan_wrap
    }

    fn claim_range(
        space: &mut PageSpace<'_>,
        from: u32,
        to: u32,
        need: usize,
        taken: &mut Vec<u32>,
    ) -> Result<()> {
        let mut p = from;
        while taken.len() < need && p < to {
            if space.is_free(p)? {
                space.mark(p, true)?;
                taken.push(p);
            }
            p += 1;
        }
        Ok(())
    }
}

impl PageAllocator for BitmapAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Bitmap
    }

    fn allocate(&self, space: &mut PageSpace<'_>, pages: u32) -> Result<Allocation> {
        let free = space.free_count()?;
        if pages > free {
            return Err(StoreError::OutOfCapacity {
                requested: pages,
                free,
            }
            .into());
        }

        let total = space.page_count();
        let start = space.cursor()?.min(total);
        let need = pages as usize;
        let mut taken: Vec<u32> = Vec::with_capacity(need);

        let mut claimed = Self::claim_range(space, start, total, need, &mut taken);
        if claimed.is_ok() && self.scan_wrap && taken.len() < need {
            claimed = Self::claim_range(space, 0, start, need, &mut taken);
        }

        if let Err(e) = claimed {
            space.rollback(&taken)?;
            return Err(e);
        }

        if taken.len() < need {
            debug!(
                "bitmap alloc: found {} of {} page(s) from cursor {} (wrap={}), rolling back",
                taken.len(),
                need,
                start,
                self.scan_wrap
            );
            space.rollback(&taken)?;
            return Err(StoreError::OutOfCapacity {
                requested: pages,
                free,
            }
            .into());
        }

        taken.sort_unstable();
        space.commit_allocation(&taken)?;
        Ok(Allocation {
            pages: taken,
            segment: None,
        })
    }

    fn describe(&self, space: &PageSpace<'_>) -> Result<AllocatorStats> {
        Ok(AllocatorStats {
            kind: AllocatorKind::Bitmap,
            total_pages: space.page_count(),
            free_pages: space.free_count()?,
            last_free_page_num: space.cursor()?,
            largest_free_run: space.largest_free_run()?,
            free_blocks_by_order: Vec::new(),
        })
    }
}
