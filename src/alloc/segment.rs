//! alloc/segment — buddy-вариант (степени двойки) поверх того же bitmap.
//!
//! - Запрос округляется до 2^k страниц.
//! - Свободное пространство раскладывается на максимальные выровненные
//!   свободные blocks (buddy decomposition); слияние соседей получается само,
//!   т.к. разбиение каждый раз строится заново из bitmap.
//! - Берётся наименьший подходящий блок (order >= k, при равенстве — младший
//!   адрес) и делится до первого бадди размера 2^k.
//! - Handle несёт Segment { order, index }, free проверяет, что его страницы
//!   ровно этот выровненный блок.

use anyhow::Result;
use log::debug;

use crate::error::StoreError;
use crate::handle::{DataHandle, Segment};

use super::{release_pages, Allocation, AllocatorKind, AllocatorStats, PageAllocator, PageSpace};

#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentAllocator;

/// Свободный выровненный блок: страницы [first, first + 2^order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    pub first: u32,
    pub order: u32,
}

/// Наименьший k такой, что 2^k >= pages; `None`, если 2^k не помещается в u32.
pub fn order_for(pages: u32) -> Option<u32> {
    pages.max(1).checked_next_power_of_two().map(|n| n.trailing_zeros())
}

/// Разложить свободные страницы на максимальные выровненные buddy-блоки.
pub fn free_blocks(space: &PageSpace<'_>) -> Result<Vec<FreeBlock>> {
    let total = space.page_count();
    let mut out = Vec::new();
    if total == 0 {
        return Ok(out);
    }
    let top = 31 - total.leading_zeros(); // floor(log2(total))
    let top_size = 1u64 << top;
    let roots = (total as u64).div_ceil(top_size);
    for i in 0..roots {
        decompose(space, (i * top_size) as u32, top, &mut out)?;
    }
    Ok(out)
}

fn decompose(space: &PageSpace<'_>, first: u32, order: u32, out: &mut Vec<FreeBlock>) -> Result<()> {
    let total = space.page_count() as u64;
    let start = first as u64;
    if start >= total {
        return Ok(());
    }
    let end = start + (1u64 << order);
    if end <= total && range_free(space, first, end as u32)? {
        out.push(FreeBlock { first, order });
        return Ok(());
    }
    if order == 0 {
        return Ok(());
    }
    let half = 1u32 << (order - 1);
    decompose(space, first, order - 1, out)?;
    decompose(space, first + half, order - 1, out)
}

fn range_free(space: &PageSpace<'_>, from: u32, to: u32) -> Result<bool> {
    for p in from..to {
        if !space.is_free(p)? {
            return Ok(false);
        }
    }
    Ok(true)
}

impl PageAllocator for SegmentAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Segment
    }

    fn allocate(&self, space: &mut PageSpace<'_>, pages: u32) -> Result<Allocation> {
        let free = space.free_count()?;
        let order = order_for(pages).ok_or(StoreError::OutOfCapacity {
            requested: pages,
            free,
        })?;
        let size = 1u64 << order;
        if size > free as u64 {
            return Err(StoreError::OutOfCapacity {
                requested: size.min(u32::MAX as u64) as u32,
                free,
            }
            .into());
        }

        let best = free_blocks(space)?
            .into_iter()
            .filter(|b| b.order >= order)
            .min_by_key(|b| (b.order, b.first));

        let block = match best {
            Some(b) => b,
            None => {
                debug!(
                    "segment alloc: no free block of order >= {} ({} page(s) free, fragmented)",
                    order, free
                );
                return Err(StoreError::OutOfCapacity {
                    requested: size as u32,
                    free,
                }
                .into());
            }
        };

        // Бадди размера 2^order в начале блока уже выровнен (block.order >= order).
        let taken: Vec<u32> = (block.first..block.first + size as u32).collect();
        for &p in &taken {
            space.mark(p, true)?;
        }
        space.commit_allocation(&taken)?;

        debug!(
            "segment alloc: order {} from block [{}; order {}]",
            order, block.first, block.order
        );
        Ok(Allocation {
            pages: taken,
            segment: Some(Segment {
                order,
                index: block.first >> order,
            }),
        })
    }

    fn free(&self, space: &mut PageSpace<'_>, handle: &mut DataHandle) -> Result<()> {
        if handle.is_valid() {
            let seg = handle.segment().ok_or_else(|| {
                anyhow::Error::from(StoreError::InvalidHandle(
                    "handle was not issued by the segment allocator".into(),
                ))
            })?;
            let first = seg.first_page();
            let expected = first..first.saturating_add(seg.pages());
            let matches = handle.pages().len() == seg.pages() as usize
                && handle.pages().iter().copied().eq(expected);
            if !matches {
                return Err(StoreError::InvalidHandle(format!(
                    "pages do not form segment (order {}, index {})",
                    seg.order, seg.index
                ))
                .into());
            }
        }
        release_pages(space, handle)
    }

    fn describe(&self, space: &PageSpace<'_>) -> Result<AllocatorStats> {
        let blocks = free_blocks(space)?;
        let max_order = blocks.iter().map(|b| b.order).max();
        let mut by_order = vec![0u32; max_order.map_or(0, |m| m as usize + 1)];
        for b in &blocks {
            by_order[b.order as usize] += 1;
        }
        Ok(AllocatorStats {
            kind: AllocatorKind::Segment,
            total_pages: space.page_count(),
            free_pages: space.free_count()?,
            last_free_page_num: space.cursor()?,
            largest_free_run: space.largest_free_run()?,
            free_blocks_by_order: by_order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::layout::Layout;
    use crate::region::Region;
    use crate::tag::IdentityTag;
    use std::fs::OpenOptions;

    #[test]
    fn order_rounds_up_to_power_of_two() {
        assert_eq!(order_for(0), Some(0));
        assert_eq!(order_for(1), Some(0));
        assert_eq!(order_for(2), Some(1));
        assert_eq!(order_for(3), Some(2));
        assert_eq!(order_for(16), Some(4));
        assert_eq!(order_for(17), Some(5));
        assert_eq!(order_for(1 << 31), Some(31));
    }

    #[test]
    fn order_beyond_u32_is_none() {
        assert_eq!(order_for((1 << 31) + 1), None);
        assert_eq!(order_for(u32::MAX), None);
    }

    fn scratch_region(name: &str, layout: &Layout) -> Result<Region> {
        let path = std::env::temp_dir().join(format!(
            "mptest-segment-{}-{}-{}",
            name,
            std::process::id(),
            IdentityTag::generate()
        ));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.set_len(layout.total_size)?;
        Region::map(file, &path, layout.total_size)
    }

    #[test]
    fn oversized_request_is_out_of_capacity() -> Result<()> {
        let layout = Layout::new(8, 8);
        let mut region = scratch_region("huge", &layout)?;
        let mut space = PageSpace::new(&mut region, &layout);
        let err = SegmentAllocator.allocate(&mut space, u32::MAX).unwrap_err();
        assert!(matches!(
            StoreError::of(&err),
            Some(StoreError::OutOfCapacity { requested: u32::MAX, .. })
        ));
        Ok(())
    }

    #[test]
    fn free_rejects_pages_that_do_not_form_the_segment() -> Result<()> {
        let layout = Layout::new(8, 8);
        let mut region = scratch_region("shape", &layout)?;
        let mut space = PageSpace::new(&mut region, &layout);
        let tag = IdentityTag::generate();

        let seg = Segment { order: 1, index: 1 }; // страницы [2, 3]
        let mut shifted = DataHandle::new(1, vec![3, 4], Some(seg), tag);
        let err = SegmentAllocator.free(&mut space, &mut shifted).unwrap_err();
        assert!(matches!(StoreError::of(&err), Some(StoreError::InvalidHandle(_))));
        assert!(shifted.is_valid());

        let mut short = DataHandle::new(1, vec![2], Some(seg), tag);
        let err = SegmentAllocator.free(&mut space, &mut short).unwrap_err();
        assert!(matches!(StoreError::of(&err), Some(StoreError::InvalidHandle(_))));

        let mut plain = DataHandle::new(1, vec![2, 3], None, tag);
        let err = SegmentAllocator.free(&mut space, &mut plain).unwrap_err();
        assert!(matches!(StoreError::of(&err), Some(StoreError::InvalidHandle(_))));
        Ok(())
    }
}
