//! pager/alloc — allocate/free под allocation lock.
//!
//! Порядок блокировок: сначала именованный allocation lock, затем RwLock
//! отображения. Обратный порядок запрещён.

use anyhow::Result;
use log::debug;

use crate::alloc::{self as strategy, pages_for, PageSpace};
use crate::handle::DataHandle;
use crate::lock::LockGuard;
use crate::metrics::{record_allocation, record_allocation_failure, record_free};
use crate::tag::IdentityTag;

use super::core::Pager;

impl Pager {
    /// Выделить минимальное число страниц под `size` байт.
    pub fn allocate(&self, size: usize) -> Result<DataHandle> {
        self.ensure_open()?;
        let need = pages_for(size, self.layout.page_data_size)?;
        let _guard = LockGuard::acquire(self.change_lock.clone(), self.config().lock_timeout)?;

        let res = self.with_region_mut(|region| {
            let mut space = PageSpace::new(region, &self.layout);
            let a = self.allocator.allocate(&mut space, need)?;
            let issued = IdentityTag::generate();
            for &p in &a.pages {
                space.set_owner(p, Some(issued))?;
            }
            Ok((a, issued))
        });
        match res {
            Ok((a, issued)) => {
                record_allocation(a.pages.len());
                debug!(
                    "allocate {} B -> {} page(s) [{}..={}]",
                    size,
                    a.pages.len(),
                    a.pages.first().copied().unwrap_or(0),
                    a.pages.last().copied().unwrap_or(0)
                );
                Ok(DataHandle::new(self.id, a.pages, a.segment, issued))
            }
            Err(e) => {
                record_allocation_failure();
                Err(e)
            }
        }
    }

    /// Вернуть страницы handle; handle становится невалидным.
    pub fn free(&self, handle: &mut DataHandle) -> Result<()> {
        self.ensure_open()?;
        self.check_owner(handle)?;
        let _guard = LockGuard::acquire(self.change_lock.clone(), self.config().lock_timeout)?;

        let n = handle.page_count();
        self.with_region_mut(|region| {
            let mut space = PageSpace::new(region, &self.layout);
            self.allocator.free(&mut space, handle)
        })?;
        record_free(n);
        debug!("free {} page(s)", n);
        Ok(())
    }

    /// false, если хотя бы одна страница handle свободна или уже выдана
    /// другому выделению.
    pub fn are_pages_allocated(&self, handle: &DataHandle) -> Result<bool> {
        self.check_owner(handle)?;
        self.with_region(|region| strategy::owns_pages(region, &self.layout, handle))
    }
}
