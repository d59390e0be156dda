//! pager/commit — жизненный цикл транзакции: new_transaction, delete, commit.
//!
//! commit под allocation lock переписывает обе таблицы смещений для каждой
//! тронутой страницы (канонической становится копия транзакции) и освобождает
//! отложенные delete. После этого transaction lock отпускается.

use anyhow::Result;
use log::{debug, warn};
use std::time::Duration;

use crate::alloc::{owns_pages, PageSpace};
use crate::error::StoreError;
use crate::handle::DataHandle;
use crate::lock::LockGuard;
use crate::metrics::{record_free, record_tx_begin, record_tx_commit};
use crate::page;
use crate::tx::Transaction;

use super::core::Pager;

impl Pager {
    /// Открыть транзакцию; ждёт transaction lock не дольше `timeout`
    /// (None — без ограничения).
    pub fn new_transaction(&self, timeout: Option<Duration>) -> Result<Transaction> {
        self.ensure_open()?;
        let guard = LockGuard::acquire(self.tx_lock.clone(), timeout)?;
        record_tx_begin();
        debug!("transaction begun on {}", self.path().display());
        Ok(Transaction::new(self.id, guard))
    }

    /// Удалить handle в рамках транзакции: страницы освобождаются при commit.
    pub fn delete(&self, tx: &Transaction, handle: DataHandle) -> Result<()> {
        self.check_owner(&handle)?;
        self.check_tx(tx)?;
        handle.validate(self.layout.page_data_size, None)?;
        if tx.is_deleted(handle.pages()) {
            return Err(StoreError::HandleAlreadyFreed.into());
        }
        let owned = self.with_region(|r| owns_pages(r, &self.layout, &handle))?;
        if !owned {
            return Err(StoreError::HandleAlreadyFreed.into());
        }
        tx.push_delete(handle);
        Ok(())
    }

    /// Зафиксировать транзакцию. При ошибке захвата lock транзакция
    /// откатывается (Drop).
    pub fn commit(&self, mut tx: Transaction) -> Result<()> {
        self.ensure_open()?;
        self.check_tx(&tx)?;
        let _guard = LockGuard::acquire(self.change_lock.clone(), self.config().lock_timeout)?;

        let (pages, deleted) = tx.take_for_commit();
        let flipped = pages.len();
        let mut freed_pages = 0usize;

        self.with_region_mut(|region| {
            for (&p, &offs) in &pages {
                page::set_canonical_offsets(region, &self.layout, p, offs)?;
            }
            let mut space = PageSpace::new(region, &self.layout);
            for mut h in deleted {
                let n = h.page_count();
                match self.allocator.free(&mut space, &mut h) {
                    Ok(()) => {
                        record_free(n);
                        freed_pages += n;
                    }
                    Err(e) if StoreError::of(&e) == Some(&StoreError::HandleAlreadyFreed) => {
                        warn!("commit: deleted handle was freed concurrently ({} page(s))", n);
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })?;

        record_tx_commit();
        debug!("commit: {} page(s) flipped, {} page(s) freed", flipped, freed_pages);
        drop(tx);
        Ok(())
    }
}
