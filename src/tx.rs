//! tx — транзакция с copy-on-write страницами.
//!
//! Пока транзакция жива, она держит transaction lock (не более одной
//! транзакции на хранилище во всех процессах). Каждая страница при первом
//! касании через `Pager::set` копируется (заголовок + данные) в неактивный
//! физический набор; дальше все чтения/записи этой транзакции идут туда
//! (first-touch-wins). Канонические таблицы смещений меняются только в
//! `Pager::commit`, поэтому читатели вне транзакции видят старую копию.
//!
//! Drop без commit == rollback: lock освобождается, канонические данные не
//! тронуты.

use anyhow::Result;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

use crate::handle::DataHandle;
use crate::layout::Layout;
use crate::lock::LockGuard;
use crate::metrics::{record_cow_page, record_tx_rollback};
use crate::page::{self, PageOffsets};
use crate::region::Region;

#[derive(Default)]
struct Pending {
    handles: Vec<DataHandle>,
    pages: BTreeSet<u32>,
}

pub struct Transaction {
    pager_id: u64,
    guard: LockGuard,
    // page -> смещения копии этой транзакции
    pages: Mutex<BTreeMap<u32, PageOffsets>>,
    deleted: Mutex<Pending>,
    finished: bool,
}

impl Transaction {
    pub(crate) fn new(pager_id: u64, guard: LockGuard) -> Self {
        Self {
            pager_id,
            guard,
            pages: Mutex::new(BTreeMap::new()),
            deleted: Mutex::new(Pending::default()),
            finished: false,
        }
    }

    pub(crate) fn pager_id(&self) -> u64 {
        self.pager_id
    }

    pub fn lock_name(&self) -> &str {
        self.guard.name()
    }

    /// Страницы, скопированные этой транзакцией (по возрастанию).
    pub fn touched_pages(&self) -> Vec<u32> {
        self.pages.lock().keys().copied().collect()
    }

    pub fn mapped(&self, page: u32) -> Option<PageOffsets> {
        self.pages.lock().get(&page).copied()
    }

    /// Хотя бы одна страница удалена в этой транзакции.
    pub fn is_deleted(&self, pages: &[u32]) -> bool {
        let d = self.deleted.lock();
        pages.iter().any(|p| d.pages.contains(p))
    }

    pub(crate) fn push_delete(&self, handle: DataHandle) {
        let mut d = self.deleted.lock();
        d.pages.extend(handle.pages().iter().copied());
        d.handles.push(handle);
    }

    /// Для каждой страницы handle вернуть смещения копии этой транзакции,
    /// копируя страницу в другой набор при первом касании.
    pub(crate) fn copy_pages_and_fetch_offsets(
        &self,
        region: &mut Region,
        layout: &Layout,
        pages: &[u32],
    ) -> Result<Vec<PageOffsets>> {
        let mut map = self.pages.lock();
        let mut out = Vec::with_capacity(pages.len());
        for &p in pages {
            if let Some(offs) = map.get(&p) {
                out.push(*offs);
                continue;
            }
            let current = page::canonical_offsets(region, layout, p)?;
            let from_set = layout.set_of(current.data);
            let dst = PageOffsets::in_set(layout, from_set.other(), p);
            page::copy_page(region, layout, current, dst)?;
            record_cow_page();
            debug!("tx: page {} copied {:?} -> {:?}", p, from_set, from_set.other());
            map.insert(p, dst);
            out.push(dst);
        }
        Ok(out)
    }

    /// Забрать состояние для commit; после этого Drop не считается rollback.
    pub(crate) fn take_for_commit(&mut self) -> (BTreeMap<u32, PageOffsets>, Vec<DataHandle>) {
        self.finished = true;
        let pages = std::mem::take(&mut *self.pages.lock());
        let deleted = std::mem::take(&mut *self.deleted.lock());
        (pages, deleted.handles)
    }

    /// Откатить транзакцию: отпустить lock и вернуть handles, удалённые в ней
    /// (они остаются валидными).
    pub fn rollback(mut self) -> Vec<DataHandle> {
        self.finished = true;
        record_tx_rollback();
        let handles = std::mem::take(&mut self.deleted.lock().handles);
        self.guard.release();
        handles
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            record_tx_rollback();
            let d = self.deleted.lock();
            if !d.handles.is_empty() {
                warn!(
                    "transaction dropped without commit: {} deleted handle(s) ({} page(s)) stay allocated",
                    d.handles.len(),
                    d.pages.len()
                );
            }
        }
        // guard отпускает lock в своём Drop
    }
}
