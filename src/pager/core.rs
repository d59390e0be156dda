//! pager/core — ядро Pager: структура, open (create/reopen), close/flush, stats.

use anyhow::{Context, Result};
use log::{info, warn};
use parking_lot::RwLock;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::alloc::{allocator_for, AllocatorStats, PageAllocator, PageSpace};
use crate::config::PagerConfig;
use crate::consts::{
    OWNER_ENTRY_SIZE, PAGE_CHANGE_LOCK_SUFFIX, PAGE_FREE, PAGE_HEADER_SIZE, SIGNATURE_SIZE,
    STORAGE_HEADER_SIZE, TRANSACTION_LOCK_SUFFIX,
};
use crate::error::StoreError;
use crate::handle::DataHandle;
use crate::layout::{Layout, PageSet};
use crate::lock::{storage_locks, LockGuard, NamedLock};
use crate::meta::{self, StorageHeader};
use crate::page::{self, PageOffsets};
use crate::region::Region;
use crate::space::{ensure_space, FsSpaceProbe, SpaceProbe};
use crate::tx::Transaction;

static NEXT_PAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Хранилище страниц в одном файле.
pub struct Pager {
    pub(crate) id: u64,
    path: PathBuf,
    cfg: PagerConfig,
    pub(crate) layout: Layout,
    region: RwLock<Option<Region>>,
    pub(crate) change_lock: Arc<dyn NamedLock>,
    pub(crate) tx_lock: Arc<dyn NamedLock>,
    pub(crate) allocator: Box<dyn PageAllocator>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PagerStats {
    pub path: String,
    pub header: StorageHeader,
    pub total_size: u64,
    pub data_capacity: u64,
    pub allocator: AllocatorStats,
}

impl Pager {
    /// Открыть существующее хранилище или создать новое по `cfg`.
    pub fn open(path: &Path, cfg: PagerConfig) -> Result<Self> {
        Self::open_with_probe(path, cfg, &FsSpaceProbe)
    }

    /// Открыть уже созданное хранилище; page_data_size и ёмкость берутся из
    /// его заголовка, остальное — из env.
    pub fn open_existing(path: &Path) -> Result<Self> {
        let h = meta::read_header_file(path)?;
        let cfg = PagerConfig::from_env()
            .with_page_data_size(h.page_data_size)
            .with_capacity(h.total_page_count as u64 * h.page_data_size as u64)
            .with_space_check(false);
        Self::open(path, cfg)
    }

    pub fn open_with_probe(path: &Path, cfg: PagerConfig, probe: &dyn SpaceProbe) -> Result<Self> {
        let (change_lock, tx_lock) = storage_locks(
            path,
            cfg.lock_mode,
            PAGE_CHANGE_LOCK_SUFFIX,
            TRANSACTION_LOCK_SUFFIX,
        );

        // Инициализация — под allocation lock (другой процесс может создавать тот же файл).
        let _guard = LockGuard::acquire(change_lock.clone(), cfg.lock_timeout)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open storage {}", path.display()))?;
        let flen = file.metadata()?.len();

        let (region, layout) = if flen == 0 {
            let layout = Layout::for_capacity(cfg.capacity, cfg.page_data_size)?;
            if cfg.space_check {
                ensure_space(probe, path, layout.total_size, cfg.space_margin)?;
            }
            file.set_len(layout.total_size)
                .with_context(|| format!("set_len {} on {}", layout.total_size, path.display()))?;
            let mut region = Region::map(file, path, layout.total_size)?;
            init_storage(&mut region, &layout)?;
            region.flush()?;
            info!(
                "created storage {}: {} page(s) x {} B, {} B total",
                path.display(),
                layout.page_count,
                layout.page_data_size,
                layout.total_size
            );
            (region, layout)
        } else {
            if flen < (SIGNATURE_SIZE + STORAGE_HEADER_SIZE) as u64 {
                return Err(StoreError::Format(format!(
                    "{} is {} bytes, too small for a storage header",
                    path.display(),
                    flen
                ))
                .into());
            }
            let region = Region::map(file, path, flen)?;
            if !meta::has_signature(&region)? {
                return Err(StoreError::Format(format!("bad signature in {}", path.display())).into());
            }
            let h = meta::read_header(&region)?;
            let layout = meta::validate_header(&h, cfg.page_data_size)?;
            if layout.total_size > flen {
                return Err(StoreError::Format(format!(
                    "{} is truncated: {} of {} bytes",
                    path.display(),
                    flen,
                    layout.total_size
                ))
                .into());
            }
            let requested = cfg.capacity / cfg.page_data_size.max(1) as u64;
            if requested != layout.page_count as u64 {
                warn!(
                    "storage {} has {} page(s); requested capacity {} ignored",
                    path.display(),
                    layout.page_count,
                    cfg.capacity
                );
            }
            info!(
                "opened storage {}: {} page(s), {} free",
                path.display(),
                h.total_page_count,
                h.free_page_count
            );
            (region, layout)
        };

        let allocator = allocator_for(cfg.allocator, cfg.scan_wrap);
        Ok(Self {
            id: NEXT_PAGER_ID.fetch_add(1, Ordering::Relaxed),
            path: path.to_path_buf(),
            cfg,
            layout,
            region: RwLock::new(Some(region)),
            change_lock,
            tx_lock,
            allocator,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &PagerConfig {
        &self.cfg
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn page_data_size(&self) -> u32 {
        self.layout.page_data_size
    }

    pub fn page_count(&self) -> u32 {
        self.layout.page_count
    }

    /// Полный размер файла (все регионы, обе копии страниц).
    pub fn total_size(&self) -> u64 {
        self.layout.total_size
    }

    pub fn is_closed(&self) -> bool {
        self.region.read().is_none()
    }

    /// Снимок заголовка хранилища.
    pub fn header(&self) -> Result<StorageHeader> {
        self.with_region(meta::read_header)
    }

    pub fn free_page_count(&self) -> Result<u32> {
        self.with_region(meta::free_page_count)
    }

    pub fn stats(&self) -> Result<PagerStats> {
        let header = self.header()?;
        let allocator = self.with_region_mut(|region| {
            let space = PageSpace::new(region, &self.layout);
            self.allocator.describe(&space)
        })?;
        Ok(PagerStats {
            path: self.path.display().to_string(),
            header,
            total_size: self.layout.total_size,
            data_capacity: self.layout.data_capacity(),
            allocator,
        })
    }

    /// Физический набор, в котором сейчас лежит каноническая копия страницы.
    pub fn page_set(&self, page: u32) -> Result<PageSet> {
        self.with_region(|r| {
            let offs = page::canonical_offsets(r, &self.layout, page)?;
            Ok(self.layout.set_of(offs.data))
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.with_region(|r| r.flush())
    }

    /// Сбросить отображение на диск и освободить его. Повторный вызов — no-op.
    pub fn close(&self) -> Result<()> {
        let region = self.region.write().take();
        if let Some(r) = region {
            r.flush()?;
            info!("closed storage {}", self.path.display());
        }
        Ok(())
    }

    // ---------------- internal helpers ----------------

    pub(crate) fn with_region<R>(&self, f: impl FnOnce(&Region) -> Result<R>) -> Result<R> {
        let guard = self.region.read();
        let region = guard.as_ref().ok_or(StoreError::AlreadyClosed("pager"))?;
        f(region)
    }

    pub(crate) fn with_region_mut<R>(&self, f: impl FnOnce(&mut Region) -> Result<R>) -> Result<R> {
        let mut guard = self.region.write();
        let region = guard.as_mut().ok_or(StoreError::AlreadyClosed("pager"))?;
        f(region)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StoreError::AlreadyClosed("pager").into());
        }
        Ok(())
    }

    pub(crate) fn check_owner(&self, handle: &DataHandle) -> Result<()> {
        if handle.owner != self.id {
            return Err(StoreError::InvalidHandle("handle was issued by another storage".into()).into());
        }
        Ok(())
    }

    pub(crate) fn check_tx(&self, tx: &Transaction) -> Result<()> {
        if tx.pager_id() != self.id {
            return Err(StoreError::InvalidHandle("transaction belongs to another storage".into()).into());
        }
        Ok(())
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("close {} on drop: {:#}", self.path.display(), e);
        }
    }
}

/// Первичная разметка нового файла: сигнатура, заголовок, bitmap, таблицы
/// смещений (все страницы в Set A), пустая таблица владельцев, пустые
/// заголовки страниц обоих наборов.
fn init_storage(region: &mut Region, layout: &Layout) -> Result<()> {
    meta::write_signature(region)?;
    meta::write_header(region, &StorageHeader::new_for(layout))?;

    let n = layout.page_count as usize;
    region.fill(layout.bitmap_off, n, PAGE_FREE)?;
    for p in 0..layout.page_count {
        page::set_canonical_offsets(region, layout, p, PageOffsets::in_set(layout, PageSet::A, p))?;
    }
    region.fill(layout.owner_table_off, n * OWNER_ENTRY_SIZE, 0)?;
    region.fill(layout.set_a_headers_off, n * PAGE_HEADER_SIZE, 0)?;
    region.fill(layout.set_b_headers_off, n * PAGE_HEADER_SIZE, 0)?;
    Ok(())
}
