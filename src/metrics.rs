//! Lightweight global metrics for MapPager.
//!
//! Потокобезопасные атомарные счётчики (Relaxed) для подсистем:
//! - Allocator (allocate/free)
//! - Transactions (begin/commit/rollback, copy-on-write)
//! - Data path (bytes read/written, tag conflicts)
//!
//! Счётчики процессные: при нескольких Pager в одном процессе суммируются.

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Allocator -----
static ALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static ALLOCATION_FAILURES: AtomicU64 = AtomicU64::new(0);
static PAGES_ALLOCATED: AtomicU64 = AtomicU64::new(0);
static FREES: AtomicU64 = AtomicU64::new(0);
static PAGES_FREED: AtomicU64 = AtomicU64::new(0);

// ----- Transactions -----
static TX_BEGUN: AtomicU64 = AtomicU64::new(0);
static TX_COMMITTED: AtomicU64 = AtomicU64::new(0);
static TX_ROLLED_BACK: AtomicU64 = AtomicU64::new(0);
static COW_PAGES: AtomicU64 = AtomicU64::new(0);

// ----- Data path -----
static BYTES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static BYTES_READ: AtomicU64 = AtomicU64::new(0);
static TAG_CONFLICTS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    // Allocator
    pub allocations: u64,
    pub allocation_failures: u64,
    pub pages_allocated: u64,
    pub frees: u64,
    pub pages_freed: u64,

    // Transactions
    pub tx_begun: u64,
    pub tx_committed: u64,
    pub tx_rolled_back: u64,
    pub cow_pages: u64,

    // Data path
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub tag_conflicts: u64,
}

impl MetricsSnapshot {
    /// Среднее число страниц на успешное выделение.
    pub fn avg_pages_per_allocation(&self) -> f64 {
        if self.allocations == 0 {
            0.0
        } else {
            self.pages_allocated as f64 / self.allocations as f64
        }
    }
}

// ----- Recorders (Allocator) -----
pub fn record_allocation(pages: usize) {
    ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    PAGES_ALLOCATED.fetch_add(pages as u64, Ordering::Relaxed);
}

pub fn record_allocation_failure() {
    ALLOCATION_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_free(pages: usize) {
    FREES.fetch_add(1, Ordering::Relaxed);
    PAGES_FREED.fetch_add(pages as u64, Ordering::Relaxed);
}

// ----- Recorders (Transactions) -----
pub fn record_tx_begin() {
    TX_BEGUN.fetch_add(1, Ordering::Relaxed);
}
pub fn record_tx_commit() {
    TX_COMMITTED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_tx_rollback() {
    TX_ROLLED_BACK.fetch_add(1, Ordering::Relaxed);
}
pub fn record_cow_page() {
    COW_PAGES.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Data path) -----
pub fn record_bytes_written(n: usize) {
    BYTES_WRITTEN.fetch_add(n as u64, Ordering::Relaxed);
}
pub fn record_bytes_read(n: usize) {
    BYTES_READ.fetch_add(n as u64, Ordering::Relaxed);
}
pub fn record_tag_conflict() {
    TAG_CONFLICTS.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        allocations: ALLOCATIONS.load(Ordering::Relaxed),
        allocation_failures: ALLOCATION_FAILURES.load(Ordering::Relaxed),
        pages_allocated: PAGES_ALLOCATED.load(Ordering::Relaxed),
        frees: FREES.load(Ordering::Relaxed),
        pages_freed: PAGES_FREED.load(Ordering::Relaxed),

        tx_begun: TX_BEGUN.load(Ordering::Relaxed),
        tx_committed: TX_COMMITTED.load(Ordering::Relaxed),
        tx_rolled_back: TX_ROLLED_BACK.load(Ordering::Relaxed),
        cow_pages: COW_PAGES.load(Ordering::Relaxed),

        bytes_written: BYTES_WRITTEN.load(Ordering::Relaxed),
        bytes_read: BYTES_READ.load(Ordering::Relaxed),
        tag_conflicts: TAG_CONFLICTS.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    ALLOCATIONS.store(0, Ordering::Relaxed);
    ALLOCATION_FAILURES.store(0, Ordering::Relaxed);
    PAGES_ALLOCATED.store(0, Ordering::Relaxed);
    FREES.store(0, Ordering::Relaxed);
    PAGES_FREED.store(0, Ordering::Relaxed);

    TX_BEGUN.store(0, Ordering::Relaxed);
    TX_COMMITTED.store(0, Ordering::Relaxed);
    TX_ROLLED_BACK.store(0, Ordering::Relaxed);
    COW_PAGES.store(0, Ordering::Relaxed);

    BYTES_WRITTEN.store(0, Ordering::Relaxed);
    BYTES_READ.store(0, Ordering::Relaxed);
    TAG_CONFLICTS.store(0, Ordering::Relaxed);
}
