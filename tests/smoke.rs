use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use oorandom::Rand64;

use MapPager::{Pager, PagerBuilder, PagerConfig, StoreError};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("mptest-smoke-{prefix}-{pid}-{t}-{id}"))
}

fn small_cfg(capacity: u64) -> PagerConfig {
    PagerBuilder::from_default()
        .page_data_size(8)
        .capacity(capacity)
        .space_check(false)
        .lock_timeout(Some(Duration::from_secs(5)))
        .build()
}

fn open_small(prefix: &str, capacity: u64) -> Result<Pager> {
    let root = unique_root(prefix);
    fs::create_dir_all(&root)?;
    Pager::open(&root.join("store.bin"), small_cfg(capacity))
}

fn random_bytes(rng: &mut Rand64, len: usize) -> Vec<u8> {
    (0..len).map(|_| (rng.rand_u64() & 0xFF) as u8).collect()
}

#[test]
fn smoke_allocate_set_commit_get_free() -> Result<()> {
    let pager = open_small("basic", 1024)?;
    assert_eq!(pager.page_count(), 128);
    assert_eq!(pager.free_page_count()?, 128);

    // 1) allocate 128 B -> 16 pages
    let mut h = pager.allocate(128)?;
    assert_eq!(h.page_count(), 16);
    assert!(h.capacity(pager.page_data_size()) >= 128);
    assert_eq!(pager.free_page_count()?, 112);
    let first_pages = h.pages().to_vec();

    // 2) set/get inside a transaction, then commit
    let data: Vec<u8> = (0..128u32).map(|i| (i * 7 % 251) as u8).collect();
    let tx = pager.new_transaction(Some(Duration::from_secs(1)))?;
    pager.set(&tx, &mut h, &data, false)?;
    assert_eq!(pager.get_in(&tx, &h, false)?.as_deref(), Some(&data[..]));
    pager.commit(tx)?;

    // 3) committed data is visible outside, with the tag check on
    assert_eq!(pager.get(&h, true)?.as_deref(), Some(&data[..]));

    // 4) free -> allocate the same size returns the same span
    pager.free(&mut h)?;
    assert!(!h.is_valid());
    assert_eq!(pager.free_page_count()?, 128);
    let h2 = pager.allocate(128)?;
    assert_eq!(h2.pages(), &first_pages[..]);

    // a fresh allocation never shows the previous owner's bytes
    assert_eq!(pager.get(&h2, false)?, Some(Vec::new()));
    Ok(())
}

#[test]
fn exact_fill_then_out_of_capacity() -> Result<()> {
    let pager = open_small("fill", 256)?;
    assert_eq!(pager.page_count(), 32);

    let a = pager.allocate(128)?;
    let b = pager.allocate(64)?;
    let c = pager.allocate(64)?;
    assert_eq!(a.page_count() + b.page_count() + c.page_count(), 32);
    assert_eq!(pager.free_page_count()?, 0);

    let err = pager.allocate(8).unwrap_err();
    assert_eq!(
        StoreError::of(&err),
        Some(&StoreError::OutOfCapacity { requested: 1, free: 0 })
    );
    assert_eq!(pager.free_page_count()?, 0);

    // pages are unique across handles
    let mut all: Vec<u32> = [&a, &b, &c].iter().flat_map(|h| h.pages().to_vec()).collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 32);
    Ok(())
}

#[test]
fn zero_sized_allocation_takes_one_page() -> Result<()> {
    let pager = open_small("zero", 256)?;
    let mut h = pager.allocate(0)?;
    assert_eq!(h.page_count(), 1);

    let tx = pager.new_transaction(None)?;
    pager.set(&tx, &mut h, &[], false)?;
    assert_eq!(pager.get_in(&tx, &h, true)?, Some(Vec::new()));
    Ok(())
}

#[test]
fn roundtrip_all_sizes_up_to_capacity() -> Result<()> {
    let pager = open_small("sizes", 4096)?;
    let mut rng = Rand64::new(0x5EED_0001);

    let mut h = pager.allocate(100)?;
    let cap = h.capacity(pager.page_data_size());
    assert_eq!(cap, 104);

    let tx = pager.new_transaction(None)?;
    for len in 1..=cap {
        let data = random_bytes(&mut rng, len);
        pager.set(&tx, &mut h, &data, true)?;
        let got = pager.get_in(&tx, &h, true)?;
        assert_eq!(got.as_deref(), Some(&data[..]), "len={}", len);
    }

    let err = pager.set(&tx, &mut h, &vec![0u8; cap + 1], false).unwrap_err();
    assert_eq!(
        StoreError::of(&err),
        Some(&StoreError::SizeMismatch { capacity: cap, len: cap + 1 })
    );
    Ok(())
}

#[test]
fn stats_and_check_after_churn() -> Result<()> {
    let pager = open_small("churn", 2048)?;
    let mut rng = Rand64::new(0xC0FFEE);

    let mut live = Vec::new();
    for _ in 0..40 {
        let size = rng.rand_range(1..64) as usize;
        match pager.allocate(size) {
            Ok(h) => live.push(h),
            Err(e) => {
                assert!(matches!(StoreError::of(&e), Some(StoreError::OutOfCapacity { .. })));
            }
        }
        if live.len() > 3 && rng.rand_range(0..3) == 0 {
            let idx = rng.rand_range(0..live.len() as u64) as usize;
            let mut h = live.swap_remove(idx);
            pager.free(&mut h)?;
        }
    }

    let used: usize = live.iter().map(|h| h.page_count()).sum();
    let st = pager.stats()?;
    assert_eq!(st.header.total_page_count, 256);
    assert_eq!(st.header.free_page_count as usize, 256 - used);
    assert_eq!(st.allocator.free_pages, st.header.free_page_count);

    let rep = pager.check()?;
    assert!(rep.ok(), "issues: {:?}", rep.issues);
    assert_eq!(rep.pages_free_counted, st.header.free_page_count);
    Ok(())
}
