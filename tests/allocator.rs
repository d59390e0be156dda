// tests/allocator.rs
//
// Поведение аллокаторов через публичный API Pager:
// - bitmap: курсор, откат при нехватке, scan_wrap, двойной free;
// - устаревшая копия handle не трогает страницы, выданные заново;
// - segment (buddy): выравнивание блоков, неявное слияние после free.

use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use MapPager::{AllocatorKind, Pager, PagerBuilder, PagerConfig, Segment, StoreError};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("mptest-alloc-{prefix}-{pid}-{t}-{id}"))
}

fn cfg(capacity: u64) -> PagerConfig {
    PagerBuilder::from_default()
        .page_data_size(8)
        .capacity(capacity)
        .space_check(false)
        .build()
}

fn open(prefix: &str, cfg: PagerConfig) -> Result<Pager> {
    let root = unique_root(prefix);
    fs::create_dir_all(&root)?;
    Pager::open(&root.join("store.bin"), cfg)
}

/// 32 страницы: A=4, B=4, C=24; free(A), free(C) -> курсор на 8, свободно 28,
/// но от курсора до конца только 24.
fn fragmented(pager: &Pager) -> Result<()> {
    let mut a = pager.allocate(32)?;
    let _b = pager.allocate(32)?;
    let mut c = pager.allocate(192)?;
    assert_eq!(a.pages(), &[0, 1, 2, 3]);
    assert_eq!(c.page_count(), 24);
    pager.free(&mut a)?;
    pager.free(&mut c)?;
    assert_eq!(pager.free_page_count()?, 28);
    assert_eq!(pager.header()?.last_free_page_num, 8);
    Ok(())
}

#[test]
fn no_wrap_fails_and_rolls_back() -> Result<()> {
    let pager = open("nowrap", cfg(256))?;
    fragmented(&pager)?;

    let err = pager.allocate(28 * 8).unwrap_err();
    assert_eq!(
        StoreError::of(&err),
        Some(&StoreError::OutOfCapacity { requested: 28, free: 28 })
    );
    // ни счётчик, ни bitmap не изменились
    assert_eq!(pager.free_page_count()?, 28);
    let rep = pager.check()?;
    assert!(rep.ok(), "issues: {:?}", rep.issues);
    assert_eq!(rep.pages_free_counted, 28);

    // то, что помещается после курсора, выделяется
    let h = pager.allocate(24 * 8)?;
    assert_eq!(h.pages().first(), Some(&8));
    assert_eq!(h.pages().last(), Some(&31));
    Ok(())
}

#[test]
fn scan_wrap_uses_pages_before_cursor() -> Result<()> {
    let pager = open("wrap", cfg(256).with_scan_wrap(true))?;
    fragmented(&pager)?;

    let h = pager.allocate(28 * 8)?;
    assert_eq!(h.page_count(), 28);
    let mut expected: Vec<u32> = (0..4).collect();
    expected.extend(8..32);
    assert_eq!(h.pages(), &expected[..]);
    assert_eq!(pager.free_page_count()?, 0);
    assert_eq!(pager.header()?.last_free_page_num, 31);
    Ok(())
}

#[test]
fn double_free_and_stale_clone() -> Result<()> {
    let pager = open("dfree", cfg(256))?;
    let mut h = pager.allocate(40)?;
    let mut stale = h.clone();

    pager.free(&mut h)?;
    let err = pager.free(&mut h).unwrap_err();
    assert_eq!(StoreError::of(&err), Some(&StoreError::HandleAlreadyFreed));

    // клон всё ещё "валиден", но его страницы уже свободны
    assert!(stale.is_valid());
    assert!(!pager.are_pages_allocated(&stale)?);
    assert_eq!(pager.get(&stale, false)?, None);
    let err = pager.free(&mut stale).unwrap_err();
    assert_eq!(StoreError::of(&err), Some(&StoreError::HandleAlreadyFreed));
    assert_eq!(pager.free_page_count()?, 32);

    // использование освобождённого handle — ошибка
    let err = pager.get(&h, false).unwrap_err();
    assert!(matches!(StoreError::of(&err), Some(StoreError::InvalidHandle(_))));
    Ok(())
}

#[test]
fn stale_clone_cannot_free_reissued_pages() -> Result<()> {
    let pager = open("reissue", cfg(256))?;
    let mut h = pager.allocate(16)?;
    let mut stale = h.clone();
    pager.free(&mut h)?;

    let mut fresh = pager.allocate(16)?;
    assert_eq!(fresh.pages(), stale.pages());
    assert_ne!(fresh.allocation_tag(), stale.allocation_tag());
    assert!(!pager.are_pages_allocated(&stale)?);
    assert!(pager.are_pages_allocated(&fresh)?);

    let err = pager.free(&mut stale).unwrap_err();
    assert_eq!(StoreError::of(&err), Some(&StoreError::HandleAlreadyFreed));
    assert!(pager.are_pages_allocated(&fresh)?);
    assert_eq!(pager.free_page_count()?, 30);

    // копия не читает и не пишет чужие данные
    let tx = pager.new_transaction(None)?;
    pager.set(&tx, &mut fresh, b"new owner", false)?;
    let err = pager.set(&tx, &mut stale, b"old owner", false).unwrap_err();
    assert_eq!(StoreError::of(&err), Some(&StoreError::HandleAlreadyFreed));
    let err = pager.delete(&tx, stale.clone()).unwrap_err();
    assert_eq!(StoreError::of(&err), Some(&StoreError::HandleAlreadyFreed));
    pager.commit(tx)?;

    assert_eq!(pager.get(&stale, false)?, None);
    assert_eq!(pager.get(&fresh, true)?.as_deref(), Some(&b"new owner"[..]));
    assert!(pager.check()?.ok());

    pager.free(&mut fresh)?;
    assert_eq!(pager.free_page_count()?, 32);
    Ok(())
}

#[test]
fn stale_segment_clone_cannot_free_reissued_block() -> Result<()> {
    let pager = open("reissue-buddy", cfg(256).with_allocator(AllocatorKind::Segment))?;
    let mut h = pager.allocate(32)?;
    let mut stale = h.clone();
    pager.free(&mut h)?;

    let fresh = pager.allocate(32)?;
    assert_eq!(fresh.segment(), stale.segment());
    let err = pager.free(&mut stale).unwrap_err();
    assert_eq!(StoreError::of(&err), Some(&StoreError::HandleAlreadyFreed));
    assert!(pager.are_pages_allocated(&fresh)?);
    assert_eq!(pager.free_page_count()?, 28);
    Ok(())
}

#[test]
fn segment_request_beyond_u32_blocks_is_out_of_capacity() -> Result<()> {
    let pager = open("buddy-huge", cfg(256).with_allocator(AllocatorKind::Segment))?;
    let err = pager.allocate(8 * ((1usize << 31) + 1)).unwrap_err();
    assert!(matches!(
        StoreError::of(&err),
        Some(StoreError::OutOfCapacity { .. })
    ));
    assert_eq!(pager.free_page_count()?, 32);
    Ok(())
}

#[test]
fn handle_from_other_storage_is_rejected() -> Result<()> {
    let p1 = open("own1", cfg(256))?;
    let p2 = open("own2", cfg(256))?;
    let mut h = p1.allocate(8)?;
    let err = p2.free(&mut h).unwrap_err();
    assert!(matches!(StoreError::of(&err), Some(StoreError::InvalidHandle(_))));
    assert!(h.is_valid());
    p1.free(&mut h)?;
    Ok(())
}

#[test]
fn concurrent_allocations_are_disjoint() -> Result<()> {
    let pager = Arc::new(open("threads", cfg(8 * 512))?);
    let mut joins = Vec::new();
    for t in 0..4u64 {
        let p = pager.clone();
        joins.push(std::thread::spawn(move || -> Result<Vec<u32>> {
            let mut pages = Vec::new();
            for i in 0..16u64 {
                let h = p.allocate(((t + i) % 5 * 8 + 1) as usize)?;
                pages.extend_from_slice(h.pages());
            }
            Ok(pages)
        }));
    }

    let mut all = Vec::new();
    for j in joins {
        let pages = j.join().map_err(|_| anyhow::anyhow!("allocator thread panicked"))??;
        all.extend(pages);
    }
    let n = all.len();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), n, "a page was handed out twice");
    assert_eq!(pager.free_page_count()? as usize, 512 - n);
    Ok(())
}

#[test]
fn segment_allocator_hands_out_aligned_buddies() -> Result<()> {
    let pager = open("buddy", cfg(256).with_allocator(AllocatorKind::Segment))?;

    // 3 страницы -> блок 2^2
    let mut a = pager.allocate(24)?;
    assert_eq!(a.pages(), &[0, 1, 2, 3]);
    assert_eq!(a.segment(), Some(Segment { order: 2, index: 0 }));

    // 8 страниц -> наименьший свободный блок порядка >= 3: [8..16)
    let mut b = pager.allocate(64)?;
    assert_eq!(b.segment(), Some(Segment { order: 3, index: 1 }));
    assert_eq!(b.pages().first(), Some(&8));

    // 1 страница -> расщепление [4..8)
    let mut c = pager.allocate(1)?;
    assert_eq!(c.pages(), &[4]);
    assert_eq!(c.segment(), Some(Segment { order: 0, index: 4 }));
    assert_eq!(pager.free_page_count()?, 32 - 4 - 8 - 1);

    let st = pager.stats()?;
    assert_eq!(st.allocator.kind, AllocatorKind::Segment);
    // свободно: [5], [6..8), [16..32)
    assert_eq!(st.allocator.free_blocks_by_order, vec![1, 1, 0, 0, 1]);

    pager.free(&mut c)?;
    pager.free(&mut a)?;
    pager.free(&mut b)?;

    // после освобождения всё снова сливается в один блок 2^5
    let st = pager.stats()?;
    assert_eq!(st.allocator.free_blocks_by_order, vec![0, 0, 0, 0, 0, 1]);
    assert_eq!(st.allocator.largest_free_run, 32);

    // 17 страниц -> 2^5, всё хранилище
    let all = pager.allocate(17 * 8)?;
    assert_eq!(all.page_count(), 32);
    let err = pager.allocate(1).unwrap_err();
    assert!(matches!(StoreError::of(&err), Some(StoreError::OutOfCapacity { .. })));
    Ok(())
}

#[test]
fn segment_allocator_reports_fragmentation() -> Result<()> {
    let pager = open("buddyfrag", cfg(64).with_allocator(AllocatorKind::Segment))?;
    let mut x = pager.allocate(8)?; // [0]
    let mut y = pager.allocate(8)?; // [1]
    let _z = pager.allocate(16)?; // [2,3]
    let mut w = pager.allocate(8)?; // [4]
    let _v = pager.allocate(8)?; // [5]
    let mut u = pager.allocate(16)?; // [6,7]
    assert_eq!(x.pages(), &[0]);
    assert_eq!(y.pages(), &[1]);
    assert_eq!(w.pages(), &[4]);
    assert_eq!(u.pages(), &[6, 7]);
    assert_eq!(pager.free_page_count()?, 0);

    pager.free(&mut x)?;
    pager.free(&mut y)?;
    pager.free(&mut w)?;
    pager.free(&mut u)?;
    // свободно 5 страниц: [0..2), [4], [6..8) — блока 2^2 нет
    assert_eq!(pager.free_page_count()?, 5);
    assert_eq!(pager.stats()?.allocator.free_blocks_by_order, vec![1, 2]);

    let err = pager.allocate(32).unwrap_err();
    assert_eq!(
        StoreError::of(&err),
        Some(&StoreError::OutOfCapacity { requested: 4, free: 5 })
    );
    assert_eq!(pager.free_page_count()?, 5);

    // блок 2^1 по-прежнему доступен: наименьший адрес
    let h = pager.allocate(16)?;
    assert_eq!(h.pages(), &[0, 1]);
    Ok(())
}
