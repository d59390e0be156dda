use anyhow::Result;
use std::path::PathBuf;

use MapPager::meta::read_header_file;
use MapPager::{Pager, PagerBuilder};

pub fn exec(path: PathBuf, capacity: Option<u64>, page_size: Option<u32>) -> Result<()> {
    let exists = std::fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
    if exists {
        let h = read_header_file(&path)?;
        if let Some(ps) = page_size {
            if ps != h.page_data_size {
                eprintln!(
                    "warning: storage already initialized with page_size={}, requested {} (keeping {})",
                    h.page_data_size, ps, h.page_data_size
                );
            }
        }
        println!(
            "Storage already initialized at {} ({} page(s) x {} B)",
            path.display(),
            h.total_page_count,
            h.page_data_size
        );
        return Ok(());
    }

    let mut b = PagerBuilder::new();
    if let Some(c) = capacity {
        b = b.capacity(c);
    }
    if let Some(ps) = page_size {
        b = b.page_data_size(ps);
    }
    let pager = Pager::open(&path, b.build())?;
    println!(
        "Initialized storage at {}: {} page(s) x {} B, file {} B",
        path.display(),
        pager.page_count(),
        pager.page_data_size(),
        pager.total_size()
    );
    pager.close()
}
