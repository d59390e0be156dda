use anyhow::Result;
use std::path::PathBuf;

use MapPager::Pager;

pub fn exec(path: PathBuf, json: bool) -> Result<()> {
    let pager = Pager::open_existing(&path)?;
    let st = pager.stats()?;

    if json {
        let v = serde_json::json!({
            "stats": st,
            "layout": {
                "bitmap_off": pager.layout().bitmap_off,
                "phys_table_off": pager.layout().phys_table_off,
                "hdr_table_off": pager.layout().hdr_table_off,
                "owner_table_off": pager.layout().owner_table_off,
                "set_a_headers_off": pager.layout().set_a_headers_off,
                "set_b_headers_off": pager.layout().set_b_headers_off,
            },
            "config": pager.config().to_string(),
        });
        println!("{}", serde_json::to_string(&v)?);
        return Ok(());
    }

    let h = &st.header;
    let l = pager.layout();
    println!("path           = {}", st.path);
    println!("version        = {}", h.version);
    println!("page_data_size = {}", h.page_data_size);
    println!("pages          = {} total, {} free, {} allocated", h.total_page_count, h.free_page_count, h.allocated_pages());
    println!("cursor         = {}", h.last_free_page_num);
    println!("file size      = {} B (data capacity {} B)", st.total_size, st.data_capacity);
    println!(
        "bitmap @ {}  phys table @ {}  hdr table @ {}  owner table @ {}",
        l.bitmap_off, l.phys_table_off, l.hdr_table_off, l.owner_table_off
    );
    println!("set A  @ {} (data {})", l.set_a_headers_off, l.set_a_data_off);
    println!("set B  @ {} (data {})", l.set_b_headers_off, l.set_b_data_off);
    println!("allocator      = {} (largest free run {})", st.allocator.kind, st.allocator.largest_free_run);
    if !st.allocator.free_blocks_by_order.is_empty() {
        let parts: Vec<String> = st
            .allocator
            .free_blocks_by_order
            .iter()
            .enumerate()
            .filter(|(_, n)| **n > 0)
            .map(|(k, n)| format!("2^{}:{}", k, n))
            .collect();
        println!("free blocks    = {}", parts.join(" "));
    }
    Ok(())
}
