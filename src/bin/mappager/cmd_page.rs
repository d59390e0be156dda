use anyhow::Result;
use std::path::PathBuf;

use MapPager::Pager;

pub fn exec(path: PathBuf, page: u32, json: bool) -> Result<()> {
    let pager = Pager::open_existing(&path)?;
    let v = pager.inspect_page(page)?;

    if json {
        println!("{}", serde_json::to_string(&v)?);
        return Ok(());
    }

    println!("page      = {}", v.page);
    println!("set       = {:?}", v.set);
    println!("allocated = {}", v.allocated);
    println!("tag       = {}", v.tag.as_deref().unwrap_or("<none>"));
    println!("data_size = {}", v.data_size);
    for (i, chunk) in v.data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        println!("{:08x}  {:<47}  {}", i * 16, hex.join(" "), ascii);
    }
    Ok(())
}
