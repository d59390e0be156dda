use anyhow::Result;
use std::path::PathBuf;

use MapPager::Pager;

pub fn exec(path: PathBuf, json: bool) -> Result<()> {
    let pager = Pager::open_existing(&path)?;
    let rep = pager.check()?;

    if json {
        println!("{}", serde_json::to_string(&rep)?);
    } else {
        println!("Check {}", path.display());
        println!("  pages total    = {}", rep.pages_total);
        println!("  free (bitmap)  = {}", rep.pages_free_counted);
        println!("  free (header)  = {}", rep.pages_free_header);
        println!("  in set A / B   = {} / {}", rep.pages_in_set_a, rep.pages_in_set_b);
        println!("  bad bitmap     = {}", rep.bad_bitmap_entries);
        println!("  bad owners     = {}", rep.bad_owners);
        println!("  bad offsets    = {}", rep.bad_offsets);
        println!("  bad headers    = {}", rep.bad_headers);
        for msg in &rep.issues {
            println!("  issue: {}", msg);
        }
        println!("  result         = {}", if rep.ok() { "OK" } else { "FAIL" });
    }

    if !rep.ok() {
        std::process::exit(1);
    }
    Ok(())
}
