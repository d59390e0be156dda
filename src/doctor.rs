//! doctor — проверка структурной целостности хранилища и отчёт.
//!
//! Проходим все страницы [0 .. page_count):
//! - bitmap-флаг равен PAGE_FREE/PAGE_ALLOCATED; пересчёт свободных против заголовка;
//! - занятая страница имеет владельца в таблице владельцев, свободная — нет;
//! - оба смещения из таблиц лежат ровно на слоте этой страницы в Set A или Set B,
//!   и заголовок с данными указывают в один и тот же набор;
//! - заголовок канонической копии: tag разбирается, data_size ≤ page_data_size;
//! - курсор last_free_page_num < page_count.
//!
//! Ничего не исправляет: только отчёт (human/JSON в CLI).

use anyhow::Result;
use log::warn;

use crate::alloc::{is_page_free, page_owner};
use crate::layout::{Layout, PageSet};
use crate::meta;
use crate::page::{self, PageOffsets};
use crate::pager::Pager;
use crate::region::Region;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CheckReport {
    pub pages_total: u32,
    pub pages_free_counted: u32,
    pub pages_free_header: u32,
    pub pages_in_set_a: u32,
    pub pages_in_set_b: u32,
    pub bad_bitmap_entries: u32,
    pub bad_owners: u32,
    pub bad_offsets: u32,
    pub bad_headers: u32,
    pub cursor_out_of_range: bool,
    /// Первые сообщения о проблемах (не больше MAX_ISSUES).
    pub issues: Vec<String>,
}

const MAX_ISSUES: usize = 64;

impl CheckReport {
    pub fn ok(&self) -> bool {
        self.pages_free_counted == self.pages_free_header
            && self.bad_bitmap_entries == 0
            && self.bad_owners == 0
            && self.bad_offsets == 0
            && self.bad_headers == 0
            && !self.cursor_out_of_range
    }

    fn issue(&mut self, msg: String) {
        if self.issues.len() < MAX_ISSUES {
            self.issues.push(msg);
        }
    }
}

impl Pager {
    /// Doctor-скан всего хранилища.
    pub fn check(&self) -> Result<CheckReport> {
        let report = self.with_region(|r| check_region(r, self.layout()))?;
        if !report.ok() {
            warn!(
                "check {}: {} issue(s) found",
                self.path().display(),
                report.issues.len()
            );
        }
        Ok(report)
    }
}

fn slot_set(layout: &Layout, page: u32, offs: PageOffsets) -> Option<PageSet> {
    [PageSet::A, PageSet::B]
        .into_iter()
        .find(|&set| PageOffsets::in_set(layout, set, page) == offs)
}

pub fn check_region(region: &Region, layout: &Layout) -> Result<CheckReport> {
    let h = meta::read_header(region)?;
    let mut rep = CheckReport {
        pages_total: layout.page_count,
        pages_free_header: h.free_page_count,
        ..Default::default()
    };

    if h.last_free_page_num >= layout.page_count {
        rep.cursor_out_of_range = true;
        rep.issue(format!(
            "cursor {} out of range (page_count={})",
            h.last_free_page_num, layout.page_count
        ));
    }

    for p in 0..layout.page_count {
        let free = match is_page_free(region, layout, p) {
            Ok(free) => Some(free),
            Err(e) => {
                rep.bad_bitmap_entries += 1;
                rep.issue(format!("{:#}", e));
                None
            }
        };
        if free == Some(true) {
            rep.pages_free_counted += 1;
        }
        if let Some(free) = free {
            let owner = page_owner(region, layout, p)?;
            if free == owner.is_some() {
                rep.bad_owners += 1;
                rep.issue(format!(
                    "page {}: {} but owner is {}",
                    p,
                    if free { "free" } else { "allocated" },
                    owner.map(|t| t.to_string()).unwrap_or_else(|| "<none>".to_string())
                ));
            }
        }

        let offs = page::canonical_offsets(region, layout, p)?;
        match slot_set(layout, p, offs) {
            Some(PageSet::A) => rep.pages_in_set_a += 1,
            Some(PageSet::B) => rep.pages_in_set_b += 1,
            None => {
                rep.bad_offsets += 1;
                rep.issue(format!(
                    "page {}: offsets header={} data={} do not name its slot",
                    p, offs.header, offs.data
                ));
                continue;
            }
        }

        match page::read_page_header(region, offs.header) {
            Ok(ph) if ph.data_size > layout.page_data_size => {
                rep.bad_headers += 1;
                rep.issue(format!(
                    "page {}: data_size {} > page size {}",
                    p, ph.data_size, layout.page_data_size
                ));
            }
            Ok(_) => {}
            Err(e) => {
                rep.bad_headers += 1;
                rep.issue(format!("page {}: {:#}", p, e));
            }
        }
    }

    if rep.pages_free_counted != rep.pages_free_header {
        rep.issue(format!(
            "free page count mismatch: header {}, bitmap {}",
            rep.pages_free_header, rep.pages_free_counted
        ));
    }
    Ok(rep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;

    #[test]
    fn slot_set_recognises_both_sets() {
        let l = Layout::new(4, 8);
        assert_eq!(slot_set(&l, 2, PageOffsets::in_set(&l, PageSet::A, 2)), Some(PageSet::A));
        assert_eq!(slot_set(&l, 2, PageOffsets::in_set(&l, PageSet::B, 2)), Some(PageSet::B));
        let mixed = PageOffsets {
            header: l.page_header_off(PageSet::A, 2),
            data: l.page_data_off(PageSet::B, 2),
        };
        assert_eq!(slot_set(&l, 2, mixed), None);
        assert_eq!(slot_set(&l, 1, PageOffsets::in_set(&l, PageSet::A, 2)), None);
    }
}
