//! pager/io — чтение и запись байтов handle.
//!
//! get    — канонические смещения (вне транзакции);
//! get_in — смещения копий транзакции для тронутых страниц, иначе канонические;
//! set    — только внутри транзакции, через copy-on-write.
//!
//! Каждый `set` ставит на все страницы handle свежую метку и запоминает её в
//! handle. Копия handle, снятая до последнего `set`, держит старую метку и
//! при use_tag получает ConcurrencyConflict.

use anyhow::Result;
use log::debug;

use crate::alloc::{is_page_free, owns_pages};
use crate::error::StoreError;
use crate::handle::DataHandle;
use crate::layout::PageSet;
use crate::metrics::{record_bytes_read, record_bytes_written, record_tag_conflict};
use crate::page::{self, PageHeader, PageOffsets};
use crate::region::Region;
use crate::tag::IdentityTag;
use crate::tx::Transaction;

use super::core::Pager;

/// Каноническая копия одной страницы (doctor/CLI).
#[derive(Debug, Clone, serde::Serialize)]
pub struct PageView {
    pub page: u32,
    pub set: PageSet,
    pub allocated: bool,
    pub tag: Option<String>,
    pub data_size: u32,
    pub data: Vec<u8>,
}

fn conflict(page: u32, expected: IdentityTag, found: Option<IdentityTag>) -> anyhow::Error {
    record_tag_conflict();
    StoreError::ConcurrencyConflict {
        page,
        expected: expected.to_string(),
        found: found.map(|t| t.to_string()).unwrap_or_else(|| "<none>".to_string()),
    }
    .into()
}

impl Pager {
    /// Прочитать данные handle вне транзакции. None — страницы уже свободны
    /// (или выданы другому handle).
    pub fn get(&self, handle: &DataHandle, use_tag: bool) -> Result<Option<Vec<u8>>> {
        self.read_handle(None, handle, use_tag)
    }

    /// Прочитать данные handle так, как их видит транзакция `tx`.
    pub fn get_in(&self, tx: &Transaction, handle: &DataHandle, use_tag: bool) -> Result<Option<Vec<u8>>> {
        self.check_tx(tx)?;
        if tx.is_deleted(handle.pages()) {
            return Ok(None);
        }
        self.read_handle(Some(tx), handle, use_tag)
    }

    /// Записать `data` в страницы handle внутри транзакции.
    pub fn set(&self, tx: &Transaction, handle: &mut DataHandle, data: &[u8], use_tag: bool) -> Result<()> {
        self.check_owner(handle)?;
        self.check_tx(tx)?;
        let pds = self.layout.page_data_size as usize;
        handle.validate(self.layout.page_data_size, Some(data))?;
        if tx.is_deleted(handle.pages()) {
            return Err(StoreError::InvalidHandle("handle was deleted in this transaction".into()).into());
        }

        let tag = self.with_region_mut(|region| {
            if !owns_pages(region, &self.layout, handle)? {
                return Err(StoreError::HandleAlreadyFreed.into());
            }
            if use_tag {
                for &p in handle.pages() {
                    let offs = self.resolve(region, Some(tx), p)?;
                    let h = page::read_page_header(region, offs.header)?;
                    match h.tag {
                        None => {}
                        Some(t) if t == handle.tag() => {}
                        found => return Err(conflict(p, handle.tag(), found)),
                    }
                }
            }

            let offsets = tx.copy_pages_and_fetch_offsets(region, &self.layout, handle.pages())?;
            let tag = IdentityTag::generate();
            for (i, offs) in offsets.iter().enumerate() {
                let start = (i * pds).min(data.len());
                let end = (start + pds).min(data.len());
                let chunk = &data[start..end];
                region.write_bytes(offs.data, chunk)?;
                page::write_page_header(
                    region,
                    offs.header,
                    &PageHeader {
                        tag: Some(tag),
                        data_size: chunk.len() as u32,
                    },
                )?;
            }
            Ok(tag)
        })?;

        handle.set_tag(tag);
        record_bytes_written(data.len());
        debug!("set {} B over {} page(s), tag {}", data.len(), handle.page_count(), tag);
        Ok(())
    }

    /// Заголовок и валидные байты канонической копии страницы `page`.
    pub fn inspect_page(&self, page: u32) -> Result<PageView> {
        self.with_region(|region| {
            let offs = page::canonical_offsets(region, &self.layout, page)?;
            let h = page::read_page_header(region, offs.header)?;
            let len = h.data_size.min(self.layout.page_data_size) as usize;
            Ok(PageView {
                page,
                set: self.layout.set_of(offs.data),
                allocated: !is_page_free(region, &self.layout, page)?,
                tag: h.tag.map(|t| t.to_string()),
                data_size: h.data_size,
                data: region.slice(offs.data, len)?.to_vec(),
            })
        })
    }

    // ---------------- internal ----------------

    fn resolve(&self, region: &Region, tx: Option<&Transaction>, page: u32) -> Result<PageOffsets> {
        match tx.and_then(|t| t.mapped(page)) {
            Some(offs) => Ok(offs),
            None => page::canonical_offsets(region, &self.layout, page),
        }
    }

    fn read_handle(&self, tx: Option<&Transaction>, handle: &DataHandle, use_tag: bool) -> Result<Option<Vec<u8>>> {
        self.check_owner(handle)?;
        handle.validate(self.layout.page_data_size, None)?;
        let pds = self.layout.page_data_size;

        let out = self.with_region(|region| {
            if !owns_pages(region, &self.layout, handle)? {
                return Ok(None);
            }
            let mut out = Vec::with_capacity(handle.capacity(pds));
            for &p in handle.pages() {
                let offs = self.resolve(region, tx, p)?;
                let h = page::read_page_header(region, offs.header)?;
                if use_tag && h.tag != Some(handle.tag()) {
                    return Err(conflict(p, handle.tag(), h.tag));
                }
                if h.data_size > pds {
                    return Err(StoreError::Corruption(format!(
                        "page {} header claims {} B, page holds {}",
                        p, h.data_size, pds
                    ))
                    .into());
                }
                out.extend_from_slice(region.slice(offs.data, h.data_size as usize)?);
            }
            Ok(Some(out))
        })?;

        if let Some(ref bytes) = out {
            record_bytes_read(bytes.len());
        }
        Ok(out)
    }
}
