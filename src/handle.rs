//! handle — DataHandle: capability на набор страниц + идентификационная метка.
//!
//! Создаётся только аллокатором. После `free` становится невалидным, любое
//! дальнейшее использование — ошибка (InvalidHandle / HandleAlreadyFreed).
//!
//! Метка выделения (`allocation_tag`) пишется в таблицу владельцев на каждую
//! страницу и не меняется. Копия handle, чьи страницы уже освобождены и выданы
//! заново, с таблицей не совпадает: free/delete/set отвечают HandleAlreadyFreed.

use anyhow::Result;

use crate::error::StoreError;
use crate::tag::IdentityTag;

/// Блок buddy-аллокатора: 2^order страниц, index-й выровненный блок этого порядка.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Segment {
    pub order: u32,
    pub index: u32,
}

impl Segment {
    pub fn pages(&self) -> u32 {
        1u32 << self.order
    }

    pub fn first_page(&self) -> u32 {
        self.index << self.order
    }
}

#[derive(Debug, Clone)]
pub struct DataHandle {
    pages: Vec<u32>,
    issued: IdentityTag,
    tag: IdentityTag,
    valid: bool,
    segment: Option<Segment>,
    pub(crate) owner: u64,
}

impl DataHandle {
    pub(crate) fn new(owner: u64, pages: Vec<u32>, segment: Option<Segment>, issued: IdentityTag) -> Self {
        Self {
            pages,
            issued,
            tag: issued,
            valid: true,
            segment,
            owner,
        }
    }

    /// Номера страниц в порядке возрастания, без повторов.
    pub fn pages(&self) -> &[u32] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn tag(&self) -> IdentityTag {
        self.tag
    }

    pub fn allocation_tag(&self) -> IdentityTag {
        self.issued
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn segment(&self) -> Option<Segment> {
        self.segment
    }

    /// Зарезервированная ёмкость в байтах.
    pub fn capacity(&self, page_data_size: u32) -> usize {
        self.pages.len() * page_data_size as usize
    }

    pub(crate) fn set_tag(&mut self, tag: IdentityTag) {
        self.tag = tag;
    }

    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Проверка перед Get/Set: handle валиден и (для Set) вмещает payload.
    pub fn validate(&self, page_data_size: u32, data: Option<&[u8]>) -> Result<()> {
        if !self.valid {
            return Err(StoreError::InvalidHandle("handle was freed".into()).into());
        }
        if let Some(d) = data {
            let capacity = self.capacity(page_data_size);
            if d.len() > capacity {
                return Err(StoreError::SizeMismatch {
                    capacity,
                    len: d.len(),
                }
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_checks_validity_and_size() {
        let mut h = DataHandle::new(1, vec![0, 1], None, IdentityTag::generate());
        assert!(h.validate(8, Some(&[0u8; 16])).is_ok());

        let err = h.validate(8, Some(&[0u8; 17])).unwrap_err();
        assert_eq!(
            StoreError::of(&err),
            Some(&StoreError::SizeMismatch { capacity: 16, len: 17 })
        );

        h.invalidate();
        let err = h.validate(8, None).unwrap_err();
        assert!(matches!(StoreError::of(&err), Some(StoreError::InvalidHandle(_))));
    }

    #[test]
    fn allocation_tag_survives_retagging() {
        let issued = IdentityTag::generate();
        let mut h = DataHandle::new(1, vec![4], None, issued);
        assert_eq!(h.tag(), issued);
        let next = IdentityTag::generate();
        h.set_tag(next);
        assert_eq!(h.tag(), next);
        assert_eq!(h.allocation_tag(), issued);
    }

    #[test]
    fn segment_geometry() {
        let s = Segment { order: 3, index: 2 };
        assert_eq!(s.pages(), 8);
        assert_eq!(s.first_page(), 16);
    }
}
