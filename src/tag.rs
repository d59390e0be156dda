//! tag — идентификационные метки (ticks, counter) для оптимистичной конкурентности.
//!
//! Метка = монотонное время (в 100-нс тиках от UNIX_EPOCH) + процессный атомарный
//! счётчик. Порядок: сначала ticks, затем counter. На странице метка хранится как
//! ASCII-строка "ticks-counter", дополненная нулями до TAG_SIZE байт; поле из одних
//! нулей означает «метки нет» (страница ещё не записывалась).

use anyhow::Result;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::consts::TAG_SIZE;
use crate::error::StoreError;

static LAST_TICKS: AtomicU64 = AtomicU64::new(0);
static SEQ: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityTag {
    ticks: u64,
    seq: u32,
}

impl IdentityTag {
    /// Новая метка; строго больше любой ранее выданной в этом процессе.
    pub fn generate() -> Self {
        let ticks = monotonic_ticks();
        let seq = SEQ.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        Self { ticks, seq }
    }

    pub fn from_parts(ticks: u64, seq: u32) -> Self {
        Self { ticks, seq }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn encode(&self) -> [u8; TAG_SIZE] {
        let mut out = [0u8; TAG_SIZE];
        let s = self.to_string();
        // u64 (20 цифр) + '-' + u32 (10 цифр) = 31 < TAG_SIZE
        out[..s.len()].copy_from_slice(s.as_bytes());
        out
    }

    /// Разобрать поле метки. `Ok(None)` — поле пустое.
    pub fn decode(field: &[u8]) -> Result<Option<Self>> {
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        if end == 0 {
            return Ok(None);
        }
        let text = std::str::from_utf8(&field[..end])
            .map_err(|_| StoreError::Corruption("tag field is not ASCII".into()))?;
        let (t, c) = text
            .split_once('-')
            .ok_or_else(|| StoreError::Corruption(format!("malformed tag '{}'", text)))?;
        let ticks = t
            .parse::<u64>()
            .map_err(|_| StoreError::Corruption(format!("malformed tag ticks '{}'", text)))?;
        let seq = c
            .parse::<u32>()
            .map_err(|_| StoreError::Corruption(format!("malformed tag counter '{}'", text)))?;
        Ok(Some(Self { ticks, seq }))
    }
}

impl fmt::Display for IdentityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ticks, self.seq)
    }
}

/// Время в 100-нс тиках, не убывающее в пределах процесса.
fn monotonic_ticks() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        / 100;
    let now = now.min(u64::MAX as u128) as u64;
    let prev = LAST_TICKS.fetch_max(now, Ordering::Relaxed);
    prev.max(now)
}
