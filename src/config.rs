//! Centralized configuration and builder for MapPager.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - PagerConfig::from_env() reads MP_* env vars; the builder starts from env
//!   and allows overrides (from_default() skips env entirely).
//!
//! Env:
//! - MP_PAGE_DATA_SIZE  — bytes per page (default 8)
//! - MP_CAPACITY        — data capacity in bytes for new storage (default 8 GiB)
//! - MP_LOCK_TIMEOUT_MS — allocation lock timeout, 0 = wait forever (default 60000)
//! - MP_SCAN_WRAP       — bitmap scan wraps to page 0 (default off)
//! - MP_ALLOCATOR       — bitmap|segment (default bitmap)
//! - MP_LOCK_MODE       — file|process (default file)
//! - MP_SPACE_CHECK     — disk-space preflight on create (default on)

use std::fmt;
use std::time::Duration;

use crate::alloc::AllocatorKind;
use crate::consts::{DEFAULT_CAPACITY, DEFAULT_LOCK_TIMEOUT, DEFAULT_PAGE_DATA_SIZE, FREE_SPACE_MARGIN};
use crate::lock::LockMode;

#[derive(Clone, Debug, PartialEq)]
pub struct PagerConfig {
    /// Bytes of data per page; fixed at creation, checked on reopen.
    pub page_data_size: u32,

    /// Requested data capacity for a new storage (page_count = capacity / page_data_size).
    /// Ignored on reopen: the stored page count wins.
    pub capacity: u64,

    /// Timeout for the allocation lock (allocate/free/commit). None = wait forever.
    pub lock_timeout: Option<Duration>,

    /// Continue the free-page scan from page 0 after reaching the end.
    pub scan_wrap: bool,

    pub allocator: AllocatorKind,

    pub lock_mode: LockMode,

    /// Disk-space preflight before creating/growing the file.
    pub space_check: bool,
    pub space_margin: f64,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            page_data_size: DEFAULT_PAGE_DATA_SIZE,
            capacity: DEFAULT_CAPACITY,
            lock_timeout: Some(DEFAULT_LOCK_TIMEOUT),
            scan_wrap: false,
            allocator: AllocatorKind::Bitmap,
            lock_mode: LockMode::File,
            space_check: true,
            space_margin: FREE_SPACE_MARGIN,
        }
    }
}

fn env_flag(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}

impl PagerConfig {
    /// Load configuration from environment variables on top of defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("MP_PAGE_DATA_SIZE") {
            if let Ok(n) = v.trim().parse::<u32>() {
                if n > 0 {
                    cfg.page_data_size = n;
                }
            }
        }

        if let Ok(v) = std::env::var("MP_CAPACITY") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.capacity = n;
            }
        }

        if let Ok(v) = std::env::var("MP_LOCK_TIMEOUT_MS") {
            if let Ok(ms) = v.trim().parse::<u64>() {
                cfg.lock_timeout = if ms == 0 {
                    None
                } else {
                    Some(Duration::from_millis(ms))
                };
            }
        }

        if let Ok(v) = std::env::var("MP_SCAN_WRAP") {
            cfg.scan_wrap = env_flag(&v);
        }

        if let Ok(v) = std::env::var("MP_ALLOCATOR") {
            if let Ok(kind) = v.parse::<AllocatorKind>() {
                cfg.allocator = kind;
            }
        }

        if let Ok(v) = std::env::var("MP_LOCK_MODE") {
            match v.trim().to_ascii_lowercase().as_str() {
                "file" => cfg.lock_mode = LockMode::File,
                "process" => cfg.lock_mode = LockMode::Process,
                _ => {}
            }
        }

        if let Ok(v) = std::env::var("MP_SPACE_CHECK") {
            cfg.space_check = env_flag(&v);
        }

        cfg
    }

    pub fn with_page_data_size(mut self, n: u32) -> Self {
        self.page_data_size = n;
        self
    }

    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = bytes;
        self
    }

    pub fn with_lock_timeout(mut self, t: Option<Duration>) -> Self {
        self.lock_timeout = t;
        self
    }

    pub fn with_scan_wrap(mut self, on: bool) -> Self {
        self.scan_wrap = on;
        self
    }

    pub fn with_allocator(mut self, kind: AllocatorKind) -> Self {
        self.allocator = kind;
        self
    }

    pub fn with_lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }

    pub fn with_space_check(mut self, on: bool) -> Self {
        self.space_check = on;
        self
    }
}

impl fmt::Display for PagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PagerConfig {{ \
             page_data_size: {}, \
             capacity: {}, \
             lock_timeout: {}, \
             scan_wrap: {}, \
             allocator: {}, \
             lock_mode: {:?}, \
             space_check: {} (margin {}) \
             }}",
            self.page_data_size,
            self.capacity,
            self.lock_timeout
                .map(|t| format!("{}ms", t.as_millis()))
                .unwrap_or_else(|| "infinite".to_string()),
            self.scan_wrap,
            self.allocator,
            self.lock_mode,
            self.space_check,
            self.space_margin,
        )
    }
}

/// Lightweight builder that produces a PagerConfig.
#[derive(Clone, Debug)]
pub struct PagerBuilder {
    cfg: PagerConfig,
}

impl Default for PagerBuilder {
    fn default() -> Self {
        // Start from env, then allow overrides.
        Self {
            cfg: PagerConfig::from_env(),
        }
    }
}

impl PagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: PagerConfig::default(),
        }
    }

    pub fn page_data_size(mut self, n: u32) -> Self {
        self.cfg.page_data_size = n;
        self
    }

    pub fn capacity(mut self, bytes: u64) -> Self {
        self.cfg.capacity = bytes;
        self
    }

    pub fn lock_timeout(mut self, t: Option<Duration>) -> Self {
        self.cfg.lock_timeout = t;
        self
    }

    pub fn scan_wrap(mut self, on: bool) -> Self {
        self.cfg.scan_wrap = on;
        self
    }

    pub fn allocator(mut self, kind: AllocatorKind) -> Self {
        self.cfg.allocator = kind;
        self
    }

    pub fn lock_mode(mut self, mode: LockMode) -> Self {
        self.cfg.lock_mode = mode;
        self
    }

    pub fn space_check(mut self, on: bool) -> Self {
        self.cfg.space_check = on;
        self
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> PagerConfig {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_storage_constants() {
        let c = PagerConfig::default();
        assert_eq!(c.page_data_size, 8);
        assert_eq!(c.capacity, 8 * 1024 * 1024 * 1024);
        assert_eq!(c.lock_timeout, Some(Duration::from_millis(60_000)));
        assert!(!c.scan_wrap);
        assert_eq!(c.allocator, AllocatorKind::Bitmap);
        assert_eq!(c.lock_mode, LockMode::File);
        assert!(c.space_check);
    }

    #[test]
    fn builder_overrides() {
        let c = PagerBuilder::from_default()
            .page_data_size(16)
            .capacity(4096)
            .lock_timeout(None)
            .scan_wrap(true)
            .allocator(AllocatorKind::Segment)
            .lock_mode(LockMode::Process)
            .space_check(false)
            .build();
        assert_eq!(c.page_data_size, 16);
        assert_eq!(c.capacity, 4096);
        assert_eq!(c.lock_timeout, None);
        assert!(c.scan_wrap);
        assert_eq!(c.allocator, AllocatorKind::Segment);
        assert_eq!(c.lock_mode, LockMode::Process);
        assert!(!c.space_check);
        assert!(c.to_string().contains("lock_timeout: infinite"));
    }

    #[test]
    fn fluent_setters_equal_builder() {
        let a = PagerConfig::default().with_capacity(256).with_scan_wrap(true);
        let b = PagerBuilder::from_default().capacity(256).scan_wrap(true).build();
        assert_eq!(a, b);
    }

    #[test]
    fn env_flag_values() {
        assert!(env_flag("1"));
        assert!(env_flag(" Yes "));
        assert!(env_flag("ON"));
        assert!(!env_flag("0"));
        assert!(!env_flag("off"));
    }
}
