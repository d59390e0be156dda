//! space — предварительная проверка свободного места на диске.

use anyhow::{Context, Result};
use std::path::Path;

use crate::error::StoreError;

pub trait SpaceProbe: Send + Sync {
    /// Сколько байт доступно на томе, содержащем `path`.
    fn available_bytes(&self, path: &Path) -> Result<u64>;
}

/// fs2::available_space для каталога файла хранилища.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn available_bytes(&self, path: &Path) -> Result<u64> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs2::available_space(dir).with_context(|| format!("available_space {}", dir.display()))
    }
}

/// Провалиться, если `required * margin` не помещается в доступное место.
pub fn ensure_space(probe: &dyn SpaceProbe, path: &Path, required: u64, margin: f64) -> Result<()> {
    if required == 0 {
        return Ok(());
    }
    let available = probe.available_bytes(path)?;
    let needed = (required as f64 * margin).round();
    if needed >= available as f64 {
        return Err(StoreError::InsufficientStorageSpace {
            required: needed as u64,
            available,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u64);

    impl SpaceProbe for Fixed {
        fn available_bytes(&self, _path: &Path) -> Result<u64> {
            Ok(self.0)
        }
    }

    #[test]
    fn margin_is_applied() {
        let p = Path::new("x/store.bin");
        assert!(ensure_space(&Fixed(1_000), p, 950, 1.1).is_err());
        assert!(ensure_space(&Fixed(1_000), p, 800, 1.1).is_ok());
        assert!(ensure_space(&Fixed(0), p, 0, 1.1).is_ok());

        let err = ensure_space(&Fixed(10), p, 100, 1.1).unwrap_err();
        assert_eq!(
            StoreError::of(&err),
            Some(&StoreError::InsufficientStorageSpace { required: 110, available: 10 })
        );
    }
}
