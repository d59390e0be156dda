//! Именованные блокировки (allocation lock / transaction lock).
//!
//! Две реализации за одним trait'ом:
//! - FileLock: межпроцессная advisory-блокировка (fs2) на файле
//!   `<storage>.<suffix>` + внутрипроцессный gate, чтобы потоки одного процесса
//!   тоже исключали друг друга (flock на одном fd их не различает).
//! - ProcessLock: только внутри процесса (parking_lot Mutex + Condvar).
//!
//! Экземпляры ProcessLock (и gate у FileLock) берутся из процессного реестра по
//! имени: два Pager на одном файле в одном процессе делят одну и ту же блокировку.
//!
//! Ожидание ограничено таймаутом (`None` — ждать бесконечно).
//! LockGuard освобождает блокировку на Drop; повторный release — no-op.

use anyhow::{Context, Result};
use fs2::FileExt;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use crate::error::StoreError;

// Backoff между попытками try_lock для файловой блокировки.
const POLL_MIN: Duration = Duration::from_millis(1);
const POLL_MAX: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum LockMode {
    /// fs2 advisory lock file (межпроцессная).
    File,
    /// Только внутри процесса.
    Process,
}

pub trait NamedLock: Send + Sync {
    fn name(&self) -> &str;

    /// Захватить блокировку, ожидая не дольше `timeout`.
    fn acquire(&self, timeout: Option<Duration>) -> Result<()>;

    fn release(&self);
}

/// RAII-гард над `NamedLock`.
pub struct LockGuard {
    lock: Arc<dyn NamedLock>,
    held: bool,
}

impl LockGuard {
    pub fn acquire(lock: Arc<dyn NamedLock>, timeout: Option<Duration>) -> Result<Self> {
        lock.acquire(timeout)?;
        Ok(Self { lock, held: true })
    }

    pub fn name(&self) -> &str {
        self.lock.name()
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn release(&mut self) {
        if self.held {
            self.held = false;
            self.lock.release();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------- ProcessLock ----------------

static PROCESS_LOCKS: OnceLock<Mutex<HashMap<String, Weak<ProcessLock>>>> = OnceLock::new();

pub struct ProcessLock {
    name: String,
    locked: Mutex<bool>,
    cv: Condvar,
}

impl ProcessLock {
    /// Отдельная блокировка, ни с кем не разделяемая.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            locked: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Блокировка из процессного реестра: одно имя — один экземпляр, пока
    /// на него есть ссылки.
    pub fn shared(name: &str) -> Arc<ProcessLock> {
        let mut registry = PROCESS_LOCKS.get_or_init(|| Mutex::new(HashMap::new())).lock();
        if let Some(lock) = registry.get(name).and_then(Weak::upgrade) {
            return lock;
        }
        registry.retain(|_, w| w.strong_count() > 0);
        let lock = Arc::new(ProcessLock::new(name));
        registry.insert(name.to_string(), Arc::downgrade(&lock));
        lock
    }
}

impl NamedLock for ProcessLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn acquire(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut locked = self.locked.lock();
        while *locked {
            match deadline {
                None => self.cv.wait(&mut locked),
                Some(d) => {
                    if self.cv.wait_until(&mut locked, d).timed_out() && *locked {
                        return Err(StoreError::LockTimeout {
                            name: self.name.clone(),
                            timeout: timeout.unwrap_or_default(),
                        }
                        .into());
                    }
                }
            }
        }
        *locked = true;
        Ok(())
    }

    fn release(&self) {
        let mut locked = self.locked.lock();
        *locked = false;
        self.cv.notify_one();
    }
}

// ---------------- FileLock ----------------

pub struct FileLock {
    name: String,
    path: PathBuf,
    gate: Arc<ProcessLock>,
    file: Mutex<Option<File>>,
}

impl FileLock {
    /// Lock-файл `<storage>.<suffix>` рядом с файлом хранилища.
    pub fn for_storage(storage: &Path, suffix: &str) -> Self {
        let path = suffixed(storage, suffix);
        let name = path.display().to_string();
        Self {
            gate: ProcessLock::shared(&lock_key(storage, suffix)),
            name,
            path,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_lock_file(&self) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)
            .with_context(|| format!("open lock file {}", self.path.display()))
    }

    fn timeout_err(&self, timeout: Option<Duration>) -> anyhow::Error {
        StoreError::LockTimeout {
            name: self.name.clone(),
            timeout: timeout.unwrap_or_default(),
        }
        .into()
    }
}

impl NamedLock for FileLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn acquire(&self, timeout: Option<Duration>) -> Result<()> {
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);

        // 1) внутрипроцессный gate
        self.gate.acquire(timeout)?;

        let file = match self.open_lock_file() {
            Ok(f) => f,
            Err(e) => {
                self.gate.release();
                return Err(e);
            }
        };

        // 2) межпроцессный flock; без таймаута — блокирующий вызов
        if deadline.is_none() {
            if let Err(e) = file.lock_exclusive() {
                self.gate.release();
                return Err(e).with_context(|| format!("lock_exclusive {}", self.path.display()));
            }
        } else {
            let mut pause = POLL_MIN;
            loop {
                match file.try_lock_exclusive() {
                    Ok(()) => break,
                    Err(_) => {
                        let now = Instant::now();
                        if deadline.map_or(false, |d| now >= d) {
                            self.gate.release();
                            warn!(
                                "lock {}: not acquired within {:?}",
                                self.name,
                                timeout.unwrap_or_default()
                            );
                            return Err(self.timeout_err(timeout));
                        }
                        let left = deadline.map_or(pause, |d| d - now);
                        std::thread::sleep(pause.min(left));
                        pause = (pause * 2).min(POLL_MAX);
                    }
                }
            }
        }

        debug!("lock {} acquired in {:?}", self.name, started.elapsed());
        *self.file.lock() = Some(file);
        Ok(())
    }

    fn release(&self) {
        if let Some(f) = self.file.lock().take() {
            // ошибки unlock при освобождении игнорируем (как и при Drop файла)
            let _ = f.unlock();
        }
        self.gate.release();
    }
}

fn suffixed(storage: &Path, suffix: &str) -> PathBuf {
    let mut os = storage.as_os_str().to_owned();
    os.push(".");
    os.push(suffix);
    PathBuf::from(os)
}

/// Имя блокировки в процессном реестре. Каталог канонизируется (сам файл может
/// ещё не существовать), чтобы `./a/store.bin` и `/abs/a/store.bin` совпали.
fn lock_key(storage: &Path, suffix: &str) -> String {
    let dir = match storage.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let canonical = match (std::fs::canonicalize(dir), storage.file_name()) {
        (Ok(d), Some(f)) => d.join(f),
        _ => storage.to_path_buf(),
    };
    suffixed(&canonical, suffix).display().to_string()
}

/// Собрать пару именованных блокировок для хранилища.
pub fn storage_locks(
    storage: &Path,
    mode: LockMode,
    change_suffix: &str,
    tx_suffix: &str,
) -> (Arc<dyn NamedLock>, Arc<dyn NamedLock>) {
    match mode {
        LockMode::File => (
            Arc::new(FileLock::for_storage(storage, change_suffix)),
            Arc::new(FileLock::for_storage(storage, tx_suffix)),
        ),
        LockMode::Process => (
            ProcessLock::shared(&lock_key(storage, change_suffix)),
            ProcessLock::shared(&lock_key(storage, tx_suffix)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_lock_times_out_while_held() -> Result<()> {
        let lock: Arc<dyn NamedLock> = Arc::new(ProcessLock::new("t"));
        let _g = LockGuard::acquire(lock.clone(), None)?;
        let err = LockGuard::acquire(lock.clone(), Some(Duration::from_millis(20)))
            .err()
            .expect("second acquire must time out");
        assert!(matches!(
            StoreError::of(&err),
            Some(StoreError::LockTimeout { .. })
        ));
        Ok(())
    }

    #[test]
    fn release_is_idempotent_and_reacquirable() -> Result<()> {
        let lock: Arc<dyn NamedLock> = Arc::new(ProcessLock::new("t2"));
        let mut g = LockGuard::acquire(lock.clone(), Some(Duration::from_millis(10)))?;
        g.release();
        g.release();
        assert!(!g.is_held());
        let g2 = LockGuard::acquire(lock.clone(), Some(Duration::from_millis(10)))?;
        drop(g2);
        drop(g);
        let _g3 = LockGuard::acquire(lock, Some(Duration::from_millis(10)))?;
        Ok(())
    }

    #[test]
    fn shared_locks_with_same_name_exclude_each_other() -> Result<()> {
        let a: Arc<dyn NamedLock> = ProcessLock::shared("registry-t4");
        let b: Arc<dyn NamedLock> = ProcessLock::shared("registry-t4");
        let _g = LockGuard::acquire(a, None)?;
        let err = LockGuard::acquire(b.clone(), Some(Duration::from_millis(20)))
            .err()
            .expect("same name must be the same lock");
        assert!(matches!(
            StoreError::of(&err),
            Some(StoreError::LockTimeout { .. })
        ));

        let other: Arc<dyn NamedLock> = ProcessLock::shared("registry-t5");
        let _g2 = LockGuard::acquire(other, Some(Duration::from_millis(20)))?;
        Ok(())
    }

    #[test]
    fn lock_key_ignores_path_spelling() {
        let dir = std::env::temp_dir();
        let plain = dir.join("store.bin");
        let dotted = dir.join(".").join("store.bin");
        assert_eq!(lock_key(&plain, "tx.lock"), lock_key(&dotted, "tx.lock"));
        assert_ne!(lock_key(&plain, "tx.lock"), lock_key(&plain, "changes.lock"));
    }

    #[test]
    fn waiter_wakes_after_release() -> Result<()> {
        let lock: Arc<dyn NamedLock> = Arc::new(ProcessLock::new("t3"));
        let g = LockGuard::acquire(lock.clone(), None)?;
        let l2 = lock.clone();
        let h = std::thread::spawn(move || LockGuard::acquire(l2, Some(Duration::from_secs(5))).map(|_| ()));
        std::thread::sleep(Duration::from_millis(20));
        drop(g);
        h.join().expect("thread panicked")?;
        Ok(())
    }
}
