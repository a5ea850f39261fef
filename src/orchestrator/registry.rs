use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::platform::SignalTarget;

/// Identity of one live launch of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub label: String,
    /// PID of the group leader (the direct child).
    pub group_id: i32,
    /// Whether `group_id` names a process group or just a single process.
    pub grouped: bool,
    pub started_at: DateTime<Utc>,
    pub attempt: u32,
    #[serde(default)]
    pub last_exit_code: Option<i32>,
}

impl ProcessRecord {
    pub fn target(&self) -> SignalTarget {
        SignalTarget {
            pid: self.group_id,
            group: self.grouped,
        }
    }
}

/// On-disk mirror, read by `stackrig stop` and `stackrig ps`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFile {
    pub owner_pid: u32,
    #[serde(default)]
    pub records: BTreeMap<String, ProcessRecord>,
}

impl RegistryFile {
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable registry file");
                None
            }
        }
    }

    fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _lock = lock_file(path);
        let content = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Records whose process (group) is still alive.
    pub fn live_records(&self) -> Vec<&ProcessRecord> {
        self.records
            .values()
            .filter(|r| crate::platform::is_target_alive(r.target()))
            .collect()
    }
}

/// Take an exclusive `flock` on `<path>.lock`, released when the handle drops.
fn lock_file(path: &Path) -> Option<std::fs::File> {
    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");
    let lock_path = PathBuf::from(lock_path);
    let lock_file = match std::fs::File::create(&lock_path) {
        Ok(file) => file,
        Err(e) => {
            warn!(
                path = %lock_path.display(),
                error = %e,
                "cannot create registry lock, writing unlocked"
            );
            return None;
        }
    };

    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: fd is valid for the lifetime of lock_file
        let rc = unsafe { libc::flock(lock_file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            let e = std::io::Error::last_os_error();
            warn!(
                path = %lock_path.display(),
                error = %e,
                "cannot lock registry, writing unlocked"
            );
            return None;
        }
    }

    Some(lock_file)
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("registry is sealed: shutdown in progress")]
pub struct RegistrySealed;

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<String, ProcessRecord>,
    sealed: bool,
}

/// Label to process-group map shared by every supervisor and the shutdown
/// coordinator. Each mutation rewrites the mirror file while the mutex is
/// held, so the file never lags behind a reader that already saw memory.
#[derive(Debug)]
pub struct Registry {
    inner: Mutex<Inner>,
    mirror: Option<PathBuf>,
    owner_pid: u32,
}

impl Registry {
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            mirror: None,
            owner_pid: std::process::id(),
        }
    }

    /// An empty registry mirrored to `path`. The file is rewritten right away
    /// so a stale mirror from an earlier run cannot be mistaken for this one.
    pub fn with_mirror(path: &Path) -> Self {
        let registry = Self {
            inner: Mutex::new(Inner::default()),
            mirror: Some(path.to_path_buf()),
            owner_pid: std::process::id(),
        };
        registry.persist(&registry.lock());
        registry
    }

    /// Rebuild a registry from a mirror file written by another invocation.
    pub fn from_file(path: &Path) -> Self {
        let file = RegistryFile::load(path).unwrap_or_default();
        Self {
            inner: Mutex::new(Inner {
                records: file.records,
                sealed: false,
            }),
            mirror: Some(path.to_path_buf()),
            owner_pid: file.owner_pid,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, inner: &Inner) {
        let Some(path) = &self.mirror else {
            return;
        };
        let file = RegistryFile {
            owner_pid: self.owner_pid,
            records: inner.records.clone(),
        };
        if let Err(e) = file.save(path) {
            warn!(path = %path.display(), error = %e, "failed to write registry file");
        }
    }

    /// Insert or overwrite the record for `record.label`.
    pub fn record(&self, record: ProcessRecord) -> Result<(), RegistrySealed> {
        let mut inner = self.lock();
        if inner.sealed {
            return Err(RegistrySealed);
        }
        debug!(
            service = %record.label,
            group = record.group_id,
            attempt = record.attempt,
            "registry updated"
        );
        inner.records.insert(record.label.clone(), record);
        self.persist(&inner);
        Ok(())
    }

    /// Drop the entry for `label` if it still refers to `group_id`.
    pub fn remove(&self, label: &str, group_id: i32) {
        let mut inner = self.lock();
        if inner.sealed {
            return;
        }
        if inner.records.get(label).is_some_and(|r| r.group_id == group_id) {
            inner.records.remove(label);
            self.persist(&inner);
        }
    }

    /// Stop accepting new records and return what is currently tracked.
    pub fn seal_and_snapshot(&self) -> Vec<ProcessRecord> {
        let mut inner = self.lock();
        inner.sealed = true;
        inner.records.values().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<ProcessRecord> {
        self.lock().records.values().cloned().collect()
    }

    /// Forget every record and delete the mirror file.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.records.clear();
        if let Some(path) = &self.mirror {
            let _lock = lock_file(path);
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove registry file");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(label: &str, group_id: i32, attempt: u32) -> ProcessRecord {
        ProcessRecord {
            label: label.to_string(),
            group_id,
            grouped: true,
            started_at: Utc::now(),
            attempt,
            last_exit_code: None,
        }
    }

    #[test]
    fn relaunch_overwrites_by_label() {
        let registry = Registry::in_memory();
        registry.record(record("core", 100, 1)).unwrap();
        registry.record(record("sentinels", 200, 1)).unwrap();
        registry.record(record("core", 101, 2)).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        let core = snapshot.iter().find(|r| r.label == "core").unwrap();
        assert_eq!(core.group_id, 101);
        assert_eq!(core.attempt, 2);
    }

    #[test]
    fn concurrent_writers_keep_one_entry_per_label() {
        let registry = Arc::new(Registry::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for attempt in 1..=50 {
                        let label = if i % 2 == 0 { "core" } else { "strikers" };
                        registry.record(record(label, i * 1000 + attempt as i32, attempt)).unwrap();
                        assert!(registry.snapshot().len() <= 2);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn sealed_registry_rejects_new_records() {
        let registry = Registry::in_memory();
        registry.record(record("core", 100, 1)).unwrap();

        let snapshot = registry.seal_and_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.record(record("core", 101, 2)), Err(RegistrySealed));
        assert_eq!(registry.snapshot()[0].group_id, 100);
    }

    #[test]
    fn remove_ignores_stale_group() {
        let registry = Registry::in_memory();
        registry.record(record("core", 101, 2)).unwrap();
        registry.remove("core", 100);
        assert_eq!(registry.snapshot().len(), 1);
        registry.remove("core", 101);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn mirror_file_tracks_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("registry.json");

        let registry = Registry::with_mirror(&path);
        assert!(path.exists());
        registry.record(record("core", 100, 1)).unwrap();
        registry.record(record("core", 101, 2)).unwrap();

        let file = RegistryFile::load(&path).unwrap();
        assert_eq!(file.owner_pid, std::process::id());
        assert_eq!(file.records.len(), 1);
        assert_eq!(file.records["core"].group_id, 101);

        let reloaded = Registry::from_file(&path);
        assert_eq!(reloaded.snapshot(), registry.snapshot());

        registry.clear();
        assert!(!path.exists());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn garbage_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "core:1234\n").unwrap();
        assert!(RegistryFile::load(&path).is_none());
        assert!(Registry::from_file(&path).snapshot().is_empty());
    }

    #[test]
    fn unlockable_mirror_still_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        // A directory where the lock file should go makes `create` fail
        std::fs::create_dir(dir.path().join("registry.json.lock")).unwrap();

        assert!(lock_file(&path).is_none());
        let registry = Registry::with_mirror(&path);
        registry.record(record("core", 100, 1)).unwrap();
        let file = RegistryFile::load(&path).unwrap();
        assert_eq!(file.records["core"].group_id, 100);
    }
}
