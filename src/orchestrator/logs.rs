use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info};

/// Name of the alias that always points at the most recent run directory.
pub const CURRENT_ALIAS: &str = "current";

/// One dated log directory per `stackrig start`.
#[derive(Debug, Clone)]
pub struct RunLogs {
    root: PathBuf,
    dir: PathBuf,
}

impl RunLogs {
    /// Create `root/<YYYY-MM-DD_HH-MM-SS>/` and repoint `root/current` at it.
    pub fn create(root: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;

        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let mut dir = root.join(&stamp);
        let mut n = 1;
        while dir.exists() {
            dir = root.join(format!("{}-{}", stamp, n));
            n += 1;
        }
        std::fs::create_dir_all(&dir)?;

        let logs = Self {
            root: root.to_path_buf(),
            dir,
        };
        logs.update_alias()?;
        info!(dir = %logs.dir.display(), "log directory ready");
        Ok(logs)
    }

    #[cfg(unix)]
    fn update_alias(&self) -> io::Result<()> {
        let alias = self.root.join(CURRENT_ALIAS);
        let tmp = self
            .root
            .join(format!(".{}.{}", CURRENT_ALIAS, std::process::id()));
        let _ = std::fs::remove_file(&tmp);
        // Relative target keeps the tree relocatable.
        let target = self
            .dir
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.dir.clone());
        std::os::unix::fs::symlink(&target, &tmp)?;
        std::fs::rename(&tmp, &alias)
    }

    #[cfg(not(unix))]
    fn update_alias(&self) -> io::Result<()> {
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where a service's output goes: `log` if configured (relative to the
    /// run directory), otherwise `<label>.log`.
    pub fn path_for(&self, label: &str, log: Option<&str>) -> PathBuf {
        match log {
            Some(path) => self.dir.join(crate::platform::expand_home(path)),
            None => self.dir.join(format!("{}.log", label)),
        }
    }
}

/// Rotation-on-restart log file preparation.
pub struct LogSink;

impl LogSink {
    /// Move a previous non-empty log at `path` aside and open a fresh file.
    pub fn prepare(path: &Path) -> io::Result<File> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if let Some(rotated) = Self::rotate(path)? {
            debug!(from = %path.display(), to = %rotated.display(), "rotated log file");
        }

        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
    }

    fn rotate(path: &Path) -> io::Result<Option<PathBuf>> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > 0 => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }

        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let base = path.as_os_str().to_string_lossy().into_owned();
        let mut rotated = PathBuf::from(format!("{}.{}", base, stamp));
        let mut n = 1;
        while rotated.exists() {
            rotated = PathBuf::from(format!("{}.{}-{}", base, stamp, n));
            n += 1;
        }

        std::fs::rename(path, &rotated)?;
        Ok(Some(rotated))
    }
}
