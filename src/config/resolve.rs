use std::path::{Path, PathBuf};

use super::model::StackConfig;

pub const CONFIG_FILENAME: &str = "stackrig.toml";

/// Walk up the directory tree from `start`, checking for `filename` at each level.
pub fn find_config(start: &Path, filename: &str) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Resolve the config file path. If `cli_file` is provided, verify it exists and
/// return it canonicalized. Otherwise, search from the current working directory
/// upward for `stackrig.toml`.
pub fn resolve_config(cli_file: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = cli_file {
        if path.is_file() {
            return Ok(path.canonicalize()?);
        }
        anyhow::bail!("Config file not found: {}", path.display());
    }

    let cwd = std::env::current_dir()?;
    find_config(&cwd, CONFIG_FILENAME).ok_or_else(|| {
        anyhow::anyhow!(
            "No {} found in {} or any parent directory",
            CONFIG_FILENAME,
            cwd.display()
        )
    })
}

/// Filesystem locations used by one stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackPaths {
    /// Directory containing the config file; relative paths resolve here.
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,
    pub registry_file: PathBuf,
    /// Parent of the dated per-run log directories.
    pub log_root: PathBuf,
}

impl StackPaths {
    /// Compute paths for a config, honouring the `STACKRIG_LOG_DIR` and
    /// `STACKRIG_REGISTRY` overrides (passed in by the CLI layer).
    pub fn resolve(
        config_path: &Path,
        config: &StackConfig,
        log_dir_override: Option<&Path>,
        registry_override: Option<&Path>,
    ) -> Self {
        let project_dir = config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let state_dir = project_dir.join(".stackrig");

        let registry_file = registry_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| state_dir.join("registry.json"));

        let log_root = match log_dir_override {
            Some(dir) => dir.to_path_buf(),
            None => project_dir.join(crate::platform::expand_home(&config.logs.dir)),
        };

        Self {
            project_dir,
            state_dir,
            registry_file,
            log_root,
        }
    }

    /// Resolve an optional service/setup `path` against the project dir.
    pub fn working_dir(&self, path: Option<&str>) -> PathBuf {
        match path {
            Some(p) => self.project_dir.join(crate::platform::expand_home(p)),
            None => self.project_dir.clone(),
        }
    }
}
