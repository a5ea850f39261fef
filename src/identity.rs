use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::config::model::StackConfig;

/// Stable identity of one checkout of a stack, derived from its config path.
#[derive(Debug, Clone)]
pub struct ProjectIdentity {
    pub name: String,
    /// First 8 hex chars of SHA-256 over the canonical config path.
    pub id: String,
    pub config_path: PathBuf,
}

pub fn compute_project_id(path: &Path) -> String {
    let hash = Sha256::digest(path.to_string_lossy().as_bytes());
    hex::encode(&hash[..4])
}

impl ProjectIdentity {
    pub fn from_config(config: &StackConfig, config_path: &Path) -> anyhow::Result<Self> {
        let canonical = config_path.canonicalize()?;
        Ok(Self {
            name: config.project.name.clone(),
            id: compute_project_id(&canonical),
            config_path: canonical,
        })
    }

    /// Compose project name: lowercase `[a-z0-9_-]`, suffixed with the id so
    /// two checkouts of the same stack never share containers.
    pub fn compose_project(&self) -> String {
        let name: String = self
            .name
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let name = name.trim_matches('-');
        if name.is_empty() {
            format!("stackrig-{}", self.id)
        } else {
            format!("{}-{}", name, self.id)
        }
    }
}
