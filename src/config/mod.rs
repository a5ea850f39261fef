pub mod env;
pub mod model;
pub mod resolve;
pub mod validate;

use std::path::Path;

use model::StackConfig;

/// Load and parse a config file, returning the parsed config together with
/// its raw source (used for diagnostics).
pub fn load_config(path: &Path) -> anyhow::Result<(StackConfig, String)> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: StackConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
    Ok((config, content))
}
