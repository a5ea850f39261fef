use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};

use super::model::StackConfig;

/// Parse a `.env` file into key-value pairs.
///
/// Supports: `KEY=VALUE`, `export KEY=VALUE`, `KEY="VALUE"`, `KEY='VALUE'`,
/// `# comments`, blank lines. Returns an empty map if the file does not exist.
pub fn parse_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading .env file {}", path.display()))?;

    parse_env_content(&content)
}

fn parse_env_content(content: &str) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let (key, value) = line
            .split_once('=')
            .map(|(k, v)| (k.trim(), v.trim()))
            .with_context(|| {
                format!(".env line {}: expected KEY=VALUE, got {:?}", idx + 1, line)
            })?;
        if key.is_empty() {
            bail!(".env line {}: empty key", idx + 1);
        }

        vars.insert(key.to_string(), unquote(value).to_string());
    }

    Ok(vars)
}

/// Strip one pair of matching `"` or `'`. A lone quote is returned as is.
fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q)?.strip_suffix(*q))
        .unwrap_or(value)
}

/// Build the environment shared by every child process.
///
/// Precedence, lowest first: `[env]` table, `project.env_file`, then the
/// `--env-file` given on the command line. An explicit `--env-file` that does
/// not exist is an error; a missing `project.env_file` is not.
pub fn build_stack_env(
    config: &StackConfig,
    config_dir: &Path,
    cli_env_file: Option<&Path>,
) -> Result<BTreeMap<String, String>> {
    let mut env = config.env.clone();

    if let Some(file) = &config.project.env_file {
        env.extend(parse_env_file(&config_dir.join(file))?);
    }

    if let Some(path) = cli_env_file {
        if !path.is_file() {
            bail!("env file not found: {}", path.display());
        }
        env.extend(parse_env_file(path)?);
    }

    Ok(env)
}
