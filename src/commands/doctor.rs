use anyhow::Result;
use std::path::Path;
use std::process::Command;

use crate::config;
use crate::config::resolve::resolve_config;
use crate::platform;

/// Prerequisites that are not on `PATH`, in the order given.
pub fn missing_binaries(required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|bin| platform::which(bin).is_none())
        .cloned()
        .collect()
}

fn version_of(bin: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(bin).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    // Some tools print their version on stderr
    let text = if stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).trim().to_string()
    } else {
        stdout
    };
    Some(text.lines().next().unwrap_or_default().to_string())
}

pub fn run(config_file: Option<&Path>) -> Result<()> {
    println!("stackrig doctor");
    println!("===============");
    println!();

    // Without a config only the compose toolchain is checked.
    let stack = resolve_config(config_file)
        .ok()
        .and_then(|path| config::load_config(&path).ok())
        .map(|(config, _)| config);

    let mut required = stack
        .as_ref()
        .map(|c| c.prerequisites.clone())
        .unwrap_or_default();
    let needs_compose = stack.as_ref().map_or(true, |c| c.infra.is_some());
    if needs_compose && !required.iter().any(|p| p == "docker") {
        required.push("docker".to_string());
    }

    let mut all_ok = true;
    for bin in &required {
        match platform::which(bin) {
            Some(path) => {
                let detail = version_of(bin, &["--version"])
                    .unwrap_or_else(|| path.display().to_string());
                println!("  [ok] {:<16} {}", bin, detail);
            }
            None => {
                println!("  [!!] {:<16} not found", bin);
                all_ok = false;
            }
        }
    }

    if needs_compose {
        match version_of("docker", &["compose", "version"]) {
            Some(version) => println!("  [ok] {:<16} {}", "docker compose", version),
            None => {
                println!("  [!!] {:<16} not available", "docker compose");
                all_ok = false;
            }
        }
    }

    println!();
    if all_ok {
        println!("All prerequisites found.");
    } else {
        println!("Some prerequisites are missing. `stackrig start` will refuse to run.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_only_missing_binaries() {
        let required = vec![
            "sh".to_string(),
            "stackrig-definitely-not-installed".to_string(),
        ];
        assert_eq!(
            missing_binaries(&required),
            vec!["stackrig-definitely-not-installed".to_string()]
        );
        assert!(missing_binaries(&[]).is_empty());
    }
}
