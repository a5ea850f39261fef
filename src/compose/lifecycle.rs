use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Output;
use tracing::{debug, info};

use crate::config::model::InfraConfig;

/// One row of `docker compose ps --format json`.
#[derive(Debug, Deserialize)]
pub struct ComposeService {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Service")]
    pub service: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(default, rename = "Health")]
    pub health: String,
}

/// The compose-managed infrastructure tier, driven through the `docker
/// compose` CLI as a plain up/down switch.
#[derive(Debug, Clone)]
pub struct ComposeStack {
    /// The `docker` binary; replaced by a stub in tests.
    program: PathBuf,
    compose_file: PathBuf,
    project_name: String,
    services: Vec<String>,
    env_file: Option<PathBuf>,
    /// Where `up`/`down` output is appended.
    log_file: Option<PathBuf>,
}

impl ComposeStack {
    pub fn new(infra: &InfraConfig, project_dir: &Path, project_name: &str) -> Self {
        Self {
            program: PathBuf::from("docker"),
            compose_file: project_dir.join(&infra.compose_file),
            project_name: project_name.to_string(),
            services: infra.services.clone(),
            env_file: infra.env_file.as_ref().map(|f| project_dir.join(f)),
            log_file: None,
        }
    }

    pub fn with_log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_program(mut self, program: PathBuf) -> Self {
        self.program = program;
        self
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("compose")
            .arg("-f")
            .arg(&self.compose_file)
            .arg("-p")
            .arg(&self.project_name);
        if let Some(env_file) = &self.env_file {
            cmd.arg("--env-file").arg(env_file);
        }
        cmd
    }

    fn append_log(&self, action: &str, output: &Output) {
        let Some(path) = &self.log_file else {
            return;
        };
        let mut text = format!("== docker compose {} ({})\n", action, output.status);
        text.push_str(&String::from_utf8_lossy(&output.stdout));
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| std::io::Write::write_all(&mut f, text.as_bytes()));
        if let Err(e) = result {
            debug!(path = %path.display(), error = %e, "could not write compose log");
        }
    }

    async fn run(&self, action: &str, args: &[&str]) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(args);
        debug!(project = %self.project_name, "docker compose {}", args.join(" "));

        let output = cmd
            .output()
            .await
            .with_context(|| format!("running docker compose {}", action))?;
        self.append_log(action, &output);

        if !output.status.success() {
            bail!(
                "docker compose {} failed: {}",
                action,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// `docker compose up -d [services...]`
    pub async fn up(&self) -> Result<()> {
        info!(project = %self.project_name, "starting infrastructure");
        let mut args = vec!["up", "-d"];
        args.extend(self.services.iter().map(String::as_str));
        self.run("up", &args).await
    }

    /// `docker compose down --remove-orphans`
    pub async fn down(&self) -> Result<()> {
        info!(project = %self.project_name, "stopping infrastructure");
        self.run("down", &["down", "--remove-orphans"]).await
    }

    pub async fn ps(&self) -> Result<Vec<ComposeService>> {
        let output = self
            .command()
            .args(["ps", "--format", "json"])
            .output()
            .await
            .context("running docker compose ps")?;

        if !output.status.success() {
            bail!(
                "docker compose ps failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_ps_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Compose prints either a JSON array or one object per line, by version.
fn parse_ps_output(stdout: &str) -> Result<Vec<ComposeService>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if let Ok(services) = serde_json::from_str::<Vec<ComposeService>>(trimmed) {
        return Ok(services);
    }
    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).context("parsing docker compose ps output"))
        .collect()
}
