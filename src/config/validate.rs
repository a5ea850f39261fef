// The miette/thiserror derive macros generate code that triggers false
// positive unused_assignments warnings on enum variant fields.
#![allow(unused_assignments)]

use std::collections::HashSet;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::config::model::{HealthCheck, StackConfig};

// ---------------------------------------------------------------------------
// ConfigDiagnostic: miette-powered validation error
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigDiagnostic {
    #[error("service `{name}` is declared more than once")]
    #[diagnostic(
        code(stackrig::duplicate_service),
        help("service names are registry keys and must be unique")
    )]
    DuplicateService {
        #[source_code]
        src: NamedSource<String>,
        #[label("second declaration")]
        span: SourceSpan,
        name: String,
    },

    #[error("service name `{name}` contains unsupported characters")]
    #[diagnostic(
        code(stackrig::invalid_service_name),
        help("use letters, digits, `-` and `_` only")
    )]
    InvalidServiceName {
        #[source_code]
        src: NamedSource<String>,
        #[label("invalid name")]
        span: SourceSpan,
        name: String,
    },

    #[error("service `{service}` has an empty command")]
    #[diagnostic(code(stackrig::empty_command))]
    EmptyCommand {
        #[source_code]
        src: NamedSource<String>,
        #[label("command is empty")]
        span: SourceSpan,
        service: String,
    },

    #[error("setup step `{step}` has an empty command")]
    #[diagnostic(code(stackrig::empty_setup_command))]
    EmptySetupCommand {
        #[source_code]
        src: NamedSource<String>,
        #[label("command is empty")]
        span: SourceSpan,
        step: String,
    },

    #[error("infra.compose_file is empty")]
    #[diagnostic(code(stackrig::empty_compose_file))]
    EmptyComposeFile {
        #[source_code]
        src: NamedSource<String>,
        #[label("file path is empty")]
        span: SourceSpan,
    },

    #[error("health check for `{owner}` has an invalid URL `{url}`")]
    #[diagnostic(
        code(stackrig::invalid_health_url),
        help("HTTP health checks need an http:// or https:// URL")
    )]
    InvalidHealthUrl {
        #[source_code]
        src: NamedSource<String>,
        #[label("not an HTTP URL")]
        span: SourceSpan,
        owner: String,
        url: String,
    },

    #[error("health check for `{owner}` uses port 0")]
    #[diagnostic(code(stackrig::invalid_health_port))]
    InvalidHealthPort {
        #[source_code]
        src: NamedSource<String>,
        #[label("port must be 1-65535")]
        span: SourceSpan,
        owner: String,
    },

    #[error("shutdown.orphan_patterns entry {index} is blank")]
    #[diagnostic(
        code(stackrig::blank_orphan_pattern),
        help("a blank pattern matches every process on the machine")
    )]
    BlankOrphanPattern {
        #[source_code]
        src: NamedSource<String>,
        #[label("blank pattern")]
        span: SourceSpan,
        index: usize,
    },

    #[error("shutdown.ports contains port 0")]
    #[diagnostic(code(stackrig::invalid_shutdown_port))]
    InvalidShutdownPort {
        #[source_code]
        src: NamedSource<String>,
        #[label("port must be 1-65535")]
        span: SourceSpan,
    },
}

// ---------------------------------------------------------------------------
// Source span helpers
// ---------------------------------------------------------------------------

/// Find the `nth` (0-based) occurrence of `name = "<value>"` and span the value.
fn find_name_span(source: &str, value: &str, nth: usize) -> SourceSpan {
    let quoted = format!("\"{}\"", value);
    let mut from = 0;
    let mut seen = 0;
    while let Some(rel) = source[from..].find(&quoted) {
        let pos = from + rel;
        let line_start = source[..pos].rfind('\n').map(|p| p + 1).unwrap_or(0);
        let key = source[line_start..pos].trim();
        if key.starts_with("name") && key.ends_with('=') {
            if seen == nth {
                return (pos + 1, value.len()).into();
            }
            seen += 1;
        }
        from = pos + quoted.len();
    }
    (0, 0).into()
}

/// Span the value of `field` in the table that declares `name = "<owner>"`
/// (or in a `[<owner>]`-style header when `owner` is a table path).
fn find_field_span(source: &str, owner: &str, field: &str) -> SourceSpan {
    let anchor = source
        .find(&format!("\"{}\"", owner))
        .or_else(|| source.find(&format!("[{}]", owner)))
        .unwrap_or(0);
    let after = &source[anchor..];

    for prefix in [format!("{} =", field), format!("{}=", field)] {
        if let Some(rel) = after.find(&prefix) {
            let eq = anchor + rel + prefix.len();
            let rest = &source[eq..];
            let trimmed = rest.trim_start();
            let start = eq + (rest.len() - trimmed.len());
            let len = trimmed.find('\n').unwrap_or(trimmed.len());
            return (start, len).into();
        }
    }

    (anchor, owner.len()).into()
}

// ---------------------------------------------------------------------------
// Similarity suggestions
// ---------------------------------------------------------------------------

pub fn find_closest_match<'a>(name: &str, candidates: &'a [String]) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for candidate in candidates {
        let score = strsim::jaro_winkler(name, candidate);
        if score >= 0.8 && best.is_none_or(|(_, s)| score > s) {
            best = Some((candidate.as_str(), score));
        }
    }
    best.map(|(name, _)| name)
}

/// Reject `--no-<name>` for unknown or non-optional services.
pub fn check_disabled(config: &StackConfig, disabled: &[String]) -> anyhow::Result<()> {
    let names: Vec<String> = config.services.iter().map(|s| s.name.clone()).collect();
    for name in disabled {
        match config.services.iter().find(|s| &s.name == name) {
            Some(svc) if svc.optional => {}
            Some(_) => anyhow::bail!(
                "service `{}` is not optional and cannot be disabled with --no-{}",
                name,
                name
            ),
            None => {
                let hint = find_closest_match(name, &names)
                    .map(|m| format!(" (did you mean `{}`?)", m))
                    .unwrap_or_default();
                anyhow::bail!("unknown service `{}` in --no-{}{}", name, name, hint);
            }
        }
    }
    Ok(())
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn check_health(
    errors: &mut Vec<ConfigDiagnostic>,
    src: &NamedSource<String>,
    source: &str,
    owner: &str,
    anchor: &str,
    check: &HealthCheck,
) {
    match check {
        HealthCheck::Http { url, .. } => {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(ConfigDiagnostic::InvalidHealthUrl {
                    src: src.clone(),
                    span: find_field_span(source, anchor, "url"),
                    owner: owner.to_string(),
                    url: url.clone(),
                });
            }
        }
        HealthCheck::Tcp { port, .. } => {
            if *port == 0 {
                errors.push(ConfigDiagnostic::InvalidHealthPort {
                    src: src.clone(),
                    span: find_field_span(source, anchor, "port"),
                    owner: owner.to_string(),
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main validation function
// ---------------------------------------------------------------------------

pub fn validate(
    config: &StackConfig,
    source: &str,
    filename: &str,
) -> Result<(), Vec<ConfigDiagnostic>> {
    let mut errors = Vec::new();
    let src = NamedSource::new(filename, source.to_string());

    let mut seen: HashSet<&str> = HashSet::new();
    for svc in &config.services {
        if !seen.insert(svc.name.as_str()) {
            errors.push(ConfigDiagnostic::DuplicateService {
                src: src.clone(),
                span: find_name_span(source, &svc.name, 1),
                name: svc.name.clone(),
            });
        }

        if !is_valid_name(&svc.name) {
            errors.push(ConfigDiagnostic::InvalidServiceName {
                src: src.clone(),
                span: find_name_span(source, &svc.name, 0),
                name: svc.name.clone(),
            });
        }

        if svc.command.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptyCommand {
                src: src.clone(),
                span: find_field_span(source, &svc.name, "command"),
                service: svc.name.clone(),
            });
        }

        if let Some(check) = &svc.health {
            check_health(&mut errors, &src, source, &svc.name, &svc.name, check);
        }
    }

    for step in &config.setup {
        if step.command.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptySetupCommand {
                src: src.clone(),
                span: find_field_span(source, &step.name, "command"),
                step: step.name.clone(),
            });
        }
    }

    if let Some(infra) = &config.infra {
        if infra.compose_file.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptyComposeFile {
                src: src.clone(),
                span: find_field_span(source, "infra", "compose_file"),
            });
        }
        for (name, check) in &infra.health {
            let anchor = format!("infra.health.{}", name);
            check_health(&mut errors, &src, source, name, &anchor, check);
        }
    }

    for (index, pattern) in config.shutdown.orphan_patterns.iter().enumerate() {
        if pattern.trim().is_empty() {
            errors.push(ConfigDiagnostic::BlankOrphanPattern {
                src: src.clone(),
                span: find_field_span(source, "shutdown", "orphan_patterns"),
                index,
            });
        }
    }
    if config.shutdown.ports.contains(&0) {
        errors.push(ConfigDiagnostic::InvalidShutdownPort {
            src: src.clone(),
            span: find_field_span(source, "shutdown", "ports"),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
