//! Configuration and rule loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::rewrite::{RuleError, RuleSet};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("invalid rule at {origin}: {source}")]
    Rule {
        origin: String,
        #[source]
        source: RuleError,
    },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: GatewayConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Compile the configured rules: inline directives first, then `rules_file`.
///
/// A relative `rules_file` is resolved against `base_dir`, normally the
/// directory holding the configuration file.
pub fn load_rules(config: &GatewayConfig, base_dir: &Path) -> Result<RuleSet, ConfigError> {
    let mut directives: Vec<(String, String)> = config
        .rules
        .iter()
        .enumerate()
        .map(|(i, d)| (format!("rules[{}]", i), d.clone()))
        .collect();

    if let Some(file) = &config.rules_file {
        let path = if file.is_absolute() {
            file.clone()
        } else {
            base_dir.join(file)
        };
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        directives.extend(rule_lines(&content).map(|(line, d)| {
            (format!("{}:{}", path.display(), line), d.to_string())
        }));
    }

    RuleSet::compile(directives.iter().map(|(_, d)| d)).map_err(|source| {
        let origin = directives
            .get(source.line().saturating_sub(1))
            .map(|(origin, _)| origin.clone())
            .unwrap_or_default();
        ConfigError::Rule { origin, source }
    })
}

/// Directive lines of a rules file with their 1-based line numbers.
fn rule_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}
