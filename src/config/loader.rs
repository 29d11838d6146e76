use std::path::{Path, PathBuf};

use crate::error::PbmockError;

use super::env::expand_config;
use super::types::{CallConfig, PbmockConfig};

pub const CONFIG_ENV: &str = "PBMOCK_CONFIG";

/// Strip JSONC comments (// line comments and /* */ block comments) from input.
pub fn strip_jsonc_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(ch) = chars.next() {
        if escape_next {
            escape_next = false;
            result.push(ch);
            continue;
        }

        if in_string {
            result.push(ch);
            if ch == '\\' {
                escape_next = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        if ch == '"' {
            in_string = true;
            result.push(ch);
            continue;
        }

        if ch == '/' {
            match chars.peek() {
                Some(&'/') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if c == '\n' {
                            result.push('\n');
                            break;
                        }
                    }
                }
                Some(&'*') => {
                    chars.next();
                    let mut prev = ' ';
                    for c in chars.by_ref() {
                        if prev == '*' && c == '/' {
                            break;
                        }
                        // keep line numbers stable for serde errors
                        if c == '\n' {
                            result.push('\n');
                        }
                        prev = c;
                    }
                }
                _ => {
                    result.push(ch);
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Discover config files in precedence order (highest first).
///
/// 1. `--config` CLI flag
/// 2. `PBMOCK_CONFIG` env var
/// 3. `./config/pbmock.json` (project-level)
/// 4. `~/.pbmock/pbmock.json` or `~/.pbmock/pbmock.jsonc`
pub fn discover_config_files(cli_config: Option<&str>) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(path) = cli_config {
        candidates.push(PathBuf::from(path));
    }
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        candidates.push(PathBuf::from(env_path));
    }
    candidates.push(PathBuf::from("./config/pbmock.json"));
    if let Some(home) = dirs::home_dir() {
        let home_json = home.join(".pbmock").join("pbmock.json");
        if home_json.exists() {
            candidates.push(home_json);
        } else {
            candidates.push(home.join(".pbmock").join("pbmock.jsonc"));
        }
    }

    let mut files = Vec::new();
    for path in candidates {
        if path.exists() && !files.contains(&path) {
            files.push(path);
        }
    }
    files
}

/// Load a single config file, stripping JSONC comments before parsing.
fn load_config_file(path: &Path) -> Result<PbmockConfig, PbmockError> {
    let content = std::fs::read_to_string(path).map_err(|e| PbmockError::ConfigError {
        path: path.to_path_buf(),
        detail: format!("Cannot read file: {e}"),
    })?;

    let stripped = strip_jsonc_comments(&content);
    serde_json::from_str::<PbmockConfig>(&stripped).map_err(|e| PbmockError::ConfigError {
        path: path.to_path_buf(),
        detail: format!("Invalid JSON: {e}"),
    })
}

fn merge_call(target: &mut CallConfig, source: CallConfig) {
    if target.base_url.is_none() {
        target.base_url = source.base_url;
    }
    if target.timeout_ms.is_none() {
        target.timeout_ms = source.timeout_ms;
    }
    for (name, value) in source.headers {
        target.headers.entry(name).or_insert(value);
    }
}

/// Merge `source` into `target`; settings already in `target` win.
/// Schema lists are concatenated without duplicates.
fn merge_config(target: &mut PbmockConfig, source: PbmockConfig) {
    for schema in source.schemas {
        if !target.schemas.contains(&schema) {
            target.schemas.push(schema);
        }
    }
    target.mock.merge(source.mock);
    merge_call(&mut target.call, source.call);
}

/// Load, merge and expand all discovered configuration.
///
/// A `--config` path that does not exist is an error; the other locations
/// are optional.
pub fn load_config(cli_config: Option<&str>) -> Result<PbmockConfig, PbmockError> {
    if let Some(path) = cli_config {
        if !Path::new(path).exists() {
            return Err(PbmockError::ConfigError {
                path: PathBuf::from(path),
                detail: "File not found".to_string(),
            });
        }
    }

    let mut merged = PbmockConfig::default();
    for path in discover_config_files(cli_config) {
        merge_config(&mut merged, load_config_file(&path)?);
    }
    expand_config(&mut merged)?;
    Ok(merged)
}
