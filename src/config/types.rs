use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mock::debounce::DEFAULT_WAIT;
use crate::mock::server::{MockServerOptions, DEFAULT_HOST, DEFAULT_PORT};

pub const EXPOSED_HOST: &str = "0.0.0.0";
pub const DEFAULT_FILE_SUFFIX: &str = "mock";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PbmockConfig {
    /// Schema files shared by `mock` and `call`.
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(default)]
    pub mock: MockConfig,
    #[serde(default)]
    pub call: CallConfig,
}

/// `mock` settings; every field is optional so sources can be layered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockConfig {
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub file_suffix: Option<String>,
    #[serde(default)]
    pub request_log: Option<bool>,
    #[serde(default)]
    pub debounce_ms: Option<u64>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

impl MockConfig {
    /// Fill unset fields from `other`; fields already set here win.
    pub fn merge(&mut self, other: MockConfig) {
        fn keep<T>(slot: &mut Option<T>, other: Option<T>) {
            if slot.is_none() {
                *slot = other;
            }
        }
        keep(&mut self.dir, other.dir);
        keep(&mut self.host, other.host);
        keep(&mut self.port, other.port);
        keep(&mut self.prefix, other.prefix);
        keep(&mut self.file_suffix, other.file_suffix);
        keep(&mut self.request_log, other.request_log);
        keep(&mut self.debounce_ms, other.debounce_ms);
        keep(&mut self.poll_interval_ms, other.poll_interval_ms);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Fully resolved settings for the `mock` command.
#[derive(Debug, Clone, PartialEq)]
pub struct MockSettings {
    pub dir: PathBuf,
    pub schemas: Vec<PathBuf>,
    pub server: MockServerOptions,
    pub file_suffix: String,
    pub debounce: Duration,
    pub poll_interval: Duration,
}

impl MockSettings {
    /// Apply built-in defaults to a layered config. `None` if no watch
    /// directory was given anywhere.
    pub fn resolve(mock: MockConfig, schemas: Vec<String>) -> Option<Self> {
        let dir = PathBuf::from(mock.dir?);
        Some(Self {
            dir,
            schemas: schemas.into_iter().map(PathBuf::from).collect(),
            server: MockServerOptions {
                host: mock.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: mock.port.unwrap_or(DEFAULT_PORT),
                prefix: mock.prefix.unwrap_or_else(|| "/".to_string()),
                request_log: mock.request_log.unwrap_or(false),
            },
            file_suffix: mock
                .file_suffix
                .unwrap_or_else(|| DEFAULT_FILE_SUFFIX.to_string()),
            debounce: mock.debounce_ms.map_or(DEFAULT_WAIT, Duration::from_millis),
            poll_interval: mock
                .poll_interval_ms
                .map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis),
        })
    }
}
