//! Typed configuration from a TOML file and environment variables.
//!
//! Loads once at startup, fails fast if the file or the requested store
//! instance is missing. The store password is wrapped in
//! secrecy::SecretString to prevent log leaks.

use crate::error::{Error, Result};
use crate::model::clean_name;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "TASKMAN_CONFIG";

/// Configuration file used when neither `--config` nor `TASKMAN_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "taskman.toml";

#[derive(Debug)]
pub struct Config {
    pub keys: KeySpace,
    pub instances: HashMap<String, StoreInstance>,
    pub otel_endpoint: Option<String>,
}

/// Naming of store keys. Injected into queues and worker records.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeySpace {
    pub queue_prefix: String,
    pub worker_prefix: String,
    pub separator: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self {
            queue_prefix: "queue".to_string(),
            worker_prefix: "worker".to_string(),
            separator: ":".to_string(),
        }
    }
}

impl KeySpace {
    /// `queue:<name>`; `name` must already be cleaned.
    pub fn queue_key(&self, name: &str) -> String {
        format!("{}{}{}", self.queue_prefix, self.separator, name)
    }

    /// `worker:<queue>:<id>`; the id is kept verbatim.
    pub fn worker_key(&self, queue: &str, worker_id: &str) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.worker_prefix,
            queue,
            worker_id,
            sep = self.separator
        )
    }
}

/// Connection elements for one named store instance.
#[derive(Debug, Deserialize)]
pub struct StoreInstance {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub db: i64,
    #[serde(default, deserialize_with = "deserialize_password")]
    pub password: Option<SecretString>,
}

fn deserialize_password<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(SecretString::from))
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

impl StoreInstance {
    /// The password, if one is set and non-empty.
    pub fn password(&self) -> Option<&str> {
        self.password
            .as_ref()
            .map(|p| p.expose_secret())
            .filter(|p| !p.is_empty())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// On-disk layout.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    keys: KeySpace,
    #[serde(default)]
    redis: HashMap<String, StoreInstance>,
}

impl Config {
    /// Resolve the configuration path: explicit argument, then
    /// `TASKMAN_CONFIG`, then `taskman.toml` in the working directory.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        match explicit {
            Some(path) => path.to_path_buf(),
            None => std::env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
        }
    }

    /// Load configuration from a TOML file plus environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "cannot read configuration file {}: {e}",
                path.display()
            ))
        })?;
        let mut config = Self::from_toml(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })?;
        config.otel_endpoint = std::env::var("OTEL_ENDPOINT").ok();
        Ok(config)
    }

    /// Parse configuration text. Environment variables are not consulted.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad configuration: {e}")))?;

        // Section names are matched after the same cleaning as lookups.
        let mut instances = HashMap::new();
        for (name, instance) in file.redis {
            instances.insert(clean_name(&name)?, instance);
        }

        Ok(Self {
            keys: file.keys,
            instances,
            otel_endpoint: None,
        })
    }

    /// Look up the connection elements of a store instance by name.
    pub fn instance(&self, name: &str) -> Result<&StoreInstance> {
        let name = clean_name(name)?;
        self.instances.get(&name).ok_or_else(|| {
            Error::Config(format!(
                "the connection elements must be in the section [redis.{name}]"
            ))
        })
    }
}
