//! Host configuration.
//!
//! Loaded from YAML, every field defaulted, then overridden from the
//! environment:
//!
//! - `REGWATCH_GUEST_MODULE`: path to a compiled guest `.wasm`
//! - `REGWATCH_FETCH_TIMEOUT_SECS`: fetch timeout in seconds
//! - `REGWATCH_ARENA_CAPACITY`: native arena capacity in bytes
//!
//! ```yaml
//! arena:
//!   capacity: 8388608
//! fetch:
//!   timeout_secs: 10
//! guest:
//!   module: target/wasm32-unknown-unknown/release-guest/regwatch_guest.wasm
//! wasm:
//!   fuel: 50000000
//!   epoch_deadline: 500
//!   epoch_tick_ms: 10
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use regwatch_core::{ArenaConfig, RegwatchError, Result};

use crate::fetch::DEFAULT_USER_AGENT;
use crate::wasm::{DEFAULT_EPOCH_TICK_MS, DEFAULT_MAX_MEMORY_PAGES, WasmRuntimeConfig};

/// Smallest arena a guest can run a full chain in.
pub const MIN_ARENA_CAPACITY: u32 = 4 * 1024;

/// Environment variable naming the guest module.
pub const ENV_GUEST_MODULE: &str = "REGWATCH_GUEST_MODULE";
/// Environment variable overriding the fetch timeout.
pub const ENV_FETCH_TIMEOUT: &str = "REGWATCH_FETCH_TIMEOUT_SECS";
/// Environment variable overriding the arena capacity.
pub const ENV_ARENA_CAPACITY: &str = "REGWATCH_ARENA_CAPACITY";

/// Top-level host configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Native guest arena.
    pub arena: ArenaConfig,
    /// Fetch collaborator.
    pub fetch: FetchConfig,
    /// Which guest to run.
    pub guest: GuestConfig,
    /// WebAssembly runtime limits.
    pub wasm: WasmConfig,
}

/// Fetch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// `user-agent` sent with every request.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    /// The timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Guest selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestConfig {
    /// Compiled guest module. Absent means the in-process native guest.
    pub module: Option<PathBuf>,
}

/// WebAssembly limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WasmConfig {
    /// Maximum linear memory in 64 KiB pages.
    pub max_memory_pages: u32,
    /// Fuel per boundary step; unlimited when absent.
    pub fuel: Option<u64>,
    /// Epoch ticks a boundary step may run for; no wall-clock bound when
    /// absent.
    pub epoch_deadline: Option<u64>,
    /// Milliseconds between epoch ticks.
    pub epoch_tick_ms: u64,
    /// Cache compiled modules.
    pub cache_modules: bool,
}

impl Default for WasmConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: DEFAULT_MAX_MEMORY_PAGES,
            fuel: None,
            epoch_deadline: None,
            epoch_tick_ms: DEFAULT_EPOCH_TICK_MS,
            cache_modules: true,
        }
    }
}

impl WasmConfig {
    /// The runtime configuration these settings describe.
    pub fn runtime_config(&self) -> WasmRuntimeConfig {
        WasmRuntimeConfig::default()
            .with_max_memory_pages(self.max_memory_pages)
            .with_fuel(self.fuel)
            .with_epoch_deadline(self.epoch_deadline)
            .with_epoch_tick(Duration::from_millis(self.epoch_tick_ms))
            .with_cache(self.cache_modules)
    }
}

fn config_value(field: &str, cause: impl Into<String>) -> RegwatchError {
    RegwatchError::ConfigValue {
        field: field.to_string(),
        cause: cause.into(),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, field: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| config_value(field, format!("{key}={value:?}: {e}")))
}

impl HostConfig {
    /// Parse YAML. `path` is only used in error messages.
    pub fn from_yaml(yaml: &str, path: &Path) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| RegwatchError::YamlParse {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })
    }

    /// Read and parse a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| RegwatchError::Io {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        Self::from_yaml(&yaml, path)
    }

    /// File (or defaults), then environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (usually the process environment).
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(module) = lookup(ENV_GUEST_MODULE).filter(|m| !m.trim().is_empty()) {
            self.guest.module = Some(PathBuf::from(module));
        }
        if let Some(value) = lookup(ENV_FETCH_TIMEOUT) {
            self.fetch.timeout_secs = parse_env(ENV_FETCH_TIMEOUT, "fetch.timeout_secs", &value)?;
        }
        if let Some(value) = lookup(ENV_ARENA_CAPACITY) {
            self.arena.capacity = parse_env(ENV_ARENA_CAPACITY, "arena.capacity", &value)?;
        }
        Ok(())
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.fetch.timeout_secs == 0 {
            return Err(config_value("fetch.timeout_secs", "must be > 0"));
        }
        if self.arena.capacity < MIN_ARENA_CAPACITY {
            return Err(config_value(
                "arena.capacity",
                format!("must be at least {MIN_ARENA_CAPACITY} bytes"),
            ));
        }
        if !self.arena.alignment.is_power_of_two() {
            return Err(config_value("arena.alignment", "must be a power of two"));
        }
        if self.wasm.max_memory_pages == 0 {
            return Err(config_value("wasm.max_memory_pages", "must be > 0"));
        }
        if self.wasm.epoch_tick_ms == 0 {
            return Err(config_value("wasm.epoch_tick_ms", "must be > 0"));
        }
        Ok(())
    }
}
