//! WASM runtime management using Wasmtime.
//!
//! Owns the engine and a cache of compiled guest modules. With an epoch
//! deadline configured it also runs an [`EpochTicker`] that advances the
//! engine's epoch on a fixed interval, so a guest step that never returns is
//! interrupted without its cooperation.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;
use wasmtime::{Config, Engine, Module};

use regwatch_core::{RegwatchError, Result};

/// Default maximum memory pages (64 KiB per page).
pub const DEFAULT_MAX_MEMORY_PAGES: u32 = 1024;

/// Default milliseconds between epoch increments.
pub const DEFAULT_EPOCH_TICK_MS: u64 = 10;

/// Default interval between epoch increments.
pub const DEFAULT_EPOCH_TICK: Duration = Duration::from_millis(DEFAULT_EPOCH_TICK_MS);

/// Configuration for the WASM runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WasmRuntimeConfig {
    /// Maximum memory pages a guest may grow to.
    pub max_memory_pages: u32,
    /// Fuel granted to each boundary step, `None` for unlimited.
    pub fuel: Option<u64>,
    /// Epoch ticks a boundary step may run for, `None` to disable
    /// epoch interruption.
    pub epoch_deadline: Option<u64>,
    /// Interval between epoch ticks.
    pub epoch_tick: Duration,
    /// Whether to cache compiled modules by name.
    pub cache_modules: bool,
}

impl Default for WasmRuntimeConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: DEFAULT_MAX_MEMORY_PAGES,
            fuel: None,
            epoch_deadline: None,
            epoch_tick: DEFAULT_EPOCH_TICK,
            cache_modules: true,
        }
    }
}

impl WasmRuntimeConfig {
    /// Stricter limits for tests.
    pub fn testing() -> Self {
        Self {
            max_memory_pages: 256,
            fuel: Some(1_000_000),
            epoch_deadline: None,
            epoch_tick: Duration::from_millis(1),
            cache_modules: false,
        }
    }

    /// Set maximum memory pages.
    pub fn with_max_memory_pages(mut self, pages: u32) -> Self {
        self.max_memory_pages = pages;
        self
    }

    /// Limit each boundary step to `fuel` units.
    pub fn with_fuel(mut self, fuel: Option<u64>) -> Self {
        self.fuel = fuel;
        self
    }

    /// Interrupt boundary steps after `ticks` epoch increments.
    pub fn with_epoch_deadline(mut self, ticks: Option<u64>) -> Self {
        self.epoch_deadline = ticks;
        self
    }

    /// Set the interval between epoch ticks.
    pub fn with_epoch_tick(mut self, tick: Duration) -> Self {
        self.epoch_tick = tick;
        self
    }

    /// Wall-clock budget of one boundary step under epoch interruption.
    pub fn step_budget(&self) -> Option<Duration> {
        let ticks = u32::try_from(self.epoch_deadline?).unwrap_or(u32::MAX);
        Some(self.epoch_tick.saturating_mul(ticks))
    }

    /// Enable or disable module caching.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_modules = enabled;
        self
    }

    fn to_wasmtime_config(&self) -> Config {
        let mut config = Config::new();
        config.consume_fuel(self.fuel.is_some());
        config.epoch_interruption(self.epoch_deadline.is_some());
        config.strategy(wasmtime::Strategy::Cranelift);
        config
    }

    /// Bytes a guest memory may grow to.
    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_pages as usize * 64 * 1024
    }
}

/// Background thread advancing an engine's epoch.
///
/// Stops when the last handle is dropped.
#[derive(Debug)]
pub struct EpochTicker {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EpochTicker {
    /// Start ticking `engine` every `tick`.
    pub fn start(engine: Engine, tick: Duration) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("regwatch-epoch".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    thread::sleep(tick);
                    engine.increment_epoch();
                }
            })
            .map_err(|e| RegwatchError::WasmLoad {
                module: "epoch ticker".to_string(),
                cause: e.to_string(),
            })?;
        debug!(?tick, "epoch ticker started");

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Wasmtime engine plus compiled module cache.
pub struct WasmRuntime {
    engine: Engine,
    config: WasmRuntimeConfig,
    modules: DashMap<String, Module>,
    ticker: Option<Arc<EpochTicker>>,
}

impl WasmRuntime {
    /// Create a runtime.
    pub fn new(config: WasmRuntimeConfig) -> Result<Self> {
        let engine =
            Engine::new(&config.to_wasmtime_config()).map_err(|e| RegwatchError::WasmLoad {
                module: "engine".to_string(),
                cause: e.to_string(),
            })?;

        let ticker = match config.epoch_deadline {
            Some(_) => Some(Arc::new(EpochTicker::start(engine.clone(), config.epoch_tick)?)),
            None => None,
        };

        Ok(Self {
            engine,
            config,
            modules: DashMap::new(),
            ticker,
        })
    }

    /// Create a runtime with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(WasmRuntimeConfig::default())
    }

    /// Wrap in an `Arc` for sharing between guests.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// The Wasmtime engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The runtime configuration.
    pub fn config(&self) -> &WasmRuntimeConfig {
        &self.config
    }

    /// Compile `bytes` (binary or text format) under `name`.
    ///
    /// With caching on, a module already compiled under `name` is reused.
    pub fn compile(&self, name: &str, bytes: &[u8]) -> Result<Module> {
        if self.config.cache_modules {
            if let Some(cached) = self.modules.get(name) {
                return Ok(cached.clone());
            }
        }

        let module = Module::new(&self.engine, bytes).map_err(|e| RegwatchError::WasmLoad {
            module: name.to_string(),
            cause: e.to_string(),
        })?;

        if self.config.cache_modules {
            self.modules.insert(name.to_string(), module.clone());
        }
        Ok(module)
    }

    /// Compile a module file, cached under its path.
    pub fn compile_file(&self, path: &Path) -> Result<Module> {
        let name = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|e| RegwatchError::Io {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        self.compile(&name, &bytes)
    }

    /// The running epoch ticker, if epoch interruption is on.
    ///
    /// Guests hold a handle so ticking outlives the runtime.
    pub fn epoch_ticker(&self) -> Option<Arc<EpochTicker>> {
        self.ticker.clone()
    }

    /// Clear the module cache.
    pub fn clear_cache(&self) {
        self.modules.clear();
    }

    /// Number of cached modules.
    pub fn cache_size(&self) -> usize {
        self.modules.len()
    }
}
