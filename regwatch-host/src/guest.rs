//! Guest selection.
//!
//! The binaries pick a guest from configuration: a compiled module when one
//! is named, the in-process native guest otherwise.

use std::sync::Arc;

use regwatch_core::{Address, ContinuationIndex, Guest, GuestMemory, HostImports, RegwatchError, Result};
use regwatch_guest::NativeGuest;
use tracing::info;

use crate::config::HostConfig;
use crate::dispatcher::Dispatcher;
use crate::fetch::{FetchProvider, RealFetch};
use crate::wasm::{WasmGuest, WasmRuntime};

/// Either guest implementation.
pub enum AnyGuest {
    /// In-process guest over an arena.
    Native(NativeGuest),
    /// Sandboxed WebAssembly guest.
    Wasm(WasmGuest),
}

impl AnyGuest {
    /// The guest described by `config`.
    pub fn from_config(config: &HostConfig) -> Result<Self> {
        match &config.guest.module {
            Some(path) => {
                let runtime = WasmRuntime::new(config.wasm.runtime_config())?;
                let guest = WasmGuest::from_file(&runtime, path)?;
                info!(module = %path.display(), "loaded wasm guest");
                Ok(Self::Wasm(guest))
            }
            None => Ok(Self::Native(NativeGuest::with_config(config.arena.clone()))),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Native(_) => "native",
            Self::Wasm(_) => "wasm",
        }
    }

    /// Check whether the guest has aborted.
    pub fn is_aborted(&self) -> bool {
        match self {
            Self::Native(guest) => guest.is_aborted(),
            Self::Wasm(guest) => guest.is_aborted(),
        }
    }
}

impl GuestMemory for AnyGuest {
    fn allocate(&mut self, size: u32) -> Result<Address> {
        match self {
            Self::Native(guest) => guest.allocate(size),
            Self::Wasm(guest) => guest.allocate(size),
        }
    }

    fn release(&mut self, address: Address) -> Result<()> {
        match self {
            Self::Native(guest) => guest.release(address),
            Self::Wasm(guest) => guest.release(address),
        }
    }

    fn read(&self, address: Address, len: u32) -> Result<Vec<u8>> {
        match self {
            Self::Native(guest) => guest.read(address, len),
            Self::Wasm(guest) => guest.read(address, len),
        }
    }

    fn write(&mut self, address: Address, bytes: &[u8]) -> Result<()> {
        match self {
            Self::Native(guest) => guest.write(address, bytes),
            Self::Wasm(guest) => guest.write(address, bytes),
        }
    }
}

impl Guest for AnyGuest {
    fn call(
        &mut self,
        host: &Arc<dyn HostImports>,
        output: Address,
        request: Address,
        len: u32,
    ) -> Result<()> {
        match self {
            Self::Native(guest) => guest.call(host, output, request, len),
            Self::Wasm(guest) => guest.call(host, output, request, len),
        }
    }

    fn callback(
        &mut self,
        host: &Arc<dyn HostImports>,
        output: Address,
        continuation: ContinuationIndex,
        input: Address,
    ) -> Result<()> {
        match self {
            Self::Native(guest) => guest.callback(host, output, continuation, input),
            Self::Wasm(guest) => guest.callback(host, output, continuation, input),
        }
    }
}

/// A dispatcher over the configured guest and a real HTTP fetcher.
pub fn build_dispatcher(config: &HostConfig) -> Result<Dispatcher<AnyGuest>> {
    let fetch = RealFetch::with_settings(config.fetch.timeout(), &config.fetch.user_agent)
        .map_err(|e| RegwatchError::ConfigValue {
            field: "fetch".to_string(),
            cause: e.to_string(),
        })?;
    build_dispatcher_with(config, Arc::new(fetch))
}

/// A dispatcher over the configured guest and `fetch`.
pub fn build_dispatcher_with(
    config: &HostConfig,
    fetch: Arc<dyn FetchProvider>,
) -> Result<Dispatcher<AnyGuest>> {
    let guest = AnyGuest::from_config(config)?;
    info!(guest = guest.kind(), mock = fetch.is_mock(), "dispatcher ready");
    Ok(Dispatcher::new(guest, fetch))
}
