//! The guest/host calling contract.
//!
//! A guest exposes four entry points (`call`, `callback`, `allocate`,
//! `release`) and imports exactly one host capability (`get`). These traits
//! express that contract independently of how the guest is executed: the
//! native guest implements them over an [`Arena`](crate::arena::Arena), the
//! wasmtime host over a module's exported linear memory.
//!
//! # Ownership
//!
//! - Each side releases what it allocates by the end of its own synchronous
//!   step.
//! - The terminal output payload belongs to whoever reads the finished
//!   output future; the host releases it after decoding.
//! - A chain's context buffer is allocated by the guest, travels with every
//!   pending step, and is released by the continuation that terminates the
//!   chain.

use std::sync::Arc;

use crate::error::Result;
use crate::types::{Address, ContinuationIndex};

/// Linear memory shared by guest and host.
pub trait GuestMemory {
    /// Allocate `size` zeroed bytes.
    fn allocate(&mut self, size: u32) -> Result<Address>;

    /// Release a buffer returned by [`allocate`](Self::allocate).
    ///
    /// Releasing [`Address::NULL`] is a no-op.
    fn release(&mut self, address: Address) -> Result<()>;

    /// Copy `len` bytes out of memory.
    fn read(&self, address: Address, len: u32) -> Result<Vec<u8>>;

    /// Copy `bytes` into memory at `address`.
    fn write(&mut self, address: Address, bytes: &[u8]) -> Result<()>;
}

/// Capabilities the host provides to the guest.
pub trait HostImports: Send + Sync {
    /// Start an asynchronous fetch.
    ///
    /// Decodes the request carried by the future at `input`, writes a
    /// pending marker into the future at `output` and returns without
    /// waiting for the fetch. The host later re-enters the guest through
    /// [`Guest::callback`] with `continuation`.
    fn get(
        &self,
        memory: &mut dyn GuestMemory,
        output: Address,
        continuation: ContinuationIndex,
        input: Address,
    ) -> Result<()>;
}

/// Entry points a guest module exposes to the host.
pub trait Guest: GuestMemory + Send {
    /// Start a chain for the request encoded at `request`.
    ///
    /// On return `output` holds either a terminal or a pending future.
    fn call(
        &mut self,
        host: &Arc<dyn HostImports>,
        output: Address,
        request: Address,
        len: u32,
    ) -> Result<()>;

    /// Resume a pending chain with the settled future at `input`.
    fn callback(
        &mut self,
        host: &Arc<dyn HostImports>,
        output: Address,
        continuation: ContinuationIndex,
        input: Address,
    ) -> Result<()>;
}
