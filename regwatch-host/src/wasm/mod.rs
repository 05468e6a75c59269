//! WebAssembly guests.
//!
//! # Module ABI
//!
//! A guest module must export:
//!
//! ```text
//! memory: Memory
//! allocate(size: u32) -> u32             // zeroed buffer, 0 on exhaustion
//! release(ptr: u32)
//! call(output: u32, request: u32, len: u32)
//! callback(output: u32, fn: u32, input: u32)
//! ```
//!
//! and may import:
//!
//! ```text
//! env.get(output: u32, fn: u32, input: u32)
//! ```
//!
//! `output` and `input` point at 24-byte Future descriptors in the module's
//! own linear memory. Building `regwatch-guest` for `wasm32-unknown-unknown`
//! produces a conforming module.

mod guest;
mod memory;
mod runtime;

pub use guest::WasmGuest;
pub use runtime::{
    DEFAULT_EPOCH_TICK, DEFAULT_EPOCH_TICK_MS, DEFAULT_MAX_MEMORY_PAGES, EpochTicker, WasmRuntime,
    WasmRuntimeConfig,
};
