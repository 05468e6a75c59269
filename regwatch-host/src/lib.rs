//! regwatch host
//!
//! The host side of the Future protocol. A [`Dispatcher`] enters a guest,
//! performs the fetches the guest asks for through a [`FetchProvider`],
//! keeps each in-flight fetch in the [`PromiseRegistry`] under a fresh slot,
//! and re-enters the guest with the response until the guest produces a
//! terminal answer.
//!
//! # Modules
//!
//! - [`dispatcher`]: the boundary loop and the `get` import
//! - [`registry`]: slot-keyed pending fetches
//! - [`fetch`]: the real HTTP fetcher and a scripted mock
//! - [`wasm`]: sandboxed guests on wasmtime
//! - [`guest`]: guest selection from configuration
//! - [`config`]: YAML and environment configuration
//! - [`observability`]: tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use regwatch_guest::NativeGuest;
//! use regwatch_host::{Dispatcher, RealFetch};
//!
//! # async fn run() -> regwatch_core::Result<()> {
//! let fetch = Arc::new(RealFetch::new().unwrap());
//! let dispatcher = Dispatcher::new(NativeGuest::with_config(Default::default()), fetch);
//! let status = dispatcher.check_image("nginx").await?;
//! println!("{:?}", status.latest_image);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatcher;
pub mod fetch;
pub mod guest;
pub mod observability;
pub mod registry;
pub mod types;
pub mod wasm;

pub use config::HostConfig;
pub use dispatcher::{ChainHost, Dispatcher};
pub use fetch::{FetchError, FetchProvider, MockFetch, RealFetch};
pub use guest::{AnyGuest, build_dispatcher, build_dispatcher_with};
pub use registry::{PendingStep, PromiseRegistry};
pub use types::ChainId;
pub use wasm::{WasmGuest, WasmRuntime, WasmRuntimeConfig};
