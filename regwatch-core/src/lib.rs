//! regwatch core library
//!
//! Shared building blocks for the guest/host Future protocol used by
//! regwatch to check container registries from a sandboxed guest.
//!
//! # Key Components
//!
//! - **Arena**: linear memory with explicit allocate/release
//! - **Codec**: two-pass MessagePack encoding and forward-only decoding
//! - **Future**: the fixed-layout descriptor of one asynchronous step
//! - **Boundary**: the traits both sides of the guest/host contract implement
//!
//! Nothing in this crate performs I/O or depends on an async runtime, so it
//! builds for `wasm32-unknown-unknown` as well as for the host.
//!
//! # Example
//!
//! ```
//! use regwatch_core::prelude::*;
//!
//! let mut arena = Arena::new(ArenaConfig::with_capacity(4096));
//! let (data, len) = pack(&mut arena, &RegistryStatus::found("sha256:abc")).unwrap();
//! let output = arena.allocate(FUTURE_SIZE).unwrap();
//! FutureDescriptor::terminal(data, len).store(&mut arena, output).unwrap();
//!
//! let future = FutureDescriptor::load(&arena, output).unwrap();
//! assert!(future.is_terminal());
//! let status: RegistryStatus = unpack(&arena, future.data, future.len).unwrap();
//! assert_eq!(status.latest_image.as_deref(), Some("sha256:abc"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod boundary;
pub mod codec;
pub mod error;
pub mod future;
pub mod prelude;
pub mod types;

pub use arena::{Arena, ArenaConfig};
pub use boundary::{Guest, GuestMemory, HostImports};
pub use error::{RegwatchError, Result};
pub use future::{FUTURE_SIZE, FutureDescriptor, FutureState};
pub use types::{Address, ContinuationIndex, SlotId};
