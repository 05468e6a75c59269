//! Prelude for convenient imports.
//!
//! This module re-exports the most commonly used types and traits.
//!
//! # Example
//!
//! ```
//! use regwatch_core::prelude::*;
//! ```

// Core types
pub use crate::types::{Address, ContinuationIndex, SlotId};

// Error handling
pub use crate::error::{RegwatchError, Result};

// Arena
pub use crate::arena::{Arena, ArenaConfig};

// Future descriptor
pub use crate::future::{FUTURE_SIZE, FutureDescriptor, FutureState};

// Codec
pub use crate::codec::{
    CallRequest, Headers, RegistryStatus, Request, Response, WireDecode, WireEncode,
    encode_to_vec, pack, unpack,
};

// Boundary
pub use crate::boundary::{Guest, GuestMemory, HostImports};
