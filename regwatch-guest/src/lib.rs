//! regwatch guest
//!
//! The sandboxed side of the Future protocol: a single-threaded module that
//! resolves a container image to its current digest without doing any I/O
//! itself. Every network step is a `get` handed to the host, and the module
//! is re-entered through `callback` once the host has the response.
//!
//! # Modules
//!
//! - [`reference`]: image reference parsing and manifest URLs
//! - [`challenge`]: `WWW-Authenticate` bearer challenges and token URLs
//! - [`continuation`]: the table of resumable steps
//! - [`module`]: [`GuestModule`], the entry points over any guest memory
//!
//! Built for `wasm32`, the crate also exports the raw ABI (`call`,
//! `callback`, `allocate`, `release`) and imports `env.get`.
//!
//! # Example
//!
//! ```
//! use regwatch_guest::ImageReference;
//!
//! let reference = ImageReference::parse("localhost:5000/apps/demo").unwrap();
//! assert_eq!(
//!     reference.manifest_url(),
//!     "http://localhost:5000/v2/apps/demo/manifests/latest"
//! );
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(target_arch = "wasm32")]
mod abi;
pub mod challenge;
pub mod continuation;
pub mod module;
mod protocol;
pub mod reference;

pub use challenge::Challenge;
pub use continuation::Continuation;
pub use module::{GuestModule, NativeGuest};
pub use protocol::{MANIFEST_ACCEPT, extract_token, manifest_request};
pub use reference::ImageReference;
