//! regwatch Kubernetes operator
//!
//! Watches `Image` resources and keeps `status.latestImage` at the digest the
//! image's registry currently serves for it.
//!
//! # Custom Resource Definitions
//!
//! - **Image** (`example.com/v1`): an image reference to track
//!
//! # Example
//!
//! ```yaml
//! apiVersion: example.com/v1
//! kind: Image
//! metadata:
//!   name: web
//! spec:
//!   image: nginx
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod controller;
pub mod crd;
pub mod error;

pub use controller::{ControllerContext, ControllerSettings, ImageChecker, ImageController};
pub use crd::{Image, ImageSpec, ImageStatus};
pub use error::{OperatorError, OperatorResult};
