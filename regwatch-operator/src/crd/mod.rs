//! Custom Resource Definitions managed by the operator.
//!
//! - [`Image`]: a container image whose current digest is tracked in status

mod image;

pub use image::{Image, ImageSpec, ImageStatus};
