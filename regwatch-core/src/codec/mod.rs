//! Wire codec for values crossing the boundary.
//!
//! The wire format is MessagePack. Encoding is two-pass: a sizing pass
//! computes the exact output length, then the real pass writes into a buffer
//! of that size. Decoding is forward-only, skips keys it does not know and
//! treats `nil` as an absent optional field.
//!
//! # Example
//!
//! ```
//! use regwatch_core::codec::{encode_to_vec, Request, WireDecode};
//!
//! let request = Request::new("http://localhost:5000/v2/apps/demo/manifests/latest")
//!     .with_header("accept", "application/vnd.oci.image.index.v1+json");
//! let bytes = encode_to_vec(&request).unwrap();
//! assert_eq!(Request::from_slice(&bytes).unwrap(), request);
//! ```

mod message;
mod reader;
mod writer;

pub use message::{CallRequest, Headers, RegistryStatus, Request, Response};
pub use reader::{Decoder, MAX_SKIP_DEPTH, WireDecode, unpack};
pub use writer::{
    Sizer, WireEncode, encode_into, encode_to_vec, encoded_len, pack, wire_len, write_bin,
    write_bool, write_i32, write_map_len, write_nil, write_str, write_string_map,
};
