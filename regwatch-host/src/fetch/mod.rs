//! The fetch collaborator.
//!
//! Every `get` a guest issues ends up here. [`RealFetch`] performs the GET
//! over HTTP; [`MockFetch`] answers from canned rules so dispatcher tests run
//! without a network.

mod mock;
mod real;

use std::future::Future;
use std::pin::Pin;

use regwatch_core::codec::{Request, Response};

pub use mock::{MockFetch, MockFetchBuilder, MockFetchRule};
pub use real::{DEFAULT_TIMEOUT, DEFAULT_USER_AGENT, RealFetch};

/// Future returned by [`FetchProvider::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Response, FetchError>> + Send + 'a>>;

/// Transport-level failures. A response with any status code is not an
/// error; these cover the cases where no response arrived at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// Request timed out.
    #[error("Request timed out")]
    Timeout,
    /// The request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// The response body could not be read.
    #[error("Failed to read response body: {0}")]
    Body(String),
    /// No mock rule matched.
    #[error("No mock rule matched for {url}")]
    NoMockMatch {
        /// The unmatched URL.
        url: String,
    },
}

/// Provider trait for GET requests.
pub trait FetchProvider: Send + Sync {
    /// Perform `request`.
    fn fetch(&self, request: Request) -> FetchFuture<'_>;

    /// Check if this is a mock provider.
    fn is_mock(&self) -> bool;
}
