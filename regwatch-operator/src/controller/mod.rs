//! Kubernetes controller for Image resources.
//!
//! - [`ImageController`]: resolves `spec.image` and writes the digest back
//!   into `status`
//!
//! # Usage with kube-runtime
//!
//! ```ignore
//! use regwatch_operator::controller::{ImageController, error_policy};
//!
//! Controller::new(images, watcher_config)
//!     .run(|image, ctx| async move {
//!         ImageController::new(ctx).reconcile(image).await.map(Into::into)
//!     }, error_policy, context)
//!     .for_each(|_| futures::future::ready(()))
//!     .await;
//! ```

mod image;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use kube::runtime::controller::Action;

use regwatch_core::codec::RegistryStatus;
use regwatch_core::Guest;
use regwatch_host::Dispatcher;

pub use image::{ImageController, backoff_for, error_policy, status_patch};

/// Resolves image references to digests.
pub trait ImageChecker: Send + Sync {
    /// Check `image` against its registry.
    fn check<'a>(&'a self, image: &'a str) -> BoxFuture<'a, regwatch_core::Result<RegistryStatus>>;
}

impl<G: Guest + 'static> ImageChecker for Dispatcher<G> {
    fn check<'a>(&'a self, image: &'a str) -> BoxFuture<'a, regwatch_core::Result<RegistryStatus>> {
        Box::pin(self.check_image(image))
    }
}

/// Requeue timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Delay before re-checking an image after a successful reconcile.
    pub requeue: Duration,
    /// Delay before retrying after a transient failure.
    pub error_backoff: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            requeue: Duration::from_secs(300),
            error_backoff: Duration::from_secs(60),
        }
    }
}

/// Shared context for the controller.
pub struct ControllerContext {
    /// Kubernetes client.
    pub client: kube::Client,
    /// Digest lookups.
    pub checker: Arc<dyn ImageChecker>,
    /// Requeue timing.
    pub settings: ControllerSettings,
}

impl ControllerContext {
    /// Create a new controller context.
    pub fn new(
        client: kube::Client,
        checker: Arc<dyn ImageChecker>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            client,
            checker,
            settings,
        }
    }
}

/// Result type for reconciliation actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Requeue after the specified duration.
    Requeue(Duration),
    /// Wait for the next change event.
    Done,
}

impl From<ReconcileAction> for Action {
    fn from(action: ReconcileAction) -> Self {
        match action {
            ReconcileAction::Requeue(duration) => Action::requeue(duration),
            ReconcileAction::Done => Action::await_change(),
        }
    }
}
