//! Image controller.
//!
//! Reconciles Image resources by resolving `spec.image` to its current
//! digest and recording it in `status`.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Resource, ResourceExt};
use serde_json::json;

use regwatch_core::codec::RegistryStatus;

use super::{ControllerContext, ControllerSettings, ReconcileAction};
use crate::crd::{Image, ImageStatus};
use crate::error::{OperatorError, OperatorResult};

/// Controller for Image resources.
#[derive(Clone)]
pub struct ImageController {
    ctx: Arc<ControllerContext>,
}

impl ImageController {
    /// Create a new image controller.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    /// Reconcile an Image resource.
    ///
    /// Objects being deleted are left alone. Otherwise the image is checked
    /// and `status` is patched only when the answer changed.
    pub async fn reconcile(&self, image: Arc<Image>) -> OperatorResult<ReconcileAction> {
        let name = image.name_any();
        let namespace = image
            .namespace()
            .ok_or_else(|| OperatorError::InvalidConfig("Image must be namespaced".into()))?;

        if image.meta().deletion_timestamp.is_some() {
            tracing::debug!(name = %name, namespace = %namespace, "Image is being deleted");
            return Ok(ReconcileAction::Done);
        }

        tracing::info!(
            name = %name,
            namespace = %namespace,
            image = %image.spec.image,
            "Reconciling Image"
        );

        let result = self
            .ctx
            .checker
            .check(&image.spec.image)
            .await
            .map_err(|source| OperatorError::CheckFailed {
                image: image.spec.image.clone(),
                source,
            })?;

        let checked_at = chrono::Utc::now().to_rfc3339();
        match status_patch(image.status.as_ref(), &result, &checked_at) {
            Some(patch) => {
                let images: Api<Image> = Api::namespaced(self.ctx.client.clone(), &namespace);
                images
                    .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                tracing::info!(
                    name = %name,
                    complete = result.complete,
                    digest = result.latest_image.as_deref().unwrap_or(""),
                    "Image status updated"
                );
            }
            None => tracing::debug!(name = %name, "Image status unchanged"),
        }

        Ok(ReconcileAction::Requeue(self.ctx.settings.requeue))
    }
}

/// The merge patch that records `result`, or `None` when `current` already
/// says the same thing.
///
/// A missing digest is written as `null` so the merge removes a stale one.
pub fn status_patch(
    current: Option<&ImageStatus>,
    result: &RegistryStatus,
    checked_at: &str,
) -> Option<serde_json::Value> {
    if !current.is_none_or(|status| status.differs_from(result)) {
        return None;
    }
    let status = ImageStatus::from_check(result, checked_at);
    Some(json!({
        "status": {
            "complete": status.complete,
            "latestImage": status.latest_image,
            "lastChecked": status.last_checked,
        }
    }))
}

/// How long to wait before retrying after `error`.
///
/// Transient failures back off; anything else waits a full requeue interval.
pub fn backoff_for(error: &OperatorError, settings: &ControllerSettings) -> Duration {
    if error.is_transient() {
        settings.error_backoff
    } else {
        settings.requeue
    }
}

/// Error policy for the Image controller.
pub fn error_policy(image: Arc<Image>, error: &OperatorError, ctx: Arc<ControllerContext>) -> Action {
    let delay = backoff_for(error, &ctx.settings);
    tracing::warn!(
        name = %image.name_any(),
        error = %error,
        retry_in_secs = delay.as_secs(),
        "Image reconciliation failed"
    );
    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use regwatch_core::RegwatchError;

    #[test]
    fn first_status_is_always_written() {
        let patch = status_patch(None, &RegistryStatus::incomplete(), "now").unwrap();
        assert_eq!(patch["status"]["complete"], false);
        assert_eq!(patch["status"]["lastChecked"], "now");
    }

    #[test]
    fn unchanged_status_is_not_patched() {
        let current = ImageStatus::from_check(&RegistryStatus::found("sha256:abc"), "earlier");
        assert!(status_patch(Some(&current), &RegistryStatus::found("sha256:abc"), "now").is_none());
    }

    #[test]
    fn new_digest_is_patched() {
        let current = ImageStatus::from_check(&RegistryStatus::found("sha256:abc"), "earlier");
        let patch = status_patch(Some(&current), &RegistryStatus::found("sha256:def"), "now").unwrap();
        assert_eq!(patch["status"]["latestImage"], "sha256:def");
        assert_eq!(patch["status"]["complete"], true);
    }

    #[test]
    fn losing_the_digest_drops_it_from_status() {
        let current = ImageStatus::from_check(&RegistryStatus::found("sha256:abc"), "earlier");
        let patch = status_patch(Some(&current), &RegistryStatus::incomplete(), "now").unwrap();
        assert_eq!(patch["status"]["complete"], false);
        assert!(patch["status"]["latestImage"].is_null());
        assert!(patch["status"].as_object().unwrap().contains_key("latestImage"));
    }

    #[test]
    fn transient_errors_back_off() {
        let settings = ControllerSettings {
            requeue: Duration::from_secs(300),
            error_backoff: Duration::from_secs(15),
        };
        let fetch = OperatorError::CheckFailed {
            image: "nginx".into(),
            source: RegwatchError::Fetch {
                url: "https://index.docker.io/v2/".into(),
                cause: "timeout".into(),
            },
        };
        assert_eq!(backoff_for(&fetch, &settings), Duration::from_secs(15));

        let invalid = OperatorError::InvalidConfig("Image must be namespaced".into());
        assert_eq!(backoff_for(&invalid, &settings), Duration::from_secs(300));
    }
}
