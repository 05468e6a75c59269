//! Image Custom Resource Definition.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use regwatch_core::codec::RegistryStatus;

/// Image is the Schema for the images API.
///
/// The operator resolves `spec.image` against its registry and records the
/// current manifest digest in `status.latestImage`.
#[derive(CustomResource, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "example.com",
    version = "v1",
    kind = "Image",
    plural = "images",
    shortname = "img",
    namespaced,
    status = "ImageStatus",
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Complete", "type":"boolean", "jsonPath":".status.complete"}"#,
    printcolumn = r#"{"name":"Digest", "type":"string", "jsonPath":".status.latestImage"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Image reference, e.g. `nginx`, `quay.io/org/app:v2` or
    /// `localhost:5000/apps/demo`.
    pub image: String,
}

/// Observed state of an Image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageStatus {
    /// Whether the last check found a digest.
    #[serde(default)]
    pub complete: bool,

    /// Current manifest digest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<String>,

    /// When the status last changed (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<String>,
}

impl ImageStatus {
    /// Status for a check result, stamped with `checked_at`.
    pub fn from_check(result: &RegistryStatus, checked_at: impl Into<String>) -> Self {
        Self {
            complete: result.complete,
            latest_image: result.latest_image.clone(),
            last_checked: Some(checked_at.into()),
        }
    }

    /// Whether `result` says anything different from this status.
    ///
    /// `last_checked` is ignored.
    pub fn differs_from(&self, result: &RegistryStatus) -> bool {
        self.complete != result.complete || self.latest_image != result.latest_image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::{CustomResourceExt, Resource};

    #[test]
    fn crd_identity() {
        let crd = Image::crd();
        assert_eq!(crd.spec.group, "example.com");
        assert_eq!(crd.spec.names.plural, "images");
        assert_eq!(crd.spec.names.kind, "Image");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(Image::api_version(&()), "example.com/v1");
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = ImageStatus::from_check(
            &RegistryStatus::found("sha256:abc"),
            "2026-01-01T00:00:00+00:00",
        );
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["complete"], true);
        assert_eq!(json["latestImage"], "sha256:abc");
        assert_eq!(json["lastChecked"], "2026-01-01T00:00:00+00:00");

        let incomplete = serde_json::to_value(ImageStatus::from_check(
            &RegistryStatus::incomplete(),
            "2026-01-01T00:00:00+00:00",
        ))
        .unwrap();
        assert!(incomplete.get("latestImage").is_none());
    }

    #[test]
    fn differs_ignores_the_timestamp() {
        let status = ImageStatus::from_check(&RegistryStatus::found("sha256:abc"), "then");
        assert!(!status.differs_from(&RegistryStatus::found("sha256:abc")));
        assert!(status.differs_from(&RegistryStatus::found("sha256:def")));
        assert!(status.differs_from(&RegistryStatus::incomplete()));
        assert!(ImageStatus::default().differs_from(&RegistryStatus::found("sha256:abc")));
        assert!(!ImageStatus::default().differs_from(&RegistryStatus::incomplete()));
    }

    #[test]
    fn spec_deserializes_from_a_manifest() {
        let image: Image = serde_yaml::from_str(
            "apiVersion: example.com/v1\nkind: Image\nmetadata:\n  name: web\n  namespace: default\nspec:\n  image: nginx\n",
        )
        .unwrap();
        assert_eq!(image.spec.image, "nginx");
        assert!(image.status.is_none());
    }
}
