//! Image references and the manifest URLs derived from them.

use std::fmt;

use regwatch_core::{RegwatchError, Result};

/// Registry used when a reference names no host.
pub const DEFAULT_HOST: &str = "index.docker.io";

/// Label used when a reference names no tag or digest.
pub const DEFAULT_LABEL: &str = "latest";

/// Namespace for single-segment Docker Hub repositories.
pub const LIBRARY_PREFIX: &str = "library/";

/// A parsed `[host/]repository[:tag][@digest]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, possibly with a port.
    pub host: String,
    /// Repository path inside the registry.
    pub repository: String,
    /// Tag or digest to resolve.
    pub label: String,
}

impl ImageReference {
    /// Parse an image reference.
    ///
    /// The first path segment is a host when it contains a `.` or a `:`, or
    /// is exactly `localhost`. A reference without a slash lives under
    /// `library/` on the default registry.
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |cause: &str| RegwatchError::ImageReference {
            reference: reference.to_string(),
            cause: cause.to_string(),
        };

        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty reference"));
        }

        let (name, digest) = match trimmed.split_once('@') {
            Some((name, digest)) => (name, Some(digest)),
            None => (trimmed, None),
        };

        let (host, path) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first, rest)
            }
            _ => (DEFAULT_HOST, name),
        };

        // A colon after the last slash separates the tag.
        let (path, tag) = match path.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag)),
            _ => (path, None),
        };

        if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
            return Err(invalid("missing repository"));
        }

        let repository = if path.contains('/') {
            path.to_string()
        } else {
            format!("{LIBRARY_PREFIX}{path}")
        };

        let label = digest.or(tag).filter(|label| !label.is_empty());

        Ok(Self {
            host: host.to_string(),
            repository,
            label: label.unwrap_or(DEFAULT_LABEL).to_string(),
        })
    }

    /// Check whether the registry is served over plain HTTP.
    ///
    /// Only `localhost`, with or without a port, qualifies.
    pub fn is_local(&self) -> bool {
        match self.host.strip_prefix("localhost") {
            Some("") => true,
            Some(port) => port
                .strip_prefix(':')
                .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())),
            None => false,
        }
    }

    /// URL scheme including the `://` separator.
    pub fn scheme(&self) -> &'static str {
        if self.is_local() { "http://" } else { "https://" }
    }

    /// `<scheme><host>/v2/<repository>/manifests/<label>`
    pub fn manifest_url(&self) -> String {
        format!(
            "{}{}/v2/{}/manifests/{}",
            self.scheme(),
            self.host,
            self.repository,
            self.label
        )
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = if self.label.contains(':') { '@' } else { ':' };
        write!(f, "{}/{}{}{}", self.host, self.repository, separator, self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(reference: &str) -> String {
        ImageReference::parse(reference).unwrap().manifest_url()
    }

    #[test]
    fn docker_hub_with_namespace() {
        assert_eq!(
            url("apps/demo"),
            "https://index.docker.io/v2/apps/demo/manifests/latest"
        );
    }

    #[test]
    fn single_segment_goes_to_library() {
        for name in ["demo", "nginx", "redis", "a"] {
            let reference = ImageReference::parse(name).unwrap();
            assert!(reference.repository.starts_with(LIBRARY_PREFIX));
            assert_eq!(reference.host, DEFAULT_HOST);
        }
        assert_eq!(
            url("demo"),
            "https://index.docker.io/v2/library/demo/manifests/latest"
        );
    }

    #[test]
    fn localhost_uses_http() {
        assert_eq!(
            url("localhost:5000/apps/demo"),
            "http://localhost:5000/v2/apps/demo/manifests/latest"
        );
        assert_eq!(
            url("localhost/demo"),
            "http://localhost/v2/library/demo/manifests/latest"
        );
    }

    #[test]
    fn other_hosts_use_https() {
        for reference in [
            "quay.io/coreos/etcd",
            "registry.example.com:5000/team/app",
            "localhost.example.com/app/x",
            "localhostx:5000/app/x",
            "127.0.0.1:5000/app/x",
        ] {
            assert!(url(reference).starts_with("https://"), "{reference}");
        }
    }

    #[test]
    fn tags_and_digests() {
        assert_eq!(
            url("nginx:1.25"),
            "https://index.docker.io/v2/library/nginx/manifests/1.25"
        );
        assert_eq!(
            url("localhost:5000/apps/demo:v2"),
            "http://localhost:5000/v2/apps/demo/manifests/v2"
        );
        assert_eq!(
            url("ghcr.io/org/app@sha256:abc"),
            "https://ghcr.io/v2/org/app/manifests/sha256:abc"
        );
        assert_eq!(
            url("nginx:1.25@sha256:def"),
            "https://index.docker.io/v2/library/nginx/manifests/sha256:def"
        );
    }

    #[test]
    fn port_is_not_a_tag() {
        let reference = ImageReference::parse("localhost:5000/demo").unwrap();
        assert_eq!(reference.host, "localhost:5000");
        assert_eq!(reference.repository, "library/demo");
        assert_eq!(reference.label, DEFAULT_LABEL);
    }

    #[test]
    fn rejects_empty_references() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("   ").is_err());
        assert!(ImageReference::parse("localhost:5000/").is_err());
        assert_eq!(ImageReference::parse("").unwrap_err().code(), "E302");
    }

    #[test]
    fn display_round_trips_through_parse() {
        let reference = ImageReference::parse("nginx").unwrap();
        assert_eq!(reference.to_string(), "index.docker.io/library/nginx:latest");
        assert_eq!(ImageReference::parse(&reference.to_string()).unwrap(), reference);
    }
}
