use std::time::Duration;

use parking_lot::RwLock;
use regex::Regex;

use regwatch_core::codec::{Request, Response};

use super::{FetchError, FetchFuture, FetchProvider};

/// What a matching rule produces.
#[derive(Debug, Clone)]
enum Outcome {
    Respond(Response),
    Fail(FetchError),
}

/// A rule for matching and answering requests.
#[derive(Clone)]
pub struct MockFetchRule {
    url_pattern: Regex,
    /// Header that must be present with this exact value (name is
    /// case-insensitive).
    header: Option<(String, String)>,
    outcome: Outcome,
    latency: Option<Duration>,
    times: Option<usize>,
    matched_count: usize,
}

impl MockFetchRule {
    /// A rule answering URLs matching `url_pattern` with `response`.
    ///
    /// # Panics
    ///
    /// Panics if `url_pattern` is not a valid regex.
    pub fn new(url_pattern: &str, response: Response) -> Self {
        Self::with_outcome(url_pattern, Outcome::Respond(response))
    }

    /// A rule failing URLs matching `url_pattern` with `error`.
    ///
    /// # Panics
    ///
    /// Panics if `url_pattern` is not a valid regex.
    pub fn failing(url_pattern: &str, error: FetchError) -> Self {
        Self::with_outcome(url_pattern, Outcome::Fail(error))
    }

    fn with_outcome(url_pattern: &str, outcome: Outcome) -> Self {
        Self {
            url_pattern: Regex::new(url_pattern).expect("Invalid URL regex pattern"),
            header: None,
            outcome,
            latency: None,
            times: None,
            matched_count: 0,
        }
    }

    /// Only match requests carrying this header value.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.header = Some((name.to_string(), value.to_string()));
        self
    }

    /// Set simulated latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Set the number of times this rule should match.
    pub fn times(mut self, n: usize) -> Self {
        self.times = Some(n);
        self
    }

    fn matches(&self, request: &Request) -> bool {
        if let Some(limit) = self.times {
            if self.matched_count >= limit {
                return false;
            }
        }

        if let Some((name, value)) = &self.header {
            if request.header(name) != Some(value.as_str()) {
                return false;
            }
        }

        self.url_pattern.is_match(&request.url)
    }
}

impl std::fmt::Debug for MockFetchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockFetchRule")
            .field("url_pattern", &self.url_pattern.as_str())
            .field("header", &self.header)
            .field("outcome", &self.outcome)
            .field("latency", &self.latency)
            .field("times", &self.times)
            .finish()
    }
}

/// Mock fetch provider for testing.
///
/// Rules are tried in the order they were added; the first match answers.
///
/// # Example
///
/// ```
/// use regwatch_core::codec::Response;
/// use regwatch_host::fetch::MockFetch;
///
/// let mock = MockFetch::new()
///     .on_get(r"^https://index\.docker\.io/v2/")
///     .times(1)
///     .respond(Response::new(401).with_header("www-authenticate", "Bearer realm=\"r\""))
///     .on_get(r"^https://auth\.example/token")
///     .respond_json(200, r#"{"token":"T"}"#);
/// ```
pub struct MockFetch {
    rules: RwLock<Vec<MockFetchRule>>,
    requests: RwLock<Vec<Request>>,
    fail_on_unmatched: bool,
}

impl MockFetch {
    /// Create an empty mock.
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            requests: RwLock::new(Vec::new()),
            fail_on_unmatched: true,
        }
    }

    /// Add a rule.
    pub fn rule(self, rule: MockFetchRule) -> Self {
        self.rules.write().push(rule);
        self
    }

    /// Set whether unmatched requests fail (default) or get a 404.
    pub fn fail_on_unmatched(mut self, fail: bool) -> Self {
        self.fail_on_unmatched = fail;
        self
    }

    /// Fluent builder: start defining a rule.
    pub fn on_get(self, url_pattern: &str) -> MockFetchBuilder {
        MockFetchBuilder {
            mock: self,
            url_pattern: url_pattern.to_string(),
            header: None,
            latency: None,
            times: None,
        }
    }

    /// Get all recorded requests.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.read().clone()
    }

    /// Get the number of requests made.
    pub fn request_count(&self) -> usize {
        self.requests.read().len()
    }

    /// Count requests whose URL matches `url_pattern`.
    ///
    /// # Panics
    ///
    /// Panics if `url_pattern` is not a valid regex.
    pub fn count_matching(&self, url_pattern: &str) -> usize {
        let re = Regex::new(url_pattern).expect("Invalid URL pattern");
        self.requests
            .read()
            .iter()
            .filter(|r| re.is_match(&r.url))
            .count()
    }

    /// Clear recorded requests.
    pub fn clear_requests(&self) {
        self.requests.write().clear();
    }
}

impl Default for MockFetch {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchProvider for MockFetch {
    fn fetch(&self, request: Request) -> FetchFuture<'_> {
        let mut rules = self.rules.write();
        let matched = rules.iter_mut().find(|rule| rule.matches(&request));

        let (outcome, latency) = match matched {
            Some(rule) => {
                rule.matched_count += 1;
                (rule.outcome.clone(), rule.latency)
            }
            None if self.fail_on_unmatched => (
                Outcome::Fail(FetchError::NoMockMatch {
                    url: request.url.clone(),
                }),
                None,
            ),
            None => (
                Outcome::Respond(Response::new(404).with_body(b"Not Found".to_vec())),
                None,
            ),
        };
        drop(rules);

        self.requests.write().push(request);

        Box::pin(async move {
            if let Some(delay) = latency {
                tokio::time::sleep(delay).await;
            }
            match outcome {
                Outcome::Respond(response) => Ok(response),
                Outcome::Fail(error) => Err(error),
            }
        })
    }

    fn is_mock(&self) -> bool {
        true
    }
}

/// Builder for fluent rule creation.
pub struct MockFetchBuilder {
    mock: MockFetch,
    url_pattern: String,
    header: Option<(String, String)>,
    latency: Option<Duration>,
    times: Option<usize>,
}

impl MockFetchBuilder {
    /// Only match requests carrying this header value.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.header = Some((name.to_string(), value.to_string()));
        self
    }

    /// Set simulated latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Set the number of times this rule should match.
    pub fn times(mut self, n: usize) -> Self {
        self.times = Some(n);
        self
    }

    fn finish(self, mut rule: MockFetchRule) -> MockFetch {
        rule.header = self.header;
        rule.latency = self.latency;
        rule.times = self.times;
        self.mock.rule(rule)
    }

    /// Answer with `response`.
    pub fn respond(self, response: Response) -> MockFetch {
        let rule = MockFetchRule::new(&self.url_pattern, response);
        self.finish(rule)
    }

    /// Answer with a JSON body.
    pub fn respond_json(self, status: i32, body: &str) -> MockFetch {
        self.respond(
            Response::new(status)
                .with_header("content-type", "application/json")
                .with_body(body.as_bytes().to_vec()),
        )
    }

    /// Answer a manifest request with a digest.
    pub fn respond_digest(self, digest: &str) -> MockFetch {
        self.respond(Response::new(200).with_header("Docker-Content-Digest", digest))
    }

    /// Fail with a transport error.
    pub fn fail(self, error: FetchError) -> MockFetch {
        let rule = MockFetchRule::failing(&self.url_pattern, error);
        self.finish(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_matching_rule_answers() {
        let mock = MockFetch::new()
            .on_get(r"^https://registry\.example/v2/")
            .respond_digest("sha256:abc")
            .on_get(r".*")
            .respond(Response::new(500));

        let response = mock
            .fetch(Request::new("https://registry.example/v2/a/manifests/latest"))
            .await
            .unwrap();
        assert_eq!(response.header("docker-content-digest"), Some("sha256:abc"));

        let response = mock
            .fetch(Request::new("https://other.example/"))
            .await
            .unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn times_limits_a_rule() {
        let mock = MockFetch::new()
            .on_get("manifests")
            .times(1)
            .respond(Response::new(401))
            .on_get("manifests")
            .respond(Response::new(200));

        let first = mock.fetch(Request::new("/v2/x/manifests/1")).await.unwrap();
        let second = mock.fetch(Request::new("/v2/x/manifests/1")).await.unwrap();
        assert_eq!(first.status, 401);
        assert_eq!(second.status, 200);
    }

    #[tokio::test]
    async fn header_rules_match_case_insensitively() {
        let mock = MockFetch::new()
            .on_get("manifests")
            .with_header("Authorization", "Bearer T")
            .respond(Response::new(200))
            .on_get("manifests")
            .respond(Response::new(401));

        let anonymous = mock.fetch(Request::new("/manifests")).await.unwrap();
        let authorized = mock
            .fetch(Request::new("/manifests").with_header("authorization", "Bearer T"))
            .await
            .unwrap();
        assert_eq!(anonymous.status, 401);
        assert_eq!(authorized.status, 200);
    }

    #[tokio::test]
    async fn unmatched_requests_fail_or_404() {
        let strict = MockFetch::new();
        let err = strict.fetch(Request::new("https://x/")).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::NoMockMatch {
                url: "https://x/".to_string()
            }
        );

        let lenient = MockFetch::new().fail_on_unmatched(false);
        let response = lenient.fetch(Request::new("https://x/")).await.unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn failing_rules_and_recording() {
        let mock = MockFetch::new()
            .on_get("down")
            .fail(FetchError::ConnectionFailed("refused".to_string()));

        let err = mock.fetch(Request::new("http://down/")).await.unwrap_err();
        assert!(matches!(err, FetchError::ConnectionFailed(_)));
        assert_eq!(mock.count_matching("down"), 1);
        assert!(mock.is_mock());

        mock.clear_requests();
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn latency_delays_the_answer() {
        let mock = MockFetch::new()
            .on_get(".*")
            .with_latency(Duration::from_millis(20))
            .respond(Response::new(204));

        let started = std::time::Instant::now();
        let response = mock.fetch(Request::new("http://slow/")).await.unwrap();
        assert_eq!(response.status, 204);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
