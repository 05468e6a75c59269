//! Bearer challenges from `WWW-Authenticate` headers.

use regwatch_core::{RegwatchError, Result};

const BEARER: &str = "bearer ";

/// Parameters needed to request a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Token endpoint.
    pub realm: String,
    /// Service the token is issued for.
    pub service: String,
    /// Requested access scope.
    pub scope: String,
}

fn rejected(cause: impl Into<String>) -> RegwatchError {
    RegwatchError::Challenge {
        cause: cause.into(),
    }
}

/// Split a parameter list on commas that are not inside quotes.
fn split_params(params: &str) -> impl Iterator<Item = &str> {
    let mut quoted = false;
    let mut start = 0;
    let mut pieces = Vec::new();
    for (index, ch) in params.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                pieces.push(&params[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    pieces.push(&params[start..]);
    pieces.into_iter()
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}

impl Challenge {
    /// Parse a `Bearer realm=..,service=..,scope=..` header value.
    ///
    /// The header is rejected when it reports an `error=`, uses a scheme
    /// other than bearer, or lacks any of the three parameters.
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        if header.to_ascii_lowercase().contains("error=") {
            return Err(rejected(format!("registry reported an error: {header}")));
        }

        let params = header
            .get(..BEARER.len())
            .filter(|scheme| scheme.eq_ignore_ascii_case(BEARER))
            .map(|_| &header[BEARER.len()..])
            .ok_or_else(|| rejected(format!("not a bearer challenge: {header}")))?;

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for param in split_params(params) {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let value = unquote(value).to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        match (realm, service, scope) {
            (Some(realm), Some(service), Some(scope)) => Ok(Self {
                realm,
                service,
                scope,
            }),
            (realm, service, scope) => {
                let missing: Vec<&str> = [
                    ("realm", realm.is_none()),
                    ("service", service.is_none()),
                    ("scope", scope.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();
                Err(rejected(format!("missing {}", missing.join(", "))))
            }
        }
    }

    /// `<realm>?service=<service>&scope=<scope>`
    pub fn token_url(&self) -> String {
        format!(
            "{}?service={}&scope={}",
            self.realm, self.service, self.scope
        )
    }
}
