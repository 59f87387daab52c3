//! Cache policy resolution.

use std::{
    fmt::Display,
    str::FromStr,
    time::{Duration, SystemTime},
};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::AuthenticationError;

/// The cache visibility of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Shared caches may store the response.
    Public,

    /// Only the end-client may store the response.
    Private,
}

impl Visibility {
    /// Get the `Cache-Control` directive for this visibility.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error returned when parsing an unknown visibility.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cache visibility `{0}`: expected `public` or `private`")]
pub struct ParseVisibilityError(pub String);

impl FromStr for Visibility {
    type Err = ParseVisibilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            _ => Err(ParseVisibilityError(s.to_owned())),
        }
    }
}

/// A per-URL cache policy override.
///
/// The pattern is a regular expression matched against the whole `host + path` string of the
/// request: `www\.example\.com/hello/` matches `www.example.com/hello/` but not
/// `www.example.com/hello/world`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PolicyRule {
    /// The regular expression matched against `host + path`.
    pub pattern: String,

    /// The visibility to use when the rule matches.
    pub visibility: Visibility,

    /// The max-age, in seconds, to use when the rule matches.
    pub max_age: u64,
}

impl PolicyRule {
    /// Create a new rule.
    pub fn new(pattern: impl Into<String>, visibility: Visibility, max_age: u64) -> Self {
        Self {
            pattern: pattern.into(),
            visibility,
            max_age,
        }
    }
}

/// A rule whose pattern was compiled at configuration time.
#[derive(Debug, Clone)]
pub(crate) struct CompiledRule {
    pub(crate) regex: regex::Regex,
    pub(crate) visibility: Visibility,
    pub(crate) max_age: u64,
}

/// The caching headers to set on a single response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    /// The response visibility.
    pub visibility: Visibility,

    /// The max-age, in seconds.
    pub max_age: u64,

    /// The `Vary` header value, if one should be set.
    pub vary: Option<http::HeaderValue>,

    /// The expiration instant, if an `Expires` header should be set.
    pub expires: Option<SystemTime>,
}

impl ResolvedPolicy {
    /// Get the `Cache-Control` header value.
    pub fn cache_control(&self) -> http::HeaderValue {
        http::HeaderValue::from_str(&format!("{}, max-age={}", self.visibility, self.max_age))
            .expect("visibility and max-age always form a valid header value")
    }

    /// Get the `Expires` header value, formatted as an HTTP-date.
    ///
    /// Returns `None` if there is no expiration or if it cannot be written as an HTTP-date.
    pub fn expires_header(&self) -> Option<http::HeaderValue> {
        self.expires.filter(|expires| is_http_date(*expires)).map(|expires| {
            http::HeaderValue::from_str(&httpdate::fmt_http_date(expires))
                .expect("HTTP-dates are always valid header values")
        })
    }

    /// Set the caching headers, replacing any previous value.
    pub fn apply(&self, headers: &mut http::HeaderMap) {
        headers.insert(http::header::CACHE_CONTROL, self.cache_control());

        if let Some(vary) = &self.vary {
            headers.insert(http::header::VARY, vary.clone());
        }

        if let Some(expires) = self.expires_header() {
            headers.insert(http::header::EXPIRES, expires);
        }
    }
}

/// The last instant an HTTP-date can represent: 9999-12-31T23:59:59Z.
const LAST_HTTP_DATE: Duration = Duration::from_secs(253_402_300_799);

/// Whether the instant can be formatted as an HTTP-date.
fn is_http_date(at: SystemTime) -> bool {
    at.duration_since(SystemTime::UNIX_EPOCH)
        .is_ok_and(|since_epoch| since_epoch <= LAST_HTTP_DATE)
}

/// Computes the caching policy of responses.
///
/// A resolver is immutable once built and can be shared freely between concurrent requests.
/// Use [`crate::CacheOptions::build`] to get one.
#[derive(Debug, Clone)]
pub struct CachePolicyResolver {
    pub(crate) disabled: bool,
    pub(crate) max_age_public: u64,
    pub(crate) max_age_private: u64,
    pub(crate) rules: Vec<CompiledRule>,
    pub(crate) vary: Option<http::HeaderValue>,
    pub(crate) set_expire_header: bool,
}

impl CachePolicyResolver {
    /// Whether the resolver leaves all responses untouched.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Resolve the policy for a request, using the current time for the `Expires` header.
    ///
    /// See [`Self::resolve_at`].
    pub fn resolve(
        &self,
        authentication: Result<bool, AuthenticationError>,
        host_and_path: &str,
    ) -> Option<ResolvedPolicy> {
        self.resolve_at(authentication, host_and_path, SystemTime::now())
    }

    /// Resolve the policy for a request.
    ///
    /// Returns `None` if the resolver is disabled, in which case the response must be left
    /// untouched.
    ///
    /// A failed authentication check is logged and the request is treated as anonymous.
    pub fn resolve_at(
        &self,
        authentication: Result<bool, AuthenticationError>,
        host_and_path: &str,
        now: SystemTime,
    ) -> Option<ResolvedPolicy> {
        if self.disabled {
            return None;
        }

        let (mut visibility, mut max_age) = match authentication {
            Ok(true) => (Visibility::Private, self.max_age_private),
            Ok(false) => (Visibility::Public, self.max_age_public),
            Err(err) => {
                warn!("Unable to determine if the user is authenticated: {err}");

                (Visibility::Public, self.max_age_public)
            }
        };

        // Every matching rule is applied: the last one wins.
        for rule in &self.rules {
            if rule.regex.is_match(host_and_path) {
                debug!(
                    "`{host_and_path}` matches `{}`: using `{}, max-age={}`.",
                    rule.regex, rule.visibility, rule.max_age
                );

                visibility = rule.visibility;
                max_age = rule.max_age;
            }
        }

        let expires = if self.set_expire_header {
            let expires = now
                .checked_add(Duration::from_secs(max_age))
                .filter(|expires| is_http_date(*expires));

            if expires.is_none() {
                warn!("Clock is out of the HTTP-date range: not setting the Expires header.");
            }

            expires
        } else {
            None
        };

        Some(ResolvedPolicy {
            visibility,
            max_age,
            vary: self.vary.clone(),
            expires,
        })
    }
}
