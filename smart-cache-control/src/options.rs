//! Cache options.

use serde::Deserialize;

use crate::policy::{CachePolicyResolver, CompiledRule, PolicyRule, Visibility};

/// The largest max-age that can be configured, in seconds.
///
/// This is the delta-seconds ceiling recommended by RFC 9111, section 1.2.2.
pub const MAX_AGE_LIMIT: u64 = 2_147_483_648;

/// The options of the cache control middleware.
///
/// Options are read once, validated with [`CacheOptions::build`] and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Whether to set the `Vary` header.
    ///
    /// Defaults to `true`.
    pub set_vary_header: bool,

    /// The request headers listed in the `Vary` header.
    ///
    /// Defaults to `Accept-Encoding`, `Accept-Language` and `Cookie`. An empty list disables the
    /// `Vary` header.
    pub vary_headers: Vec<String>,

    /// Whether to set the `Expires` header.
    ///
    /// Defaults to `true`.
    pub set_expire_header: bool,

    /// The max-age of responses to anonymous requests, in seconds.
    ///
    /// Defaults to 24 hours.
    pub max_age_public: u64,

    /// The max-age of responses to authenticated requests, in seconds.
    ///
    /// Defaults to 0.
    pub max_age_private: u64,

    /// Per-URL overrides, matched in order against `host + path`. The last matching rule wins.
    pub custom_url_cache: Vec<PolicyRule>,

    /// Leave all responses untouched, such as during development.
    pub disabled: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            set_vary_header: true,
            vary_headers: vec![
                "Accept-Encoding".to_owned(),
                "Accept-Language".to_owned(),
                "Cookie".to_owned(),
            ],
            set_expire_header: true,
            max_age_public: 86400,
            max_age_private: 0,
            custom_url_cache: Vec::new(),
            disabled: false,
        }
    }
}

/// An error that can occur when reading or validating cache options.
#[derive(Debug, thiserror::Error)]
pub enum CacheOptionsError {
    /// An environment variable was not unicode.
    #[error("environment variable {name} was not unicode")]
    NotUnicode {
        /// The name of the environment variable.
        name: &'static str,
    },

    /// An environment variable was not a boolean.
    #[error("failed to parse a boolean from environment variable {name} (was `{value}`)")]
    Bool {
        /// The name of the environment variable.
        name: &'static str,

        /// The value that was attempted to be parsed.
        value: String,
    },

    /// An environment variable was not a non-negative integer.
    #[error("failed to parse a number of seconds from environment variable {name} (was `{value}`): {err}")]
    Seconds {
        /// The name of the environment variable.
        name: &'static str,

        /// The value that was attempted to be parsed.
        value: String,

        /// The error that occurred.
        #[source]
        err: std::num::ParseIntError,
    },

    /// The custom URL rules could not be parsed.
    #[error("failed to parse the custom URL rules from environment variable {name}: {err}")]
    Rules {
        /// The name of the environment variable.
        name: &'static str,

        /// The error that occurred.
        #[source]
        err: serde_json::Error,
    },

    /// A rule pattern is not a valid regular expression.
    #[error("custom URL rule #{index} has an invalid pattern `{pattern}`: {err}")]
    Pattern {
        /// The position of the rule.
        index: usize,

        /// The pattern that was attempted to be compiled.
        pattern: String,

        /// The error that occurred.
        #[source]
        err: regex::Error,
    },

    /// A max-age is larger than [`MAX_AGE_LIMIT`].
    #[error(
        "{what} is {max_age} seconds, which exceeds the limit of {limit} seconds",
        limit = MAX_AGE_LIMIT
    )]
    MaxAge {
        /// The option that holds the max-age.
        what: String,

        /// The configured max-age.
        max_age: u64,
    },

    /// The `Vary` header list does not form a valid header value.
    #[error("invalid Vary header value `{value}`: {err}")]
    Vary {
        /// The joined header value.
        value: String,

        /// The error that occurred.
        #[source]
        err: http::header::InvalidHeaderValue,
    },
}

impl CacheOptions {
    /// The environment variable name for [`CacheOptions::set_vary_header`].
    pub const SCC_SET_VARY_HEADER: &'static str = "SCC_SET_VARY_HEADER";

    /// The environment variable name for [`CacheOptions::vary_headers`], as a comma-separated
    /// list.
    pub const SCC_VARY_HEADERS: &'static str = "SCC_VARY_HEADERS";

    /// The environment variable name for [`CacheOptions::set_expire_header`].
    pub const SCC_SET_EXPIRE_HEADER: &'static str = "SCC_SET_EXPIRE_HEADER";

    /// The environment variable name for [`CacheOptions::max_age_public`].
    pub const SCC_MAX_AGE_PUBLIC: &'static str = "SCC_MAX_AGE_PUBLIC";

    /// The environment variable name for [`CacheOptions::max_age_private`].
    pub const SCC_MAX_AGE_PRIVATE: &'static str = "SCC_MAX_AGE_PRIVATE";

    /// The environment variable name for [`CacheOptions::custom_url_cache`], as a JSON array of
    /// `[pattern, visibility, max_age]` triples.
    pub const SCC_CUSTOM_URL_CACHE: &'static str = "SCC_CUSTOM_URL_CACHE";

    /// The environment variable name for [`CacheOptions::disabled`].
    pub const SCC_DISABLED: &'static str = "SCC_DISABLED";

    /// Set whether to set the `Vary` header.
    pub fn with_set_vary_header(mut self, set_vary_header: bool) -> Self {
        self.set_vary_header = set_vary_header;
        self
    }

    /// Set the request headers listed in the `Vary` header.
    pub fn with_vary_headers(
        mut self,
        vary_headers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.vary_headers = vary_headers.into_iter().map(Into::into).collect();
        self
    }

    /// Set whether to set the `Expires` header.
    pub fn with_set_expire_header(mut self, set_expire_header: bool) -> Self {
        self.set_expire_header = set_expire_header;
        self
    }

    /// Set the max-age of responses to anonymous requests.
    pub fn with_max_age_public(mut self, max_age_public: u64) -> Self {
        self.max_age_public = max_age_public;
        self
    }

    /// Set the max-age of responses to authenticated requests.
    pub fn with_max_age_private(mut self, max_age_private: u64) -> Self {
        self.max_age_private = max_age_private;
        self
    }

    /// Set the per-URL overrides.
    pub fn with_custom_url_cache(mut self, custom_url_cache: Vec<PolicyRule>) -> Self {
        self.custom_url_cache = custom_url_cache;
        self
    }

    /// Set whether all responses should be left untouched.
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Get the cache options from the environment.
    ///
    /// Unset or empty variables keep their default value.
    pub fn from_env() -> Result<Self, CacheOptionsError> {
        tracing::info!("Reading cache control options from the environment...");

        Self::from_vars(|name| std::env::var(name))
    }

    fn from_vars(
        get: impl Fn(&'static str) -> Result<String, std::env::VarError>,
    ) -> Result<Self, CacheOptionsError> {
        let var = |name: &'static str| match get(name) {
            Ok(value) => Ok(if value.is_empty() { None } else { Some(value) }),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(CacheOptionsError::NotUnicode { name }),
        };
        let bool_var = |name: &'static str| -> Result<Option<bool>, CacheOptionsError> {
            var(name)?
                .map(|value| parse_bool(&value).ok_or(CacheOptionsError::Bool { name, value }))
                .transpose()
        };
        let seconds_var = |name: &'static str| -> Result<Option<u64>, CacheOptionsError> {
            var(name)?
                .map(|value| {
                    value
                        .trim()
                        .parse()
                        .map_err(|err| CacheOptionsError::Seconds { name, value, err })
                })
                .transpose()
        };

        let mut options = Self::default();

        if let Some(set_vary_header) = bool_var(Self::SCC_SET_VARY_HEADER)? {
            options.set_vary_header = set_vary_header;
        }

        if let Some(vary_headers) = var(Self::SCC_VARY_HEADERS)? {
            options.vary_headers = vary_headers
                .split(',')
                .map(str::trim)
                .filter(|header| !header.is_empty())
                .map(str::to_owned)
                .collect();
        }

        if let Some(set_expire_header) = bool_var(Self::SCC_SET_EXPIRE_HEADER)? {
            options.set_expire_header = set_expire_header;
        }

        if let Some(max_age_public) = seconds_var(Self::SCC_MAX_AGE_PUBLIC)? {
            options.max_age_public = max_age_public;
        }

        if let Some(max_age_private) = seconds_var(Self::SCC_MAX_AGE_PRIVATE)? {
            options.max_age_private = max_age_private;
        }

        if let Some(rules) = var(Self::SCC_CUSTOM_URL_CACHE)? {
            let rules: Vec<(String, Visibility, u64)> =
                serde_json::from_str(&rules).map_err(|err| CacheOptionsError::Rules {
                    name: Self::SCC_CUSTOM_URL_CACHE,
                    err,
                })?;

            options.custom_url_cache = rules
                .into_iter()
                .map(|(pattern, visibility, max_age)| PolicyRule::new(pattern, visibility, max_age))
                .collect();
        }

        if let Some(disabled) = bool_var(Self::SCC_DISABLED)? {
            options.disabled = disabled;
        }

        if options.disabled {
            tracing::warn!(
                "{} was set: responses will not be decorated with caching headers.",
                Self::SCC_DISABLED
            );
        }

        Ok(options)
    }

    /// Validate the options and compile them into a resolver.
    ///
    /// Every rule pattern is compiled here, so that invalid configurations are rejected before
    /// any request is served.
    pub fn build(self) -> Result<CachePolicyResolver, CacheOptionsError> {
        check_max_age("the public max-age", self.max_age_public)?;
        check_max_age("the private max-age", self.max_age_private)?;

        let rules = self
            .custom_url_cache
            .into_iter()
            .enumerate()
            .map(|(index, rule)| {
                check_max_age(&format!("custom URL rule #{index} max-age"), rule.max_age)?;

                let pattern_error = |err: regex::Error| CacheOptionsError::Pattern {
                    index,
                    pattern: rule.pattern.clone(),
                    err,
                };

                // The pattern must be valid on its own before it is anchored.
                regex::Regex::new(&rule.pattern).map_err(pattern_error)?;
                let regex = regex::Regex::new(&format!(r"\A(?:{})\z", rule.pattern))
                    .map_err(pattern_error)?;

                Ok(CompiledRule {
                    regex,
                    visibility: rule.visibility,
                    max_age: rule.max_age,
                })
            })
            .collect::<Result<Vec<_>, CacheOptionsError>>()?;

        let vary = if self.set_vary_header && !self.vary_headers.is_empty() {
            let value = self.vary_headers.join(", ");

            Some(
                http::HeaderValue::from_str(&value)
                    .map_err(|err| CacheOptionsError::Vary { value, err })?,
            )
        } else {
            None
        };

        Ok(CachePolicyResolver {
            disabled: self.disabled,
            max_age_public: self.max_age_public,
            max_age_private: self.max_age_private,
            rules,
            vary,
            set_expire_header: self.set_expire_header,
        })
    }
}

fn check_max_age(what: &str, max_age: u64) -> Result<(), CacheOptionsError> {
    if max_age > MAX_AGE_LIMIT {
        return Err(CacheOptionsError::MaxAge {
            what: what.to_owned(),
            max_age,
        });
    }

    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_map(vars: &[(&'static str, &str)]) -> Result<CacheOptions, CacheOptionsError> {
        let vars: HashMap<&'static str, String> = vars
            .iter()
            .map(|(name, value)| (*name, value.to_string()))
            .collect();

        CacheOptions::from_vars(|name| vars.get(name).cloned().ok_or(std::env::VarError::NotPresent))
    }

    #[test]
    fn test_defaults() {
        let options = CacheOptions::default();

        assert!(options.set_vary_header);
        assert_eq!(
            options.vary_headers,
            ["Accept-Encoding", "Accept-Language", "Cookie"]
        );
        assert!(options.set_expire_header);
        assert_eq!(options.max_age_public, 86400);
        assert_eq!(options.max_age_private, 0);
        assert!(options.custom_url_cache.is_empty());
        assert!(!options.disabled);

        assert_eq!(from_map(&[]).unwrap(), options);
    }

    #[test]
    fn test_from_vars() {
        let options = from_map(&[
            (CacheOptions::SCC_SET_VARY_HEADER, "false"),
            (CacheOptions::SCC_VARY_HEADERS, "Accept-Encoding, Cookie,"),
            (CacheOptions::SCC_SET_EXPIRE_HEADER, "0"),
            (CacheOptions::SCC_MAX_AGE_PUBLIC, "3600"),
            (CacheOptions::SCC_MAX_AGE_PRIVATE, " 60 "),
            (
                CacheOptions::SCC_CUSTOM_URL_CACHE,
                r#"[["www\\.example\\.com/hello/$", "private", 0], ["www\\.example2\\.com/api/search$", "public", 300]]"#,
            ),
            (CacheOptions::SCC_DISABLED, "Yes"),
        ])
        .unwrap();

        assert_eq!(
            options,
            CacheOptions {
                set_vary_header: false,
                vary_headers: vec!["Accept-Encoding".to_owned(), "Cookie".to_owned()],
                set_expire_header: false,
                max_age_public: 3600,
                max_age_private: 60,
                custom_url_cache: vec![
                    PolicyRule::new(r"www\.example\.com/hello/$", Visibility::Private, 0),
                    PolicyRule::new(r"www\.example2\.com/api/search$", Visibility::Public, 300),
                ],
                disabled: true,
            }
        );
    }

    #[test]
    fn test_empty_vars_keep_defaults() {
        let options = from_map(&[
            (CacheOptions::SCC_MAX_AGE_PUBLIC, ""),
            (CacheOptions::SCC_DISABLED, ""),
        ])
        .unwrap();

        assert_eq!(options, CacheOptions::default());
    }

    #[test]
    fn test_invalid_vars() {
        assert!(matches!(
            from_map(&[(CacheOptions::SCC_DISABLED, "maybe")]),
            Err(CacheOptionsError::Bool { name: "SCC_DISABLED", .. })
        ));
        assert!(matches!(
            from_map(&[(CacheOptions::SCC_MAX_AGE_PUBLIC, "-1")]),
            Err(CacheOptionsError::Seconds { name: "SCC_MAX_AGE_PUBLIC", .. })
        ));
        assert!(matches!(
            from_map(&[(CacheOptions::SCC_CUSTOM_URL_CACHE, r#"[["a", "shared", 0]]"#)]),
            Err(CacheOptionsError::Rules { .. })
        ));
        assert!(matches!(
            from_map(&[(CacheOptions::SCC_CUSTOM_URL_CACHE, r#"[["a", "public", -5]]"#)]),
            Err(CacheOptionsError::Rules { .. })
        ));
    }

    #[test]
    fn test_not_unicode() {
        let result = CacheOptions::from_vars(|name| {
            if name == CacheOptions::SCC_VARY_HEADERS {
                Err(std::env::VarError::NotUnicode("\u{fffd}".into()))
            } else {
                Err(std::env::VarError::NotPresent)
            }
        });

        assert!(matches!(
            result,
            Err(CacheOptionsError::NotUnicode { name: "SCC_VARY_HEADERS" })
        ));
    }

    #[test]
    fn test_build_rejects_invalid_pattern() {
        let err = CacheOptions::default()
            .with_custom_url_cache(vec![
                PolicyRule::new(r"example\.com/$", Visibility::Public, 10),
                PolicyRule::new(r"example\.com/(unclosed", Visibility::Private, 0),
            ])
            .build()
            .unwrap_err();

        match err {
            CacheOptionsError::Pattern { index, pattern, .. } => {
                assert_eq!(index, 1);
                assert_eq!(pattern, r"example\.com/(unclosed");
            }
            err => panic!("Expected a pattern error, got {err:?}"),
        }
    }

    #[test]
    fn test_build_rejects_patterns_that_only_compile_once_anchored() {
        for pattern in [r"a)|(?:b", r"example\.com/a)|(?:b"] {
            match CacheOptions::default()
                .with_custom_url_cache(vec![PolicyRule::new(pattern, Visibility::Private, 0)])
                .build()
            {
                Err(CacheOptionsError::Pattern { index, pattern: p, .. }) => {
                    assert_eq!(index, 0);
                    assert_eq!(p, pattern);
                }
                other => panic!("Expected a pattern error for `{pattern}`, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_build_rejects_huge_max_age() {
        assert!(matches!(
            CacheOptions::default()
                .with_max_age_public(MAX_AGE_LIMIT + 1)
                .build(),
            Err(CacheOptionsError::MaxAge { max_age, .. }) if max_age == MAX_AGE_LIMIT + 1
        ));
        assert!(matches!(
            CacheOptions::default()
                .with_custom_url_cache(vec![PolicyRule::new(".*", Visibility::Public, u64::MAX)])
                .build(),
            Err(CacheOptionsError::MaxAge { .. })
        ));
        assert!(
            CacheOptions::default()
                .with_max_age_private(MAX_AGE_LIMIT)
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_build_rejects_invalid_vary_header() {
        assert!(matches!(
            CacheOptions::default()
                .with_vary_headers(["Accept-Encoding\n"])
                .build(),
            Err(CacheOptionsError::Vary { .. })
        ));

        // The Vary list is not validated when it is not used.
        assert!(
            CacheOptions::default()
                .with_set_vary_header(false)
                .with_vary_headers(["Accept-Encoding\n"])
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_deserialize_partial_options() {
        let options: CacheOptions = serde_json::from_str(
            r#"{
                "max_age_public": 600,
                "custom_url_cache": [
                    { "pattern": "example\\.com/admin/.*", "visibility": "private", "max_age": 0 }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            options,
            CacheOptions::default()
                .with_max_age_public(600)
                .with_custom_url_cache(vec![PolicyRule::new(
                    r"example\.com/admin/.*",
                    Visibility::Private,
                    0
                )])
        );
    }
}
