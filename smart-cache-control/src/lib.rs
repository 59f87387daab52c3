//! Smart cache control
//!
//! Decorates HTTP responses with `Cache-Control`, `Vary` and `Expires` headers, treating
//! anonymous requests as public (24h of cache by default) and authenticated requests as private
//! (no cache by default). Individual URLs can be given their own policy through an ordered list
//! of regular expressions, where the last matching rule wins.
//!
//! # Example
//!
//! ```rust,no_run
//! use axum::{Router, routing::get};
//! use smart_cache_control::{Anonymous, CacheOptions, PolicyRule, SmartCacheControl, Visibility};
//!
//! # fn main() -> Result<(), smart_cache_control::CacheOptionsError> {
//! let resolver = CacheOptions::default()
//!     .with_custom_url_cache(vec![
//!         PolicyRule::new(r"www\.example\.com/hello/", Visibility::Private, 0),
//!         PolicyRule::new(r"www\.example2\.com/api/search", Visibility::Public, 300),
//!     ])
//!     .build()?;
//!
//! let layer = SmartCacheControl::new(resolver, Anonymous);
//!
//! let router: Router = Router::new()
//!     .route("/", get(|| async { "Hello, world!" }))
//!     .layer(axum::middleware::from_fn_with_state(
//!         layer,
//!         smart_cache_control::smart_cache_control::<Anonymous>,
//!     ));
//! # let _ = router;
//! # Ok(())
//! # }
//! ```

mod auth;
mod middleware;
mod options;
mod policy;

pub use auth::{Anonymous, AuthenticationError, Authenticator, ExtensionIdentity, Identity};
pub use middleware::{CachingResponseExt, SmartCacheControl, host_and_path, smart_cache_control};
pub use options::{CacheOptions, CacheOptionsError, MAX_AGE_LIMIT};
pub use policy::{
    CachePolicyResolver, ParseVisibilityError, PolicyRule, ResolvedPolicy, Visibility,
};
