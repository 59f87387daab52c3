//! Axum integration.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use http::request::Parts;

use crate::{
    auth::{Anonymous, AuthenticationError, Authenticator},
    policy::{CachePolicyResolver, ResolvedPolicy},
};

/// Get the string that custom URL rules are matched against: the `Host` header followed by the
/// request path, without the query string.
///
/// The URI authority is used when the request has no valid `Host` header.
pub fn host_and_path(parts: &Parts) -> String {
    let host = parts
        .headers
        .get(http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| parts.uri.authority().map(|authority| authority.as_str()))
        .unwrap_or_default();

    format!("{host}{}", parts.uri.path())
}

/// Decorates responses with caching headers.
///
/// This is the state of the [`smart_cache_control`] middleware, and is cheap to clone.
pub struct SmartCacheControl<A = Anonymous> {
    resolver: Arc<CachePolicyResolver>,
    authenticator: Arc<A>,
}

impl<A> Clone for SmartCacheControl<A> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            authenticator: self.authenticator.clone(),
        }
    }
}

impl<A: Authenticator> SmartCacheControl<A> {
    /// Create a new middleware state.
    pub fn new(resolver: CachePolicyResolver, authenticator: A) -> Self {
        Self {
            resolver: Arc::new(resolver),
            authenticator: Arc::new(authenticator),
        }
    }

    /// Get the underlying resolver.
    pub fn resolver(&self) -> &CachePolicyResolver {
        &self.resolver
    }

    /// Resolve the caching policy for a request, before any response is known.
    ///
    /// The authenticator is not called when the resolver is disabled.
    pub fn resolve(&self, parts: &Parts) -> Option<ResolvedPolicy> {
        if self.resolver.is_disabled() {
            return None;
        }

        self.resolver.resolve(
            self.authenticator.is_authenticated(parts),
            &host_and_path(parts),
        )
    }

    /// Decorate a response to the request described by `parts`.
    ///
    /// The authenticator gets to inspect the response before the policy is resolved.
    pub fn decorate(&self, parts: &Parts, response: Response) -> Response {
        if self.resolver.is_disabled() {
            return response;
        }

        self.finish(
            self.authenticator.is_authenticated(parts),
            &host_and_path(parts),
            response,
        )
    }

    fn finish(
        &self,
        authentication: Result<bool, AuthenticationError>,
        host_and_path: &str,
        response: Response,
    ) -> Response {
        let (mut parts, body) = response.into_parts();
        let authentication = self
            .authenticator
            .is_authenticated_after(&parts, authentication);

        if let Some(policy) = self.resolver.resolve(authentication, host_and_path) {
            policy.apply(&mut parts.headers);
        }

        Response::from_parts(parts, body)
    }
}

/// The cache control middleware.
///
/// Use it with [`axum::middleware::from_fn_with_state`] and a [`SmartCacheControl`] state.
///
/// Identities read by the authenticator must be inserted by layers that run before this one, or
/// by the handler in its response.
pub async fn smart_cache_control<A: Authenticator>(
    State(state): State<SmartCacheControl<A>>,
    request: Request,
    next: Next,
) -> Response {
    if state.resolver.is_disabled() {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let authentication = state.authenticator.is_authenticated(&parts);
    let host_and_path = host_and_path(&parts);

    let response = next.run(Request::from_parts(parts, body)).await;

    state.finish(authentication, &host_and_path, response)
}

/// An extension trait to set caching headers on responses.
pub trait CachingResponseExt {
    /// Decorate the response with the headers of the policy.
    ///
    /// Existing `Cache-Control`, `Vary` and `Expires` headers are replaced. A `None` policy leaves
    /// the response untouched.
    fn with_cache_policy(self, policy: Option<&ResolvedPolicy>) -> Response;
}

impl CachingResponseExt for Response {
    fn with_cache_policy(mut self, policy: Option<&ResolvedPolicy>) -> Response {
        if let Some(policy) = policy {
            policy.apply(self.headers_mut());
        }

        self
    }
}
