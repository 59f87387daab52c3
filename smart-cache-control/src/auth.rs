//! Authentication state of incoming requests.
//!
//! Determining whether a request is authenticated is up to the application: the middleware only
//! asks an [`Authenticator`] and degrades to anonymous caching when that fails.

use std::marker::PhantomData;

use http::{request::Parts, response::Parts as ResponseParts};

/// An error that can occur when determining whether a request is authenticated.
#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    /// No identity was attached to the request.
    #[error("no identity of type `{type_name}` was found in the request extensions")]
    MissingIdentity {
        /// The name of the expected identity type.
        type_name: &'static str,
    },

    /// The identity subsystem could not be queried.
    #[error("the identity subsystem is unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A user identity, as attached to requests by an authentication layer.
pub trait Identity {
    /// Whether the identity is an authenticated user.
    fn is_authenticated(&self) -> bool;
}

/// Determines whether a request is authenticated.
///
/// Closures taking the request parts are authenticators too:
///
/// ```rust
/// use smart_cache_control::{AuthenticationError, Authenticator};
///
/// let by_cookie = |parts: &http::request::Parts| -> Result<bool, AuthenticationError> {
///     Ok(parts.headers.contains_key(http::header::COOKIE))
/// };
///
/// let (parts, _) = http::Request::new(()).into_parts();
/// assert!(!by_cookie.is_authenticated(&parts).unwrap());
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Check the authentication state of the request.
    fn is_authenticated(&self, parts: &Parts) -> Result<bool, AuthenticationError>;

    /// Check the authentication state once the handler has responded.
    ///
    /// Handlers that log a user in or out can report the new state through the response.
    /// `request` is the result of [`Authenticator::is_authenticated`] for the same request, and is
    /// returned as-is by default.
    fn is_authenticated_after(
        &self,
        response: &ResponseParts,
        request: Result<bool, AuthenticationError>,
    ) -> Result<bool, AuthenticationError> {
        let _ = response;

        request
    }
}

impl<F> Authenticator for F
where
    F: Fn(&Parts) -> Result<bool, AuthenticationError> + Send + Sync + 'static,
{
    fn is_authenticated(&self, parts: &Parts) -> Result<bool, AuthenticationError> {
        self(parts)
    }
}

/// An authenticator that considers every request anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl Authenticator for Anonymous {
    fn is_authenticated(&self, _parts: &Parts) -> Result<bool, AuthenticationError> {
        Ok(false)
    }
}

/// An authenticator that reads an [`Identity`] from the request extensions.
///
/// The identity must have been inserted by an earlier layer. Requests without one yield
/// [`AuthenticationError::MissingIdentity`].
///
/// An identity found in the response extensions takes precedence over the request one, so that
/// handlers which log users in or out can insert the new identity in their response.
pub struct ExtensionIdentity<I> {
    _phantom: PhantomData<fn() -> I>,
}

impl<I> ExtensionIdentity<I> {
    /// Create a new extension-based authenticator.
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<I> Default for ExtensionIdentity<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> Clone for ExtensionIdentity<I> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<I> std::fmt::Debug for ExtensionIdentity<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionIdentity")
            .field("identity", &std::any::type_name::<I>())
            .finish()
    }
}

impl<I> Authenticator for ExtensionIdentity<I>
where
    I: Identity + Send + Sync + 'static,
{
    fn is_authenticated(&self, parts: &Parts) -> Result<bool, AuthenticationError> {
        parts
            .extensions
            .get::<I>()
            .map(Identity::is_authenticated)
            .ok_or(AuthenticationError::MissingIdentity {
                type_name: std::any::type_name::<I>(),
            })
    }

    fn is_authenticated_after(
        &self,
        response: &ResponseParts,
        request: Result<bool, AuthenticationError>,
    ) -> Result<bool, AuthenticationError> {
        match response.extensions.get::<I>() {
            Some(identity) => Ok(Identity::is_authenticated(identity)),
            None => request,
        }
    }
}
