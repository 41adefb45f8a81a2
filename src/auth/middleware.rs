//! axum glue: run the [`Authenticator`] in front of a route.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::SET_COOKIE},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::orchestrator::Authenticator;
use super::policy::RoutePolicy;
use super::session::XSRF_HEADER;

/// State for [`guard`]: the shared authenticator and this route's policy.
#[derive(Clone, Debug)]
pub struct RouteGuard {
    authenticator: Arc<Authenticator>,
    policy: Arc<RoutePolicy>,
}

impl RouteGuard {
    #[must_use]
    pub fn new(authenticator: Arc<Authenticator>, policy: RoutePolicy) -> Self {
        Self {
            authenticator,
            policy: Arc::new(policy),
        }
    }
}

/// Use with `axum::middleware::from_fn_with_state`. On success the
/// [`RequestAuth`](super::RequestAuth) is available as an extension.
pub async fn guard(State(guard): State<RouteGuard>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();
    let mut extra = HeaderMap::new();

    match guard
        .authenticator
        .authenticate(&guard.policy, &parts, &mut extra)
        .await
    {
        Ok(auth) => {
            parts.extensions.insert(auth);
            let mut response = next.run(Request::from_parts(parts, body)).await;
            merge_headers(&mut response, &extra);
            response
        }
        Err(err) => {
            let mut response = err.into_response_with(guard.authenticator.debug_errors());
            merge_headers(&mut response, &extra);
            response
        }
    }
}

/// A handler that sets session cookies itself owns the session headers.
fn merge_headers(response: &mut Response, extra: &HeaderMap) {
    let handler_owns_session = response.headers().contains_key(SET_COOKIE);
    for (name, value) in extra {
        if handler_owns_session && (*name == SET_COOKIE || name.as_str() == XSRF_HEADER) {
            continue;
        }
        response.headers_mut().append(name.clone(), value.clone());
    }
}
