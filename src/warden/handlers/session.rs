use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

use crate::auth::{Authenticator, RequestAuth};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionCreated {
    /// Echo this value in `x-xsrf-token` on unsafe requests.
    pub xsrf_token: String,
    pub expires_at: i64,
}

#[utoipa::path(
    post,
    path= "/v1/session",
    responses (
        (status = 201, description = "Session established, cookies set", body = SessionCreated),
        (status = 401, description = "No valid credential or session", body = super::ErrorBody),
    ),
    tag = "warden",
)]
/// Establish a cookie session for the authenticated actor. An existing
/// session on the request is replaced.
#[instrument(skip_all)]
pub async fn create_session(
    Extension(authenticator): Extension<Arc<Authenticator>>,
    Extension(auth): Extension<RequestAuth>,
) -> Response {
    let debug_errors = authenticator.debug_errors();

    if auth.is_session() {
        // The replacement cookies below supersede the cleared ones.
        let mut discarded = HeaderMap::new();
        if let Err(err) = authenticator.terminate_session(&mut discarded, &auth).await {
            return err.into_response_with(debug_errors);
        }
        debug!("Replacing existing session");
    }

    let mut headers = HeaderMap::new();
    match authenticator.establish_session(&mut headers, &auth).await {
        Ok(established) => (
            StatusCode::CREATED,
            headers,
            Json(SessionCreated {
                xsrf_token: established.xsrf_token,
                expires_at: established.expires_at,
            }),
        )
            .into_response(),
        Err(err) => err.into_response_with(debug_errors),
    }
}

#[utoipa::path(
    delete,
    path= "/v1/session",
    responses (
        (status = 204, description = "Session terminated, cookies cleared"),
        (status = 403, description = "XSRF token mismatch", body = super::ErrorBody),
    ),
    tag = "warden",
)]
/// Terminate the request's session. Succeeds when there is none.
#[instrument(skip_all)]
pub async fn delete_session(
    Extension(authenticator): Extension<Arc<Authenticator>>,
    Extension(auth): Extension<RequestAuth>,
) -> Response {
    let mut headers = HeaderMap::new();
    match authenticator.terminate_session(&mut headers, &auth).await {
        Ok(()) => (StatusCode::NO_CONTENT, headers).into_response(),
        Err(err) => err.into_response_with(authenticator.debug_errors()),
    }
}
