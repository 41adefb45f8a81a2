use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::bad_request;
use crate::auth::{ActorDescriptor, AuthErrorKind, Authenticator, Claims, RequestAuth};

const DEFAULT_TTL_SECONDS: i64 = 300;
const MAX_TTL_SECONDS: i64 = 60 * 60 * 24;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MintRequest {
    pub subject: String,
    pub audience: Vec<String>,
    /// Lifetime in seconds, default 300, at most one day.
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
    /// Attach a fresh nonce so the token is accepted once.
    #[serde(default)]
    pub single_use: bool,
    #[serde(default)]
    pub actor: Option<ActorDescriptor>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MintedToken {
    pub token: String,
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Uuid>,
}

#[utoipa::path(
    post,
    path= "/v1/tokens",
    request_body = MintRequest,
    responses (
        (status = 200, description = "Self-signed token", body = MintedToken),
        (status = 400, description = "Invalid request", body = super::ErrorBody),
        (status = 401, description = "Not authenticated", body = super::ErrorBody),
        (status = 403, description = "Admin privileges required", body = super::ErrorBody),
    ),
    tag = "warden",
)]
/// Mint a self-signed token. Admin only.
#[instrument(skip_all)]
pub async fn mint_token(
    Extension(authenticator): Extension<Arc<Authenticator>>,
    Extension(auth): Extension<RequestAuth>,
    payload: Option<Json<MintRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return bad_request("Missing payload");
    };

    let ttl = request.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS);
    if !(1..=MAX_TTL_SECONDS).contains(&ttl) {
        return bad_request(format!("ttl_seconds must be between 1 and {MAX_TTL_SECONDS}"));
    }

    let expires_at = authenticator.now().saturating_add(ttl);
    let mut claims = Claims::new(request.subject, request.audience).with_expires_at(expires_at);
    let nonce = request.single_use.then(Uuid::new_v4);
    if let Some(nonce) = nonce {
        claims = claims.with_nonce(nonce);
    }
    if let Some(actor) = request.actor {
        claims = claims.with_actor(actor);
    }
    let subject = claims.subject.clone();

    match authenticator.issue_token(claims) {
        Ok(token) => {
            info!(
                subject = %subject,
                issued_by = ?auth.actor().map(|actor| actor.id),
                single_use = nonce.is_some(),
                "Token minted"
            );
            (
                StatusCode::OK,
                Json(MintedToken {
                    token,
                    expires_at,
                    nonce,
                }),
            )
                .into_response()
        }
        Err(err) if err.kind() == AuthErrorKind::Unauthenticated => bad_request(err.message()),
        Err(err) => err.into_response_with(authenticator.debug_errors()),
    }
}
