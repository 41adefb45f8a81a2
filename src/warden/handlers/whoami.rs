use axum::{
    Json,
    extract::Extension,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{AuthError, RequestAuth};
use crate::store::Actor;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct WhoAmI {
    pub actor: Actor,
    /// Whether a cookie session backs this request.
    pub session: bool,
}

#[utoipa::path(
    get,
    path= "/v1/whoami",
    responses (
        (status = 200, description = "The authenticated actor", body = WhoAmI),
        (status = 401, description = "Not authenticated", body = super::ErrorBody),
        (status = 403, description = "XSRF token mismatch", body = super::ErrorBody),
    ),
    tag = "warden",
)]
/// Return the actor resolved for this request.
pub async fn whoami(Extension(auth): Extension<RequestAuth>) -> Response {
    let session = auth.is_session();
    match auth.actor() {
        Some(actor) => Json(WhoAmI {
            actor: actor.clone(),
            session,
        })
        .into_response(),
        None => AuthError::unauthenticated("authentication required").into_response(),
    }
}
