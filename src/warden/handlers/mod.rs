pub mod health;
pub use self::health::health;

pub mod session;
pub use self::session::{create_session, delete_session};

pub mod token;
pub use self::token::mint_token;

pub mod whoami;
pub use self::whoami::whoami;

// common types for the handlers
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error body shared by every endpoint.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

pub(crate) fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}
