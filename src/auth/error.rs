//! Error types.
//!
//! Components return [`TokenError`], [`DirectoryError`] or [`SessionError`] and
//! never build HTTP responses. The orchestrator folds everything into
//! [`AuthError`], which carries a user-safe message and, separately, the
//! internal cause that is only rendered in debug mode.

use axum::{
    Json,
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::borrow::Cow;
use thiserror::Error;

pub const DEBUG_ERROR_HEADER: &str = "x-warden-debug";

const MAX_DEBUG_HEADER_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json: {0}")]
    Json(String),
    #[error("unexpected algorithm: expected {expected}, found {found}")]
    UnexpectedAlgorithm {
        expected: &'static str,
        found: String,
    },
    #[error("invalid signature")]
    InvalidSignature,
    #[error("failed to parse key material")]
    KeyParse,
    #[error("key has no private half and cannot sign")]
    MissingPrivateKey,
    #[error("admin not found: {0}")]
    AdminNotFound(String),
    #[error("admin subject and embedded actor disagree")]
    AdminMismatch,
    #[error("subject does not match embedded actor")]
    SubjectMismatch,
    #[error("cannot use nonce without expiration")]
    NonceWithoutExpiry,
    #[error("token expired")]
    Expired,
    #[error("token has no audience")]
    MissingAudience,
    #[error("token audience does not include this service")]
    AudienceMismatch,
    #[error("unknown audience: {0}")]
    UnknownAudience(String),
    #[error("token has no subject")]
    MissingSubject,
}

impl TokenError {
    /// Errors caused by this deployment's key configuration rather than by the
    /// presented token.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::KeyParse | Self::MissingPrivateKey)
    }

    /// Fixed text safe to return to the caller. Parser output and header
    /// contents stay in the error itself.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::TokenFormat
            | Self::Base64
            | Self::Json(_)
            | Self::UnexpectedAlgorithm { .. }
            | Self::InvalidSignature => "invalid token",
            Self::KeyParse | Self::MissingPrivateKey => "internal error",
            Self::AdminNotFound(_) => "admin not found",
            Self::AdminMismatch | Self::SubjectMismatch => "token subject does not match its actor",
            Self::NonceWithoutExpiry => "cannot use nonce without expiration",
            Self::Expired => "token expired",
            Self::MissingAudience => "token has no audience",
            Self::AudienceMismatch => "token audience does not include this service",
            Self::UnknownAudience(_) => "unknown audience",
            Self::MissingSubject => "token has no subject",
        }
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("actor does not exist")]
    NotFound,
    #[error("admin is not configured: {0}")]
    AdminNotConfigured(String),
    #[error("actor store error")]
    Store(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot establish a session without an authenticated actor")]
    Unauthenticated,
    #[error("failed to generate session secret")]
    Random(#[source] anyhow::Error),
    #[error("session store error")]
    Store(#[source] anyhow::Error),
    #[error("invalid cookie value")]
    Cookie,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Missing or invalid credential or session.
    Unauthenticated,
    /// A session was found but the request did not echo its XSRF token.
    XsrfMismatch,
    /// Authenticated, but not allowed on this route.
    Forbidden,
    Internal,
}

impl AuthErrorKind {
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::XsrfMismatch | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct AuthError {
    kind: AuthErrorKind,
    message: Cow<'static, str>,
    cause: Option<anyhow::Error>,
}

impl AuthError {
    fn new(kind: AuthErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn unauthenticated(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(AuthErrorKind::Unauthenticated, message)
    }

    #[must_use]
    pub fn xsrf_mismatch() -> Self {
        Self::new(AuthErrorKind::XsrfMismatch, "invalid xsrf token")
    }

    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(AuthErrorKind::Forbidden, message)
    }

    pub fn internal(cause: impl Into<anyhow::Error>) -> Self {
        Self::new(AuthErrorKind::Internal, "internal error").with_cause(cause)
    }

    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> AuthErrorKind {
        self.kind
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_ref()
    }

    /// Render the error. The internal cause is only included when `debug` is set.
    #[must_use]
    pub fn into_response_with(self, debug: bool) -> Response {
        let status = self.status();
        let cause = if debug {
            self.cause.as_ref().map(|cause| format!("{cause:#}"))
        } else {
            None
        };

        let body = match &cause {
            Some(cause) => json!({ "error": self.message, "debug": cause }),
            None => json!({ "error": self.message }),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(value) = cause.as_deref().and_then(debug_header_value) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(DEBUG_ERROR_HEADER), value);
        }
        response
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        if err.is_configuration() {
            return Self::internal(err);
        }
        Self::unauthenticated(err.public_message()).with_cause(err)
    }
}

impl From<DirectoryError> for AuthError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound => Self::unauthenticated("actor does not exist"),
            DirectoryError::AdminNotConfigured(_) => {
                Self::unauthenticated("admin not found").with_cause(err)
            }
            DirectoryError::Store(_) => Self::internal(err),
        }
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Unauthenticated => Self::unauthenticated("authentication required"),
            SessionError::Random(_) | SessionError::Store(_) | SessionError::Cookie => {
                Self::internal(err)
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        self.into_response_with(false)
    }
}

fn debug_header_value(cause: &str) -> Option<HeaderValue> {
    let sanitized: String = cause
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { ' ' })
        .take(MAX_DEBUG_HEADER_LEN)
        .collect();
    HeaderValue::from_str(&sanitized).ok()
}
