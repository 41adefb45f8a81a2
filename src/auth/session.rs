//! Cookie-backed sessions with an XSRF companion token.
//!
//! The session cookie carries an opaque random id; only its SHA-256 hash is
//! stored. Loading a session never changes it; only a request that was
//! honoured (XSRF satisfied, actor resolved) slides the expiry forward by the
//! idle timeout and re-issues both cookies. The XSRF token is readable by script (cookie
//! and `x-xsrf-token` response header) and must be echoed back on unsafe
//! requests.

use anyhow::Context;
use axum::http::{
    HeaderMap, HeaderName, HeaderValue,
    header::{COOKIE, SET_COOKIE},
};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::config::GatewayConfig;
use super::context::{Deadline, RequestAuth, SessionId};
use super::error::SessionError;
use crate::store::{NewSession, SessionStore};

pub const SESSION_COOKIE_NAME: &str = "warden_session";
pub const XSRF_COOKIE_NAME: &str = "warden_xsrf";
pub const XSRF_HEADER: &str = "x-xsrf-token";

/// Create a new random token for the session cookie or the XSRF token.
fn generate_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a session id so raw values never touch the store.
pub(crate) fn hash_session_id(session_id: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.finalize().to_vec()
}

/// Read a cookie by name from every `Cookie` header on the request.
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, val)| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

/// Constant-time comparison of the request's `x-xsrf-token` header.
#[must_use]
pub fn xsrf_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(XSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|presented| {
            !expected.is_empty() && bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
        })
}

/// Session resolved from the request cookie, as stored.
#[derive(Clone, Debug)]
pub struct LoadedSession {
    pub session_id: SessionId,
    pub actor_id: Uuid,
    pub xsrf_token: String,
    pub expires_at: i64,
}

/// Values handed back to the caller after a session is established.
#[derive(Clone, Debug)]
pub struct EstablishedSession {
    pub session_id: SessionId,
    pub xsrf_token: String,
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    idle_seconds: i64,
    cookie_secure: bool,
    cookie_domain: Option<String>,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, config: &GatewayConfig) -> Self {
        Self {
            store,
            idle_seconds: config.session_idle_seconds(),
            cookie_secure: config.cookie_secure(),
            cookie_domain: config.cookie_domain().map(str::to_string),
        }
    }

    /// Mint a session for the authenticated actor in `auth` and set its cookies.
    ///
    /// # Errors
    /// [`SessionError::Unauthenticated`] without an actor; store, randomness or
    /// cookie failures otherwise.
    #[instrument(skip_all)]
    pub async fn establish(
        &self,
        response: &mut HeaderMap,
        auth: &RequestAuth,
        now: i64,
        deadline: &Deadline,
    ) -> Result<EstablishedSession, SessionError> {
        let actor = auth.actor().ok_or(SessionError::Unauthenticated)?;
        let session_id = generate_token().map_err(SessionError::Random)?;
        let xsrf_token = generate_token().map_err(SessionError::Random)?;
        let expires_at = now.saturating_add(self.idle_seconds);

        deadline
            .run(self.store.create_session(NewSession {
                session_hash: hash_session_id(&session_id),
                actor_id: actor.id,
                xsrf_token: xsrf_token.clone(),
                expires_at,
            }))
            .await
            .map_err(SessionError::Store)?;

        let session_id = SessionId::new(session_id);
        self.set_cookies(response, &session_id, &xsrf_token)?;
        debug!(actor_id = %actor.id, "Session established");

        Ok(EstablishedSession {
            session_id,
            xsrf_token,
            expires_at,
        })
    }

    /// Resolve the session cookie without touching the stored row. Missing,
    /// unknown and expired sessions all yield `None`.
    ///
    /// # Errors
    /// Returns an error only when the store fails.
    pub async fn load(
        &self,
        request: &HeaderMap,
        now: i64,
        deadline: &Deadline,
    ) -> Result<Option<LoadedSession>, SessionError> {
        let Some(raw) = cookie_value(request, SESSION_COOKIE_NAME) else {
            return Ok(None);
        };
        let record = deadline
            .run(self.store.get_session(&hash_session_id(&raw), now))
            .await
            .map_err(SessionError::Store)?;

        Ok(record.map(|record| LoadedSession {
            session_id: SessionId::new(raw),
            actor_id: record.actor_id,
            xsrf_token: record.xsrf_token,
            expires_at: record.expires_at,
        }))
    }

    /// Slide a session honoured on this request and re-issue its cookies.
    /// Returns the new expiry, or `None` when the row expired or was deleted
    /// since it was loaded; no cookies are set in that case.
    ///
    /// # Errors
    /// Returns an error if the store fails or a cookie cannot be encoded.
    pub async fn refresh(
        &self,
        response: &mut HeaderMap,
        session: &LoadedSession,
        now: i64,
        deadline: &Deadline,
    ) -> Result<Option<i64>, SessionError> {
        let extend_to = now.saturating_add(self.idle_seconds);
        let touched = deadline
            .run(self.store.touch_session(
                &hash_session_id(session.session_id.as_str()),
                now,
                extend_to,
            ))
            .await
            .map_err(SessionError::Store)?;
        let Some(record) = touched else {
            return Ok(None);
        };
        self.set_cookies(response, &session.session_id, &session.xsrf_token)?;
        Ok(Some(record.expires_at))
    }

    /// Delete the session backing `auth` and clear cookies. No-op when the
    /// request is not session-backed.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn terminate(
        &self,
        response: &mut HeaderMap,
        auth: &RequestAuth,
        deadline: &Deadline,
    ) -> Result<(), SessionError> {
        match auth.session_id() {
            Some(session_id) => self.terminate_id(response, session_id, deadline).await,
            None => Ok(()),
        }
    }

    /// Delete a session by id and clear cookies.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn terminate_id(
        &self,
        response: &mut HeaderMap,
        session_id: &SessionId,
        deadline: &Deadline,
    ) -> Result<(), SessionError> {
        deadline
            .run(
                self.store
                    .delete_session(&hash_session_id(session_id.as_str())),
            )
            .await
            .map_err(SessionError::Store)?;
        self.clear_cookies(response)?;
        debug!("Session terminated");
        Ok(())
    }

    fn set_cookies(
        &self,
        response: &mut HeaderMap,
        session_id: &SessionId,
        xsrf_token: &str,
    ) -> Result<(), SessionError> {
        let max_age = self.idle_seconds;
        let session = self.cookie(SESSION_COOKIE_NAME, session_id.as_str(), max_age, true)?;
        let xsrf = self.cookie(XSRF_COOKIE_NAME, xsrf_token, max_age, false)?;
        response.append(SET_COOKIE, session);
        response.append(SET_COOKIE, xsrf);
        response.insert(
            HeaderName::from_static(XSRF_HEADER),
            HeaderValue::from_str(xsrf_token).map_err(|_| SessionError::Cookie)?,
        );
        Ok(())
    }

    fn clear_cookies(&self, response: &mut HeaderMap) -> Result<(), SessionError> {
        let session = self.cookie(SESSION_COOKIE_NAME, "", 0, true)?;
        let xsrf = self.cookie(XSRF_COOKIE_NAME, "", 0, false)?;
        response.append(SET_COOKIE, session);
        response.append(SET_COOKIE, xsrf);
        response.remove(XSRF_HEADER);
        Ok(())
    }

    fn cookie(
        &self,
        name: &str,
        value: &str,
        max_age: i64,
        http_only: bool,
    ) -> Result<HeaderValue, SessionError> {
        let mut cookie = format!("{name}={value}; Path=/");
        if let Some(domain) = &self.cookie_domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        if http_only {
            cookie.push_str("; HttpOnly");
        }
        cookie.push_str("; SameSite=Lax; Max-Age=");
        cookie.push_str(&max_age.to_string());
        // Only mark cookies secure when served over HTTPS.
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).map_err(|_| SessionError::Cookie)
    }
}
