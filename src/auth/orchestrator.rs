//! Request authentication.
//!
//! [`Authenticator::establish_auth_from_request`] runs the full procedure for
//! one request: credential extraction, verification, replay check, actor
//! resolution and the merge with any cookie-backed session.
//! [`Authenticator::authenticate`] applies a [`RoutePolicy`] on top.
//!
//! A verified bearer credential always wins over a session. When the two name
//! different actors the session is terminated.

use axum::http::{HeaderMap, Method, header::AUTHORIZATION, request::Parts};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, instrument, warn};

use super::admins::AdminDirectory;
use super::backend::SignatureBackend;
use super::claims::Claims;
use super::clock::Clock;
use super::codec::TokenCodec;
use super::config::GatewayConfig;
use super::context::{Deadline, RequestAuth};
use super::directory::ActorDirectory;
use super::error::{AuthError, AuthErrorKind, DirectoryError, TokenError};
use super::keys::KeyRing;
use super::nonce::NonceGuard;
use super::policy::{RouteClass, RoutePolicy};
use super::selector::KeySelector;
use super::session::{EstablishedSession, LoadedSession, SessionManager, xsrf_matches};
use crate::store::{Actor, ActorStore, ReplayStore, SessionStore};

/// Query parameter carrying a bearer token for browser navigation flows.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Store handles used by the gateway.
#[derive(Clone)]
pub struct Stores {
    pub actors: Arc<dyn ActorStore>,
    pub replay: Arc<dyn ReplayStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Stores {
    /// Use one backend for all three stores.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ActorStore + ReplayStore + SessionStore + 'static,
    {
        Self {
            actors: store.clone(),
            replay: store.clone(),
            sessions: store,
        }
    }
}

/// Outcome of combining a verified credential with the request's session.
#[derive(Debug)]
pub enum SessionMerge {
    NoCredentialNoSession,
    CredentialOnly(Actor),
    SessionOnly(LoadedSession),
    /// Same actor on both sides: the session is kept and slid.
    CredentialExtendsSession(Actor, LoadedSession),
    /// Different actors: the session is terminated and the credential wins.
    CredentialOverridesSession(Actor, LoadedSession),
}

impl SessionMerge {
    #[must_use]
    pub fn decide(credential: Option<Actor>, session: Option<LoadedSession>) -> Self {
        match (credential, session) {
            (None, None) => Self::NoCredentialNoSession,
            (Some(actor), None) => Self::CredentialOnly(actor),
            (None, Some(session)) => Self::SessionOnly(session),
            (Some(actor), Some(session)) if actor.id == session.actor_id => {
                Self::CredentialExtendsSession(actor, session)
            }
            (Some(actor), Some(session)) => Self::CredentialOverridesSession(actor, session),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoCredentialNoSession => "no_credential_no_session",
            Self::CredentialOnly(_) => "credential_only",
            Self::SessionOnly(_) => "session_only",
            Self::CredentialExtendsSession(..) => "credential_extends_session",
            Self::CredentialOverridesSession(..) => "credential_overrides_session",
        }
    }
}

/// GET, HEAD, OPTIONS and TRACE do not need the XSRF echo.
fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn extract_query_token(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == TOKEN_QUERY_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// The `token` query parameter, else the `Authorization: Bearer` header.
/// Only the first non-empty source is used.
pub(crate) fn extract_credential(parts: &Parts) -> Option<String> {
    extract_query_token(parts.uri.query()).or_else(|| extract_bearer_token(&parts.headers))
}

pub struct Authenticator {
    codec: TokenCodec,
    nonces: NonceGuard,
    directory: ActorDirectory,
    sessions: SessionManager,
    actors: Arc<dyn ActorStore>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    debug_errors: bool,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("codec", &self.codec)
            .field("store_timeout", &self.store_timeout)
            .field("debug_errors", &self.debug_errors)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    #[must_use]
    pub fn new(
        config: &GatewayConfig,
        keys: Arc<KeyRing>,
        admins: Arc<AdminDirectory>,
        stores: Stores,
        backend: Arc<dyn SignatureBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let selector = KeySelector::new(keys, admins.clone());
        let codec = TokenCodec::new(
            config.service_id(),
            config.known_services().iter().cloned(),
            selector,
            backend,
            clock.clone(),
        );
        Self {
            codec,
            nonces: NonceGuard::new(stores.replay),
            directory: ActorDirectory::new(
                stores.actors.clone(),
                admins,
                config.admin_email_domain(),
            ),
            sessions: SessionManager::new(stores.sessions, config),
            actors: stores.actors,
            clock,
            store_timeout: config.store_timeout(),
            debug_errors: config.debug_errors(),
        }
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    #[must_use]
    pub fn debug_errors(&self) -> bool {
        self.debug_errors
    }

    #[must_use]
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.store_timeout)
    }

    /// Authenticate a request under `policy`.
    ///
    /// # Errors
    /// Returns the [`AuthError`] the route class surfaces.
    #[instrument(skip_all, fields(route_class = ?policy.class()))]
    pub async fn authenticate(
        &self,
        policy: &RoutePolicy,
        parts: &Parts,
        response: &mut HeaderMap,
    ) -> Result<RequestAuth, AuthError> {
        let class = policy.class();
        if !class.consults_auth() {
            return Ok(RequestAuth::unauthenticated());
        }

        let auth = match self
            .establish_auth_from_request(parts, response, class.requires_xsrf())
            .await
        {
            Ok(auth) => auth,
            Err(err) if !class.requires_actor() && err.kind() == AuthErrorKind::XsrfMismatch => {
                debug!("Session not honoured on optional route: {err}");
                RequestAuth::unauthenticated()
            }
            Err(err) => return Err(err),
        };

        if class.requires_actor() && !auth.is_authenticated() {
            return Err(AuthError::unauthenticated("authentication required"));
        }
        if let Some(actor) = auth.actor() {
            if class == RouteClass::AdminOnly && !actor.admin {
                return Err(AuthError::forbidden("admin privileges required"));
            }
            if let Err((validator, reason)) = policy.validate(actor) {
                debug!(validator, actor_id = %actor.id, "Actor rejected by validator");
                return Err(AuthError::forbidden(reason));
            }
        }
        Ok(auth)
    }

    /// Resolve the request's identity from its credential and session.
    ///
    /// # Errors
    /// 401 for credential failures, 403 for an XSRF mismatch on a session-only
    /// unsafe request, 500 for store and configuration failures.
    #[instrument(skip_all, fields(method = %parts.method))]
    pub async fn establish_auth_from_request(
        &self,
        parts: &Parts,
        response: &mut HeaderMap,
        require_xsrf: bool,
    ) -> Result<RequestAuth, AuthError> {
        let now = self.clock.now();
        let deadline = self.deadline();

        let credential = match extract_credential(parts) {
            Some(token) => Some(self.authenticate_credential(&token, now, &deadline).await?),
            None => None,
        };

        let session = self
            .sessions
            .load(&parts.headers, now, &deadline)
            .await
            .map_err(log_internal)?;

        let merge = SessionMerge::decide(credential, session);
        debug!(state = merge.name(), "Session merge");

        match merge {
            SessionMerge::NoCredentialNoSession => Ok(RequestAuth::unauthenticated()),
            SessionMerge::CredentialOnly(actor) => Ok(RequestAuth::for_actor(actor)),
            SessionMerge::SessionOnly(session) => {
                if require_xsrf
                    && !is_safe_method(&parts.method)
                    && !xsrf_matches(&parts.headers, &session.xsrf_token)
                {
                    return Err(AuthError::xsrf_mismatch());
                }
                let actor = deadline
                    .run(self.actors.get_actor_by_id(session.actor_id))
                    .await
                    .map_err(|err| log_internal(AuthError::internal(err)))?;
                let Some(actor) = actor else {
                    warn!("Session references a missing actor, terminating it");
                    self.sessions
                        .terminate_id(response, &session.session_id, &deadline)
                        .await
                        .map_err(log_internal)?;
                    return Ok(RequestAuth::unauthenticated());
                };
                if self.slide(response, &session, now, &deadline).await? {
                    Ok(RequestAuth::for_session(actor, session.session_id))
                } else {
                    Ok(RequestAuth::unauthenticated())
                }
            }
            SessionMerge::CredentialExtendsSession(actor, session) => {
                if self.slide(response, &session, now, &deadline).await? {
                    Ok(RequestAuth::for_session(actor, session.session_id))
                } else {
                    Ok(RequestAuth::for_actor(actor))
                }
            }
            SessionMerge::CredentialOverridesSession(actor, session) => {
                self.sessions
                    .terminate_id(response, &session.session_id, &deadline)
                    .await
                    .map_err(log_internal)?;
                Ok(RequestAuth::for_actor(actor))
            }
        }
    }

    /// Slide a session that this request honoured. `false` when the row went
    /// away after it was loaded.
    async fn slide(
        &self,
        response: &mut HeaderMap,
        session: &LoadedSession,
        now: i64,
        deadline: &Deadline,
    ) -> Result<bool, AuthError> {
        let slid = self
            .sessions
            .refresh(response, session, now, deadline)
            .await
            .map_err(log_internal)?;
        if slid.is_none() {
            debug!("Session ended before it could be refreshed");
        }
        Ok(slid.is_some())
    }

    /// Verify a bearer credential and resolve its actor.
    async fn authenticate_credential(
        &self,
        token: &str,
        now: i64,
        deadline: &Deadline,
    ) -> Result<Actor, AuthError> {
        // Signature, audience and expiry against the request-scoped now.
        let claims = self.codec.parse_at(token, now).map_err(|err| {
            debug!("Credential rejected: {err}");
            log_internal(AuthError::from(err))
        })?;

        if let Some(nonce) = claims.nonce {
            let expires_at = claims
                .expires_at
                .ok_or(TokenError::NonceWithoutExpiry)?;
            let fresh = self
                .nonces
                .check_and_consume(nonce, expires_at, now, deadline)
                .await
                .map_err(|err| log_internal(AuthError::internal(err)))?;
            if !fresh {
                return Err(AuthError::unauthenticated("nonce already used"));
            }
        }

        self.resolve_actor(claims, deadline)
            .await
            .map_err(log_internal)
    }

    async fn resolve_actor(&self, claims: Claims, deadline: &Deadline) -> Result<Actor, AuthError> {
        let asserts_admin = claims.admin_assertion()?;
        if let Some(descriptor) = claims.actor {
            return Ok(self.directory.upsert_from_claim(descriptor, deadline).await?);
        }
        match self
            .directory
            .resolve_by_subject(&claims.subject, deadline)
            .await
        {
            Ok(actor) => Ok(actor),
            Err(DirectoryError::NotFound) if asserts_admin => Ok(self
                .directory
                .auto_provision_admin(&claims.subject, deadline)
                .await?),
            Err(err) => Err(err.into()),
        }
    }

    /// Start a session for an authenticated request.
    ///
    /// # Errors
    /// 401 without an actor, 500 on store failure.
    pub async fn establish_session(
        &self,
        response: &mut HeaderMap,
        auth: &RequestAuth,
    ) -> Result<EstablishedSession, AuthError> {
        self.sessions
            .establish(response, auth, self.clock.now(), &self.deadline())
            .await
            .map_err(log_internal)
    }

    /// End the session backing `auth`, if any.
    ///
    /// # Errors
    /// 500 on store failure.
    pub async fn terminate_session(
        &self,
        response: &mut HeaderMap,
        auth: &RequestAuth,
    ) -> Result<(), AuthError> {
        self.sessions
            .terminate(response, auth, &self.deadline())
            .await
            .map_err(log_internal)
    }

    /// Issue a self-signed token.
    ///
    /// # Errors
    /// 401-class errors for invalid claims, 500 for key configuration failures.
    pub fn issue_token(&self, claims: Claims) -> Result<String, AuthError> {
        self.codec.sign(claims).map_err(log_internal)
    }
}

fn log_internal(err: impl Into<AuthError>) -> AuthError {
    let err = err.into();
    if err.kind() == AuthErrorKind::Internal {
        match err.cause() {
            Some(cause) => error!("Authentication failed internally: {cause:#}"),
            None => error!("Authentication failed internally"),
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::admins::AdminEntry;
    use crate::auth::backend::DefaultBackend;
    use crate::auth::claims::ActorDescriptor;
    use crate::auth::clock::FixedClock;
    use crate::auth::context::SessionId;
    use crate::auth::keys::ResolvedKey;
    use crate::auth::policy::RequireLabel;
    use crate::auth::session::{SESSION_COOKIE_NAME, XSRF_HEADER};
    use crate::store::{MemoryStore, NewActor};
    use anyhow::Result;
    use axum::http::{
        HeaderValue, Request, StatusCode,
        header::{COOKIE, SET_COOKIE},
    };
    use std::collections::BTreeMap;
    use uuid::Uuid;

    const NOW: i64 = 1_700_000_000;

    struct Harness {
        auth: Authenticator,
        store: Arc<MemoryStore>,
        clock: Arc<FixedClock>,
    }

    fn authenticator(
        config: &GatewayConfig,
        stores: Stores,
        clock: Arc<FixedClock>,
    ) -> Result<Authenticator> {
        let keys = KeyRing::new(
            ResolvedKey::shared(b"global".to_vec()),
            ResolvedKey::shared(b"jwt".to_vec()),
        )?;
        let admins = AdminDirectory::from_entries([AdminEntry {
            username: "bobdole".to_string(),
            email: None,
            permissions: Vec::new(),
            key: ResolvedKey::shared(b"bob".to_vec()),
        }])?;
        Ok(Authenticator::new(
            config,
            Arc::new(keys),
            Arc::new(admins),
            stores,
            Arc::new(DefaultBackend),
            clock,
        ))
    }

    fn config() -> GatewayConfig {
        GatewayConfig::new("api").with_known_services(vec!["admin-api".to_string()])
    }

    fn harness_with(config: &GatewayConfig) -> Result<Harness> {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(NOW));
        let auth = authenticator(config, Stores::shared(store.clone()), clock.clone())?;
        Ok(Harness { auth, store, clock })
    }

    fn harness() -> Result<Harness> {
        harness_with(&config())
    }

    async fn seed(store: &MemoryStore, external_id: &str) -> Result<Actor> {
        Ok(store
            .upsert_actor(NewActor {
                external_id: external_id.to_string(),
                email: format!("{external_id}@example.com"),
                admin: false,
                labels: BTreeMap::new(),
            })
            .await?)
    }

    fn parts(method: Method, uri: &str, headers: &[(&str, String)]) -> Result<Parts> {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        Ok(builder.body(())?.into_parts().0)
    }

    fn bearer(token: &str) -> (&'static str, String) {
        ("authorization", format!("Bearer {token}"))
    }

    fn session_cookie(session_id: &SessionId) -> (&'static str, String) {
        ("cookie", format!("{SESSION_COOKIE_NAME}={}", session_id.as_str()))
    }

    fn token_for(auth: &Authenticator, subject: &str) -> Result<String> {
        Ok(auth.issue_token(Claims::new(subject, vec!["api".to_string()]))?)
    }

    #[test]
    fn credential_sources_in_order() -> Result<()> {
        let both = parts(
            Method::GET,
            "/x?token=from-query",
            &[bearer("from-header")],
        )?;
        assert_eq!(extract_credential(&both).as_deref(), Some("from-query"));

        let empty_query = parts(Method::GET, "/x?token=", &[bearer("from-header")])?;
        assert_eq!(
            extract_credential(&empty_query).as_deref(),
            Some("from-header")
        );

        let encoded = parts(Method::GET, "/x?other=1&token=a%2Bb", &[])?;
        assert_eq!(extract_credential(&encoded).as_deref(), Some("a+b"));

        let basic = parts(
            Method::GET,
            "/x",
            &[("authorization", "Basic Zm9vOmJhcg==".to_string())],
        )?;
        assert!(extract_credential(&basic).is_none());
        Ok(())
    }

    #[test]
    fn safe_methods() {
        assert!(is_safe_method(&Method::GET));
        assert!(is_safe_method(&Method::HEAD));
        assert!(is_safe_method(&Method::OPTIONS));
        assert!(is_safe_method(&Method::TRACE));
        assert!(!is_safe_method(&Method::POST));
        assert!(!is_safe_method(&Method::DELETE));
    }

    fn loaded(actor_id: Uuid) -> LoadedSession {
        LoadedSession {
            session_id: SessionId::new("s".to_string()),
            actor_id,
            xsrf_token: "x".to_string(),
            expires_at: 0,
        }
    }

    fn actor(id: Uuid) -> Actor {
        Actor {
            id,
            external_id: "alice".to_string(),
            email: "alice@example.com".to_string(),
            admin: false,
            labels: BTreeMap::new(),
            encrypted_key: None,
        }
    }

    #[test]
    fn merge_states() {
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(matches!(
            SessionMerge::decide(None, None),
            SessionMerge::NoCredentialNoSession
        ));
        assert!(matches!(
            SessionMerge::decide(Some(actor(id)), None),
            SessionMerge::CredentialOnly(_)
        ));
        assert!(matches!(
            SessionMerge::decide(None, Some(loaded(id))),
            SessionMerge::SessionOnly(_)
        ));
        assert!(matches!(
            SessionMerge::decide(Some(actor(id)), Some(loaded(id))),
            SessionMerge::CredentialExtendsSession(..)
        ));
        assert!(matches!(
            SessionMerge::decide(Some(actor(id)), Some(loaded(other))),
            SessionMerge::CredentialOverridesSession(..)
        ));
    }

    #[tokio::test]
    async fn no_credential_is_unauthenticated() -> Result<()> {
        let h = harness()?;
        let mut response = HeaderMap::new();
        let auth = h
            .auth
            .establish_auth_from_request(&parts(Method::GET, "/", &[])?, &mut response, true)
            .await?;
        assert!(!auth.is_authenticated());
        assert!(response.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn credential_only_resolves_actor() -> Result<()> {
        let h = harness()?;
        let alice = seed(&h.store, "alice").await?;
        let token = token_for(&h.auth, "alice")?;
        let mut response = HeaderMap::new();
        let auth = h
            .auth
            .establish_auth_from_request(
                &parts(Method::POST, "/", &[bearer(&token)])?,
                &mut response,
                true,
            )
            .await?;
        assert_eq!(auth.actor().map(|a| a.id), Some(alice.id));
        assert!(!auth.is_session());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_subject_is_rejected() -> Result<()> {
        let h = harness()?;
        let token = token_for(&h.auth, "ghost")?;
        let err = h
            .auth
            .establish_auth_from_request(
                &parts(Method::GET, "/", &[bearer(&token)])?,
                &mut HeaderMap::new(),
                true,
            )
            .await
            .err();
        assert_eq!(err.as_ref().map(AuthError::status), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(err.as_ref().map(AuthError::message), Some("actor does not exist"));
        Ok(())
    }

    #[tokio::test]
    async fn nonce_is_single_use() -> Result<()> {
        let h = harness()?;
        seed(&h.store, "alice").await?;
        let token = h.auth.issue_token(
            Claims::new("alice", vec!["api".to_string()])
                .with_nonce(Uuid::new_v4())
                .with_expires_at(NOW + 60),
        )?;
        let request = parts(Method::GET, "/", &[bearer(&token)])?;
        let first = h
            .auth
            .establish_auth_from_request(&request, &mut HeaderMap::new(), true)
            .await;
        assert!(first.is_ok());
        let second = h
            .auth
            .establish_auth_from_request(&request, &mut HeaderMap::new(), true)
            .await
            .err();
        assert_eq!(second.as_ref().map(AuthError::message), Some("nonce already used"));
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_is_rejected() -> Result<()> {
        let h = harness()?;
        seed(&h.store, "alice").await?;
        let token = h.auth.issue_token(
            Claims::new("alice", vec!["api".to_string()]).with_expires_at(NOW + 10),
        )?;
        h.clock.advance(10);
        let err = h
            .auth
            .establish_auth_from_request(
                &parts(Method::GET, "/", &[bearer(&token)])?,
                &mut HeaderMap::new(),
                true,
            )
            .await
            .err();
        assert_eq!(err.map(|e| e.kind()), Some(AuthErrorKind::Unauthenticated));
        Ok(())
    }

    #[tokio::test]
    async fn embedded_actor_is_upserted() -> Result<()> {
        let h = harness()?;
        let token = h.auth.issue_token(
            Claims::new("carol", vec!["api".to_string()]).with_actor(ActorDescriptor {
                external_id: "carol".to_string(),
                email: "carol@example.com".to_string(),
                admin: false,
                labels: BTreeMap::from([("team".to_string(), "blue".to_string())]),
            }),
        )?;
        let auth = h
            .auth
            .establish_auth_from_request(
                &parts(Method::GET, "/", &[bearer(&token)])?,
                &mut HeaderMap::new(),
                true,
            )
            .await?;
        assert_eq!(
            auth.actor().and_then(|a| a.labels.get("team")).map(String::as_str),
            Some("blue")
        );
        assert_eq!(h.store.actor_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn session_only_requires_xsrf_on_unsafe_methods() -> Result<()> {
        let h = harness()?;
        let alice = seed(&h.store, "alice").await?;
        let mut response = HeaderMap::new();
        let established = h
            .auth
            .establish_session(&mut response, &RequestAuth::for_actor(alice.clone()))
            .await?;
        let cookie = session_cookie(&established.session_id);

        let get = parts(Method::GET, "/", &[cookie.clone()])?;
        let mut response = HeaderMap::new();
        let auth = h
            .auth
            .establish_auth_from_request(&get, &mut response, true)
            .await?;
        assert!(auth.is_session());
        assert_eq!(auth.actor().map(|a| a.id), Some(alice.id));
        assert_eq!(
            response.get(XSRF_HEADER),
            Some(&HeaderValue::from_str(&established.xsrf_token)?)
        );

        let post = parts(Method::POST, "/", &[cookie.clone()])?;
        let err = h
            .auth
            .establish_auth_from_request(&post, &mut HeaderMap::new(), true)
            .await
            .err();
        assert_eq!(err.map(|e| e.kind()), Some(AuthErrorKind::XsrfMismatch));

        // skipped when the route does not require it
        assert!(
            h.auth
                .establish_auth_from_request(&post, &mut HeaderMap::new(), false)
                .await?
                .is_session()
        );

        let with_header = parts(
            Method::POST,
            "/",
            &[cookie, (XSRF_HEADER, established.xsrf_token.clone())],
        )?;
        assert!(
            h.auth
                .establish_auth_from_request(&with_header, &mut HeaderMap::new(), true)
                .await?
                .is_session()
        );
        Ok(())
    }

    #[tokio::test]
    async fn matching_credential_extends_session() -> Result<()> {
        let h = harness()?;
        let alice = seed(&h.store, "alice").await?;
        let established = h
            .auth
            .establish_session(&mut HeaderMap::new(), &RequestAuth::for_actor(alice))
            .await?;
        let token = token_for(&h.auth, "alice")?;
        let request = parts(
            Method::POST,
            "/",
            &[bearer(&token), session_cookie(&established.session_id)],
        )?;
        let auth = h
            .auth
            .establish_auth_from_request(&request, &mut HeaderMap::new(), true)
            .await?;
        assert!(auth.is_session());
        assert_eq!(h.store.session_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn disagreeing_credential_overrides_session() -> Result<()> {
        let h = harness()?;
        let alice = seed(&h.store, "alice").await?;
        let bob = seed(&h.store, "bob").await?;
        let established = h
            .auth
            .establish_session(&mut HeaderMap::new(), &RequestAuth::for_actor(alice))
            .await?;
        let token = token_for(&h.auth, "bob")?;
        let request = parts(
            Method::GET,
            "/",
            &[bearer(&token), session_cookie(&established.session_id)],
        )?;
        let mut response = HeaderMap::new();
        let auth = h
            .auth
            .establish_auth_from_request(&request, &mut response, true)
            .await?;
        assert_eq!(auth.actor().map(|a| a.id), Some(bob.id));
        assert!(!auth.is_session());
        assert_eq!(h.store.session_count().await, 0);
        assert!(
            response
                .get_all("set-cookie")
                .iter()
                .any(|c| c.to_str().is_ok_and(|c| c.contains("Max-Age=0")))
        );
        Ok(())
    }

    #[tokio::test]
    async fn route_classes() -> Result<()> {
        let h = harness()?;
        let alice = seed(&h.store, "alice").await?;
        let anonymous = parts(Method::GET, "/", &[])?;
        let garbage = parts(Method::GET, "/", &[bearer("not-a-token")])?;

        assert!(
            h.auth
                .authenticate(&RoutePolicy::open(), &garbage, &mut HeaderMap::new())
                .await
                .is_ok()
        );
        assert!(
            h.auth
                .authenticate(&RoutePolicy::optional(), &anonymous, &mut HeaderMap::new())
                .await?
                .actor()
                .is_none()
        );
        assert_eq!(
            h.auth
                .authenticate(&RoutePolicy::optional(), &garbage, &mut HeaderMap::new())
                .await
                .err()
                .map(|e| e.status()),
            Some(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            h.auth
                .authenticate(&RoutePolicy::required(), &anonymous, &mut HeaderMap::new())
                .await
                .err()
                .map(|e| e.status()),
            Some(StatusCode::UNAUTHORIZED)
        );

        let token = token_for(&h.auth, "alice")?;
        let alice_request = parts(Method::GET, "/", &[bearer(&token)])?;
        assert_eq!(
            h.auth
                .authenticate(&RoutePolicy::admin_only(), &alice_request, &mut HeaderMap::new())
                .await
                .err()
                .map(|e| e.status()),
            Some(StatusCode::FORBIDDEN)
        );
        assert_eq!(
            h.auth
                .authenticate(
                    &RoutePolicy::optional().with_validator(RequireLabel::new("team", "blue")),
                    &alice_request,
                    &mut HeaderMap::new()
                )
                .await
                .err()
                .map(|e| e.kind()),
            Some(AuthErrorKind::Forbidden)
        );

        let auth = h
            .auth
            .authenticate(&RoutePolicy::required(), &alice_request, &mut HeaderMap::new())
            .await?;
        assert_eq!(auth.actor().map(|a| a.id), Some(alice.id));
        Ok(())
    }

    #[tokio::test]
    async fn xsrf_mismatch_collapses_on_optional_routes() -> Result<()> {
        let h = harness()?;
        let alice = seed(&h.store, "alice").await?;
        let established = h
            .auth
            .establish_session(&mut HeaderMap::new(), &RequestAuth::for_actor(alice))
            .await?;
        let post = parts(
            Method::POST,
            "/",
            &[(COOKIE.as_str(), format!("{SESSION_COOKIE_NAME}={}", established.session_id.as_str()))],
        )?;
        let auth = h
            .auth
            .authenticate(&RoutePolicy::optional(), &post, &mut HeaderMap::new())
            .await?;
        assert!(!auth.is_authenticated());

        let err = h
            .auth
            .authenticate(&RoutePolicy::required(), &post, &mut HeaderMap::new())
            .await
            .err();
        assert_eq!(err.map(|e| e.kind()), Some(AuthErrorKind::XsrfMismatch));
        Ok(())
    }

    #[tokio::test]
    async fn admin_is_auto_provisioned_once() -> Result<()> {
        let h = harness()?;
        let token = token_for(&h.auth, "admin/bobdole")?;
        let request = parts(Method::GET, "/", &[bearer(&token)])?;
        for _ in 0..3 {
            let auth = h
                .auth
                .authenticate(&RoutePolicy::admin_only(), &request, &mut HeaderMap::new())
                .await?;
            assert_eq!(auth.actor().map(|a| a.email.as_str()), Some("bobdole@local"));
        }
        assert_eq!(h.store.actor_count().await, 1);

        let unknown = token_for(&h.auth, "admin/mallory");
        // self-signed tokens still cannot name unconfigured admins
        let request = parts(Method::GET, "/", &[bearer(&unknown?)])?;
        let err = h
            .auth
            .authenticate(&RoutePolicy::required(), &request, &mut HeaderMap::new())
            .await
            .err();
        assert_eq!(err.map(|e| e.status()), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(h.store.actor_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn rejected_request_does_not_slide_session() -> Result<()> {
        let h = harness_with(&config().with_session_idle_seconds(100))?;
        let alice = seed(&h.store, "alice").await?;
        let established = h
            .auth
            .establish_session(&mut HeaderMap::new(), &RequestAuth::for_actor(alice))
            .await?;
        let cookie = session_cookie(&established.session_id);

        h.clock.advance(90);
        let mut response = HeaderMap::new();
        let err = h
            .auth
            .establish_auth_from_request(
                &parts(Method::POST, "/", &[cookie.clone()])?,
                &mut response,
                true,
            )
            .await
            .err();
        assert_eq!(err.map(|e| e.kind()), Some(AuthErrorKind::XsrfMismatch));
        assert!(response.get(SET_COOKIE).is_none());

        // past the original expiry; the forged POST must not have extended it
        h.clock.advance(60);
        let auth = h
            .auth
            .establish_auth_from_request(
                &parts(Method::GET, "/", &[cookie])?,
                &mut HeaderMap::new(),
                true,
            )
            .await?;
        assert!(!auth.is_session());
        assert!(!auth.is_authenticated());
        Ok(())
    }

    #[tokio::test]
    async fn honoured_request_slides_session() -> Result<()> {
        let h = harness_with(&config().with_session_idle_seconds(100))?;
        let alice = seed(&h.store, "alice").await?;
        let established = h
            .auth
            .establish_session(&mut HeaderMap::new(), &RequestAuth::for_actor(alice))
            .await?;
        let get = parts(Method::GET, "/", &[session_cookie(&established.session_id)])?;

        h.clock.advance(90);
        let mut response = HeaderMap::new();
        assert!(
            h.auth
                .establish_auth_from_request(&get, &mut response, true)
                .await?
                .is_session()
        );
        assert_eq!(response.get_all(SET_COOKIE).iter().count(), 2);

        h.clock.advance(60);
        assert!(
            h.auth
                .establish_auth_from_request(&get, &mut HeaderMap::new(), true)
                .await?
                .is_session()
        );
        Ok(())
    }

    #[derive(Clone, Copy, Debug)]
    enum Fault {
        Healthy,
        Fail,
        Stall,
    }

    impl Fault {
        async fn apply(self) -> Result<()> {
            match self {
                Self::Healthy => Ok(()),
                Self::Fail => Err(anyhow::anyhow!("connection reset by peer")),
                Self::Stall => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            }
        }
    }

    /// Memory store whose actor reads, actor writes and session calls can be
    /// made to fail or hang independently.
    struct FaultyStore {
        inner: MemoryStore,
        lookup: Fault,
        create: Fault,
        sessions: Fault,
    }

    #[async_trait::async_trait]
    impl ActorStore for FaultyStore {
        async fn get_actor_by_external_id(&self, external_id: &str) -> Result<Option<Actor>> {
            self.lookup.apply().await?;
            self.inner.get_actor_by_external_id(external_id).await
        }

        async fn get_actor_by_id(&self, id: Uuid) -> Result<Option<Actor>> {
            self.lookup.apply().await?;
            self.inner.get_actor_by_id(id).await
        }

        async fn create_actor(&self, actor: NewActor) -> Result<crate::store::CreateOutcome> {
            self.create.apply().await?;
            self.inner.create_actor(actor).await
        }

        async fn upsert_actor(&self, actor: NewActor) -> Result<Actor> {
            self.create.apply().await?;
            self.inner.upsert_actor(actor).await
        }
    }

    #[async_trait::async_trait]
    impl ReplayStore for FaultyStore {
        async fn mark_once(&self, nonce: Uuid, now: i64, expires_at: i64) -> Result<bool> {
            self.inner.mark_once(nonce, now, expires_at).await
        }
    }

    #[async_trait::async_trait]
    impl SessionStore for FaultyStore {
        async fn create_session(&self, session: crate::store::NewSession) -> Result<()> {
            self.sessions.apply().await?;
            self.inner.create_session(session).await
        }

        async fn get_session(
            &self,
            session_hash: &[u8],
            now: i64,
        ) -> Result<Option<crate::store::SessionRecord>> {
            self.sessions.apply().await?;
            self.inner.get_session(session_hash, now).await
        }

        async fn touch_session(
            &self,
            session_hash: &[u8],
            now: i64,
            extend_to: i64,
        ) -> Result<Option<crate::store::SessionRecord>> {
            self.sessions.apply().await?;
            self.inner.touch_session(session_hash, now, extend_to).await
        }

        async fn delete_session(&self, session_hash: &[u8]) -> Result<()> {
            self.sessions.apply().await?;
            self.inner.delete_session(session_hash).await
        }
    }

    fn faulty(
        lookup: Fault,
        create: Fault,
        sessions: Fault,
    ) -> Result<(Authenticator, Arc<FaultyStore>)> {
        let store = Arc::new(FaultyStore {
            inner: MemoryStore::new(),
            lookup,
            create,
            sessions,
        });
        let config = config().with_store_timeout(Duration::from_millis(50));
        let auth = authenticator(
            &config,
            Stores::shared(store.clone()),
            Arc::new(FixedClock::new(NOW)),
        )?;
        Ok((auth, store))
    }

    async fn assert_internal(auth: &Authenticator, request: &Parts) -> Result<()> {
        for policy in [RoutePolicy::optional(), RoutePolicy::required()] {
            let err = auth
                .authenticate(&policy, request, &mut HeaderMap::new())
                .await
                .err();
            assert_eq!(err.as_ref().map(AuthError::kind), Some(AuthErrorKind::Internal));
            assert_eq!(
                err.as_ref().map(AuthError::status),
                Some(StatusCode::INTERNAL_SERVER_ERROR)
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn actor_lookup_failure_is_internal() -> Result<()> {
        for fault in [Fault::Fail, Fault::Stall] {
            let (auth, _) = faulty(fault, Fault::Healthy, Fault::Healthy)?;
            let token = token_for(&auth, "alice")?;
            assert_internal(&auth, &parts(Method::GET, "/", &[bearer(&token)])?).await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn admin_provision_failure_is_internal() -> Result<()> {
        for fault in [Fault::Fail, Fault::Stall] {
            let (auth, store) = faulty(Fault::Healthy, fault, Fault::Healthy)?;
            let token = token_for(&auth, "admin/bobdole")?;
            assert_internal(&auth, &parts(Method::GET, "/", &[bearer(&token)])?).await?;
            assert_eq!(store.inner.actor_count().await, 0);
        }
        Ok(())
    }

    #[tokio::test]
    async fn session_load_failure_is_internal() -> Result<()> {
        for fault in [Fault::Fail, Fault::Stall] {
            let (auth, _) = faulty(Fault::Healthy, Fault::Healthy, fault)?;
            let cookie = session_cookie(&SessionId::new("opaque".to_string()));
            assert_internal(&auth, &parts(Method::GET, "/", &[cookie])?).await?;
        }
        Ok(())
    }
}
