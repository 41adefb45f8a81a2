//! Per-request values: the resulting [`RequestAuth`] and the store [`Deadline`].

use anyhow::{Result, anyhow};
use std::{fmt, future::Future, time::Duration};
use tokio::time::Instant;

use crate::store::Actor;

/// Raw session identifier as carried in the cookie. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new(raw: String) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionId(***)")
    }
}

/// Authentication result for one request, read by the authorization layer.
#[derive(Clone, Debug, Default)]
pub struct RequestAuth {
    actor: Option<Actor>,
    session_id: Option<SessionId>,
}

impl RequestAuth {
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn for_actor(actor: Actor) -> Self {
        Self {
            actor: Some(actor),
            session_id: None,
        }
    }

    #[must_use]
    pub fn for_session(actor: Actor, session_id: SessionId) -> Self {
        Self {
            actor: Some(actor),
            session_id: Some(session_id),
        }
    }

    #[must_use]
    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.actor.is_some()
    }

    #[must_use]
    pub fn is_session(&self) -> bool {
        self.session_id.is_some()
    }
}

/// Error attached when a store call outlives the request deadline.
#[derive(Debug, thiserror::Error)]
#[error("store call exceeded the request deadline")]
pub struct DeadlineExceeded;

/// Deadline shared by every store call made while authenticating a request.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// Run a store future, failing with [`DeadlineExceeded`] once the deadline passes.
    ///
    /// # Errors
    /// Returns the future's own error, or [`DeadlineExceeded`] on timeout.
    pub async fn run<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout_at(self.at, future).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(DeadlineExceeded)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn actor() -> Actor {
        Actor {
            id: Uuid::new_v4(),
            external_id: "alice".to_string(),
            email: "alice@example.com".to_string(),
            admin: false,
            labels: BTreeMap::new(),
            encrypted_key: None,
        }
    }

    #[test]
    fn request_auth_flags() {
        let anonymous = RequestAuth::unauthenticated();
        assert!(!anonymous.is_authenticated());
        assert!(!anonymous.is_session());

        let stateless = RequestAuth::for_actor(actor());
        assert!(stateless.is_authenticated());
        assert!(!stateless.is_session());

        let session = RequestAuth::for_session(actor(), SessionId::new("raw".to_string()));
        assert!(session.is_session());
        assert_eq!(format!("{:?}", session.session_id()), "Some(SessionId(***))");
    }

    #[tokio::test]
    async fn deadline_passes_through_results() -> Result<()> {
        let deadline = Deadline::after(Duration::from_secs(5));
        let value = deadline.run(async { Ok(7) }).await?;
        assert_eq!(value, 7);
        Ok(())
    }

    #[tokio::test]
    async fn deadline_times_out_slow_calls() {
        let deadline = Deadline::after(Duration::from_millis(10));
        let result: Result<()> = deadline
            .run(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        let err = result.err().map(|e| e.is::<DeadlineExceeded>());
        assert_eq!(err, Some(true));
    }
}
