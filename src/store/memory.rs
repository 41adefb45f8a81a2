//! In-process store used when no database is configured and in tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    Actor, ActorStore, CreateOutcome, NewActor, NewSession, ReplayStore, SessionRecord,
    SessionStore,
};

#[derive(Default)]
struct Inner {
    actors: HashMap<Uuid, Actor>,
    by_external_id: HashMap<String, Uuid>,
    nonces: HashMap<Uuid, i64>,
    sessions: HashMap<Vec<u8>, SessionRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored actors.
    pub async fn actor_count(&self) -> usize {
        self.inner.lock().await.actors.len()
    }

    /// Number of live (not yet purged) session rows.
    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl ActorStore for MemoryStore {
    async fn get_actor_by_external_id(&self, external_id: &str) -> Result<Option<Actor>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_external_id
            .get(external_id)
            .and_then(|id| inner.actors.get(id))
            .cloned())
    }

    async fn get_actor_by_id(&self, id: Uuid) -> Result<Option<Actor>> {
        Ok(self.inner.lock().await.actors.get(&id).cloned())
    }

    async fn create_actor(&self, actor: NewActor) -> Result<CreateOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.by_external_id.contains_key(&actor.external_id) {
            return Ok(CreateOutcome::Conflict);
        }
        let id = Uuid::new_v4();
        let actor = actor.into_actor(id);
        inner.by_external_id.insert(actor.external_id.clone(), id);
        inner.actors.insert(id, actor.clone());
        Ok(CreateOutcome::Created(actor))
    }

    async fn upsert_actor(&self, actor: NewActor) -> Result<Actor> {
        let mut inner = self.inner.lock().await;
        if let Some(id) = inner.by_external_id.get(&actor.external_id).copied()
            && let Some(stored) = inner.actors.get_mut(&id)
        {
            stored.email = actor.email;
            stored.admin = actor.admin;
            stored.labels = actor.labels;
            return Ok(stored.clone());
        }
        let id = Uuid::new_v4();
        let actor = actor.into_actor(id);
        inner.by_external_id.insert(actor.external_id.clone(), id);
        inner.actors.insert(id, actor.clone());
        Ok(actor)
    }
}

#[async_trait]
impl ReplayStore for MemoryStore {
    async fn mark_once(&self, nonce: Uuid, now: i64, expires_at: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        // Expired markers are dropped on write so the map stays bounded by the
        // number of live tokens.
        inner.nonces.retain(|_, expiry| *expiry > now);
        if inner.nonces.contains_key(&nonce) {
            return Ok(false);
        }
        inner.nonces.insert(nonce, expires_at);
        Ok(true)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: NewSession) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(
            session.session_hash,
            SessionRecord {
                actor_id: session.actor_id,
                xsrf_token: session.xsrf_token,
                expires_at: session.expires_at,
            },
        );
        Ok(())
    }

    async fn get_session(&self, session_hash: &[u8], now: i64) -> Result<Option<SessionRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .sessions
            .get(session_hash)
            .filter(|record| record.expires_at > now)
            .cloned())
    }

    async fn touch_session(
        &self,
        session_hash: &[u8],
        now: i64,
        extend_to: i64,
    ) -> Result<Option<SessionRecord>> {
        let mut inner = self.inner.lock().await;
        inner.sessions.retain(|_, record| record.expires_at > now);
        Ok(inner.sessions.get_mut(session_hash).map(|record| {
            record.expires_at = extend_to;
            record.clone()
        }))
    }

    async fn delete_session(&self, session_hash: &[u8]) -> Result<()> {
        self.inner.lock().await.sessions.remove(session_hash);
        Ok(())
    }
}
