//! Persistence boundaries for actors, sessions and replay markers.
//!
//! The auth core only talks to these traits. Two backends ship with the crate:
//! [`MemoryStore`] for development and tests, and [`PgStore`] for Postgres.
//!
//! Every call is expected to be wrapped in the caller's request deadline; the
//! stores themselves never retry.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A resolved identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Actor {
    pub id: Uuid,
    pub external_id: String,
    pub email: String,
    pub admin: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_key: Option<String>,
}

/// Fields written on create/upsert. The store assigns the id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewActor {
    pub external_id: String,
    pub email: String,
    pub admin: bool,
    pub labels: BTreeMap<String, String>,
}

impl NewActor {
    pub(crate) fn into_actor(self, id: Uuid) -> Actor {
        Actor {
            id,
            external_id: self.external_id,
            email: self.email,
            admin: self.admin,
            labels: self.labels,
            encrypted_key: None,
        }
    }
}

/// Outcome of a plain create, mirroring a unique-constraint violation on
/// `external_id` as `Conflict` instead of an error.
#[derive(Debug)]
pub enum CreateOutcome {
    Created(Actor),
    Conflict,
}

/// Session row as seen by the session manager.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub actor_id: Uuid,
    pub xsrf_token: String,
    pub expires_at: i64,
}

/// Session row to insert; only the hash of the session id is persisted.
#[derive(Clone, Debug)]
pub struct NewSession {
    pub session_hash: Vec<u8>,
    pub actor_id: Uuid,
    pub xsrf_token: String,
    pub expires_at: i64,
}

#[async_trait]
pub trait ActorStore: Send + Sync {
    async fn get_actor_by_external_id(&self, external_id: &str) -> Result<Option<Actor>>;

    async fn get_actor_by_id(&self, id: Uuid) -> Result<Option<Actor>>;

    async fn create_actor(&self, actor: NewActor) -> Result<CreateOutcome>;

    /// Create-or-update keyed by `external_id`. Fields in `actor` replace the
    /// stored values; `id` and `encrypted_key` are preserved.
    async fn upsert_actor(&self, actor: NewActor) -> Result<Actor>;
}

#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// Record `nonce` until `expires_at` unless an unexpired record already
    /// exists. Returns `true` when this call recorded it. Must be atomic.
    async fn mark_once(&self, nonce: Uuid, now: i64, expires_at: i64) -> Result<bool>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: NewSession) -> Result<()>;

    /// Return the session if it has not expired at `now`. Read only.
    async fn get_session(&self, session_hash: &[u8], now: i64) -> Result<Option<SessionRecord>>;

    /// Move an unexpired session's expiry to `extend_to` and return the
    /// updated row; `None` if it expired or was deleted in the meantime.
    async fn touch_session(
        &self,
        session_hash: &[u8],
        now: i64,
        extend_to: i64,
    ) -> Result<Option<SessionRecord>>;

    async fn delete_session(&self, session_hash: &[u8]) -> Result<()>;
}
