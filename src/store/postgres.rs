//! Postgres-backed stores (`sql/schema.sql`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgPoolOptions, postgres::PgRow, types::Json};
use std::{collections::BTreeMap, time::Duration};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    Actor, ActorStore, CreateOutcome, NewActor, NewSession, ReplayStore, SessionRecord,
    SessionStore,
};

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a small pool to `dsn`.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Delete expired sessions and replay markers. Returns the number of rows removed.
    ///
    /// # Errors
    /// Returns an error if either delete fails.
    pub async fn purge_expired(&self, now: i64) -> Result<u64> {
        let mut removed = 0;
        for query in [
            "DELETE FROM actor_sessions WHERE expires_at <= $1",
            "DELETE FROM token_nonces WHERE expires_at <= $1",
        ] {
            let span = db_span("DELETE", query);
            let result = sqlx::query(query)
                .bind(now)
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("failed to purge expired rows")?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }
}

fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn actor_from_row(row: &PgRow) -> Result<Actor> {
    let labels: Json<BTreeMap<String, String>> =
        row.try_get("labels").context("invalid actor labels")?;
    Ok(Actor {
        id: row.try_get("id").context("invalid actor id")?,
        external_id: row.try_get("external_id").context("invalid external_id")?,
        email: row.try_get("email").context("invalid actor email")?,
        admin: row.try_get("admin").context("invalid admin flag")?,
        labels: labels.0,
        encrypted_key: row
            .try_get("encrypted_key")
            .context("invalid encrypted_key")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<SessionRecord> {
    Ok(SessionRecord {
        actor_id: row.try_get("actor_id").context("invalid session actor")?,
        xsrf_token: row.try_get("xsrf_token").context("invalid xsrf token")?,
        expires_at: row.try_get("expires_at").context("invalid expiry")?,
    })
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl ActorStore for PgStore {
    async fn get_actor_by_external_id(&self, external_id: &str) -> Result<Option<Actor>> {
        let query = r"
            SELECT id, external_id, email, admin, labels, encrypted_key
            FROM actors
            WHERE external_id = $1
        ";
        let row = sqlx::query(query)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup actor by external id")?;
        row.as_ref().map(actor_from_row).transpose()
    }

    async fn get_actor_by_id(&self, id: Uuid) -> Result<Option<Actor>> {
        let query = r"
            SELECT id, external_id, email, admin, labels, encrypted_key
            FROM actors
            WHERE id = $1
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup actor by id")?;
        row.as_ref().map(actor_from_row).transpose()
    }

    async fn create_actor(&self, actor: NewActor) -> Result<CreateOutcome> {
        let query = r"
            INSERT INTO actors (external_id, email, admin, labels)
            VALUES ($1, $2, $3, $4)
            RETURNING id, external_id, email, admin, labels, encrypted_key
        ";
        let result = sqlx::query(query)
            .bind(&actor.external_id)
            .bind(&actor.email)
            .bind(actor.admin)
            .bind(Json(&actor.labels))
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(row) => Ok(CreateOutcome::Created(actor_from_row(&row)?)),
            Err(err) if is_unique_violation(&err) => Ok(CreateOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert actor"),
        }
    }

    async fn upsert_actor(&self, actor: NewActor) -> Result<Actor> {
        let query = r"
            INSERT INTO actors (external_id, email, admin, labels)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (external_id) DO UPDATE
                SET email = EXCLUDED.email,
                    admin = EXCLUDED.admin,
                    labels = EXCLUDED.labels,
                    updated_at = NOW()
            RETURNING id, external_id, email, admin, labels, encrypted_key
        ";
        let row = sqlx::query(query)
            .bind(&actor.external_id)
            .bind(&actor.email)
            .bind(actor.admin)
            .bind(Json(&actor.labels))
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to upsert actor")?;
        actor_from_row(&row)
    }
}

#[async_trait]
impl ReplayStore for PgStore {
    async fn mark_once(&self, nonce: Uuid, now: i64, expires_at: i64) -> Result<bool> {
        // A single conditional write: a fresh nonce inserts, an expired marker is
        // overwritten, a live marker leaves no returned row.
        let query = r"
            INSERT INTO token_nonces (nonce, expires_at)
            VALUES ($1, $3)
            ON CONFLICT (nonce) DO UPDATE
                SET expires_at = EXCLUDED.expires_at
                WHERE token_nonces.expires_at <= $2
            RETURNING nonce
        ";
        let row = sqlx::query(query)
            .bind(nonce)
            .bind(now)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to record token nonce")?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(&self, session: NewSession) -> Result<()> {
        let query = r"
            INSERT INTO actor_sessions (session_hash, actor_id, xsrf_token, expires_at)
            VALUES ($1, $2, $3, $4)
        ";
        sqlx::query(query)
            .bind(&session.session_hash)
            .bind(session.actor_id)
            .bind(&session.xsrf_token)
            .bind(session.expires_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn get_session(&self, session_hash: &[u8], now: i64) -> Result<Option<SessionRecord>> {
        let query = r"
            SELECT actor_id, xsrf_token, expires_at
            FROM actor_sessions
            WHERE session_hash = $1 AND expires_at > $2
        ";
        let row = sqlx::query(query)
            .bind(session_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn touch_session(
        &self,
        session_hash: &[u8],
        now: i64,
        extend_to: i64,
    ) -> Result<Option<SessionRecord>> {
        let query = r"
            UPDATE actor_sessions
            SET expires_at = $3
            WHERE session_hash = $1 AND expires_at > $2
            RETURNING actor_id, xsrf_token, expires_at
        ";
        let row = sqlx::query(query)
            .bind(session_hash)
            .bind(now)
            .bind(extend_to)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to touch session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn delete_session(&self, session_hash: &[u8]) -> Result<()> {
        let query = "DELETE FROM actor_sessions WHERE session_hash = $1";
        sqlx::query(query)
            .bind(session_hash)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete session")?;
        Ok(())
    }
}
