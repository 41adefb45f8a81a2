//! Single-use token enforcement.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::context::Deadline;
use crate::store::ReplayStore;

#[derive(Clone)]
pub struct NonceGuard {
    store: Arc<dyn ReplayStore>,
}

impl NonceGuard {
    #[must_use]
    pub fn new(store: Arc<dyn ReplayStore>) -> Self {
        Self { store }
    }

    /// Consume `nonce`. Returns `false` when it was already used and has not
    /// expired yet. The replay record lives until `expires_at`.
    ///
    /// # Errors
    /// Returns an error if the store fails or the deadline passes.
    #[instrument(skip(self, deadline))]
    pub async fn check_and_consume(
        &self,
        nonce: Uuid,
        expires_at: i64,
        now: i64,
        deadline: &Deadline,
    ) -> Result<bool> {
        let fresh = deadline
            .run(self.store.mark_once(nonce, now, expires_at))
            .await?;
        if !fresh {
            debug!("nonce replayed");
        }
        Ok(fresh)
    }
}
