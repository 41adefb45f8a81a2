//! Actor lookup, upsert-on-claim and admin auto-provisioning.

use anyhow::anyhow;
use std::sync::Arc;
use tracing::{info, instrument};

use super::admins::{AdminDirectory, admin_subject, admin_username};
use super::claims::ActorDescriptor;
use super::context::Deadline;
use super::error::DirectoryError;
use crate::store::{Actor, ActorStore, CreateOutcome, NewActor};

pub const DEFAULT_ADMIN_EMAIL_DOMAIN: &str = "local";

#[derive(Clone)]
pub struct ActorDirectory {
    store: Arc<dyn ActorStore>,
    admins: Arc<AdminDirectory>,
    admin_email_domain: String,
}

impl ActorDirectory {
    #[must_use]
    pub fn new(
        store: Arc<dyn ActorStore>,
        admins: Arc<AdminDirectory>,
        admin_email_domain: impl Into<String>,
    ) -> Self {
        Self {
            store,
            admins,
            admin_email_domain: admin_email_domain.into(),
        }
    }

    /// Look up an existing actor by external id.
    ///
    /// # Errors
    /// [`DirectoryError::NotFound`] when absent, [`DirectoryError::Store`] on store failure.
    pub async fn resolve_by_subject(
        &self,
        subject: &str,
        deadline: &Deadline,
    ) -> Result<Actor, DirectoryError> {
        deadline
            .run(self.store.get_actor_by_external_id(subject))
            .await
            .map_err(DirectoryError::Store)?
            .ok_or(DirectoryError::NotFound)
    }

    /// Bring the stored actor into agreement with an embedded descriptor.
    ///
    /// # Errors
    /// Fails for admin-shaped external ids that are not configured, or on store failure.
    #[instrument(skip_all, fields(external_id = %descriptor.external_id))]
    pub async fn upsert_from_claim(
        &self,
        descriptor: ActorDescriptor,
        deadline: &Deadline,
    ) -> Result<Actor, DirectoryError> {
        if let Some(username) = admin_username(&descriptor.external_id)
            && self.admins.get(username).is_none()
        {
            return Err(DirectoryError::AdminNotConfigured(username.to_string()));
        }
        deadline
            .run(self.store.upsert_actor(NewActor::from(descriptor)))
            .await
            .map_err(DirectoryError::Store)
    }

    /// Materialise the actor row for a configured admin.
    ///
    /// # Errors
    /// [`DirectoryError::AdminNotConfigured`] when the subject is not admin-shaped or
    /// the username is not in the admin directory; nothing is created in that case.
    #[instrument(skip(self, deadline))]
    pub async fn auto_provision_admin(
        &self,
        subject: &str,
        deadline: &Deadline,
    ) -> Result<Actor, DirectoryError> {
        let entry = self.admins.get_by_subject(subject).ok_or_else(|| {
            let name = admin_username(subject).unwrap_or(subject);
            DirectoryError::AdminNotConfigured(name.to_string())
        })?;

        let email = entry
            .email
            .clone()
            .unwrap_or_else(|| format!("{}@{}", entry.username, self.admin_email_domain));
        let new_actor = NewActor {
            external_id: admin_subject(&entry.username),
            email,
            admin: true,
            labels: Default::default(),
        };

        match deadline
            .run(self.store.create_actor(new_actor))
            .await
            .map_err(DirectoryError::Store)?
        {
            CreateOutcome::Created(actor) => {
                info!(actor_id = %actor.id, "Provisioned admin actor");
                Ok(actor)
            }
            CreateOutcome::Conflict => self
                .resolve_by_subject(subject, deadline)
                .await
                .map_err(|err| match err {
                    DirectoryError::NotFound => DirectoryError::Store(anyhow!(
                        "admin actor missing after conflicting create"
                    )),
                    other => other,
                }),
        }
    }
}
