//! Bearer token payload.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

use super::admins::ADMIN_SUBJECT_PREFIX;
use super::error::TokenError;
use crate::store::NewActor;

/// Full actor record asserted by a token (upsert-on-claim).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ActorDescriptor {
    pub external_id: String,
    pub email: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl From<ActorDescriptor> for NewActor {
    fn from(descriptor: ActorDescriptor) -> Self {
        Self {
            external_id: descriptor.external_id,
            email: descriptor.email,
            admin: descriptor.admin,
            labels: descriptor.labels,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(rename = "iss", default)]
    pub issuer: String,
    #[serde(rename = "aud", default, deserialize_with = "one_or_many")]
    pub audience: Vec<String>,
    #[serde(rename = "iat", default)]
    pub issued_at: i64,
    #[serde(rename = "exp", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Uuid>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub self_signed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<ActorDescriptor>,
}

/// `aud` may be a single string or an array.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

impl Claims {
    #[must_use]
    pub fn new(subject: impl Into<String>, audience: Vec<String>) -> Self {
        Self {
            subject: subject.into(),
            audience,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    #[must_use]
    pub fn with_nonce(mut self, nonce: Uuid) -> Self {
        self.nonce = Some(nonce);
        self
    }

    #[must_use]
    pub fn with_actor(mut self, actor: ActorDescriptor) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Whether the token asserts an admin identity.
    ///
    /// The `admin/` subject prefix and an embedded actor's `admin` flag must
    /// agree. Any disagreement, in either direction, is rejected.
    ///
    /// # Errors
    /// Returns [`TokenError::AdminMismatch`] when they disagree.
    pub fn admin_assertion(&self) -> Result<bool, TokenError> {
        let by_subject = self.subject.starts_with(ADMIN_SUBJECT_PREFIX);
        match &self.actor {
            Some(actor) if actor.admin != by_subject => Err(TokenError::AdminMismatch),
            _ => Ok(by_subject),
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}
