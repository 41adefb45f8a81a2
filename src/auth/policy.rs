//! Per-route authentication policy and actor validators.

use std::{fmt, sync::Arc};

use crate::store::Actor;

/// How strictly a route consults authentication.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteClass {
    /// Authentication is never attempted.
    Open,
    /// Attempted; session-derived failures proceed as unauthenticated.
    Optional,
    /// Like `Optional` without the XSRF check. Used to bootstrap sessions.
    OptionalWithoutXsrf,
    /// Any failure, or an unauthenticated result, is rejected.
    Required,
    /// `Required` plus the actor must be an admin.
    AdminOnly,
}

impl RouteClass {
    #[must_use]
    pub fn consults_auth(self) -> bool {
        !matches!(self, Self::Open)
    }

    #[must_use]
    pub fn requires_actor(self) -> bool {
        matches!(self, Self::Required | Self::AdminOnly)
    }

    #[must_use]
    pub fn requires_xsrf(self) -> bool {
        !matches!(self, Self::Open | Self::OptionalWithoutXsrf)
    }
}

/// A named check against the resolved actor. Validators run in order and the
/// first rejection wins.
pub trait ActorValidator: Send + Sync {
    fn name(&self) -> &'static str;

    /// # Errors
    /// Returns the rejection reason.
    fn validate(&self, actor: &Actor) -> Result<(), String>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RequireAdmin;

impl ActorValidator for RequireAdmin {
    fn name(&self) -> &'static str {
        "require_admin"
    }

    fn validate(&self, actor: &Actor) -> Result<(), String> {
        if actor.admin {
            Ok(())
        } else {
            Err("admin privileges required".to_string())
        }
    }
}

/// Require `labels[key] == value`.
#[derive(Clone, Debug)]
pub struct RequireLabel {
    key: String,
    value: String,
}

impl RequireLabel {
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl ActorValidator for RequireLabel {
    fn name(&self) -> &'static str {
        "require_label"
    }

    fn validate(&self, actor: &Actor) -> Result<(), String> {
        match actor.labels.get(&self.key) {
            Some(value) if *value == self.value => Ok(()),
            _ => Err(format!("label {}={} required", self.key, self.value)),
        }
    }
}

#[derive(Clone)]
pub struct RoutePolicy {
    class: RouteClass,
    validators: Vec<Arc<dyn ActorValidator>>,
}

impl fmt::Debug for RoutePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutePolicy")
            .field("class", &self.class)
            .field("validators", &self.validator_names())
            .finish()
    }
}

impl RoutePolicy {
    #[must_use]
    pub fn new(class: RouteClass) -> Self {
        Self {
            class,
            validators: Vec::new(),
        }
    }

    #[must_use]
    pub fn open() -> Self {
        Self::new(RouteClass::Open)
    }

    #[must_use]
    pub fn optional() -> Self {
        Self::new(RouteClass::Optional)
    }

    #[must_use]
    pub fn optional_without_xsrf() -> Self {
        Self::new(RouteClass::OptionalWithoutXsrf)
    }

    #[must_use]
    pub fn required() -> Self {
        Self::new(RouteClass::Required)
    }

    #[must_use]
    pub fn admin_only() -> Self {
        Self::new(RouteClass::AdminOnly)
    }

    #[must_use]
    pub fn with_validator(mut self, validator: impl ActorValidator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    #[must_use]
    pub fn class(&self) -> RouteClass {
        self.class
    }

    #[must_use]
    pub fn validator_names(&self) -> Vec<&'static str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    /// Run every validator in order against `actor`.
    ///
    /// # Errors
    /// Returns the failing validator's name and reason.
    pub fn validate(&self, actor: &Actor) -> Result<(), (&'static str, String)> {
        for validator in &self.validators {
            validator
                .validate(actor)
                .map_err(|reason| (validator.name(), reason))?;
        }
        Ok(())
    }
}
