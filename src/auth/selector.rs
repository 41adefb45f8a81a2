//! Key selection from unverified claims.

use secrecy::ExposeSecret;
use std::sync::Arc;

use super::admins::{AdminDirectory, admin_username};
use super::backend::KeyMaterial;
use super::claims::Claims;
use super::error::TokenError;
use super::keys::{KeyRing, ResolvedKey};

/// Key bytes picked for one token, tagged with the key family.
#[derive(Clone, Copy, Debug)]
pub struct SelectedKey<'a> {
    pub material: KeyMaterial<'a>,
    pub shared: bool,
}

#[derive(Clone, Copy)]
enum Half {
    Verify,
    Sign,
}

#[derive(Clone, Debug)]
pub struct KeySelector {
    keys: Arc<KeyRing>,
    admins: Arc<AdminDirectory>,
}

impl KeySelector {
    #[must_use]
    pub fn new(keys: Arc<KeyRing>, admins: Arc<AdminDirectory>) -> Self {
        Self { keys, admins }
    }

    /// Pick the key that verifies `claims`.
    ///
    /// # Errors
    /// Returns an error on admin disagreement or an unknown admin.
    pub fn select_verification_key(&self, claims: &Claims) -> Result<SelectedKey<'_>, TokenError> {
        self.select(claims, Half::Verify)
    }

    /// Pick the key that signs `claims`.
    ///
    /// # Errors
    /// Same as [`Self::select_verification_key`], plus
    /// [`TokenError::MissingPrivateKey`] for public-only keys.
    pub fn select_signing_key(&self, claims: &Claims) -> Result<SelectedKey<'_>, TokenError> {
        self.select(claims, Half::Sign)
    }

    fn select(&self, claims: &Claims, half: Half) -> Result<SelectedKey<'_>, TokenError> {
        let key = if claims.self_signed {
            self.keys.global()
        } else if claims.admin_assertion()? {
            let username = admin_username(&claims.subject)
                .ok_or_else(|| TokenError::AdminNotFound(claims.subject.clone()))?;
            let admin = self
                .admins
                .get(username)
                .ok_or_else(|| TokenError::AdminNotFound(username.to_string()))?;
            &admin.key
        } else {
            self.keys.jwt()
        };
        key_half(key, half)
    }
}

fn key_half(key: &ResolvedKey, half: Half) -> Result<SelectedKey<'_>, TokenError> {
    match (key, half) {
        (ResolvedKey::Shared(secret), _) => Ok(SelectedKey {
            material: KeyMaterial::Shared(secret.expose_secret()),
            shared: true,
        }),
        (ResolvedKey::PublicPrivate { public, .. }, Half::Verify) => Ok(SelectedKey {
            material: KeyMaterial::Asymmetric(public),
            shared: false,
        }),
        (ResolvedKey::PublicPrivate { private, .. }, Half::Sign) => {
            let private = private.as_ref().ok_or(TokenError::MissingPrivateKey)?;
            Ok(SelectedKey {
                material: KeyMaterial::Asymmetric(private.expose_secret()),
                shared: false,
            })
        }
    }
}
