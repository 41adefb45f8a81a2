//! Compact JWS encoding of [`Claims`].
//!
//! Tokens are `base64url(header).base64url(claims).base64url(signature)`. The
//! header's `alg` is checked against the algorithm implied by the selected key
//! and is otherwise ignored.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc};

use super::backend::{Algorithm, SignatureBackend};
use super::claims::Claims;
use super::clock::Clock;
use super::error::TokenError;
use super::selector::{KeySelector, SelectedKey};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    #[serde(default)]
    typ: String,
}

impl TokenHeader {
    fn for_algorithm(algorithm: Algorithm) -> Self {
        Self {
            alg: algorithm.name().to_string(),
            typ: "JWT".to_string(),
        }
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|err| TokenError::Json(err.to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Base64)?;
    serde_json::from_slice(&bytes).map_err(|err| TokenError::Json(err.to_string()))
}

pub struct TokenCodec {
    service_id: String,
    known_services: BTreeSet<String>,
    selector: KeySelector,
    backend: Arc<dyn SignatureBackend>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("service_id", &self.service_id)
            .field("known_services", &self.known_services)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// `service_id` is always a recognised audience, in addition to `known_services`.
    #[must_use]
    pub fn new(
        service_id: impl Into<String>,
        known_services: impl IntoIterator<Item = String>,
        selector: KeySelector,
        backend: Arc<dyn SignatureBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let service_id = service_id.into();
        let mut known_services: BTreeSet<String> = known_services.into_iter().collect();
        known_services.insert(service_id.clone());
        Self {
            service_id,
            known_services,
            selector,
            backend,
            clock,
        }
    }

    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Issue a self-signed token with the global key.
    ///
    /// # Errors
    /// Returns an error if an audience is not a recognised service or signing fails.
    pub fn sign(&self, mut claims: Claims) -> Result<String, TokenError> {
        claims.self_signed = true;
        self.mint(claims)
    }

    /// Issue a token signed with whichever key the selector picks for `claims`.
    ///
    /// # Errors
    /// Returns an error if an audience is not a recognised service, the selected
    /// key cannot sign, or signing fails.
    pub fn mint(&self, mut claims: Claims) -> Result<String, TokenError> {
        if claims.subject.is_empty() {
            return Err(TokenError::MissingSubject);
        }
        if claims.audience.is_empty() {
            return Err(TokenError::MissingAudience);
        }
        if let Some(unknown) = claims
            .audience
            .iter()
            .find(|aud| !self.known_services.contains(*aud))
        {
            return Err(TokenError::UnknownAudience(unknown.clone()));
        }
        if claims.nonce.is_some() && claims.expires_at.is_none() {
            return Err(TokenError::NonceWithoutExpiry);
        }

        claims.issuer.clone_from(&self.service_id);
        claims.issued_at = self.clock.now();

        let SelectedKey { material, .. } = self.selector.select_signing_key(&claims)?;
        let header = TokenHeader::for_algorithm(self.backend.algorithm(material));
        let header_b64 = b64e_json(&header)?;
        let claims_b64 = b64e_json(&claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let signature = self.backend.sign(material, signing_input.as_bytes())?;
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Verify `token` against the injected clock.
    ///
    /// # Errors
    /// See [`Self::parse_at`].
    pub fn parse(&self, token: &str) -> Result<Claims, TokenError> {
        self.parse_at(token, self.clock.now())
    }

    /// Verify `token` and return its claims.
    ///
    /// # Errors
    /// Returns an error if:
    /// - the token is malformed or contains invalid base64/json,
    /// - the header algorithm does not match the selected key,
    /// - the signature is invalid,
    /// - a nonce is present without `exp`, or the token expired at `now`,
    /// - the audience is empty or lacks this service,
    /// - an embedded actor does not match the subject.
    pub fn parse_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
        let claims_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
        let sig_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
        if parts.next().is_some() {
            return Err(TokenError::TokenFormat);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        let claims: Claims = b64d_json(claims_b64)?;
        if claims.subject.is_empty() {
            return Err(TokenError::MissingSubject);
        }

        let SelectedKey { material, .. } = self.selector.select_verification_key(&claims)?;
        let expected = self.backend.algorithm(material);
        if header.alg != expected.name() {
            return Err(TokenError::UnexpectedAlgorithm {
                expected: expected.name(),
                found: header.alg,
            });
        }

        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Base64)?;
        let signing_input_len = header_b64.len() + 1 + claims_b64.len();
        let signing_input = token
            .get(..signing_input_len)
            .ok_or(TokenError::TokenFormat)?;
        self.backend
            .verify(material, signing_input.as_bytes(), &signature)?;

        if claims.nonce.is_some() && claims.expires_at.is_none() {
            return Err(TokenError::NonceWithoutExpiry);
        }
        if claims.is_expired(now) {
            return Err(TokenError::Expired);
        }
        if claims.audience.is_empty() {
            return Err(TokenError::MissingAudience);
        }
        if !claims.audience.iter().any(|aud| aud == &self.service_id) {
            return Err(TokenError::AudienceMismatch);
        }
        if let Some(actor) = &claims.actor
            && actor.external_id != claims.subject
        {
            return Err(TokenError::SubjectMismatch);
        }

        Ok(claims)
    }
}
