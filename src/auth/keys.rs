//! Key material: where the bytes come from ([`KeyData`]), what shape they
//! have ([`Key`]), and the startup-resolved form the selector reads
//! ([`ResolvedKey`], [`KeyRing`]).
//!
//! Resolution happens once, when the key ring is built. `random:` sources are
//! therefore generated a single time per process; every self-signed token and
//! session minted afterwards stays verifiable until restart.

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::PathBuf, str::FromStr};

const DEFAULT_RANDOM_KEY_LENGTH: usize = 32;

pub type SecretBytes = SecretBox<Vec<u8>>;

/// How key bytes are obtained.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum KeyData {
    Inline { value: String },
    File { path: PathBuf },
    FileBase64 { path: PathBuf },
    Env { var: String },
    EnvBase64 { var: String },
    Random { length: usize },
}

impl fmt::Debug for KeyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline { .. } => f.write_str("Inline(***)"),
            Self::File { path } => write!(f, "File({})", path.display()),
            Self::FileBase64 { path } => write!(f, "FileBase64({})", path.display()),
            Self::Env { var } => write!(f, "Env({var})"),
            Self::EnvBase64 { var } => write!(f, "EnvBase64({var})"),
            Self::Random { length } => write!(f, "Random({length})"),
        }
    }
}

impl KeyData {
    /// Load the bytes this source points at.
    ///
    /// # Errors
    /// Returns an error if the file or variable is missing, base64 is invalid,
    /// the result is empty, or the random generator fails.
    pub fn resolve(&self) -> Result<SecretBytes> {
        let bytes = match self {
            Self::Inline { value } => value.as_bytes().to_vec(),
            Self::File { path } => fs::read(path)
                .with_context(|| format!("Failed to read key file: {}", path.display()))?,
            Self::FileBase64 { path } => {
                let encoded = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read key file: {}", path.display()))?;
                decode_base64(&encoded)
                    .with_context(|| format!("Invalid base64 in key file: {}", path.display()))?
            }
            Self::Env { var } => std::env::var(var)
                .with_context(|| format!("Missing key environment variable: {var}"))?
                .into_bytes(),
            Self::EnvBase64 { var } => {
                let encoded = std::env::var(var)
                    .with_context(|| format!("Missing key environment variable: {var}"))?;
                decode_base64(&encoded)
                    .with_context(|| format!("Invalid base64 in environment variable: {var}"))?
            }
            Self::Random { length } => {
                if *length == 0 {
                    bail!("random key length must be positive");
                }
                let mut bytes = vec![0u8; *length];
                OsRng
                    .try_fill_bytes(&mut bytes)
                    .context("failed to generate random key")?;
                bytes
            }
        };

        if bytes.is_empty() {
            bail!("key material is empty ({self:?})");
        }
        Ok(SecretBox::new(Box::new(bytes)))
    }
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|err| anyhow!("{err}"))
}

/// Parses the CLI form: `inline:<value>`, `file:<path>`, `file-base64:<path>`,
/// `env:<VAR>`, `env-base64:<VAR>`, `random` or `random:<length>`.
impl FromStr for KeyData {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        if value == "random" {
            return Ok(Self::Random {
                length: DEFAULT_RANDOM_KEY_LENGTH,
            });
        }
        let (kind, rest) = value
            .split_once(':')
            .ok_or_else(|| "key source must look like <kind>:<value>".to_string())?;
        if rest.is_empty() {
            return Err(format!("empty value for key source '{kind}'"));
        }
        match kind {
            "inline" => Ok(Self::Inline {
                value: rest.to_string(),
            }),
            "file" => Ok(Self::File { path: rest.into() }),
            "file-base64" => Ok(Self::FileBase64 { path: rest.into() }),
            "env" => Ok(Self::Env {
                var: rest.to_string(),
            }),
            "env-base64" => Ok(Self::EnvBase64 {
                var: rest.to_string(),
            }),
            "random" => rest
                .parse::<usize>()
                .map(|length| Self::Random { length })
                .map_err(|_| format!("invalid random key length: {rest}")),
            other => Err(format!("unknown key source: {other}")),
        }
    }
}

/// Credential material shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Key {
    Shared {
        secret: KeyData,
    },
    PublicPrivate {
        public: KeyData,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        private: Option<KeyData>,
    },
}

impl Key {
    /// Resolve every half of the key.
    ///
    /// # Errors
    /// Returns an error if any configured half fails to load.
    pub fn resolve(&self) -> Result<ResolvedKey> {
        match self {
            Self::Shared { secret } => Ok(ResolvedKey::Shared(secret.resolve()?)),
            Self::PublicPrivate { public, private } => Ok(ResolvedKey::PublicPrivate {
                public: public.resolve()?.expose_secret().clone(),
                private: private.as_ref().map(KeyData::resolve).transpose()?,
            }),
        }
    }
}

/// Key bytes loaded at startup.
pub enum ResolvedKey {
    Shared(SecretBytes),
    PublicPrivate {
        public: Vec<u8>,
        private: Option<SecretBytes>,
    },
}

impl ResolvedKey {
    #[must_use]
    pub fn shared(secret: Vec<u8>) -> Self {
        Self::Shared(SecretBox::new(Box::new(secret)))
    }

    #[must_use]
    pub fn public_private(public: Vec<u8>, private: Option<Vec<u8>>) -> Self {
        Self::PublicPrivate {
            public,
            private: private.map(|bytes| SecretBox::new(Box::new(bytes))),
        }
    }

    #[must_use]
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }
}

impl fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared(_) => f.write_str("Shared(***)"),
            Self::PublicPrivate { public, private } => f
                .debug_struct("PublicPrivate")
                .field("public_len", &public.len())
                .field("private", &private.as_ref().map(|_| "***"))
                .finish(),
        }
    }
}

/// Process-wide keys: the global symmetric key used for self-signed tokens and
/// the service JWT key used for third-party tokens.
#[derive(Debug)]
pub struct KeyRing {
    global: ResolvedKey,
    jwt: ResolvedKey,
}

impl KeyRing {
    /// # Errors
    /// Returns an error if the global key is not a shared key.
    pub fn new(global: ResolvedKey, jwt: ResolvedKey) -> Result<Self> {
        if !global.is_shared() {
            bail!("the global key must be a shared key");
        }
        Ok(Self { global, jwt })
    }

    /// Resolve both keys from their configured sources.
    ///
    /// # Errors
    /// Returns an error if either key fails to resolve or the global key is not shared.
    pub fn resolve(global: &Key, jwt: &Key) -> Result<Self> {
        let global = global.resolve().context("failed to resolve global key")?;
        let jwt = jwt.resolve().context("failed to resolve JWT signing key")?;
        Self::new(global, jwt)
    }

    #[must_use]
    pub fn global(&self) -> &ResolvedKey {
        &self.global
    }

    #[must_use]
    pub fn jwt(&self) -> &ResolvedKey {
        &self.jwt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn key_data_parses_cli_forms() {
        assert_eq!(
            "inline:s3cret".parse::<KeyData>(),
            Ok(KeyData::Inline {
                value: "s3cret".to_string()
            })
        );
        assert_eq!(
            "env-base64:WARDEN_KEY".parse::<KeyData>(),
            Ok(KeyData::EnvBase64 {
                var: "WARDEN_KEY".to_string()
            })
        );
        assert_eq!(
            "random".parse::<KeyData>(),
            Ok(KeyData::Random { length: 32 })
        );
        assert_eq!(
            "random:64".parse::<KeyData>(),
            Ok(KeyData::Random { length: 64 })
        );
        assert!("file:".parse::<KeyData>().is_err());
        assert!("vault:path".parse::<KeyData>().is_err());
        assert!("no-separator".parse::<KeyData>().is_err());
    }

    #[test]
    fn key_data_debug_hides_inline_values() {
        let data = KeyData::Inline {
            value: "s3cret".to_string(),
        };
        assert_eq!(format!("{data:?}"), "Inline(***)");
    }

    #[test]
    fn key_data_resolves_env_sources() -> Result<()> {
        temp_env::with_vars(
            [
                ("WARDEN_TEST_RAW_KEY", Some("raw-value")),
                ("WARDEN_TEST_B64_KEY", Some("aGVsbG8=")),
            ],
            || -> Result<()> {
                let raw = KeyData::Env {
                    var: "WARDEN_TEST_RAW_KEY".to_string(),
                }
                .resolve()?;
                assert_eq!(raw.expose_secret().as_slice(), b"raw-value");

                let decoded = KeyData::EnvBase64 {
                    var: "WARDEN_TEST_B64_KEY".to_string(),
                }
                .resolve()?;
                assert_eq!(decoded.expose_secret().as_slice(), b"hello");
                Ok(())
            },
        )
    }

    #[test]
    fn key_data_missing_env_is_an_error() {
        temp_env::with_var_unset("WARDEN_TEST_MISSING_KEY", || {
            let result = KeyData::Env {
                var: "WARDEN_TEST_MISSING_KEY".to_string(),
            }
            .resolve();
            assert!(result.is_err());
        });
    }

    #[test]
    fn key_data_resolves_files() -> Result<()> {
        let dir = std::env::temp_dir();
        let raw_path = dir.join(format!("warden-key-{}.raw", uuid::Uuid::new_v4()));
        let b64_path = dir.join(format!("warden-key-{}.b64", uuid::Uuid::new_v4()));
        fs::File::create(&raw_path)?.write_all(b"file-secret")?;
        fs::File::create(&b64_path)?.write_all(b"ZmlsZS1zZWNyZXQ=\n")?;

        let raw = KeyData::File {
            path: raw_path.clone(),
        }
        .resolve()?;
        let decoded = KeyData::FileBase64 {
            path: b64_path.clone(),
        }
        .resolve()?;
        assert_eq!(raw.expose_secret(), decoded.expose_secret());

        fs::remove_file(raw_path)?;
        fs::remove_file(b64_path)?;
        Ok(())
    }

    #[test]
    fn random_key_data_has_requested_length() -> Result<()> {
        let key = KeyData::Random { length: 48 }.resolve()?;
        assert_eq!(key.expose_secret().len(), 48);
        assert!(KeyData::Random { length: 0 }.resolve().is_err());
        Ok(())
    }

    #[test]
    fn key_serde_uses_tagged_variants() -> Result<()> {
        let json = r#"{"type":"public_private","public":{"source":"env","var":"PUB"}}"#;
        let key: Key = serde_json::from_str(json)?;
        assert_eq!(
            key,
            Key::PublicPrivate {
                public: KeyData::Env {
                    var: "PUB".to_string()
                },
                private: None,
            }
        );
        Ok(())
    }

    #[test]
    fn key_ring_requires_shared_global_key() {
        let result = KeyRing::new(
            ResolvedKey::public_private(vec![1; 32], None),
            ResolvedKey::shared(b"jwt".to_vec()),
        );
        assert!(result.is_err());

        let ring = KeyRing::new(
            ResolvedKey::shared(b"global".to_vec()),
            ResolvedKey::shared(b"jwt".to_vec()),
        );
        assert!(ring.is_ok());
    }
}
