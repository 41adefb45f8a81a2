//! Configured administrators.
//!
//! The directory is the source of truth for which admins may exist. Actor rows
//! for admins are only materialised lazily on first authentication, and only
//! for usernames listed here.

use anyhow::{Context, Result, bail};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path};

use super::keys::{Key, ResolvedKey};

/// Subject prefix marking an admin identity: `admin/<username>`.
pub const ADMIN_SUBJECT_PREFIX: &str = "admin/";

/// Extract `<username>` from an `admin/<username>` subject.
#[must_use]
pub fn admin_username(subject: &str) -> Option<&str> {
    subject
        .strip_prefix(ADMIN_SUBJECT_PREFIX)
        .filter(|username| !username.is_empty())
}

#[must_use]
pub fn admin_subject(username: &str) -> String {
    format!("{ADMIN_SUBJECT_PREFIX}{username}")
}

static USERNAME_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").ok());

fn valid_username(username: &str) -> bool {
    USERNAME_PATTERN
        .as_ref()
        .is_some_and(|re| re.is_match(username))
}

/// Admin entry as written in the admin users file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminUser {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub key: Key,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Admin entry with its key resolved.
#[derive(Debug)]
pub struct AdminEntry {
    pub username: String,
    pub email: Option<String>,
    pub permissions: Vec<String>,
    pub key: ResolvedKey,
}

#[derive(Debug, Default)]
pub struct AdminDirectory {
    entries: HashMap<String, AdminEntry>,
}

impl AdminDirectory {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from already resolved entries.
    ///
    /// # Errors
    /// Returns an error on invalid or duplicate usernames.
    pub fn from_entries(entries: impl IntoIterator<Item = AdminEntry>) -> Result<Self> {
        let mut directory = Self::default();
        for entry in entries {
            if !valid_username(&entry.username) {
                bail!("invalid admin username: {:?}", entry.username);
            }
            if directory.entries.contains_key(&entry.username) {
                bail!("duplicate admin username: {}", entry.username);
            }
            directory.entries.insert(entry.username.clone(), entry);
        }
        Ok(directory)
    }

    /// Resolve every configured admin key.
    ///
    /// # Errors
    /// Returns an error if a key fails to resolve or a username is invalid.
    pub fn from_users(users: Vec<AdminUser>) -> Result<Self> {
        let entries = users
            .into_iter()
            .map(|user| -> Result<AdminEntry> {
                let key = user
                    .key
                    .resolve()
                    .with_context(|| format!("failed to resolve key for admin {}", user.username))?;
                Ok(AdminEntry {
                    username: user.username,
                    email: user.email,
                    permissions: user.permissions,
                    key,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_entries(entries)
    }

    /// Load a JSON array of [`AdminUser`] entries.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or a key fails to resolve.
    pub fn load_json(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read admin users file: {}", path.display()))?;
        let users: Vec<AdminUser> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid admin users JSON: {}", path.display()))?;
        Self::from_users(users)
    }

    #[must_use]
    pub fn get(&self, username: &str) -> Option<&AdminEntry> {
        self.entries.get(username)
    }

    /// Look up by `admin/<username>` subject.
    #[must_use]
    pub fn get_by_subject(&self, subject: &str) -> Option<&AdminEntry> {
        admin_username(subject).and_then(|username| self.get(username))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
