//!
//! gatehouse storage module
//! ------------------------
//! Persistence for the three collections the service needs: login credentials,
//! issued session tokens, and the user-directory records served by the query
//! flow. Each collection lives in a single JSON file under the configured data
//! root and is held in memory behind a `parking_lot::Mutex`; every mutation
//! rewrites the file.
//!
//! The store surface is expressed as capability traits (`CredentialStore`,
//! `TokenStore`, `UserStore`) so the authorizer and handlers receive their
//! collaborators explicitly and tests can substitute in-memory or failing
//! implementations.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::identity::{Credential, SessionToken};

/// Failure conditions with fixed observable messages. A delete that affects
/// zero rows is a hard error, distinct from a not-found read.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SessionToken not deleted!")]
    TokenNotDeleted,
    #[error("SessionToken not updated!")]
    TokenNotUpdated,
    #[error("UserCredentials not deleted!")]
    CredentialNotDeleted,
}

/// A user-directory record returned by the name query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub age: u32,
    pub email: String,
    #[serde(rename = "workingPosition")]
    pub working_position: i32,
}

/// Credential persistence consumed by the authorizer and the admin surface.
pub trait CredentialStore: Send + Sync {
    /// Exact username+password match; a miss is `Ok(None)`, not an error.
    fn find_by_credentials(&self, username: &str, password: &str) -> Result<Option<Credential>>;
    fn insert(&self, cred: &Credential) -> Result<()>;
    fn delete_by_credentials(&self, username: &str, password: &str) -> Result<()>;
}

/// Session token persistence consumed by the authorizer.
pub trait TokenStore: Send + Sync {
    fn find_by_id(&self, token_id: &str) -> Result<Option<SessionToken>>;
    fn insert(&self, token: &SessionToken) -> Result<()>;
    /// Replace the stored token with the same id (revocation flips `valid`).
    fn update(&self, token: &SessionToken) -> Result<()>;
    fn delete_by_id(&self, token_id: &str) -> Result<()>;
}

/// User-directory lookups, downstream of the authorization check.
pub trait UserStore: Send + Sync {
    /// Substring match on the record name.
    fn find_by_name(&self, pattern: &str) -> Result<Vec<User>>;
    fn put(&self, user: &User) -> Result<()>;
    fn count(&self) -> Result<usize>;
}

/// One JSON file holding a whole collection, loaded at open and rewritten on
/// each mutation. Adequate for the small catalogs this service keeps.
struct JsonDb<T> {
    path: PathBuf,
    items: Mutex<Vec<T>>,
}

impl<T: Serialize + DeserializeOwned + Clone> JsonDb<T> {
    fn open(path: PathBuf) -> Result<Self> {
        let items = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store file: {}", path.display()))?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("Malformed store file: {}", path.display()))?
            }
        } else {
            Vec::new()
        };
        debug!(target: "gatehouse::storage", "open: path='{}' items={}", path.display(), items.len());
        Ok(Self { path, items: Mutex::new(items) })
    }

    fn flush(&self, items: &[T]) -> Result<()> {
        let body = serde_json::to_string_pretty(items)?;
        fs::write(&self.path, body)
            .with_context(|| format!("Failed to write store file: {}", self.path.display()))?;
        Ok(())
    }

    fn find_first<F: Fn(&T) -> bool>(&self, pred: F) -> Option<T> {
        self.items.lock().iter().find(|t| pred(t)).cloned()
    }

    fn select<F: Fn(&T) -> bool>(&self, pred: F) -> Vec<T> {
        self.items.lock().iter().filter(|t| pred(t)).cloned().collect()
    }

    fn push(&self, item: T) -> Result<()> {
        let mut items = self.items.lock();
        items.push(item);
        self.flush(&items)
    }

    /// Remove all matching items; returns how many rows were affected.
    fn remove<F: Fn(&T) -> bool>(&self, pred: F) -> Result<usize> {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|t| !pred(t));
        let removed = before - items.len();
        if removed > 0 {
            self.flush(&items)?;
        }
        Ok(removed)
    }

    /// Replace the first matching item; returns how many rows were affected.
    fn replace<F: Fn(&T) -> bool>(&self, pred: F, item: T) -> Result<usize> {
        let mut items = self.items.lock();
        let Some(slot) = items.iter_mut().find(|t| pred(t)) else {
            return Ok(0);
        };
        *slot = item;
        self.flush(&items)?;
        Ok(1)
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

/// File-backed credential store (`credentials.json` under the data root).
pub struct CredentialDb(JsonDb<Credential>);

impl CredentialDb {
    pub fn open<P: AsRef<Path>>(db_root: P) -> Result<Self> {
        Ok(Self(JsonDb::open(db_root.as_ref().join("credentials.json"))?))
    }
}

impl CredentialStore for CredentialDb {
    fn find_by_credentials(&self, username: &str, password: &str) -> Result<Option<Credential>> {
        Ok(self.0.find_first(|c| c.username == username && c.password == password))
    }

    fn insert(&self, cred: &Credential) -> Result<()> {
        self.0.push(cred.clone())
    }

    fn delete_by_credentials(&self, username: &str, password: &str) -> Result<()> {
        let removed = self.0.remove(|c| c.username == username && c.password == password)?;
        if removed == 0 {
            return Err(StoreError::CredentialNotDeleted.into());
        }
        Ok(())
    }
}

/// File-backed session token store (`tokens.json` under the data root).
pub struct TokenDb(JsonDb<SessionToken>);

impl TokenDb {
    pub fn open<P: AsRef<Path>>(db_root: P) -> Result<Self> {
        Ok(Self(JsonDb::open(db_root.as_ref().join("tokens.json"))?))
    }
}

impl TokenStore for TokenDb {
    fn find_by_id(&self, token_id: &str) -> Result<Option<SessionToken>> {
        Ok(self.0.find_first(|t| t.token_id == token_id))
    }

    fn insert(&self, token: &SessionToken) -> Result<()> {
        self.0.push(token.clone())
    }

    fn update(&self, token: &SessionToken) -> Result<()> {
        let id = token.token_id.clone();
        let replaced = self.0.replace(|t| t.token_id == id, token.clone())?;
        if replaced == 0 {
            return Err(StoreError::TokenNotUpdated.into());
        }
        Ok(())
    }

    fn delete_by_id(&self, token_id: &str) -> Result<()> {
        let removed = self.0.remove(|t| t.token_id == token_id)?;
        if removed == 0 {
            return Err(StoreError::TokenNotDeleted.into());
        }
        Ok(())
    }
}

/// File-backed user directory (`users.json` under the data root).
pub struct UserDb(JsonDb<User>);

impl UserDb {
    pub fn open<P: AsRef<Path>>(db_root: P) -> Result<Self> {
        Ok(Self(JsonDb::open(db_root.as_ref().join("users.json"))?))
    }
}

impl UserStore for UserDb {
    fn find_by_name(&self, pattern: &str) -> Result<Vec<User>> {
        Ok(self.0.select(|u| u.name.contains(pattern)))
    }

    fn put(&self, user: &User) -> Result<()> {
        self.0.push(user.clone())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.0.len())
    }
}
