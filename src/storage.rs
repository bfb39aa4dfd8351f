//!
//! estoque storage module
//! ----------------------
//! File-backed store for accounts and inventory entries. Everything lives in
//! one JSON db file that is loaded at open and rewritten in full after every
//! mutation; state between writes is held in memory.
//!
//! Key responsibilities:
//! - Account insertion with username uniqueness enforced inside the mutation.
//! - Inventory entry validation, monotonic id assignment and persistence.
//! - Rollback of in-memory state when the file write fails, so a failed
//!   mutation is never observable through reads.
//!
//! The public API centers around the `Store` type, which is wrapped in a
//! thread-safe `SharedStore` (`Arc<Mutex<Store>>`) elsewhere in the codebase.
//! Id assignment and uniqueness checks happen under that single lock, which is
//! what makes concurrent registrations and creations race-free.

use std::{fs, path::{Path, PathBuf}};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// A registered account. The password is only ever stored as an argon2 PHC
/// hash string; plaintext never reaches this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

/// A stored inventory entry. `image` holds the generated attachment file name
/// when one was uploaded, and serializes as JSON null otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mercadoria {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub height: f64,
    pub width: f64,
    pub status: String,
    pub image: Option<String>,
}

/// Input for a creation: everything but the id, which the store assigns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMercadoria {
    pub name: String,
    pub price: f64,
    pub height: f64,
    pub width: f64,
    pub status: String,
    pub image: Option<String>,
}

impl NewMercadoria {
    /// Field validation applied before anything is written. `name` and
    /// `status` must be non-empty after trimming; `price` must be a finite
    /// non-negative number; `height` and `width` must be finite and positive.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::MissingField("name"));
        }
        if self.status.trim().is_empty() {
            return Err(StoreError::MissingField("status"));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(StoreError::InvalidNumber("price"));
        }
        if !self.height.is_finite() || self.height <= 0.0 {
            return Err(StoreError::InvalidNumber("height"));
        }
        if !self.width.is_finite() || self.width <= 0.0 {
            return Err(StoreError::InvalidNumber("width"));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("username already exists")]
    DuplicateUser,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid numeric field: {0}")]
    InvalidNumber(&'static str),
    #[error("store persistence failed")]
    Persist(#[source] anyhow::Error),
}

fn default_next_id() -> i64 { 1 }

/// On-disk shape of the db file. Counters are stored explicitly so ids stay
/// monotonic across restarts and are never handed out twice.
#[derive(Debug, Serialize, Deserialize)]
struct DbFile {
    #[serde(default)]
    users: Vec<Account>,
    #[serde(default)]
    mercadorias: Vec<Mercadoria>,
    #[serde(default = "default_next_id")]
    next_user_id: i64,
    #[serde(default = "default_next_id")]
    next_mercadoria_id: i64,
}

impl Default for DbFile {
    fn default() -> Self {
        Self { users: Vec::new(), mercadorias: Vec::new(), next_user_id: 1, next_mercadoria_id: 1 }
    }
}

/// Core storage handle over one JSON db file.
pub struct Store {
    path: PathBuf,
    state: DbFile,
}

impl Store {
    /// Open the store at the given db file path, creating parent directories
    /// as needed. A missing file yields an empty store; an unreadable or
    /// corrupt file is an error rather than a silent reset.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).ok();
            }
        }
        let state = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("read db file '{}'", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parse db file '{}'", path.display()))?
        } else {
            DbFile::default()
        };
        Ok(Self { path, state })
    }

    fn persist(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.state)?;
        fs::write(&self.path, text)
            .with_context(|| format!("write db file '{}'", self.path.display()))?;
        Ok(())
    }

    /// Insert a new account. Uniqueness is checked and the id assigned inside
    /// this one call, so under the shared lock two concurrent registrations of
    /// the same username can never both succeed.
    pub fn insert_user(&mut self, username: &str, password_hash: &str) -> Result<Account, StoreError> {
        if self.state.users.iter().any(|u| u.username == username) {
            return Err(StoreError::DuplicateUser);
        }
        let id = self.state.next_user_id;
        self.state.next_user_id += 1;
        let account = Account {
            id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        };
        self.state.users.push(account.clone());
        if let Err(e) = self.persist() {
            self.state.users.pop();
            self.state.next_user_id = id;
            return Err(StoreError::Persist(e));
        }
        debug!(target: "estoque::storage", "insert_user: id={} username='{}'", id, username);
        Ok(account)
    }

    pub fn find_user(&self, username: &str) -> Option<&Account> {
        self.state.users.iter().find(|u| u.username == username)
    }

    pub fn user_count(&self) -> usize { self.state.users.len() }

    /// Validate, assign the next id and persist a new inventory entry,
    /// returning the stored row. On a failed file write the in-memory state is
    /// rolled back so reads never see the entry.
    pub fn insert_mercadoria(&mut self, new: NewMercadoria) -> Result<Mercadoria, StoreError> {
        new.validate()?;
        let id = self.state.next_mercadoria_id;
        self.state.next_mercadoria_id += 1;
        let row = Mercadoria {
            id,
            name: new.name,
            price: new.price,
            height: new.height,
            width: new.width,
            status: new.status,
            image: new.image,
        };
        self.state.mercadorias.push(row.clone());
        if let Err(e) = self.persist() {
            self.state.mercadorias.pop();
            self.state.next_mercadoria_id = id;
            return Err(StoreError::Persist(e));
        }
        debug!(target: "estoque::storage", "insert_mercadoria: id={} name='{}'", id, row.name);
        Ok(row)
    }

    /// All entries in insertion order.
    pub fn all_mercadorias(&self) -> Vec<Mercadoria> {
        self.state.mercadorias.clone()
    }

    pub fn mercadoria_count(&self) -> usize { self.state.mercadorias.len() }
}

/// Cloneable, thread-safe handle over a [`Store`].
#[derive(Clone)]
pub struct SharedStore(pub Arc<Mutex<Store>>);

impl SharedStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Store::open(path)?))))
    }

    pub fn db_path(&self) -> PathBuf {
        self.0.lock().path.clone()
    }
}
