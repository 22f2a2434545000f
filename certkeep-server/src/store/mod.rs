//! Persistence contracts
//!
//! The services only see these traits; [`SqliteStateStore`] is the one
//! concrete backend. Stores never validate or derive fields, they persist
//! exactly what the services hand them.

mod sqlite;

use thiserror::Error;

use crate::certificate::Certificate;
use crate::config::{JwtSecret, User};

pub use sqlite::{CURRENT_SCHEMA_VERSION, SqliteStateStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("unsupported schema version: {found}")]
    UnsupportedSchemaVersion { found: i32 },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable key-value persistence of certificate records, keyed by ID
pub trait CertificateStore: Send + Sync {
    /// `Ok(None)` when no record has this ID
    fn get(&self, id: &str) -> StoreResult<Option<Certificate>>;

    /// Every record, in insertion order
    fn list(&self) -> StoreResult<Vec<Certificate>>;

    /// Insert or overwrite. An overwritten record keeps its list position.
    fn save(&self, cert: &Certificate) -> StoreResult<()>;

    /// Overwrite an existing record. Returns `false` (and writes nothing)
    /// when the ID is not stored.
    fn update(&self, cert: &Certificate) -> StoreResult<bool>;

    /// Returns `false` when the ID was not stored
    fn delete(&self, id: &str) -> StoreResult<bool>;

    /// Remove every record atomically; returns how many were removed
    fn delete_all(&self) -> StoreResult<usize>;
}

/// Durable storage for the signing secret and the super-admin identity
pub trait ConfigStore: Send + Sync {
    fn jwt_secret(&self) -> StoreResult<Option<JwtSecret>>;

    /// Atomically store `candidate` unless a secret already exists.
    /// Returns whichever secret is committed afterwards.
    fn init_jwt_secret(&self, candidate: &JwtSecret) -> StoreResult<JwtSecret>;

    /// Unconditionally replace the secret
    fn set_jwt_secret(&self, secret: &JwtSecret) -> StoreResult<()>;

    fn super_admin(&self) -> StoreResult<Option<User>>;

    /// Atomically store `user` unless an admin already exists.
    /// Returns `false` when one did.
    fn create_super_admin(&self, user: &User) -> StoreResult<bool>;

    /// Returns `false` when there was no admin to clear
    fn clear_super_admin(&self) -> StoreResult<bool>;
}
