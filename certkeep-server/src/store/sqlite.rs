use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{CertificateStore, ConfigStore, StoreError, StoreResult};
use crate::certificate::Certificate;
use crate::clock;
use crate::config::{JwtSecret, Role, User};

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CERT_COLUMNS: &str = "id, common_name, domains_json, cert_url, cert_stable_url,
    private_key, certificate_chain, expires_at_unix_secs, issued, last_error,
    created_at_unix_secs, updated_at_unix_secs";

/// SQLite-backed store for certificates, the signing secret and the super-admin.
///
/// One connection guarded by a mutex, so every call is serialized.
pub struct SqliteStateStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open (creating if needed) the database at `path` and bring its schema up to date
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::InvalidData(format!("create db parent: {e}")))?;
        }

        let conn = Connection::open(&path)?;
        configure_connection(&conn, true)?;
        let store = Self {
            path: Some(path),
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Private in-memory database, gone when the store is dropped
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        configure_connection(&conn, false)?;
        let store = Self {
            path: None,
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init(&self) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let version = query_user_version(&conn)?;
        if version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchemaVersion { found: version });
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match version {
            0 => {
                ensure_schema_objects(&tx)?;
                tx.execute_batch(&format!("PRAGMA user_version = {CURRENT_SCHEMA_VERSION};"))?;
            }
            CURRENT_SCHEMA_VERSION => ensure_schema_objects(&tx)?,
            other => return Err(StoreError::UnsupportedSchemaVersion { found: other }),
        }
        upsert_schema_meta(&tx)?;
        tx.commit()?;
        Ok(())
    }
}

fn configure_connection(conn: &Connection, on_disk: bool) -> StoreResult<()> {
    if on_disk {
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
    }
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA temp_store = MEMORY;
         PRAGMA trusted_schema = OFF;",
    )?;
    Ok(())
}

fn query_user_version(conn: &Connection) -> StoreResult<i32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?)
}

fn ensure_schema_objects(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_meta (
            id INTEGER PRIMARY KEY CHECK(id = 1),
            schema_version INTEGER NOT NULL,
            server_version TEXT NOT NULL,
            created_by TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS certificates (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            common_name TEXT NOT NULL,
            domains_json TEXT NOT NULL,
            cert_url TEXT NOT NULL,
            cert_stable_url TEXT NOT NULL,
            private_key BLOB NOT NULL,
            certificate_chain BLOB NOT NULL,
            expires_at_unix_secs INTEGER,
            issued INTEGER NOT NULL,
            last_error TEXT,
            created_at_unix_secs INTEGER NOT NULL,
            updated_at_unix_secs INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS jwt_secret (
            id INTEGER PRIMARY KEY CHECK(id = 1),
            secret BLOB NOT NULL,
            created_at_unix_secs INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS super_admin (
            id INTEGER PRIMARY KEY CHECK(id = 1),
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at_unix_secs INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

fn upsert_schema_meta(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO schema_meta (id, schema_version, server_version, created_by)
         VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
            schema_version = excluded.schema_version,
            server_version = excluded.server_version,
            created_by = excluded.created_by;",
        params![CURRENT_SCHEMA_VERSION, env!("CARGO_PKG_VERSION"), "certkeep-server"],
    )?;
    Ok(())
}

/// Column values of one `certificates` row before conversion
struct CertRow {
    id: String,
    common_name: String,
    domains_json: String,
    cert_url: String,
    cert_stable_url: String,
    private_key: Vec<u8>,
    certificate_chain: Vec<u8>,
    expires_at: Option<i64>,
    issued: bool,
    last_error: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl CertRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            common_name: row.get(1)?,
            domains_json: row.get(2)?,
            cert_url: row.get(3)?,
            cert_stable_url: row.get(4)?,
            private_key: row.get(5)?,
            certificate_chain: row.get(6)?,
            expires_at: row.get(7)?,
            issued: row.get(8)?,
            last_error: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_certificate(self) -> StoreResult<Certificate> {
        let domains: Vec<String> = serde_json::from_str(&self.domains_json)
            .map_err(|e| StoreError::InvalidData(format!("deserialize domains: {e}")))?;
        let expires_at = self
            .expires_at
            .map(|secs| to_u64(secs, "expires_at_unix_secs").map(clock::from_unix_secs))
            .transpose()?;

        Ok(Certificate {
            id: self.id,
            common_name: self.common_name,
            domains,
            cert_url: self.cert_url,
            cert_stable_url: self.cert_stable_url,
            private_key: self.private_key,
            certificate_chain: self.certificate_chain,
            expires_at,
            issued: self.issued,
            last_error: self.last_error,
            created_at: clock::from_unix_secs(to_u64(self.created_at, "created_at_unix_secs")?),
            updated_at: clock::from_unix_secs(to_u64(self.updated_at, "updated_at_unix_secs")?),
        })
    }
}

fn domains_json(cert: &Certificate) -> StoreResult<String> {
    serde_json::to_string(&cert.domains)
        .map_err(|e| StoreError::InvalidData(format!("serialize domains: {e}")))
}

fn unix_i64(time: std::time::SystemTime) -> i64 {
    i64::try_from(clock::unix_secs(time)).unwrap_or(i64::MAX)
}

impl CertificateStore for SqliteStateStore {
    fn get(&self, id: &str) -> StoreResult<Option<Certificate>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {CERT_COLUMNS} FROM certificates WHERE id = ?1;"),
                params![id],
                CertRow::read,
            )
            .optional()?;
        row.map(CertRow::into_certificate).transpose()
    }

    fn list(&self) -> StoreResult<Vec<Certificate>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CERT_COLUMNS} FROM certificates ORDER BY seq;"
        ))?;
        let rows = stmt.query_map([], CertRow::read)?;

        let mut certs = Vec::new();
        for row in rows {
            certs.push(row?.into_certificate()?);
        }
        Ok(certs)
    }

    fn save(&self, cert: &Certificate) -> StoreResult<()> {
        let domains = domains_json(cert)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO certificates (
                id, common_name, domains_json, cert_url, cert_stable_url,
                private_key, certificate_chain, expires_at_unix_secs, issued, last_error,
                created_at_unix_secs, updated_at_unix_secs
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                common_name = excluded.common_name,
                domains_json = excluded.domains_json,
                cert_url = excluded.cert_url,
                cert_stable_url = excluded.cert_stable_url,
                private_key = excluded.private_key,
                certificate_chain = excluded.certificate_chain,
                expires_at_unix_secs = excluded.expires_at_unix_secs,
                issued = excluded.issued,
                last_error = excluded.last_error,
                created_at_unix_secs = excluded.created_at_unix_secs,
                updated_at_unix_secs = excluded.updated_at_unix_secs;",
            params![
                cert.id,
                cert.common_name,
                domains,
                cert.cert_url,
                cert.cert_stable_url,
                cert.private_key,
                cert.certificate_chain,
                cert.expires_at.map(unix_i64),
                cert.issued,
                cert.last_error,
                unix_i64(cert.created_at),
                unix_i64(cert.updated_at),
            ],
        )?;
        Ok(())
    }

    fn update(&self, cert: &Certificate) -> StoreResult<bool> {
        let domains = domains_json(cert)?;
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE certificates SET
                common_name = ?2,
                domains_json = ?3,
                cert_url = ?4,
                cert_stable_url = ?5,
                private_key = ?6,
                certificate_chain = ?7,
                expires_at_unix_secs = ?8,
                issued = ?9,
                last_error = ?10,
                created_at_unix_secs = ?11,
                updated_at_unix_secs = ?12
             WHERE id = ?1;",
            params![
                cert.id,
                cert.common_name,
                domains,
                cert.cert_url,
                cert.cert_stable_url,
                cert.private_key,
                cert.certificate_chain,
                cert.expires_at.map(unix_i64),
                cert.issued,
                cert.last_error,
                unix_i64(cert.created_at),
                unix_i64(cert.updated_at),
            ],
        )?;
        Ok(changed > 0)
    }

    fn delete(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM certificates WHERE id = ?1;", params![id])?;
        Ok(changed > 0)
    }

    fn delete_all(&self) -> StoreResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute("DELETE FROM certificates;", [])?;
        tx.commit()?;
        Ok(removed)
    }
}

impl ConfigStore for SqliteStateStore {
    fn jwt_secret(&self) -> StoreResult<Option<JwtSecret>> {
        let conn = self.conn.lock();
        let bytes: Option<Vec<u8>> = conn
            .query_row("SELECT secret FROM jwt_secret WHERE id = 1;", [], |row| {
                row.get(0)
            })
            .optional()?;
        bytes.map(secret_from_bytes).transpose()
    }

    fn init_jwt_secret(&self, candidate: &JwtSecret) -> StoreResult<JwtSecret> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO jwt_secret (id, secret, created_at_unix_secs)
             VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO NOTHING;",
            params![candidate.as_bytes(), unix_i64(clock::now())],
        )?;
        let committed: Vec<u8> =
            tx.query_row("SELECT secret FROM jwt_secret WHERE id = 1;", [], |row| {
                row.get(0)
            })?;
        tx.commit()?;
        secret_from_bytes(committed)
    }

    fn set_jwt_secret(&self, secret: &JwtSecret) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO jwt_secret (id, secret, created_at_unix_secs)
             VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                secret = excluded.secret,
                created_at_unix_secs = excluded.created_at_unix_secs;",
            params![secret.as_bytes(), unix_i64(clock::now())],
        )?;
        Ok(())
    }

    fn super_admin(&self) -> StoreResult<Option<User>> {
        let conn = self.conn.lock();
        let row: Option<(String, String, i64)> = conn
            .query_row(
                "SELECT user_id, name, created_at_unix_secs FROM super_admin WHERE id = 1;",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        row.map(|(id, name, created_at)| {
            Ok(User {
                id,
                name,
                role: Role::SuperAdmin,
                created_at: clock::from_unix_secs(to_u64(created_at, "created_at_unix_secs")?),
            })
        })
        .transpose()
    }

    fn create_super_admin(&self, user: &User) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO super_admin (id, user_id, name, created_at_unix_secs)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO NOTHING;",
            params![user.id, user.name, unix_i64(user.created_at)],
        )?;
        Ok(inserted == 1)
    }

    fn clear_super_admin(&self) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM super_admin WHERE id = 1;", [])?;
        Ok(removed > 0)
    }
}

fn secret_from_bytes(bytes: Vec<u8>) -> StoreResult<JwtSecret> {
    if bytes.is_empty() {
        return Err(StoreError::InvalidData(
            "stored jwt secret is empty".to_string(),
        ));
    }
    Ok(JwtSecret::from_bytes(bytes))
}

fn to_u64(value: i64, field: &str) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| {
        StoreError::InvalidData(format!("field '{field}' out of range for u64: {value}"))
    })
}
