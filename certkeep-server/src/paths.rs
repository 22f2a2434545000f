//! On-disk layout: management socket, SQLite database and ACME account.

use std::path::{Path, PathBuf};

pub const SYSTEM_SOCKET: &str = "/var/run/certkeep/certkeep.sock";
pub const SYSTEM_DATA_DIR: &str = "/var/lib/certkeep";

const DATABASE_FILE: &str = "certkeep.db";
const ACME_DIR: &str = "acme";

/// Where a running server keeps its socket and state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub socket: PathBuf,
    pub data_dir: PathBuf,
}

impl Layout {
    pub fn system() -> Self {
        Self {
            socket: PathBuf::from(SYSTEM_SOCKET),
            data_dir: PathBuf::from(SYSTEM_DATA_DIR),
        }
    }

    /// Layout for a binary built inside a source checkout (`<checkout>/target/...`).
    ///
    /// Everything lands under `<checkout>/local-dev/certkeep/`. Returns `None`
    /// when `exe` is not below a `target/` directory.
    pub fn checkout(exe: &Path) -> Option<Self> {
        let target = exe
            .ancestors()
            .find(|dir| dir.file_name().is_some_and(|name| name == "target"))?;
        let local_dev = target.parent()?.join("local-dev").join("certkeep");
        Some(Self {
            socket: local_dev.join("tmp").join("certkeep.sock"),
            data_dir: local_dev.join("data"),
        })
    }

    /// Checkout layout for debug builds run from `target/`, system layout otherwise
    pub fn detect(exe: Option<&Path>, debug_build: bool) -> Self {
        exe.filter(|_| debug_build)
            .and_then(Self::checkout)
            .unwrap_or_else(Self::system)
    }

    pub fn with_overrides(mut self, socket: Option<PathBuf>, data_dir: Option<PathBuf>) -> Self {
        if let Some(socket) = socket {
            self.socket = socket;
        }
        if let Some(data_dir) = data_dir {
            self.data_dir = data_dir;
        }
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    /// ACME account credentials live here
    pub fn acme_dir(&self) -> PathBuf {
        self.data_dir.join(ACME_DIR)
    }
}
