//! certkeep server library
//!
//! Certificate lifecycle and signing-secret services, their SQLite store,
//! the issuers, and the management socket that fronts them.

pub mod certificate;
pub mod clock;
pub mod config;
pub mod error;
pub mod handler;
pub mod issuer;
pub mod paths;
pub mod socket;
pub mod store;
pub mod validation;

pub use certificate::{Certificate, CertificateService, IssuanceConfig};
pub use config::{ConfigService, JwtSecret, User};
pub use error::{ServiceError, ServiceResult};
pub use handler::CommandHandler;
pub use store::{CertificateStore, ConfigStore, SqliteStateStore, StoreError};
