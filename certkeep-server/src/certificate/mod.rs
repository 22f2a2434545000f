//! Certificate lifecycle
//!
//! Handles:
//! - The certificate entity and its issued state
//! - Save/lookup/list/delete through [`CertificateService`]
//! - Asynchronous issuance with cancellation on delete

mod model;
mod service;
mod worker;

pub use model::Certificate;
pub use service::CertificateService;
pub use worker::IssuanceConfig;
