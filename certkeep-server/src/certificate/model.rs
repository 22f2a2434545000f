//! Certificate entity

use certkeep_core::CertificateView;
use std::time::{Duration, SystemTime};

use crate::clock;
use crate::issuer::IssuedCertificate;

/// One managed TLS certificate.
///
/// Only the certificate service mutates these; the store persists them as-is.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Opaque unique identifier, never changes once assigned
    pub id: String,
    /// Display name, always the first entry of `domains`
    pub common_name: String,
    /// Validation scope, non-empty and free of duplicates
    pub domains: Vec<String>,
    pub cert_url: String,
    pub cert_stable_url: String,
    /// PEM private key, empty until issued
    pub private_key: Vec<u8>,
    /// PEM chain (leaf first), empty until issued
    pub certificate_chain: Vec<u8>,
    /// Meaningful only once `issued` is set
    pub expires_at: Option<SystemTime>,
    pub issued: bool,
    /// Message from the most recent failed issuance attempt
    pub last_error: Option<String>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Certificate {
    /// A fresh, not yet issued record. `domains` must already be validated.
    pub fn new(id: impl Into<String>, domains: Vec<String>) -> Self {
        let now = clock::now();
        Self {
            id: id.into(),
            common_name: domains.first().cloned().unwrap_or_default(),
            domains,
            cert_url: String::new(),
            cert_stable_url: String::new(),
            private_key: Vec::new(),
            certificate_chain: Vec::new(),
            expires_at: None,
            issued: false,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the domain set, keeping identity and issued artifacts
    pub fn set_domains(&mut self, domains: Vec<String>) {
        self.common_name = domains.first().cloned().unwrap_or_default();
        self.domains = domains;
        self.updated_at = clock::now();
    }

    /// Record a successful issuance
    pub fn apply_issuance(&mut self, issued: &IssuedCertificate) {
        self.certificate_chain = issued.certificate_chain.clone();
        self.private_key = issued.private_key.clone();
        self.cert_url = issued.cert_url.clone();
        self.cert_stable_url = issued.cert_stable_url.clone();
        self.expires_at = Some(issued.expires_at);
        self.issued = true;
        self.last_error = None;
        self.updated_at = clock::now();
    }

    /// Record a failed issuance; the issued state is left as it was
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.updated_at = clock::now();
    }

    /// Check if certificate is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| SystemTime::now() > exp)
            .unwrap_or(false)
    }

    /// Check if certificate expires within the given window
    pub fn expires_within(&self, window: Duration) -> bool {
        self.expires_at
            .map(|exp| SystemTime::now() + window > exp)
            .unwrap_or(false)
    }

    /// Days until expiry
    pub fn days_until_expiry(&self) -> Option<i64> {
        self.expires_at
            .map(|exp| match exp.duration_since(SystemTime::now()) {
                Ok(duration) => (duration.as_secs() / 86400) as i64,
                Err(e) => -(e.duration().as_secs() as i64 / 86400),
            })
    }

    /// Client-visible projection, without key material
    pub fn view(&self) -> CertificateView {
        CertificateView {
            id: self.id.clone(),
            common_name: self.common_name.clone(),
            domains: self.domains.clone(),
            cert_url: self.cert_url.clone(),
            cert_stable_url: self.cert_stable_url.clone(),
            expires_at: self.expires_at.map(clock::unix_secs),
            issued: self.issued,
        }
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("id", &self.id)
            .field("common_name", &self.common_name)
            .field("domains", &self.domains)
            .field("cert_url", &self.cert_url)
            .field("cert_stable_url", &self.cert_stable_url)
            .field("private_key", &format_args!("<{} bytes>", self.private_key.len()))
            .field(
                "certificate_chain",
                &format_args!("<{} bytes>", self.certificate_chain.len()),
            )
            .field("expires_at", &self.expires_at)
            .field("issued", &self.issued)
            .field("last_error", &self.last_error)
            .finish()
    }
}
