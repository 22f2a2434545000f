//! Certificate issuance
//!
//! Handles:
//! - The `Issuer` contract the certificate service hands work to
//! - ACME (Let's Encrypt) issuance via HTTP-01 challenge
//! - Self-signed certificates for development and `--no-acme` deployments

mod acme;
mod challenge;
mod self_signed;

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use x509_parser::prelude::*;

pub use acme::{AcmeConfig, AcmeIssuer, ChallengeTokens};
pub use challenge::{ChallengeHandler, ChallengeResponder};
pub use self_signed::{SelfSignedConfig, SelfSignedIssuer};

/// Errors that can occur while obtaining a certificate
#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("ACME account not registered")]
    NotRegistered,

    #[error("Challenge failed: {0}")]
    ChallengeFailed(String),

    #[error("Certificate issuance failed: {0}")]
    IssuanceFailed(String),

    #[error("Order not ready: {0}")]
    OrderNotReady(String),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("ACME error: {0}")]
    Acme(#[from] instant_acme::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key generation error: {0}")]
    KeyGeneration(String),

    #[error("Failed to parse certificate: {0}")]
    Parse(String),

    #[error("HTTP-01 challenge not available")]
    NoHttp01Challenge,

    #[error("Issuer returned no {0}")]
    Incomplete(&'static str),

    #[error("Issuer aborted: {0}")]
    Aborted(String),
}

/// What the certificate service asks an issuer for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceRequest {
    /// Record the result belongs to
    pub id: String,
    /// Validated domain set; the first entry is the common name
    pub domains: Vec<String>,
}

/// Material produced by a successful issuance
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// PEM chain, leaf first
    pub certificate_chain: Vec<u8>,
    /// PEM private key
    pub private_key: Vec<u8>,
    pub cert_url: String,
    pub cert_stable_url: String,
    pub expires_at: SystemTime,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("cert_url", &self.cert_url)
            .field("cert_stable_url", &self.cert_stable_url)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl IssuedCertificate {
    /// Reject results that could not back an issued record
    pub fn ensure_complete(self) -> Result<Self, IssuerError> {
        if self.certificate_chain.is_empty() {
            return Err(IssuerError::Incomplete("certificate chain"));
        }
        if self.private_key.is_empty() {
            return Err(IssuerError::Incomplete("private key"));
        }
        Ok(self)
    }
}

/// Obtains signed certificates for a domain set.
///
/// Implementations may take minutes; callers run them off the request path.
#[async_trait]
pub trait Issuer: Send + Sync {
    async fn issue(&self, request: &IssuanceRequest) -> Result<IssuedCertificate, IssuerError>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Parse the expiry of the first certificate in PEM data
pub fn parse_cert_expiry(pem_data: &[u8]) -> Result<SystemTime, IssuerError> {
    for pem in Pem::iter_from_buffer(pem_data) {
        let pem = pem.map_err(|e| IssuerError::Parse(e.to_string()))?;

        if pem.label == "CERTIFICATE" {
            let (_, cert) = X509Certificate::from_der(&pem.contents)
                .map_err(|e| IssuerError::Parse(e.to_string()))?;

            let timestamp = cert.validity().not_after.timestamp();
            let secs = u64::try_from(timestamp)
                .map_err(|_| IssuerError::Parse(format!("expiry before epoch: {timestamp}")))?;
            return Ok(UNIX_EPOCH + Duration::from_secs(secs));
        }
    }

    Err(IssuerError::Parse(
        "No certificate found in PEM data".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cert_expiry_rejects_garbage() {
        assert!(parse_cert_expiry(b"not a valid certificate").is_err());
    }

    #[test]
    fn test_parse_cert_expiry_reads_generated_cert() {
        use rcgen::{CertificateParams, KeyPair};

        let mut params = CertificateParams::new(vec!["example.com".to_string()]).unwrap();
        params.not_after = rcgen::date_time_ymd(2040, 1, 2);
        let key_pair = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();

        let expiry = parse_cert_expiry(cert.pem().as_bytes()).unwrap();
        let secs = expiry.duration_since(UNIX_EPOCH).unwrap().as_secs();
        // 2040-01-02T00:00:00Z
        assert_eq!(secs, 2_209_075_200);
    }

    #[test]
    fn test_issued_certificate_debug_hides_key() {
        let issued = IssuedCertificate {
            certificate_chain: b"chain".to_vec(),
            private_key: b"secret-key".to_vec(),
            cert_url: String::new(),
            cert_stable_url: String::new(),
            expires_at: UNIX_EPOCH,
        };
        assert!(!format!("{:?}", issued).contains("secret-key"));
    }

    #[test]
    fn test_ensure_complete_requires_chain_and_key() {
        let issued = IssuedCertificate {
            certificate_chain: b"chain".to_vec(),
            private_key: b"key".to_vec(),
            cert_url: String::new(),
            cert_stable_url: String::new(),
            expires_at: UNIX_EPOCH,
        };
        assert!(issued.clone().ensure_complete().is_ok());

        let no_chain = IssuedCertificate {
            certificate_chain: Vec::new(),
            ..issued.clone()
        };
        assert!(matches!(
            no_chain.ensure_complete(),
            Err(IssuerError::Incomplete("certificate chain"))
        ));

        let no_key = IssuedCertificate {
            private_key: Vec::new(),
            ..issued
        };
        assert!(matches!(
            no_key.ensure_complete(),
            Err(IssuerError::Incomplete("private key"))
        ));
    }
}
