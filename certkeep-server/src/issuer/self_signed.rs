//! Self-signed certificate issuance for development and `--no-acme` deployments

use super::{IssuanceRequest, IssuedCertificate, Issuer, IssuerError, parse_cert_expiry};
use async_trait::async_trait;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};

#[derive(Debug, Clone)]
pub struct SelfSignedConfig {
    /// Lifetime of generated certificates
    pub validity_days: u32,
}

impl Default for SelfSignedConfig {
    fn default() -> Self {
        Self { validity_days: 90 }
    }
}

/// Issuer that signs certificates with their own freshly generated key
pub struct SelfSignedIssuer {
    config: SelfSignedConfig,
}

impl SelfSignedIssuer {
    pub fn new(config: SelfSignedConfig) -> Self {
        Self { config }
    }

    pub fn generate(&self, request: &IssuanceRequest) -> Result<IssuedCertificate, IssuerError> {
        let common_name = request
            .domains
            .first()
            .ok_or_else(|| IssuerError::InvalidDomain(String::new()))?;

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name.as_str());
        dn.push(DnType::OrganizationName, "certkeep");
        params.distinguished_name = dn;

        for domain in &request.domains {
            let dns_name = domain.as_str().try_into().map_err(|e| {
                IssuerError::InvalidDomain(format!("Invalid DNS name '{}': {}", domain, e))
            })?;
            params.subject_alt_names.push(SanType::DnsName(dns_name));
        }

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + time::Duration::days(i64::from(self.config.validity_days));

        let key_pair = KeyPair::generate().map_err(|e| {
            IssuerError::KeyGeneration(format!("Failed to generate key pair: {}", e))
        })?;

        let cert = params.self_signed(&key_pair).map_err(|e| {
            IssuerError::IssuanceFailed(format!("Failed to generate certificate: {}", e))
        })?;

        let cert_pem = cert.pem();
        let expires_at = parse_cert_expiry(cert_pem.as_bytes())?;

        tracing::info!(
            id = %request.id,
            domain = %common_name,
            validity_days = self.config.validity_days,
            "Generated self-signed certificate"
        );

        let cert_url = format!("self-signed:{}", request.id);
        Ok(IssuedCertificate {
            certificate_chain: cert_pem.into_bytes(),
            private_key: key_pair.serialize_pem().into_bytes(),
            cert_stable_url: cert_url.clone(),
            cert_url,
            expires_at,
        })
    }
}

#[async_trait]
impl Issuer for SelfSignedIssuer {
    async fn issue(&self, request: &IssuanceRequest) -> Result<IssuedCertificate, IssuerError> {
        self.generate(request)
    }

    fn name(&self) -> &'static str {
        "self-signed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use x509_parser::prelude::*;

    fn request(domains: &[&str]) -> IssuanceRequest {
        IssuanceRequest {
            id: "cert-1".to_string(),
            domains: domains.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_issue_covers_all_domains() {
        let issuer = SelfSignedIssuer::new(SelfSignedConfig::default());
        let issued = issuer
            .issue(&request(&["example.com", "www.example.com"]))
            .await
            .unwrap();

        let chain = String::from_utf8(issued.certificate_chain.clone()).unwrap();
        assert!(chain.contains("BEGIN CERTIFICATE"));
        let key = String::from_utf8(issued.private_key.clone()).unwrap();
        assert!(key.contains("BEGIN PRIVATE KEY"));
        assert_eq!(issued.cert_url, "self-signed:cert-1");

        let pem = Pem::iter_from_buffer(&issued.certificate_chain)
            .next()
            .unwrap()
            .unwrap();
        let (_, cert) = X509Certificate::from_der(&pem.contents).unwrap();
        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap();
        assert_eq!(cn, "example.com");

        let sans: Vec<String> = cert
            .subject_alternative_name()
            .unwrap()
            .unwrap()
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(sans, vec!["example.com", "www.example.com"]);
    }

    #[test]
    fn test_validity_follows_config() {
        let issuer = SelfSignedIssuer::new(SelfSignedConfig { validity_days: 10 });
        let issued = issuer.generate(&request(&["example.com"])).unwrap();

        let remaining = issued
            .expires_at
            .duration_since(SystemTime::now())
            .unwrap();
        assert!(remaining > Duration::from_secs(9 * 86400));
        assert!(remaining <= Duration::from_secs(10 * 86400));
    }

    #[test]
    fn test_empty_domain_set_rejected() {
        let issuer = SelfSignedIssuer::new(SelfSignedConfig::default());
        let result = issuer.generate(&request(&[]));
        assert!(matches!(result, Err(IssuerError::InvalidDomain(_))));
    }
}
