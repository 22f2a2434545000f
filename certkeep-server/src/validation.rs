//! Input validation for certificate domain sets and admin credentials
//!
//! Domain rules:
//! - Each name is trimmed and lowercased before checking
//! - Optional leading `*.` wildcard label
//! - At least two labels (a TLD is required), 253 characters at most
//! - Labels start with an alphanumeric, contain only alphanumerics and
//!   hyphens, do not end with a hyphen, and are at most 63 characters
//! - A set holds 1 to [`MAX_DOMAINS`] names, without duplicates

use thiserror::Error;

/// Upper bound on names per certificate (the Let's Encrypt SAN limit)
pub const MAX_DOMAINS: usize = 100;

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;
const MAX_ADMIN_NAME_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("at least one domain is required")]
    NoDomains,

    #[error("too many domains: {0} (max {MAX_DOMAINS})")]
    TooManyDomains(usize),

    #[error("empty domain is not allowed")]
    EmptyDomain,

    #[error("invalid domain '{0}': {1}")]
    InvalidDomain(String, String),

    #[error("duplicate domain '{0}'")]
    DuplicateDomain(String),

    #[error("invalid admin name '{0}': {1}")]
    InvalidAdminName(String, String),
}

/// Validate and normalize a certificate's domain set, preserving order
pub fn normalize_domains(domains: &[String]) -> Result<Vec<String>, ValidationError> {
    if domains.is_empty() {
        return Err(ValidationError::NoDomains);
    }
    if domains.len() > MAX_DOMAINS {
        return Err(ValidationError::TooManyDomains(domains.len()));
    }

    let mut normalized: Vec<String> = Vec::with_capacity(domains.len());
    for raw in domains {
        let domain = normalize_domain(raw)?;
        if normalized.contains(&domain) {
            return Err(ValidationError::DuplicateDomain(domain));
        }
        normalized.push(domain);
    }

    Ok(normalized)
}

/// Validate a single domain name, returning its normalized form
pub fn normalize_domain(raw: &str) -> Result<String, ValidationError> {
    let domain = raw.trim().to_ascii_lowercase();
    if domain.is_empty() {
        return Err(ValidationError::EmptyDomain);
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(invalid(&domain, "name exceeds 253 characters"));
    }

    let hostname = domain.strip_prefix("*.").unwrap_or(&domain);
    if hostname.is_empty() {
        return Err(invalid(&domain, "wildcard without a base domain"));
    }

    if !hostname.contains('.') {
        return Err(invalid(
            &domain,
            "hostname must include a TLD (e.g., 'example.com' not 'example')",
        ));
    }

    for label in hostname.split('.') {
        if label.is_empty() {
            return Err(invalid(&domain, "empty label"));
        }
        if !label
            .chars()
            .next()
            .map(|c| c.is_ascii_alphanumeric())
            .unwrap_or(false)
        {
            return Err(invalid(&domain, "labels must start with a letter or digit"));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid(
                &domain,
                "labels may only contain letters, digits and hyphens",
            ));
        }
        if label.ends_with('-') {
            return Err(invalid(&domain, "labels cannot end with a hyphen"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(invalid(&domain, "label exceeds 63 character limit"));
        }
    }

    Ok(domain)
}

/// Validate the super-admin name
pub fn validate_admin_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::InvalidAdminName(
            name.to_string(),
            "name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_ADMIN_NAME_LEN {
        return Err(ValidationError::InvalidAdminName(
            name.to_string(),
            format!("name exceeds {MAX_ADMIN_NAME_LEN} characters"),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@'))
    {
        return Err(ValidationError::InvalidAdminName(
            name.to_string(),
            "allowed characters are letters, digits, '.', '_', '-' and '@'".to_string(),
        ));
    }
    Ok(())
}

fn invalid(domain: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidDomain(domain.to_string(), reason.to_string())
}
