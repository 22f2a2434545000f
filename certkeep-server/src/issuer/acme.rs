//! ACME issuer for Let's Encrypt certificates
//!
//! Uses instant-acme for the ACME protocol implementation.
//! Supports HTTP-01 challenges for domain validation; one order covers
//! every domain of a certificate record.

use super::{IssuanceRequest, IssuedCertificate, Issuer, IssuerError, parse_cert_expiry};
use async_trait::async_trait;
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier, NewAccount, NewOrder, OrderStatus,
    RetryPolicy,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// ACME configuration
#[derive(Debug, Clone)]
pub struct AcmeConfig {
    /// Use Let's Encrypt staging (for testing)
    pub staging: bool,
    /// Contact email for ACME account
    pub email: Option<String>,
    /// Directory to store ACME account credentials
    pub account_dir: PathBuf,
    /// Timeout for waiting on order state changes
    pub timeout: Duration,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            staging: false,
            email: None,
            account_dir: PathBuf::from("/var/lib/certkeep/acme"),
            timeout: Duration::from_secs(300),
        }
    }
}

impl AcmeConfig {
    /// Get the ACME directory URL
    pub fn directory_url(&self) -> String {
        if self.staging {
            "https://acme-staging-v02.api.letsencrypt.org/directory".to_string()
        } else {
            "https://acme-v02.api.letsencrypt.org/directory".to_string()
        }
    }
}

/// HTTP-01 challenge tokens storage
/// Maps token -> key_authorization
pub type ChallengeTokens = Arc<RwLock<HashMap<String, String>>>;

/// Removes the tokens published for one order when the order ends, however it ends
struct PublishedTokens {
    tokens: ChallengeTokens,
    published: Vec<String>,
}

impl PublishedTokens {
    fn new(tokens: ChallengeTokens) -> Self {
        Self {
            tokens,
            published: Vec::new(),
        }
    }

    fn publish(&mut self, token: String, key_authorization: String) {
        self.tokens.write().insert(token.clone(), key_authorization);
        self.published.push(token);
    }
}

impl Drop for PublishedTokens {
    fn drop(&mut self) {
        let mut tokens = self.tokens.write();
        for token in &self.published {
            tokens.remove(token);
        }
    }
}

/// Issuer backed by an ACME certificate authority
pub struct AcmeIssuer {
    config: AcmeConfig,
    /// HTTP-01 challenge tokens (token -> key_authorization)
    challenge_tokens: ChallengeTokens,
    /// Cached ACME account
    account: RwLock<Option<Account>>,
}

impl AcmeIssuer {
    pub fn new(config: AcmeConfig) -> Self {
        Self {
            config,
            challenge_tokens: Arc::new(RwLock::new(HashMap::new())),
            account: RwLock::new(None),
        }
    }

    /// Get shared challenge tokens for HTTP-01 validation
    pub fn challenge_tokens(&self) -> ChallengeTokens {
        self.challenge_tokens.clone()
    }

    /// Check if using staging environment
    pub fn is_staging(&self) -> bool {
        self.config.staging
    }

    pub fn config(&self) -> &AcmeConfig {
        &self.config
    }

    /// Initialize ACME account (load existing or create new)
    pub async fn init(&self) -> Result<(), IssuerError> {
        std::fs::create_dir_all(&self.config.account_dir)?;

        let credentials_path = self.config.account_dir.join("credentials.json");

        if credentials_path.exists() {
            match self.load_account(&credentials_path).await {
                Ok(account) => {
                    tracing::info!("Loaded existing ACME account");
                    *self.account.write() = Some(account);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Failed to load ACME account, will create new: {}", e);
                }
            }
        }

        let (account, credentials) = self.create_account().await?;

        let credentials_json = serde_json::to_string_pretty(&credentials).map_err(|e| {
            IssuerError::IssuanceFailed(format!("Failed to serialize credentials: {}", e))
        })?;
        std::fs::write(&credentials_path, credentials_json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&credentials_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let account_info = serde_json::json!({
            "created_timestamp": crate::clock::unix_secs(std::time::SystemTime::now()),
            "email": self.config.email,
            "staging": self.config.staging,
            "id": account.id(),
        });
        let account_json = serde_json::to_string_pretty(&account_info).map_err(|e| {
            IssuerError::IssuanceFailed(format!("Failed to serialize account info: {}", e))
        })?;
        std::fs::write(self.config.account_dir.join("account.json"), account_json)?;

        tracing::info!(
            staging = self.config.staging,
            id = %account.id(),
            "Created new ACME account"
        );

        *self.account.write() = Some(account);
        Ok(())
    }

    async fn load_account(&self, path: &Path) -> Result<Account, IssuerError> {
        let contents = std::fs::read_to_string(path)?;
        let credentials: instant_acme::AccountCredentials = serde_json::from_str(&contents)
            .map_err(|e| IssuerError::IssuanceFailed(format!("Invalid credentials: {}", e)))?;

        let account = Account::builder()
            .map_err(IssuerError::Acme)?
            .from_credentials(credentials)
            .await?;

        Ok(account)
    }

    async fn create_account(
        &self,
    ) -> Result<(Account, instant_acme::AccountCredentials), IssuerError> {
        let contact = self.config.email.as_ref().map(|e| format!("mailto:{}", e));

        let contact_refs: Vec<&str> = contact
            .as_ref()
            .map(|c| vec![c.as_str()])
            .unwrap_or_default();

        let new_account = NewAccount {
            contact: &contact_refs,
            terms_of_service_agreed: true,
            only_return_existing: false,
        };

        let (account, credentials) = Account::builder()
            .map_err(IssuerError::Acme)?
            .create(&new_account, self.config.directory_url(), None)
            .await?;

        Ok((account, credentials))
    }

    /// Order one certificate covering every domain, answering HTTP-01 challenges
    pub async fn order_certificate(
        &self,
        domains: &[String],
    ) -> Result<IssuedCertificate, IssuerError> {
        if let Some(bad) = domains
            .iter()
            .find(|d| d.is_empty() || d.contains('/') || d.starts_with('.'))
        {
            return Err(IssuerError::InvalidDomain(bad.clone()));
        }
        if domains.is_empty() {
            return Err(IssuerError::InvalidDomain(String::new()));
        }

        let account = {
            let guard = self.account.read();
            guard.clone().ok_or(IssuerError::NotRegistered)?
        };

        tracing::info!(domains = ?domains, "Requesting certificate via ACME");

        let identifiers: Vec<Identifier> =
            domains.iter().map(|d| Identifier::Dns(d.clone())).collect();
        let new_order = NewOrder::new(&identifiers);

        let mut order = account.new_order(&new_order).await?;
        let mut published = PublishedTokens::new(self.challenge_tokens.clone());

        let mut authorizations = order.authorizations();
        while let Some(auth_result) = authorizations.next().await {
            let mut auth = auth_result?;

            match auth.status {
                AuthorizationStatus::Pending => {
                    let mut challenge = auth
                        .challenge(ChallengeType::Http01)
                        .ok_or(IssuerError::NoHttp01Challenge)?;

                    let key_auth = challenge.key_authorization();
                    let token = challenge.token.clone();
                    published.publish(token.clone(), key_auth.as_str().to_string());

                    tracing::debug!(
                        token = %token,
                        "HTTP-01 challenge ready at /.well-known/acme-challenge/{}",
                        token
                    );

                    challenge.set_ready().await?;
                }
                AuthorizationStatus::Valid => {
                    tracing::debug!("Authorization already valid");
                }
                status => {
                    return Err(IssuerError::ChallengeFailed(format!(
                        "Unexpected authorization status: {:?}",
                        status
                    )));
                }
            }
        }

        let retry_policy = RetryPolicy::new().timeout(self.config.timeout);

        match order.poll_ready(&retry_policy).await? {
            OrderStatus::Ready => {
                tracing::info!(domains = ?domains, "Order ready, finalizing");
            }
            OrderStatus::Invalid => {
                return Err(IssuerError::ChallengeFailed(
                    "Order became invalid".to_string(),
                ));
            }
            status => return Err(IssuerError::OrderNotReady(format!("{:?}", status))),
        }
        drop(published);

        // Generates the CSR internally and hands back the private key PEM
        let private_key_pem = order.finalize().await?;
        let cert_chain = order.poll_certificate(&retry_policy).await?;

        let expires_at = parse_cert_expiry(cert_chain.as_bytes())?;
        let cert_stable_url = order.url().to_string();
        let cert_url = order
            .state()
            .certificate
            .clone()
            .unwrap_or_else(|| cert_stable_url.clone());

        Ok(IssuedCertificate {
            certificate_chain: cert_chain.into_bytes(),
            private_key: private_key_pem.into_bytes(),
            cert_url,
            cert_stable_url,
            expires_at,
        })
    }
}

#[async_trait]
impl Issuer for AcmeIssuer {
    async fn issue(&self, request: &IssuanceRequest) -> Result<IssuedCertificate, IssuerError> {
        self.order_certificate(&request.domains).await
    }

    fn name(&self) -> &'static str {
        "acme"
    }
}
