//! Background issuance worker
//!
//! Receives jobs from [`CertificateService`](super::CertificateService) and
//! runs each on its own task, bounded by a semaphore. The issuer is always
//! called without any record lock held, on a task of its own so a panic is
//! recorded as a failed issuance.

use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};

use super::service::Shared;
use crate::issuer::{IssuanceRequest, Issuer, IssuerError};

/// Issuance worker settings
#[derive(Debug, Clone)]
pub struct IssuanceConfig {
    /// Maximum number of issuances in flight at once
    pub max_concurrent_issuances: usize,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_issuances: 4,
        }
    }
}

/// One queued issuance
#[derive(Debug, Clone)]
pub(super) struct IssuanceJob {
    pub id: String,
    pub domains: Vec<String>,
    pub ticket: u64,
}

pub(super) async fn run(
    shared: Arc<Shared>,
    issuer: Arc<dyn Issuer>,
    mut jobs: mpsc::UnboundedReceiver<IssuanceJob>,
    config: IssuanceConfig,
) {
    let permits = Arc::new(Semaphore::new(config.max_concurrent_issuances.max(1)));
    tracing::debug!(
        issuer = issuer.name(),
        max_concurrent = config.max_concurrent_issuances,
        "Issuance worker started"
    );

    while let Some(job) = jobs.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };

        let shared = shared.clone();
        let issuer = issuer.clone();
        tokio::spawn(async move {
            let _permit = permit;

            if !shared.is_current(&job.id, job.ticket) {
                tracing::debug!(id = %job.id, "Skipping cancelled issuance");
                return;
            }

            tracing::info!(
                id = %job.id,
                issuer = issuer.name(),
                domains = ?job.domains,
                "Starting certificate issuance"
            );
            let request = IssuanceRequest {
                id: job.id.clone(),
                domains: job.domains.clone(),
            };
            let attempt = {
                let issuer = issuer.clone();
                tokio::spawn(async move { issuer.issue(&request).await })
            };
            let result = match attempt.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(
                        id = %job.id,
                        issuer = issuer.name(),
                        "Issuer task failed: {}",
                        e
                    );
                    Err(IssuerError::Aborted(e.to_string()))
                }
            };
            shared.complete(&job, issuer.name(), result);
        });
    }

    tracing::debug!("Issuance worker stopped");
}
