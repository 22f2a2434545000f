//! Certificate lifecycle service
//!
//! Validates and persists records, then hands issuance to the background
//! worker. Writes for one ID are serialized through a per-record lock, and
//! every queued issuance holds a ticket that delete or a newer save revokes.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::Certificate;
use super::worker::{self, IssuanceConfig, IssuanceJob};
use crate::error::{ServiceError, ServiceResult};
use crate::issuer::{IssuedCertificate, Issuer, IssuerError};
use crate::store::CertificateStore;
use crate::validation;

/// Length of generated certificate IDs
const CERT_ID_LEN: usize = 21;

/// State shared between the service handles and the issuance worker
pub(super) struct Shared {
    store: Arc<dyn CertificateStore>,
    /// Per-ID write locks, pruned once nobody holds them
    record_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Held shared by per-ID operations, exclusively by delete-all
    reset_lock: RwLock<()>,
    /// Ticket of the issuance whose result may still be applied, per ID
    pending: DashMap<String, u64>,
    next_ticket: AtomicU64,
}

impl Shared {
    fn with_record_lock<T>(&self, id: &str, f: impl FnOnce() -> T) -> T {
        let _reset = self.reset_lock.read();
        let lock = self
            .record_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock();
            f()
        };

        drop(lock);
        self.record_locks
            .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn issue_ticket(&self, id: &str) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        self.pending.insert(id.to_string(), ticket);
        ticket
    }

    /// Whether `ticket` is still the one allowed to complete for `id`
    pub(super) fn is_current(&self, id: &str, ticket: u64) -> bool {
        self.pending.get(id).is_some_and(|t| *t == ticket)
    }

    /// Apply an issuance outcome unless the record was deleted or superseded
    pub(super) fn complete(
        &self,
        job: &IssuanceJob,
        issuer: &str,
        result: Result<IssuedCertificate, IssuerError>,
    ) {
        self.with_record_lock(&job.id, || {
            if !self.is_current(&job.id, job.ticket) {
                tracing::debug!(
                    id = %job.id,
                    ticket = job.ticket,
                    "Discarding issuance result for deleted or superseded certificate"
                );
                return;
            }
            self.apply_outcome(job, issuer, result);
            // Released only after the outcome is stored
            self.pending
                .remove_if(&job.id, |_, ticket| *ticket == job.ticket);
        });
    }

    fn apply_outcome(
        &self,
        job: &IssuanceJob,
        issuer: &str,
        result: Result<IssuedCertificate, IssuerError>,
    ) {
        let mut cert = match self.store.get(&job.id) {
            Ok(Some(cert)) => cert,
            Ok(None) => {
                tracing::debug!(id = %job.id, "Certificate removed before issuance completed");
                return;
            }
            Err(e) => {
                tracing::error!(id = %job.id, "Failed to load certificate after issuance: {}", e);
                return;
            }
        };

        match result.and_then(IssuedCertificate::ensure_complete) {
            Ok(issued) => {
                cert.apply_issuance(&issued);
                match self.store.update(&cert) {
                    Ok(true) => tracing::info!(
                        id = %job.id,
                        issuer,
                        domains = ?cert.domains,
                        expires_in_days = cert.days_until_expiry(),
                        "Certificate issued"
                    ),
                    Ok(false) => tracing::debug!(
                        id = %job.id,
                        "Certificate removed before issuance result was stored"
                    ),
                    Err(e) => tracing::error!(
                        id = %job.id,
                        "Failed to store issued certificate: {}",
                        e
                    ),
                }
            }
            Err(err) => {
                tracing::warn!(
                    id = %job.id,
                    issuer,
                    domains = ?job.domains,
                    "Certificate issuance failed: {}",
                    err
                );
                cert.record_failure(err.to_string());
                if let Err(e) = self.store.update(&cert) {
                    tracing::error!(id = %job.id, "Failed to record issuance failure: {}", e);
                }
            }
        }
    }
}

/// Orchestrates the certificate store and the issuer.
///
/// Cloning is cheap; clones share the store, locks and worker. The worker
/// stops once every clone is dropped.
#[derive(Clone)]
pub struct CertificateService {
    shared: Arc<Shared>,
    jobs: mpsc::UnboundedSender<IssuanceJob>,
}

impl CertificateService {
    /// Create the service and spawn its issuance worker on the current Tokio runtime
    pub fn new(
        store: Arc<dyn CertificateStore>,
        issuer: Arc<dyn Issuer>,
        config: IssuanceConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            store,
            record_locks: DashMap::new(),
            reset_lock: RwLock::new(()),
            pending: DashMap::new(),
            next_ticket: AtomicU64::new(0),
        });
        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker::run(shared.clone(), issuer, rx, config));

        Self { shared, jobs }
    }

    /// Create or update a certificate record and queue issuance when needed.
    ///
    /// Without an ID (or with an unknown one) a new record is created. An
    /// existing record keeps its ID and issued artifacts; its domains and
    /// common name are replaced. Issuance is queued when the domain set
    /// changed, or when the record is not yet issued and nothing is in flight
    /// for it.
    pub fn save_cert(&self, id: Option<&str>, domains: &[String]) -> ServiceResult<Certificate> {
        let domains = validation::normalize_domains(domains)?;
        let id = match id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => nanoid::nanoid!(CERT_ID_LEN),
        };

        self.shared.with_record_lock(&id, || -> ServiceResult<Certificate> {
            let (cert, needs_issuance) = match self.shared.store.get(&id)? {
                Some(mut existing) => {
                    let changed = existing.domains != domains;
                    if changed {
                        existing.set_domains(domains);
                    }
                    // An unchanged, unissued record already in flight keeps its order
                    let in_flight = self.shared.pending.contains_key(&id);
                    let needs_issuance = changed || (!existing.issued && !in_flight);
                    (existing, needs_issuance)
                }
                None => (Certificate::new(id.clone(), domains), true),
            };

            self.shared.store.save(&cert)?;
            tracing::info!(id = %cert.id, domains = ?cert.domains, "Certificate saved");

            if needs_issuance {
                self.enqueue(&cert);
            }
            Ok(cert)
        })
    }

    fn enqueue(&self, cert: &Certificate) {
        let ticket = self.shared.issue_ticket(&cert.id);
        let job = IssuanceJob {
            id: cert.id.clone(),
            domains: cert.domains.clone(),
            ticket,
        };

        if self.jobs.send(job).is_err() {
            self.shared
                .pending
                .remove_if(&cert.id, |_, current| *current == ticket);
            tracing::error!(id = %cert.id, "Issuance worker is not running; issuance not queued");
            return;
        }
        tracing::debug!(id = %cert.id, ticket, "Issuance queued");
    }

    /// Look up a record. `Ok(None)` means no record has this ID.
    pub fn cert(&self, id: &str) -> ServiceResult<Option<Certificate>> {
        Ok(self.shared.store.get(id)?)
    }

    /// Every record, in insertion order
    pub fn all_certs(&self) -> ServiceResult<Vec<Certificate>> {
        Ok(self.shared.store.list()?)
    }

    /// Remove a record. A pending issuance for it is cancelled.
    pub fn delete_cert(&self, id: &str) -> ServiceResult<()> {
        self.shared.with_record_lock(id, || -> ServiceResult<()> {
            let removed = self.shared.store.delete(id)?;
            self.shared.pending.remove(id);
            if !removed {
                return Err(ServiceError::not_found("certificate", id));
            }
            tracing::info!(id = %id, "Certificate deleted");
            Ok(())
        })
    }

    /// Remove every record atomically and cancel all pending issuances
    pub fn delete_all_certs(&self) -> ServiceResult<()> {
        let _reset = self.shared.reset_lock.write();
        let removed = self.shared.store.delete_all()?;
        let cancelled = self.shared.pending.len();
        self.shared.pending.clear();
        tracing::info!(removed, cancelled, "All certificates deleted");
        Ok(())
    }

    /// Number of issuances whose result will still be applied
    pub fn pending_issuances(&self) -> usize {
        self.shared.pending.len()
    }
}
