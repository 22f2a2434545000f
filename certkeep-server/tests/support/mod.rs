#![allow(dead_code)]

use async_trait::async_trait;
use certkeep_server::issuer::{
    IssuanceRequest, IssuedCertificate, Issuer, IssuerError, SelfSignedConfig, SelfSignedIssuer,
};
use certkeep_server::{CertificateService, IssuanceConfig, SqliteStateStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::{Notify, mpsc};

/// Issuer that blocks every issuance until the test releases it.
///
/// Each call reports its request on `started` once it is parked, and
/// reports again on `finished` when it returns. The issued `cert_url` names
/// the domains it was issued for.
pub struct GatedIssuer {
    inner: SelfSignedIssuer,
    release: Notify,
    started: mpsc::UnboundedSender<IssuanceRequest>,
    finished: mpsc::UnboundedSender<IssuanceRequest>,
}

pub struct GateEvents {
    pub started: mpsc::UnboundedReceiver<IssuanceRequest>,
    pub finished: mpsc::UnboundedReceiver<IssuanceRequest>,
}

impl GatedIssuer {
    pub fn new() -> (Arc<Self>, GateEvents) {
        let (started_tx, started) = mpsc::unbounded_channel();
        let (finished_tx, finished) = mpsc::unbounded_channel();
        let issuer = Arc::new(Self {
            inner: SelfSignedIssuer::new(SelfSignedConfig::default()),
            release: Notify::new(),
            started: started_tx,
            finished: finished_tx,
        });
        (issuer, GateEvents { started, finished })
    }

    /// Let every parked issuance proceed
    pub fn release_all(&self) {
        self.release.notify_waiters();
    }
}

#[async_trait]
impl Issuer for GatedIssuer {
    async fn issue(&self, request: &IssuanceRequest) -> Result<IssuedCertificate, IssuerError> {
        let release = self.release.notified();
        tokio::pin!(release);
        release.as_mut().enable();
        let _ = self.started.send(request.clone());
        release.await;

        let mut issued = self.inner.generate(request)?;
        issued.cert_url = format!("gated:{}", request.domains.join(","));
        let _ = self.finished.send(request.clone());
        Ok(issued)
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

pub async fn recv_event(
    rx: &mut mpsc::UnboundedReceiver<IssuanceRequest>,
) -> IssuanceRequest {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for issuer event")
        .expect("issuer event channel closed")
}

/// Poll `check` until it returns true or the deadline passes
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub struct Harness {
    pub _temp: TempDir,
    pub store: Arc<SqliteStateStore>,
    pub service: CertificateService,
}

pub fn harness(issuer: Arc<dyn Issuer>, max_concurrent_issuances: usize) -> Harness {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(SqliteStateStore::open(temp.path().join("certkeep.db")).unwrap());
    let service = CertificateService::new(
        store.clone(),
        issuer,
        IssuanceConfig {
            max_concurrent_issuances,
        },
    );
    Harness {
        _temp: temp,
        store,
        service,
    }
}

pub fn domains(names: &[&str]) -> Vec<String> {
    names.iter().map(|d| d.to_string()).collect()
}
