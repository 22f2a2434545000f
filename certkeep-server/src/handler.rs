//! Maps management commands onto the services.
//!
//! Certificates always leave through [`CertificateView`], so key material and
//! chains never reach a client. The signing secret is not exposed at all.

use certkeep_core::{
    CertificateView, Command, ErrorKind, HelloResponse, PROTOCOL_VERSION, Response,
};
use std::sync::Arc;

use crate::certificate::CertificateService;
use crate::config::ConfigService;
use crate::error::ServiceError;

#[derive(Clone)]
pub struct CommandHandler {
    certs: CertificateService,
    config: Arc<ConfigService>,
}

impl CommandHandler {
    pub fn new(certs: CertificateService, config: Arc<ConfigService>) -> Self {
        Self { certs, config }
    }

    pub fn handle(&self, cmd: Command) -> Response {
        match cmd {
            Command::Hello { protocol_version } => {
                if protocol_version != PROTOCOL_VERSION {
                    return Response::error(
                        ErrorKind::Invalid,
                        format!(
                            "Protocol version mismatch: client={} server={}",
                            protocol_version, PROTOCOL_VERSION
                        ),
                    );
                }
                Response::ok(HelloResponse {
                    protocol_version: PROTOCOL_VERSION,
                    server_version: env!("CARGO_PKG_VERSION").to_string(),
                    capabilities: vec![
                        "certificates".to_string(),
                        "super_admin".to_string(),
                    ],
                })
            }
            Command::SaveCert { id, domains } => respond(
                self.certs
                    .save_cert(id.as_deref(), &domains)
                    .map(|cert| cert.view()),
            ),
            Command::GetCert { id } => match self.certs.cert(&id) {
                Ok(Some(cert)) => Response::ok(cert.view()),
                Ok(None) => Response::not_found(format!("certificate not found: {}", id)),
                Err(e) => failure(e),
            },
            Command::ListCerts => respond(self.certs.all_certs().map(|certs| {
                certs
                    .iter()
                    .map(|cert| cert.view())
                    .collect::<Vec<CertificateView>>()
            })),
            Command::DeleteCert { id } => respond(
                self.certs
                    .delete_cert(&id)
                    .map(|()| serde_json::json!({ "deleted": id })),
            ),
            Command::DeleteAllCerts => respond(
                self.certs
                    .delete_all_certs()
                    .map(|()| serde_json::json!({ "deleted_all": true })),
            ),
            Command::SuperAdmin => match self.config.super_admin_user() {
                Ok(Some(user)) => Response::ok(user.view()),
                Ok(None) => Response::not_found("super admin not found"),
                Err(e) => failure(e),
            },
            Command::CreateSuperAdmin { name } => respond(
                self.config
                    .create_super_admin(&name)
                    .map(|user| user.view()),
            ),
            Command::ResetSuperAdmin => respond(
                self.config
                    .reset_super_admin()
                    .map(|()| serde_json::json!({ "reset": true })),
            ),
        }
    }
}

fn respond<T: serde::Serialize>(result: Result<T, ServiceError>) -> Response {
    match result {
        Ok(data) => Response::ok(data),
        Err(e) => failure(e),
    }
}

fn failure(err: ServiceError) -> Response {
    let kind = err.kind();
    if kind == ErrorKind::Internal {
        tracing::error!("Command failed: {}", err);
    }
    Response::error(kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::IssuanceConfig;
    use crate::issuer::{SelfSignedConfig, SelfSignedIssuer};
    use crate::store::SqliteStateStore;

    fn handler() -> CommandHandler {
        let store = Arc::new(SqliteStateStore::open_in_memory().unwrap());
        let certs = CertificateService::new(
            store.clone(),
            Arc::new(SelfSignedIssuer::new(SelfSignedConfig::default())),
            IssuanceConfig::default(),
        );
        CommandHandler::new(certs, Arc::new(ConfigService::new(store)))
    }

    #[tokio::test]
    async fn test_hello_checks_protocol_version() {
        let handler = handler();
        let ok = handler.handle(Command::Hello {
            protocol_version: PROTOCOL_VERSION,
        });
        assert!(ok.is_ok());

        let mismatch = handler.handle(Command::Hello {
            protocol_version: PROTOCOL_VERSION + 1,
        });
        assert_eq!(mismatch.error_kind(), Some(ErrorKind::Invalid));
    }

    #[tokio::test]
    async fn test_save_cert_returns_projection_without_key_material() {
        let handler = handler();
        let resp = handler.handle(Command::SaveCert {
            id: None,
            domains: vec!["example.com".to_string()],
        });

        let data = resp.data().unwrap();
        let view: CertificateView = serde_json::from_value(data.clone()).unwrap();
        assert_eq!(view.common_name, "example.com");
        assert!(!view.issued);
        assert!(data.get("private_key").is_none());
        assert!(data.get("certificate_chain").is_none());
    }

    #[tokio::test]
    async fn test_error_kinds_are_distinct() {
        let handler = handler();

        let invalid = handler.handle(Command::SaveCert {
            id: None,
            domains: vec![],
        });
        assert_eq!(invalid.error_kind(), Some(ErrorKind::Invalid));

        let missing = handler.handle(Command::GetCert {
            id: "missing".to_string(),
        });
        assert_eq!(missing.error_kind(), Some(ErrorKind::NotFound));

        let missing_delete = handler.handle(Command::DeleteCert {
            id: "missing".to_string(),
        });
        assert_eq!(missing_delete.error_kind(), Some(ErrorKind::NotFound));

        let no_admin = handler.handle(Command::SuperAdmin);
        assert_eq!(no_admin.error_kind(), Some(ErrorKind::NotFound));

        assert!(
            handler
                .handle(Command::CreateSuperAdmin {
                    name: "alice".to_string()
                })
                .is_ok()
        );
        let conflict = handler.handle(Command::CreateSuperAdmin {
            name: "bob".to_string(),
        });
        assert_eq!(conflict.error_kind(), Some(ErrorKind::Conflict));
    }
}
