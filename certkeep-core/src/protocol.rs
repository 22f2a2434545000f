//! certkeep management protocol
//!
//! These types are shared between the server and management clients for
//! communication via the Unix management socket (one JSON value per line).

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;

/// Commands that can be sent to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Query protocol version and supported capabilities.
    Hello { protocol_version: u32 },

    /// Create a certificate record, or update the domains of an existing one.
    SaveCert {
        /// Existing record to update. A fresh ID is generated when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        domains: Vec<String>,
    },

    /// Look up a single certificate
    GetCert { id: String },

    /// List every stored certificate
    ListCerts,

    /// Delete one certificate
    DeleteCert { id: String },

    /// Delete every certificate
    DeleteAllCerts,

    /// Report the current super-admin
    SuperAdmin,

    /// Create the super-admin (fails if one exists)
    CreateSuperAdmin { name: String },

    /// Clear the super-admin so a new one can be created
    ResetSuperAdmin,
}

impl Command {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Hello { .. } => "hello",
            Command::SaveCert { .. } => "save_cert",
            Command::GetCert { .. } => "get_cert",
            Command::ListCerts => "list_certs",
            Command::DeleteCert { .. } => "delete_cert",
            Command::DeleteAllCerts => "delete_all_certs",
            Command::SuperAdmin => "super_admin",
            Command::CreateSuperAdmin { .. } => "create_super_admin",
            Command::ResetSuperAdmin => "reset_super_admin",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResponse {
    pub protocol_version: u32,
    pub server_version: String,
    pub capabilities: Vec<String>,
}

/// Failure class of an error response.
///
/// Lets a transport pick a status (400, 404, 409, 500) without parsing
/// the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Invalid,
    NotFound,
    Conflict,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Invalid => write!(f, "invalid"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Response from the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Command succeeded
    Ok { data: serde_json::Value },

    /// Command failed
    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn ok(data: impl Serialize) -> Self {
        Self::Ok {
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::error(ErrorKind::NotFound, message)
    }

    /// Check if response is Ok
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Get data from Ok response
    pub fn data(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Ok { data } => Some(data),
            Self::Error { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Ok { .. } => None,
            Self::Error { kind, .. } => Some(*kind),
        }
    }

    /// Get error message from Error response
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Ok { .. } => None,
            Self::Error { message, .. } => Some(message),
        }
    }
}

/// Client-visible projection of a certificate record.
///
/// Deliberately has no private key or chain fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateView {
    pub id: String,
    pub common_name: String,
    pub domains: Vec<String>,
    pub cert_url: String,
    pub cert_stable_url: String,
    /// Expiry as unix seconds; `None` until issued.
    pub expires_at: Option<u64>,
    pub issued: bool,
}

/// Client-visible projection of the super-admin identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminView {
    pub name: String,
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_cert_serialization_omits_missing_id() {
        let cmd = Command::SaveCert {
            id: None,
            domains: vec!["example.com".to_string()],
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains(r#""command":"save_cert""#));
        assert!(!json.contains(r#""id""#));
    }

    #[test]
    fn test_parse_save_cert_without_id() {
        let json = r#"{"command": "save_cert", "domains": ["example.com", "www.example.com"]}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        match cmd {
            Command::SaveCert { id, domains } => {
                assert!(id.is_none());
                assert_eq!(domains, vec!["example.com", "www.example.com"]);
            }
            _ => panic!("expected save_cert"),
        }
    }

    #[test]
    fn test_hello_roundtrip() {
        let cmd = Command::Hello {
            protocol_version: PROTOCOL_VERSION,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let parsed: Command = serde_json::from_str(&json).unwrap();
        match parsed {
            Command::Hello { protocol_version } => assert_eq!(protocol_version, PROTOCOL_VERSION),
            _ => panic!("expected hello"),
        }
    }

    #[test]
    fn test_unit_commands_parse() {
        let cmd: Command = serde_json::from_str(r#"{"command": "delete_all_certs"}"#).unwrap();
        assert!(matches!(cmd, Command::DeleteAllCerts));
        let cmd: Command = serde_json::from_str(r#"{"command": "reset_super_admin"}"#).unwrap();
        assert!(matches!(cmd, Command::ResetSuperAdmin));
        assert_eq!(cmd.name(), "reset_super_admin");
    }

    #[test]
    fn test_response_ok() {
        let response = Response::ok(serde_json::json!({"id": "abc"}));
        assert!(response.is_ok());
        assert!(response.data().is_some());
        assert!(response.error_kind().is_none());
    }

    #[test]
    fn test_response_error_carries_kind() {
        let response = Response::not_found("certificate abc not found");
        assert!(!response.is_ok());
        assert_eq!(response.error_kind(), Some(ErrorKind::NotFound));
        assert_eq!(response.error_message(), Some("certificate abc not found"));

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""status":"error""#));
        assert!(json.contains(r#""kind":"not_found""#));
    }

    #[test]
    fn test_certificate_view_has_no_key_material() {
        let view = CertificateView {
            id: "abc".to_string(),
            common_name: "example.com".to_string(),
            domains: vec!["example.com".to_string()],
            cert_url: String::new(),
            cert_stable_url: String::new(),
            expires_at: None,
            issued: false,
        };
        let value = serde_json::to_value(&view).unwrap();
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys.len(), 7);
        assert!(!keys.iter().any(|k| k.contains("key") || k.contains("chain")));
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::Conflict.to_string(), "conflict");
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
    }
}
