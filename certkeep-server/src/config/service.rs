use parking_lot::Mutex;
use std::sync::Arc;

use super::{JwtSecret, User};
use crate::error::{ServiceError, ServiceResult};
use crate::store::ConfigStore;
use crate::validation;

/// In-process view of the signing secret
enum SecretState {
    Absent,
    Ready(JwtSecret),
}

/// Bootstrap of the signing secret and the single super-admin.
///
/// The first [`jwt_secret`](Self::jwt_secret) call generates and commits a
/// secret while holding the state lock; concurrent first callers wait and
/// observe the committed value. The store's insert-if-absent covers other
/// processes sharing the database.
pub struct ConfigService {
    store: Arc<dyn ConfigStore>,
    secret: Mutex<SecretState>,
}

impl ConfigService {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            secret: Mutex::new(SecretState::Absent),
        }
    }

    /// The signing secret, generated and persisted on first access
    pub fn jwt_secret(&self) -> ServiceResult<JwtSecret> {
        let mut state = self.secret.lock();
        if let SecretState::Ready(secret) = &*state {
            return Ok(secret.clone());
        }

        let secret = match self.store.jwt_secret()? {
            Some(existing) => existing,
            None => {
                let candidate = JwtSecret::generate().map_err(|e| {
                    ServiceError::Internal(format!("failed to generate signing secret: {}", e))
                })?;
                let committed = self.store.init_jwt_secret(&candidate)?;
                if committed == candidate {
                    tracing::info!(bytes = committed.len(), "Generated new signing secret");
                } else {
                    tracing::debug!("Signing secret was committed concurrently; using stored value");
                }
                committed
            }
        };

        *state = SecretState::Ready(secret.clone());
        Ok(secret)
    }

    /// Replace the signing secret, e.g. when importing from another deployment
    pub fn set_jwt_secret(&self, bytes: &[u8]) -> ServiceResult<()> {
        if bytes.is_empty() {
            return Err(ServiceError::Validation(
                "signing secret must not be empty".to_string(),
            ));
        }

        let secret = JwtSecret::from_bytes(bytes);
        let mut state = self.secret.lock();
        self.store.set_jwt_secret(&secret)?;
        *state = SecretState::Ready(secret);
        tracing::info!(bytes = bytes.len(), "Signing secret replaced");
        Ok(())
    }

    /// Name of the current super-admin
    pub fn super_admin(&self) -> ServiceResult<String> {
        self.store
            .super_admin()?
            .map(|user| user.name)
            .ok_or_else(|| ServiceError::not_found("super admin", "current"))
    }

    /// Full identity of the current super-admin, if any
    pub fn super_admin_user(&self) -> ServiceResult<Option<User>> {
        Ok(self.store.super_admin()?)
    }

    pub fn create_super_admin(&self, name: &str) -> ServiceResult<User> {
        validation::validate_admin_name(name)?;

        let user = User::new_super_admin(name);
        if !self.store.create_super_admin(&user)? {
            return Err(ServiceError::Conflict(
                "a super admin already exists".to_string(),
            ));
        }

        tracing::info!(name = %user.name, id = %user.id, "Super admin created");
        Ok(user)
    }

    /// Clear the super-admin so a new one can be created. A no-op when none exists.
    pub fn reset_super_admin(&self) -> ServiceResult<()> {
        if self.store.clear_super_admin()? {
            tracing::warn!("Super admin reset");
        } else {
            tracing::debug!("Super admin reset requested but none exists");
        }
        Ok(())
    }
}
