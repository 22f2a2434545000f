//! Security-critical configuration: the token-signing secret and the super-admin

mod secret;
mod service;
mod user;

pub use secret::{JWT_SECRET_SIZE, JwtSecret};
pub use service::ConfigService;
pub use user::{Role, User};
