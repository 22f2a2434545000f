use certkeep_core::AdminView;
use std::time::SystemTime;

use crate::clock;

/// Length of generated user IDs
const USER_ID_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    SuperAdmin,
}

/// An administrative identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub created_at: SystemTime,
}

impl User {
    pub fn new_super_admin(name: impl Into<String>) -> Self {
        Self {
            id: nanoid::nanoid!(USER_ID_LEN),
            name: name.into(),
            role: Role::SuperAdmin,
            created_at: clock::now(),
        }
    }

    pub fn view(&self) -> AdminView {
        AdminView {
            name: self.name.clone(),
            created_at: clock::unix_secs(self.created_at),
        }
    }
}
