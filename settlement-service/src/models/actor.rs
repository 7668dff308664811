//! The authenticated caller, as asserted by the trusted frontend.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Admin,
    Bursar,
    Guardian,
}

impl ActorRole {
    pub fn from_header(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(ActorRole::Admin),
            "bursar" | "accountant" => Some(ActorRole::Bursar),
            "guardian" | "parent" => Some(ActorRole::Guardian),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub email: Option<String>,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, email: Option<String>, role: ActorRole) -> Self {
        Self {
            user_id: user_id.into(),
            email,
            role,
        }
    }

    /// School staff allowed to manage fees and correct the ledger.
    pub fn is_staff(&self) -> bool {
        matches!(self.role, ActorRole::Admin | ActorRole::Bursar)
    }

    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }
}
