//! Role model - named permission sets bound to users per service.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Role name the minimum-admin invariant counts.
pub const ADMIN_ROLE: &str = "admin";

/// Role entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        self.name == ADMIN_ROLE
    }
}

/// Request to change a user's role within a service.
#[derive(Debug, Deserialize)]
pub struct UpdateServiceRoleRequest {
    pub role_name: String,
}
