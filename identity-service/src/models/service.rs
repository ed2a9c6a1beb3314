//! Service model - the tenant entity users hold roles on.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Service entity.
#[derive(Debug, Clone, FromRow)]
pub struct Service {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Service {
    /// Create a new service.
    pub fn new(external_id: String, name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id,
            name,
            created_at: Utc::now(),
        }
    }
}

/// Binding of a user to a service with a role.
#[derive(Debug, Clone, FromRow)]
pub struct ServiceRole {
    pub service_id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
}
