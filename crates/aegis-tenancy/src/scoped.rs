use aegis_core::TenantId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// An entity type owned by exactly one tenant.
///
/// Implemented once per type; [`crate::TenantRepository`] uses it to stamp
/// and check tenant ownership on every read and write.
pub trait TenantScoped: Serialize + DeserializeOwned + Send + Sync {
    /// Collection the entity is stored in.
    const COLLECTION: &'static str;

    fn id(&self) -> Uuid;

    /// `None` until the entity has been written through a repository.
    fn tenant_id(&self) -> Option<TenantId>;

    fn set_tenant_id(&mut self, tenant_id: TenantId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Deleted,
}

/// A person who signs in to a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    pub email: String,
    /// Opaque hash produced by the authentication flow.
    pub password_hash: String,
    #[serde(default)]
    pub failed_login_count: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub locked_until: Option<OffsetDateTime>,
    #[serde(default)]
    pub status: UserStatus,
}

impl User {
    pub fn new(email: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: None,
            email: email.into(),
            password_hash: password_hash.into(),
            failed_login_count: 0,
            locked_until: None,
            status: UserStatus::Active,
        }
    }

    pub fn is_locked_at(&self, now: OffsetDateTime) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

impl TenantScoped for User {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> Uuid {
        self.id
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn set_tenant_id(&mut self, tenant_id: TenantId) {
        self.tenant_id = Some(tenant_id);
    }
}
