use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::id::TenantId;

/// Commercial tier of a tenant. Drives default rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantTier {
    #[default]
    Community,
    Pro,
    Scale,
    Enterprise,
}

impl TenantTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Community => "community",
            Self::Pro => "pro",
            Self::Scale => "scale",
            Self::Enterprise => "enterprise",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "community" => Some(Self::Community),
            "pro" => Some(Self::Pro),
            "scale" => Some(Self::Scale),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }
}

impl fmt::Display for TenantTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a tenant's data is physically separated from other tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// Shared tables, rows discriminated by `tenant_id`.
    #[default]
    Shared,
    /// One database schema per tenant.
    SchemaPerTenant,
    /// One database per tenant.
    DatabasePerTenant,
}

impl IsolationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::SchemaPerTenant => "schema_per_tenant",
            Self::DatabasePerTenant => "database_per_tenant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "shared" => Some(Self::Shared),
            "schema_per_tenant" => Some(Self::SchemaPerTenant),
            "database_per_tenant" => Some(Self::DatabasePerTenant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    #[default]
    Active,
    Suspended,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

/// Where a tenant's data lives when it is not in the shared tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRouting {
    /// Schema name for [`IsolationMode::SchemaPerTenant`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Connection URL for [`IsolationMode::DatabasePerTenant`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Upper bound on pooled connections to the tenant's database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

/// An organization using the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub tier: TenantTier,
    pub isolation_mode: IsolationMode,
    #[serde(default)]
    pub routing: TenantRouting,
    pub status: TenantStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Tenant {
    /// A new active tenant on shared tables.
    pub fn new(name: impl Into<String>, tier: TenantTier) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: TenantId::new(),
            name: name.into(),
            tier,
            isolation_mode: IsolationMode::Shared,
            routing: TenantRouting::default(),
            status: TenantStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_isolation(mut self, mode: IsolationMode, routing: TenantRouting) -> Self {
        self.isolation_mode = mode;
        self.routing = routing;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_string_forms() {
        for tier in [
            TenantTier::Community,
            TenantTier::Pro,
            TenantTier::Scale,
            TenantTier::Enterprise,
        ] {
            assert_eq!(TenantTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(
            IsolationMode::parse("schema_per_tenant"),
            Some(IsolationMode::SchemaPerTenant)
        );
        assert_eq!(IsolationMode::parse("bogus"), None);
    }

    #[test]
    fn test_new_tenant_defaults() {
        let tenant = Tenant::new("acme", TenantTier::Pro);
        assert!(tenant.is_active());
        assert_eq!(tenant.isolation_mode, IsolationMode::Shared);
        assert!(tenant.routing.schema.is_none());
    }
}
