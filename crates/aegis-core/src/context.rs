//! Request-scoped security context.
//!
//! A [`RequestContext`] is built once per request by the gateway (or once per
//! job by a worker) and passed explicitly to every tenant-scoped operation.
//! There is no ambient "current tenant".

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SecurityError;
use crate::id::{SessionId, TenantId, UserId};

/// Administrative capabilities a caller may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Read or act across tenant boundaries.
    CrossTenantAdmin,
    /// Revoke sessions of other users in the same tenant.
    SessionAdmin,
    /// Query the audit log.
    AuditRead,
    /// Inspect and requeue dead-lettered jobs, reset rate limits.
    Operator,
}

impl Capability {
    /// Parses the capability names carried in access token claims.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cross_tenant_admin" => Some(Self::CrossTenantAdmin),
            "session_admin" => Some(Self::SessionAdmin),
            "audit_read" => Some(Self::AuditRead),
            "operator" => Some(Self::Operator),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrossTenantAdmin => "cross_tenant_admin",
            Self::SessionAdmin => "session_admin",
            Self::AuditRead => "audit_read",
            Self::Operator => "operator",
        }
    }
}

/// Who is performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    User,
    Service,
    System,
}

impl ActorKind {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "service" => Some(Self::Service),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Service => write!(f, "service"),
            Self::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: String,
}

impl Actor {
    #[must_use]
    pub fn user(id: UserId) -> Self {
        Self {
            kind: ActorKind::User,
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Service,
            id: name.into(),
        }
    }

    #[must_use]
    pub fn system() -> Self {
        Self {
            kind: ActorKind::System,
            id: "system".to_string(),
        }
    }
}

/// The tenant visibility a query runs with.
///
/// A cross-tenant scope can only be obtained from
/// [`RequestContext::cross_tenant_scope`], which checks the
/// [`Capability::CrossTenantAdmin`] capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantScope(ScopeInner);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeInner {
    Tenant(TenantId),
    AllTenants,
}

impl TenantScope {
    /// Scope restricted to a single tenant.
    #[must_use]
    pub const fn tenant(tenant_id: TenantId) -> Self {
        Self(ScopeInner::Tenant(tenant_id))
    }

    /// The tenant this scope is restricted to, or `None` for cross-tenant scope.
    #[must_use]
    pub fn tenant_id(&self) -> Option<TenantId> {
        match self.0 {
            ScopeInner::Tenant(id) => Some(id),
            ScopeInner::AllTenants => None,
        }
    }

    #[must_use]
    pub fn is_cross_tenant(&self) -> bool {
        matches!(self.0, ScopeInner::AllTenants)
    }

    /// Returns `true` if a record owned by `tenant_id` is visible in this scope.
    #[must_use]
    pub fn permits(&self, tenant_id: TenantId) -> bool {
        match self.0 {
            ScopeInner::Tenant(id) => id == tenant_id,
            ScopeInner::AllTenants => true,
        }
    }
}

/// Everything the control plane knows about the caller of one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    tenant_id: TenantId,
    actor: Actor,
    session_id: Option<SessionId>,
    capabilities: HashSet<Capability>,
    correlation_id: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl RequestContext {
    /// Creates a context for `actor` acting inside `tenant_id`.
    #[must_use]
    pub fn new(tenant_id: TenantId, actor: Actor) -> Self {
        Self {
            tenant_id,
            actor,
            session_id: None,
            capabilities: HashSet::new(),
            correlation_id: Uuid::new_v4().to_string(),
            ip_address: None,
            user_agent: None,
        }
    }

    /// Context for internal work (workers, maintenance) on behalf of a tenant.
    #[must_use]
    pub fn system(tenant_id: TenantId) -> Self {
        Self::new(tenant_id, Actor::system())
    }

    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    #[must_use]
    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// The user id when the actor is an end user.
    pub fn user_id(&self) -> Option<UserId> {
        match self.actor.kind {
            ActorKind::User => self.actor.id.parse().ok(),
            _ => None,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Scope restricted to the caller's own tenant.
    #[must_use]
    pub fn scope(&self) -> TenantScope {
        TenantScope::tenant(self.tenant_id)
    }

    /// Cross-tenant scope. Requires [`Capability::CrossTenantAdmin`].
    pub fn cross_tenant_scope(&self) -> Result<TenantScope, SecurityError> {
        if self.has_capability(Capability::CrossTenantAdmin) {
            Ok(TenantScope(ScopeInner::AllTenants))
        } else {
            Err(SecurityError::tenant_mismatch(self.tenant_id, self.tenant_id))
        }
    }

    /// Scope for an explicit target tenant: the caller's own tenant always
    /// succeeds, any other tenant requires [`Capability::CrossTenantAdmin`].
    pub fn scope_for(&self, tenant_id: TenantId) -> Result<TenantScope, SecurityError> {
        if tenant_id == self.tenant_id || self.has_capability(Capability::CrossTenantAdmin) {
            Ok(TenantScope::tenant(tenant_id))
        } else {
            Err(SecurityError::tenant_mismatch(self.tenant_id, tenant_id))
        }
    }

    /// Derives a context for an administrator operating inside another tenant.
    ///
    /// Writes made through the returned context are stamped with `tenant_id`
    /// while the actor and correlation id are preserved for the audit trail.
    pub fn acting_as(&self, tenant_id: TenantId) -> Result<RequestContext, SecurityError> {
        if tenant_id == self.tenant_id {
            return Ok(self.clone());
        }
        if !self.has_capability(Capability::CrossTenantAdmin) {
            return Err(SecurityError::tenant_mismatch(self.tenant_id, tenant_id));
        }
        let mut ctx = self.clone();
        ctx.tenant_id = tenant_id;
        Ok(ctx)
    }
}
