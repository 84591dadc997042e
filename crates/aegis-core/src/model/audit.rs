use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::context::{Actor, RequestContext};
use crate::id::{AuditId, TenantId};

/// Result of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    /// Refused by a security control (isolation, rate limit, reuse).
    Denied,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Denied => "denied",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A security event submitted to the audit pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub tenant_id: Option<TenantId>,
    pub actor: Actor,
    /// Dotted action name, e.g. `token.reused`.
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub outcome: AuditOutcome,
    pub risk_score: Option<u8>,
    #[serde(default)]
    pub compliance_flags: Vec<String>,
    #[serde(default)]
    pub details: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub correlation_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

impl AuditEvent {
    pub fn builder(action: impl Into<String>) -> AuditEventBuilder {
        AuditEventBuilder::new(action)
    }

    /// Freezes the event into a log entry with a fresh id.
    pub fn into_entry(self) -> AuditLogEntry {
        AuditLogEntry {
            id: AuditId::new(),
            tenant_id: self.tenant_id,
            actor: self.actor,
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            outcome: self.outcome,
            risk_score: self.risk_score,
            compliance_flags: self.compliance_flags,
            details: self.details,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            correlation_id: self.correlation_id,
            occurred_at: self.occurred_at,
        }
    }
}

/// An immutable row of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: AuditId,
    pub tenant_id: Option<TenantId>,
    pub actor: Actor,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub outcome: AuditOutcome,
    pub risk_score: Option<u8>,
    pub compliance_flags: Vec<String>,
    pub details: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub correlation_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

/// Builder for [`AuditEvent`].
#[derive(Debug, Clone)]
pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEventBuilder {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            event: AuditEvent {
                tenant_id: None,
                actor: Actor::system(),
                action: action.into(),
                resource_type: String::new(),
                resource_id: None,
                outcome: AuditOutcome::Success,
                risk_score: None,
                compliance_flags: Vec::new(),
                details: Value::Null,
                ip_address: None,
                user_agent: None,
                correlation_id: None,
                occurred_at: OffsetDateTime::now_utc(),
            },
        }
    }

    /// Copies tenant, actor, source address and correlation id from a request.
    pub fn context(mut self, ctx: &RequestContext) -> Self {
        self.event.tenant_id = Some(ctx.tenant_id());
        self.event.actor = ctx.actor().clone();
        self.event.ip_address = ctx.ip_address().map(str::to_owned);
        self.event.user_agent = ctx.user_agent().map(str::to_owned);
        self.event.correlation_id = Some(ctx.correlation_id().to_owned());
        self
    }

    pub fn tenant(mut self, tenant_id: TenantId) -> Self {
        self.event.tenant_id = Some(tenant_id);
        self
    }

    pub fn actor(mut self, actor: Actor) -> Self {
        self.event.actor = actor;
        self
    }

    pub fn resource(mut self, resource_type: impl Into<String>, id: impl ToString) -> Self {
        self.event.resource_type = resource_type.into();
        self.event.resource_id = Some(id.to_string());
        self
    }

    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.event.resource_type = resource_type.into();
        self
    }

    pub fn outcome(mut self, outcome: AuditOutcome) -> Self {
        self.event.outcome = outcome;
        self
    }

    /// Sets the risk score, clamped to 0..=100.
    pub fn risk_score(mut self, score: u8) -> Self {
        self.event.risk_score = Some(score.min(100));
        self
    }

    pub fn compliance_flag(mut self, flag: impl Into<String>) -> Self {
        self.event.compliance_flags.push(flag.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.event.details = details;
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.event.ip_address = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.event.user_agent = Some(ua.into());
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.event.correlation_id = Some(id.into());
        self
    }

    pub fn build(self) -> AuditEvent {
        self.event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Capability;
    use crate::id::{SessionId, UserId};

    #[test]
    fn test_builder_from_context() {
        let tenant = TenantId::new();
        let user = UserId::new();
        let ctx = RequestContext::new(tenant, Actor::user(user))
            .with_capability(Capability::AuditRead)
            .with_ip_address("203.0.113.7")
            .with_correlation_id("corr-9");
        let session = SessionId::new();

        let event = AuditEvent::builder("session.revoked")
            .context(&ctx)
            .resource("session", session)
            .outcome(AuditOutcome::Success)
            .risk_score(250)
            .build();

        assert_eq!(event.tenant_id, Some(tenant));
        assert_eq!(event.actor, Actor::user(user));
        assert_eq!(event.resource_id, Some(session.to_string()));
        assert_eq!(event.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(event.correlation_id.as_deref(), Some("corr-9"));
        assert_eq!(event.risk_score, Some(100));
    }

    #[test]
    fn test_into_entry_keeps_fields() {
        let event = AuditEvent::builder("token.reused")
            .resource_type("refresh_token")
            .outcome(AuditOutcome::Denied)
            .compliance_flag("soc2")
            .build();
        let entry = event.clone().into_entry();
        assert_eq!(entry.action, event.action);
        assert_eq!(entry.outcome, AuditOutcome::Denied);
        assert_eq!(entry.compliance_flags, vec!["soc2".to_string()]);
    }
}
