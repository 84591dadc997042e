use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::id::{FamilyId, SessionId, TenantId, UserId};

/// Why a session was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeReason {
    /// The user signed out.
    Logout,
    /// Revoked individually by the user or an administrator.
    Revoked,
    /// A consumed refresh token of the family was replayed.
    TokenReuse,
    /// The family was revoked explicitly.
    FamilyRevoked,
    /// All of the user's sessions were revoked.
    UserRevoked,
}

impl RevokeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logout => "logout",
            Self::Revoked => "revoked",
            Self::TokenReuse => "token_reuse",
            Self::FamilyRevoked => "family_revoked",
            Self::UserRevoked => "user_revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "logout" => Some(Self::Logout),
            "revoked" => Some(Self::Revoked),
            "token_reuse" => Some(Self::TokenReuse),
            "family_revoked" => Some(Self::FamilyRevoked),
            "user_revoked" => Some(Self::UserRevoked),
            _ => None,
        }
    }
}

/// Client device details captured at sign-in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// One authenticated device.
///
/// `refresh_token_id` is the `jti` of the only refresh token of the family
/// that may still be exchanged. Every successful refresh replaces it, so any
/// other `jti` presented for this family has already been consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub family_id: FamilyId,
    pub access_token_id: Uuid,
    pub refresh_token_id: Uuid,
    #[serde(flatten)]
    pub device: DeviceInfo,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub revoked_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub revoke_reason: Option<RevokeReason>,
    pub rotation_count: i32,
}

impl Session {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        !self.is_revoked() && !self.is_expired_at(now)
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(OffsetDateTime::now_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn session(expires_in: Duration) -> Session {
        let now = OffsetDateTime::now_utc();
        Session {
            id: SessionId::new(),
            tenant_id: TenantId::new(),
            user_id: UserId::new(),
            family_id: FamilyId::new(),
            access_token_id: Uuid::new_v4(),
            refresh_token_id: Uuid::new_v4(),
            device: DeviceInfo::default(),
            created_at: now,
            last_activity_at: now,
            expires_at: now + expires_in,
            revoked_at: None,
            revoke_reason: None,
            rotation_count: 0,
        }
    }

    #[test]
    fn test_session_activity() {
        let live = session(Duration::hours(1));
        assert!(live.is_active());

        let expired = session(Duration::seconds(-1));
        assert!(!expired.is_active());
        assert!(expired.is_expired_at(OffsetDateTime::now_utc()));

        let mut revoked = session(Duration::hours(1));
        revoked.revoked_at = Some(OffsetDateTime::now_utc());
        revoked.revoke_reason = Some(RevokeReason::Logout);
        assert!(!revoked.is_active());
    }

    #[test]
    fn test_session_json_shape() {
        let mut s = session(Duration::hours(1));
        s.device.ip_address = Some("10.0.0.1".into());
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["ipAddress"], "10.0.0.1");
        assert!(json.get("revokedAt").is_some());
        let back: Session = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, s.id);
    }

    #[test]
    fn test_revoke_reason_strings() {
        assert_eq!(RevokeReason::parse("token_reuse"), Some(RevokeReason::TokenReuse));
        assert_eq!(RevokeReason::UserRevoked.as_str(), "user_revoked");
    }
}
