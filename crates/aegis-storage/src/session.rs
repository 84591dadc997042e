//! Durable session storage.

use aegis_core::{FamilyId, RevokeReason, Session, SessionId, TenantId, UserId};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::StorageResult;

/// Parameters of one refresh-token rotation.
#[derive(Debug, Clone)]
pub struct RotateRequest {
    pub session_id: SessionId,
    /// `jti` of the refresh token the client presented.
    pub presented_refresh_id: Uuid,
    pub new_refresh_id: Uuid,
    pub new_access_id: Uuid,
    pub now: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// What happened when a rotation was attempted.
#[derive(Debug, Clone, PartialEq)]
pub enum RotateOutcome {
    /// The presented token was current; the session now carries the new ids.
    Rotated(Session),
    /// The session is live but the presented token was already consumed.
    Reused(Session),
    /// The session was revoked before this attempt.
    Revoked(Session),
    /// The session's expiry has passed.
    Expired(Session),
    NotFound,
}

/// Storage for session records, the source of truth for token validity.
///
/// # Atomicity
///
/// [`rotate`](Self::rotate) is the only way a session's token identifiers
/// change. It must compare the stored `refresh_token_id` with the presented
/// one and swap in the new identifiers as one conditional update, so that of
/// two concurrent rotations with the same token exactly one observes
/// [`RotateOutcome::Rotated`] and the other [`RotateOutcome::Reused`].
///
/// Revocation is idempotent: revoking an already revoked session leaves the
/// original `revoked_at` and reason untouched.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Stores a new session.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the id already exists, `Unavailable` if the
    /// store cannot be reached.
    async fn create(&self, session: &Session) -> StorageResult<()>;

    /// Loads a session by id regardless of its state.
    async fn get(&self, id: SessionId) -> StorageResult<Option<Session>>;

    /// Sessions of a user that are neither revoked nor expired at `now`,
    /// most recently active first.
    async fn list_active_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        now: OffsetDateTime,
    ) -> StorageResult<Vec<Session>>;

    /// Atomically checks and rotates the session's refresh token.
    async fn rotate(&self, request: &RotateRequest) -> StorageResult<RotateOutcome>;

    /// Pushes out the expiry and touches last-activity of a live session
    /// without changing its tokens. Returns `None` if the session is missing,
    /// revoked or already expired.
    async fn extend(
        &self,
        id: SessionId,
        expires_at: OffsetDateTime,
        last_activity_at: OffsetDateTime,
    ) -> StorageResult<Option<Session>>;

    /// Revokes one session. Returns the session's current record, or `None`
    /// if it does not exist.
    async fn revoke(
        &self,
        id: SessionId,
        reason: RevokeReason,
        at: OffsetDateTime,
    ) -> StorageResult<Option<Session>>;

    /// Revokes every session of a refresh token family within a tenant in
    /// one statement. Returns the sessions that were live and are now revoked.
    async fn revoke_family(
        &self,
        tenant_id: TenantId,
        family_id: FamilyId,
        reason: RevokeReason,
        at: OffsetDateTime,
    ) -> StorageResult<Vec<Session>>;

    /// Revokes every live session of a user. Returns the newly revoked sessions.
    async fn revoke_all_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        reason: RevokeReason,
        at: OffsetDateTime,
    ) -> StorageResult<Vec<Session>>;

    /// Physically removes sessions that expired, or were revoked, before `cutoff`.
    async fn purge_expired(&self, cutoff: OffsetDateTime) -> StorageResult<u64>;
}
