//! Background tasks that run beside the HTTP server.

use std::time::Duration;

use aegis_auth::SessionStore;
use aegis_jobs::JobWorker;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Deletes sessions that expired or were revoked more than `grace` ago.
pub fn start_session_purge(
    sessions: SessionStore,
    interval: Duration,
    grace: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            match sessions.purge_expired(grace).await {
                Ok(purged) if purged > 0 => {
                    tracing::info!(purged, "Expired sessions purged");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Session purge failed");
                }
            }
        }
        tracing::debug!("Session purge task stopped");
    })
}

/// Spawns `jobs.workers` queue workers with every configured sender.
pub fn start_job_workers(
    state: &AppState,
    cancel: CancellationToken,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let count = state.config.jobs.workers;
    if count == 0 {
        tracing::warn!("jobs.workers = 0; queued jobs will not be delivered by this instance");
        return Ok(Vec::new());
    }

    let senders = state.job_senders()?;
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "aegis".to_string());
    let handles = (0..count)
        .map(|n| {
            let worker = senders.iter().cloned().fold(
                JobWorker::new(
                    format!("{host}-{}-{n}", std::process::id()),
                    state.jobs.clone(),
                    state.config.jobs.poll_interval,
                ),
                JobWorker::with_sender,
            );
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        })
        .collect();
    tracing::info!(workers = count, "Job workers started");
    Ok(handles)
}

/// Starts every background task of the process.
pub fn start_all(state: &AppState, cancel: CancellationToken) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let mut handles = start_job_workers(state, cancel.clone())?;
    handles.push(start_session_purge(
        state.tokens.sessions().clone(),
        state.config.sessions.purge_interval,
        state.config.sessions.purge_grace,
        cancel,
    ));
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_auth::SessionConfig;
    use aegis_core::{DeviceInfo, FamilyId, Session, SessionId, TenantId, UserId};
    use aegis_db_memory::{InMemoryCacheStore, InMemorySessionStorage};
    use aegis_storage::SessionStorage;
    use std::sync::Arc;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_purge_task_removes_expired_sessions() {
        let storage = Arc::new(InMemorySessionStorage::new());
        let store = SessionStore::new(
            storage.clone(),
            Arc::new(InMemoryCacheStore::new()),
            &SessionConfig::default(),
        );
        let long_ago = OffsetDateTime::now_utc() - time::Duration::days(30);
        let tenant_id = TenantId::new();
        let session = Session {
            id: SessionId::new(),
            tenant_id,
            user_id: UserId::new(),
            family_id: FamilyId::new(),
            access_token_id: Uuid::new_v4(),
            refresh_token_id: Uuid::new_v4(),
            device: DeviceInfo::default(),
            created_at: long_ago,
            last_activity_at: long_ago,
            expires_at: long_ago + time::Duration::hours(1),
            revoked_at: None,
            revoke_reason: None,
            rotation_count: 0,
        };
        store.create(&session).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = start_session_purge(
            store,
            Duration::from_millis(20),
            Duration::from_secs(60),
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(storage.get(session.id).await.unwrap().is_none());
    }
}
