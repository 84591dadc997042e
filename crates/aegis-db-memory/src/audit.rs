use aegis_core::AuditLogEntry;
use aegis_storage::{AuditQuery, AuditStorage, StorageError, StorageResult};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::outage::OutageSwitch;

/// Append-only audit log held in a `Vec`.
#[derive(Debug, Default)]
pub struct InMemoryAuditStorage {
    entries: RwLock<Vec<AuditLogEntry>>,
    outage: OutageSwitch,
}

impl InMemoryAuditStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outage(&self) -> &OutageSwitch {
        &self.outage
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Snapshot of every entry in append order.
    pub async fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl AuditStorage for InMemoryAuditStorage {
    async fn append(&self, entry: &AuditLogEntry) -> StorageResult<()> {
        self.outage.check("audit store")?;
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.id == entry.id) {
            return Err(StorageError::conflict(format!(
                "audit entry {} already exists",
                entry.id
            )));
        }
        entries.push(entry.clone());
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> StorageResult<Vec<AuditLogEntry>> {
        self.outage.check("audit store")?;
        let entries = self.entries.read().await;
        let mut matched: Vec<AuditLogEntry> = entries
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(matched
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn count(&self, query: &AuditQuery) -> StorageResult<u64> {
        self.outage.check("audit store")?;
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|e| query.matches(e)).count() as u64)
    }
}
