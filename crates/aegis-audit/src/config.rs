use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// When disabled, events are logged at debug level and discarded.
    pub enabled: bool,

    /// Flags attached to every entry, e.g. `soc2`, `hipaa`.
    pub compliance_flags: Vec<String>,

    /// Upper bound for the page size of audit queries.
    pub max_query_limit: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            compliance_flags: Vec::new(),
            max_query_limit: 1000,
        }
    }
}
