//! Registry of remote callers

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};
use upscaler_inference::{UpscaleError, UpscaleResult};

/// One known caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionRecord {
    pub caller_id: String,
    pub endpoint_url: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Callers keyed by id, kept in first-registration order
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    records: Mutex<Vec<ConnectionRecord>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a caller or refreshes its endpoint and last-seen time in place
    pub fn register_or_update(
        &self,
        caller_id: &str,
        endpoint_url: &str,
    ) -> UpscaleResult<ConnectionRecord> {
        let caller_id = caller_id.trim();
        if caller_id.is_empty() {
            return Err(UpscaleError::InvalidArgument("caller id cannot be empty".into()));
        }

        let now = Utc::now();
        let mut records = self.records.lock();

        if let Some(existing) = records.iter_mut().find(|r| r.caller_id == caller_id) {
            existing.endpoint_url = endpoint_url.to_string();
            existing.last_seen = now;
            debug!(caller_id, endpoint_url, "connection refreshed");
            return Ok(existing.clone());
        }

        let record = ConnectionRecord {
            caller_id: caller_id.to_string(),
            endpoint_url: endpoint_url.to_string(),
            registered_at: now,
            last_seen: now,
        };
        records.push(record.clone());
        info!(caller_id, endpoint_url, "connection registered");
        Ok(record)
    }

    pub fn list(&self) -> Vec<ConnectionRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_keeps_position() {
        let registry = ConnectionRegistry::new();
        registry.register_or_update("jellyfin-a", "http://a:8096").unwrap();
        let first = registry.register_or_update("jellyfin-b", "http://b:8096").unwrap();
        registry.register_or_update("jellyfin-c", "http://c:8096").unwrap();

        let updated = registry
            .register_or_update("jellyfin-b", "http://b2:8096")
            .unwrap();

        assert_eq!(updated.registered_at, first.registered_at);
        assert!(updated.last_seen >= first.last_seen);

        let ids: Vec<_> = registry.list().into_iter().map(|r| r.caller_id).collect();
        assert_eq!(ids, ["jellyfin-a", "jellyfin-b", "jellyfin-c"]);
        assert_eq!(registry.list()[1].endpoint_url, "http://b2:8096");
    }

    #[test]
    fn test_empty_caller_rejected() {
        let registry = ConnectionRegistry::new();
        let err = registry.register_or_update("  ", "http://x").unwrap_err();
        assert!(matches!(err, UpscaleError::InvalidArgument(_)));
        assert!(registry.is_empty());
    }
}
