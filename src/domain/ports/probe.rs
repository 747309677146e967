use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::errors::DbResult;

/// What the health loop probes and, when needed, reconnects.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Issue a lightweight request and return its round-trip time.
    async fn probe(&self) -> DbResult<Duration>;

    /// Whether the backend currently has at least one usable handle.
    fn is_connected(&self) -> bool;

    /// Drop existing handles and establish fresh ones.
    async fn reconnect(&self) -> DbResult<()>;

    /// Extra fields attached to health results.
    fn details(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }
}
