//! Capability contract of the browser host.
//!
//! Everything the synchronizer needs from the browser goes through these
//! traits: tabs, one-shot wake-ups, session-scoped storage and, when the
//! browser has one, the declarative rule API.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use fg_core::{BlockedSite, RegexRule};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HostError;

pub type TabId = i32;

/// An open browser tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    pub url: String,
}

#[async_trait]
pub trait BrowserHost: Send + Sync {
    async fn query_tabs(&self) -> Result<Vec<Tab>, HostError>;

    /// Schedule a one-shot wake-up. Creating a tag that already exists
    /// replaces it.
    async fn create_wakeup(&self, tag: &str, when_ms: u64) -> Result<(), HostError>;
    async fn cancel_wakeup(&self, tag: &str) -> Result<(), HostError>;

    // Session-scoped storage, cleared when the browser session ends.
    async fn session_get(&self, key: &str) -> Result<Option<Value>, HostError>;
    async fn session_set(&self, key: &str, value: Value) -> Result<(), HostError>;
    async fn session_remove(&self, key: &str) -> Result<(), HostError>;
    async fn session_entries(&self) -> Result<Vec<(String, Value)>, HostError>;

    /// The declarative rule API, if this browser exposes one.
    fn declarative_rules(&self) -> Option<Arc<dyn DeclarativeRuleApi>>;
}

/// Browser-native declarative rule API (dynamic rule set).
#[async_trait]
pub trait DeclarativeRuleApi: Send + Sync {
    async fn dynamic_rules(&self) -> Result<Vec<RegexRule>, HostError>;

    /// Remove `remove_ids` and add `add_rules` in one atomic update.
    async fn update_dynamic_rules(
        &self,
        remove_ids: &[u32],
        add_rules: Vec<RegexRule>,
    ) -> Result<(), HostError>;
}

/// Read access to the persisted site configuration.
#[async_trait]
pub trait SiteSource: Send + Sync {
    async fn load_sites(&self) -> Result<Vec<BlockedSite>, HostError>;
}

/// Wall clock in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
