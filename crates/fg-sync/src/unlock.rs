//! Temporary unlock grants.
//!
//! Grants live in session-scoped storage under `unlock:<site id>` and each
//! one has a wake-up tagged `relock:<site id>` scheduled at its expiry. There
//! is at most one grant per site; granting again overwrites the stored grant
//! and replaces the wake-up.
//!
//! Expired grants are deleted lazily by the per-site reads (`get`,
//! `is_unlocked`); `list_unlocked_ids` is a read-only scan.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::host::{BrowserHost, Clock};

pub const UNLOCK_KEY_PREFIX: &str = "unlock:";
pub const RELOCK_TAG_PREFIX: &str = "relock:";
pub const DEFAULT_GRANT_MINUTES: u32 = 60;

const MS_PER_MINUTE: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockGrant {
    pub site_id: String,
    /// Milliseconds since the Unix epoch.
    pub expires_at: u64,
}

/// What a relock wake-up did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeUpOutcome {
    /// A grant was removed; the site is blocked again.
    Relocked,
    /// No grant was stored; nothing changed.
    AlreadyLocked,
    /// The stored grant is still live (it was renewed); its wake-up was
    /// re-armed for the new expiry.
    Rearmed { expires_at: u64 },
}

pub fn unlock_key(site_id: &str) -> String {
    format!("{}{}", UNLOCK_KEY_PREFIX, site_id)
}

pub fn relock_tag(site_id: &str) -> String {
    format!("{}{}", RELOCK_TAG_PREFIX, site_id)
}

/// Site id carried by a relock tag; `None` for tags owned by someone else.
pub fn site_id_from_tag(tag: &str) -> Option<&str> {
    tag.strip_prefix(RELOCK_TAG_PREFIX).filter(|id| !id.is_empty())
}

/// Single writer of grant state.
pub struct UnlockStore {
    host: Arc<dyn BrowserHost>,
    clock: Arc<dyn Clock>,
    default_minutes: u32,
}

impl UnlockStore {
    pub fn new(host: Arc<dyn BrowserHost>, clock: Arc<dyn Clock>) -> Self {
        Self {
            host,
            clock,
            default_minutes: DEFAULT_GRANT_MINUTES,
        }
    }

    pub fn with_default_minutes(mut self, minutes: u32) -> Self {
        self.default_minutes = minutes;
        self
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Unlock `site_id` for `minutes` (default 60) and schedule its relock.
    /// Returns the expiry timestamp.
    pub async fn grant(&self, site_id: &str, minutes: Option<u32>) -> Result<u64, SyncError> {
        let minutes = minutes.unwrap_or(self.default_minutes);
        if minutes == 0 {
            return Err(SyncError::InvalidDuration);
        }

        let expires_at = self
            .clock
            .now_ms()
            .saturating_add(u64::from(minutes) * MS_PER_MINUTE);
        let grant = UnlockGrant {
            site_id: site_id.to_string(),
            expires_at,
        };
        let value = serde_json::to_value(&grant)?;

        self.host.session_set(&unlock_key(site_id), value).await?;
        self.host.create_wakeup(&relock_tag(site_id), expires_at).await?;

        log::info!("Unlocked '{}' for {} min (until {})", site_id, minutes, expires_at);
        Ok(expires_at)
    }

    /// Remove the grant and cancel its wake-up. Safe to call for sites
    /// without a grant.
    pub async fn revoke(&self, site_id: &str) -> Result<(), SyncError> {
        self.host.session_remove(&unlock_key(site_id)).await?;
        self.host.cancel_wakeup(&relock_tag(site_id)).await?;
        log::debug!("Revoked grant for '{}'", site_id);
        Ok(())
    }

    /// Live grant for `site_id`. An expired grant is deleted on the way.
    pub async fn get(&self, site_id: &str) -> Result<Option<UnlockGrant>, SyncError> {
        let key = unlock_key(site_id);
        let Some(value) = self.host.session_get(&key).await? else {
            return Ok(None);
        };

        let grant = match serde_json::from_value::<UnlockGrant>(value) {
            Ok(grant) => grant,
            Err(e) => {
                log::warn!("Dropping malformed grant for '{}': {}", site_id, e);
                self.host.session_remove(&key).await?;
                return Ok(None);
            }
        };

        if grant.expires_at > self.clock.now_ms() {
            return Ok(Some(grant));
        }

        log::debug!("Grant for '{}' expired at {}", site_id, grant.expires_at);
        self.host.session_remove(&key).await?;
        Ok(None)
    }

    pub async fn is_unlocked(&self, site_id: &str) -> Result<bool, SyncError> {
        Ok(self.get(site_id).await?.is_some())
    }

    /// Ids of every site with a live grant. Does not delete anything.
    pub async fn list_unlocked_ids(&self) -> Result<HashSet<String>, SyncError> {
        let now = self.clock.now_ms();
        Ok(self
            .stored_grants()
            .await?
            .into_iter()
            .filter(|grant| grant.expires_at > now)
            .map(|grant| grant.site_id)
            .collect())
    }

    /// Relock processing for a fired wake-up. Idempotent.
    pub async fn on_wake_up(&self, site_id: &str) -> Result<WakeUpOutcome, SyncError> {
        let key = unlock_key(site_id);
        let stored = self
            .host
            .session_get(&key)
            .await?
            .and_then(|value| serde_json::from_value::<UnlockGrant>(value).ok());

        match stored {
            Some(grant) if grant.expires_at > self.clock.now_ms() => {
                self.host
                    .create_wakeup(&relock_tag(site_id), grant.expires_at)
                    .await?;
                Ok(WakeUpOutcome::Rearmed {
                    expires_at: grant.expires_at,
                })
            }
            Some(_) => {
                self.revoke(site_id).await?;
                Ok(WakeUpOutcome::Relocked)
            }
            None => {
                // Malformed leftovers go too
                self.revoke(site_id).await?;
                Ok(WakeUpOutcome::AlreadyLocked)
            }
        }
    }

    /// Delete expired grants and re-arm wake-ups for live ones. Returns the
    /// number of live grants.
    pub async fn restore(&self) -> Result<usize, SyncError> {
        let now = self.clock.now_ms();
        let mut live = 0;
        for grant in self.stored_grants().await? {
            if grant.expires_at > now {
                self.host
                    .create_wakeup(&relock_tag(&grant.site_id), grant.expires_at)
                    .await?;
                live += 1;
            } else {
                self.revoke(&grant.site_id).await?;
            }
        }
        Ok(live)
    }

    async fn stored_grants(&self) -> Result<Vec<UnlockGrant>, SyncError> {
        Ok(self
            .host
            .session_entries()
            .await?
            .into_iter()
            .filter(|(key, _)| key.starts_with(UNLOCK_KEY_PREFIX))
            .filter_map(|(_, value)| serde_json::from_value::<UnlockGrant>(value).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ManualClock, MemoryHost};

    const T0: u64 = 1_700_000_000_000;

    fn store() -> (UnlockStore, MemoryHost, Arc<ManualClock>) {
        let host = MemoryHost::new();
        let clock = Arc::new(ManualClock::new(T0));
        let store = UnlockStore::new(Arc::new(host.clone()), clock.clone());
        (store, host, clock)
    }

    #[test]
    fn tags_round_trip_and_reject_foreign_tags() {
        assert_eq!(relock_tag("yt"), "relock:yt");
        assert_eq!(site_id_from_tag("relock:yt"), Some("yt"));
        assert_eq!(site_id_from_tag("relock:"), None);
        assert_eq!(site_id_from_tag("daily-digest"), None);
    }

    #[tokio::test]
    async fn grant_then_expire() {
        let (store, host, clock) = store();
        let expires_at = store.grant("yt", Some(30)).await.unwrap();
        assert_eq!(expires_at, T0 + 30 * 60_000);
        assert!(store.is_unlocked("yt").await.unwrap());
        assert_eq!(host.wakeup("relock:yt"), Some(expires_at));

        clock.advance_minutes(30);
        assert!(!store.is_unlocked("yt").await.unwrap());
        assert_eq!(store.get("yt").await.unwrap(), None);
        assert_eq!(host.session_get("unlock:yt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn default_duration_is_an_hour() {
        let (store, _, _) = store();
        let expires_at = store.grant("yt", None).await.unwrap();
        assert_eq!(expires_at, T0 + 60 * 60_000);
        assert!(matches!(store.grant("yt", Some(0)).await, Err(SyncError::InvalidDuration)));
    }

    #[tokio::test]
    async fn grant_is_stored_as_a_record() {
        let (store, host, _) = store();
        let expires_at = store.grant("yt", Some(5)).await.unwrap();
        let stored = host.session_get("unlock:yt").await.unwrap().unwrap();
        assert_eq!(stored, serde_json::json!({ "siteId": "yt", "expiresAt": expires_at }));

        let encode = SyncError::from(serde_json::from_str::<u64>("x").unwrap_err());
        assert!(encode.to_string().starts_with("Failed to encode unlock grant"));
    }

    #[tokio::test]
    async fn regrant_overwrites_and_reschedules() {
        let (store, host, clock) = store();
        store.grant("yt", Some(10)).await.unwrap();
        clock.advance_minutes(5);
        let second = store.grant("yt", Some(10)).await.unwrap();

        assert_eq!(host.wakeup("relock:yt"), Some(second));
        assert_eq!(store.get("yt").await.unwrap().unwrap().expires_at, second);
        assert_eq!(host.wakeups().len(), 1);
    }

    #[tokio::test]
    async fn revoke_cancels_wakeup() {
        let (store, host, _) = store();
        store.grant("yt", Some(10)).await.unwrap();
        store.revoke("yt").await.unwrap();
        assert!(!store.is_unlocked("yt").await.unwrap());
        assert_eq!(host.wakeup("relock:yt"), None);
        store.revoke("yt").await.unwrap();
    }

    #[tokio::test]
    async fn list_skips_expired_without_pruning() {
        let (store, host, clock) = store();
        store.grant("a", Some(5)).await.unwrap();
        store.grant("b", Some(15)).await.unwrap();
        host.session_set("other-key", serde_json::json!(1)).await.unwrap();
        clock.advance_minutes(10);

        let ids = store.list_unlocked_ids().await.unwrap();
        assert_eq!(ids, HashSet::from(["b".to_string()]));
        assert!(host.session_get("unlock:a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn wake_up_is_idempotent() {
        let (store, _, clock) = store();
        store.grant("yt", Some(1)).await.unwrap();
        clock.advance_minutes(1);

        assert_eq!(store.on_wake_up("yt").await.unwrap(), WakeUpOutcome::Relocked);
        assert_eq!(store.on_wake_up("yt").await.unwrap(), WakeUpOutcome::AlreadyLocked);
    }

    #[tokio::test]
    async fn early_wake_up_rearms() {
        let (store, host, clock) = store();
        store.grant("yt", Some(10)).await.unwrap();
        let renewed = store.grant("yt", Some(20)).await.unwrap();
        host.cancel_wakeup("relock:yt").await.unwrap();
        clock.advance_minutes(10);

        assert_eq!(
            store.on_wake_up("yt").await.unwrap(),
            WakeUpOutcome::Rearmed { expires_at: renewed }
        );
        assert_eq!(host.wakeup("relock:yt"), Some(renewed));
        assert!(store.is_unlocked("yt").await.unwrap());
    }

    #[tokio::test]
    async fn malformed_grants_are_dropped() {
        let (store, host, _) = store();
        host.session_set("unlock:yt", serde_json::json!({"bogus": true})).await.unwrap();
        assert_eq!(store.get("yt").await.unwrap(), None);
        assert_eq!(host.session_get("unlock:yt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn restore_prunes_and_rearms() {
        let (store, host, clock) = store();
        let live = store.grant("live", Some(30)).await.unwrap();
        store.grant("old", Some(5)).await.unwrap();
        // Wake-ups lost across a service worker restart
        host.cancel_wakeup("relock:live").await.unwrap();
        host.cancel_wakeup("relock:old").await.unwrap();
        clock.advance_minutes(10);

        assert_eq!(store.restore().await.unwrap(), 1);
        assert_eq!(host.wakeup("relock:live"), Some(live));
        assert_eq!(host.session_get("unlock:old").await.unwrap(), None);
    }
}
