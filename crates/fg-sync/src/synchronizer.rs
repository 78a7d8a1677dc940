//! Blocking rule synchronizer.
//!
//! `sync()` is fully declarative: the desired rule set is recomputed from the
//! configured sites and the live grants, and the backend's whole rule set is
//! replaced in one update. Running it again with no state change installs
//! the same rules, so any later sync reconciles an earlier failed or racing
//! one.

use std::sync::Arc;

use fg_core::url::is_internal_url;
use fg_core::{to_provider_rules, ProviderRule, SiteMatcher};

use crate::backend::{select_backend, BackendKind, BlockingBackend};
use crate::error::SyncError;
use crate::host::{BrowserHost, Clock, SiteSource, TabId};
use crate::unlock::{site_id_from_tag, UnlockStore, WakeUpOutcome, DEFAULT_GRANT_MINUTES};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Grant length when the caller does not give one.
    pub default_grant_minutes: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_grant_minutes: DEFAULT_GRANT_MINUTES,
        }
    }
}

/// Summary of one `sync()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub backend: BackendKind,
    pub removed: usize,
    pub installed: usize,
    pub skipped_sites: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantReceipt {
    pub site_id: String,
    pub expires_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelockOutcome {
    pub site_id: String,
    pub tabs_to_redirect: Vec<TabId>,
}

pub struct BlockingSynchronizer {
    host: Arc<dyn BrowserHost>,
    sites: Arc<dyn SiteSource>,
    unlocks: UnlockStore,
    backend: Arc<dyn BlockingBackend>,
}

impl BlockingSynchronizer {
    /// Pick a backend for the host and build the synchronizer around it.
    pub async fn start(
        host: Arc<dyn BrowserHost>,
        sites: Arc<dyn SiteSource>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let backend = select_backend(host.as_ref()).await;
        Self::with_backend(host, sites, clock, backend, config)
    }

    pub fn with_backend(
        host: Arc<dyn BrowserHost>,
        sites: Arc<dyn SiteSource>,
        clock: Arc<dyn Clock>,
        backend: Arc<dyn BlockingBackend>,
        config: SyncConfig,
    ) -> Self {
        let unlocks = UnlockStore::new(host.clone(), clock)
            .with_default_minutes(config.default_grant_minutes);
        Self {
            host,
            sites,
            unlocks,
            backend,
        }
    }

    pub fn backend(&self) -> &Arc<dyn BlockingBackend> {
        &self.backend
    }

    pub fn unlocks(&self) -> &UnlockStore {
        &self.unlocks
    }

    /// Startup reconciliation: drop expired grants, re-arm wake-ups for the
    /// live ones, then sync.
    pub async fn initialize(&self) -> Result<SyncReport, SyncError> {
        let live = self.unlocks.restore().await?;
        log::debug!("Restored {} live grants", live);
        self.sync().await
    }

    /// Recompute and install the complete rule set.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let sites = self.sites.load_sites().await?;
        let unlocked = self.unlocks.list_unlocked_ids().await?;
        let format = self.backend.format();

        let mut rules: Vec<ProviderRule> = Vec::new();
        let mut skipped_sites = 0;
        // Indices come from the full list so every site keeps its id range
        for (site_index, site) in sites.iter().enumerate() {
            if !site.enabled || unlocked.contains(&site.id) {
                skipped_sites += 1;
                continue;
            }
            rules.extend(to_provider_rules(site, site_index, format)?);
        }

        let remove_ids: Vec<u32> = self
            .backend
            .installed_rules()
            .await?
            .iter()
            .map(ProviderRule::id)
            .collect();

        let report = SyncReport {
            backend: self.backend.kind(),
            removed: remove_ids.len(),
            installed: rules.len(),
            skipped_sites,
        };

        self.backend.replace_rules(&remove_ids, rules).await?;

        log::info!(
            "Synced {} rules via {} backend ({} removed, {} sites skipped)",
            report.installed,
            report.backend,
            report.removed,
            report.skipped_sites
        );
        Ok(report)
    }

    /// Unlock `site_id` and make it take effect immediately. The relock
    /// wake-up is scheduled by the grant.
    pub async fn grant_access(
        &self,
        site_id: &str,
        minutes: Option<u32>,
    ) -> Result<GrantReceipt, SyncError> {
        let expires_at = self.unlocks.grant(site_id, minutes).await?;
        self.sync().await?;
        Ok(GrantReceipt {
            site_id: site_id.to_string(),
            expires_at,
        })
    }

    /// Revoke a grant and return the tabs now sitting on the blocked site.
    pub async fn revoke_access(&self, site_id: &str) -> Result<Vec<TabId>, SyncError> {
        self.unlocks.revoke(site_id).await?;
        self.sync().await?;
        self.tabs_on_site(site_id).await
    }

    /// Relock processing for a fired wake-up. Returns `None` for tags that do
    /// not belong to the relock facility.
    pub async fn handle_relock_wake_up(
        &self,
        tag: &str,
    ) -> Result<Option<RelockOutcome>, SyncError> {
        let Some(site_id) = site_id_from_tag(tag) else {
            log::debug!("Ignoring foreign wake-up '{}'", tag);
            return Ok(None);
        };

        let tabs_to_redirect = match self.unlocks.on_wake_up(site_id).await? {
            WakeUpOutcome::Relocked => {
                self.sync().await?;
                let tabs = self.tabs_on_site(site_id).await?;
                log::info!("Relocked '{}', {} tabs to redirect", site_id, tabs.len());
                tabs
            }
            WakeUpOutcome::AlreadyLocked | WakeUpOutcome::Rearmed { .. } => Vec::new(),
        };

        Ok(Some(RelockOutcome {
            site_id: site_id.to_string(),
            tabs_to_redirect,
        }))
    }

    /// Id of the first enabled, currently locked site that blocks `url`.
    pub async fn blocking_site_for(&self, url: &str) -> Result<Option<String>, SyncError> {
        if is_internal_url(url) {
            return Ok(None);
        }
        let sites = self.sites.load_sites().await?;
        let unlocked = self.unlocks.list_unlocked_ids().await?;
        Ok(sites
            .iter()
            .filter(|site| site.enabled && !unlocked.contains(&site.id))
            .find(|site| SiteMatcher::compile(site).matches(url))
            .map(|site| site.id.clone()))
    }

    /// Open, non-internal tabs whose URL the site blocks. Disabled and
    /// unknown sites block nothing.
    async fn tabs_on_site(&self, site_id: &str) -> Result<Vec<TabId>, SyncError> {
        let sites = self.sites.load_sites().await?;
        let Some(site) = sites.iter().find(|s| s.id == site_id && s.enabled) else {
            return Ok(Vec::new());
        };
        let matcher = SiteMatcher::compile(site);

        Ok(self
            .host
            .query_tabs()
            .await?
            .into_iter()
            .filter(|tab| !is_internal_url(&tab.url) && matcher.matches(&tab.url))
            .map(|tab| tab.id)
            .collect())
    }
}
