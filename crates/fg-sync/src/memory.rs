//! In-memory browser host.
//!
//! Backs the CLI's dry runs and the tests. With `with_declarative_rules` it
//! also exposes a declarative rule API; otherwise the capability check falls
//! back to interception.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use fg_core::{BlockedSite, RegexRule};
use serde_json::Value;

use crate::error::HostError;
use crate::host::{BrowserHost, Clock, DeclarativeRuleApi, SiteSource, Tab};

#[derive(Default)]
struct HostState {
    sites: Vec<BlockedSite>,
    tabs: Vec<Tab>,
    wakeups: BTreeMap<String, u64>,
    session: HashMap<String, Value>,
}

#[derive(Default)]
struct RuleState {
    rules: BTreeMap<u32, RegexRule>,
    updates: usize,
    broken: bool,
    fail_updates: bool,
}

#[derive(Default, Clone)]
pub struct MemoryHost {
    state: Arc<Mutex<HostState>>,
    rules: Option<Arc<Mutex<RuleState>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryHost {
    /// Host without a declarative rule API.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host with a working declarative rule API.
    pub fn with_declarative_rules() -> Self {
        Self {
            state: Arc::default(),
            rules: Some(Arc::default()),
        }
    }

    /// Host whose declarative rule API is present but fails every call.
    pub fn with_broken_declarative_rules() -> Self {
        let host = Self::with_declarative_rules();
        if let Some(rules) = &host.rules {
            lock(rules).broken = true;
        }
        host
    }

    pub fn set_sites(&self, sites: Vec<BlockedSite>) {
        lock(&self.state).sites = sites;
    }

    pub fn set_tabs(&self, tabs: Vec<Tab>) {
        lock(&self.state).tabs = tabs;
    }

    /// Make subsequent rule updates fail.
    pub fn fail_rule_updates(&self, fail: bool) {
        if let Some(rules) = &self.rules {
            lock(rules).fail_updates = fail;
        }
    }

    /// Installed declarative rules, ordered by id.
    pub fn installed_rules(&self) -> Vec<RegexRule> {
        match &self.rules {
            Some(rules) => lock(rules).rules.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Number of successful declarative rule updates.
    pub fn rule_updates(&self) -> usize {
        self.rules.as_ref().map(|r| lock(r).updates).unwrap_or(0)
    }

    pub fn wakeup(&self, tag: &str) -> Option<u64> {
        lock(&self.state).wakeups.get(tag).copied()
    }

    pub fn wakeups(&self) -> BTreeMap<String, u64> {
        lock(&self.state).wakeups.clone()
    }

    /// Remove and return the tags of every wake-up due at `now_ms`.
    pub fn take_due_wakeups(&self, now_ms: u64) -> Vec<String> {
        let mut state = lock(&self.state);
        let due: Vec<String> = state
            .wakeups
            .iter()
            .filter(|(_, when)| **when <= now_ms)
            .map(|(tag, _)| tag.clone())
            .collect();
        for tag in &due {
            state.wakeups.remove(tag);
        }
        due
    }

    /// Drop all session storage, as a browser restart would.
    pub fn end_session(&self) {
        let mut state = lock(&self.state);
        state.session.clear();
        state.wakeups.clear();
    }
}

#[async_trait]
impl BrowserHost for MemoryHost {
    async fn query_tabs(&self) -> Result<Vec<Tab>, HostError> {
        Ok(lock(&self.state).tabs.clone())
    }

    async fn create_wakeup(&self, tag: &str, when_ms: u64) -> Result<(), HostError> {
        lock(&self.state).wakeups.insert(tag.to_string(), when_ms);
        Ok(())
    }

    async fn cancel_wakeup(&self, tag: &str) -> Result<(), HostError> {
        lock(&self.state).wakeups.remove(tag);
        Ok(())
    }

    async fn session_get(&self, key: &str) -> Result<Option<Value>, HostError> {
        Ok(lock(&self.state).session.get(key).cloned())
    }

    async fn session_set(&self, key: &str, value: Value) -> Result<(), HostError> {
        lock(&self.state).session.insert(key.to_string(), value);
        Ok(())
    }

    async fn session_remove(&self, key: &str) -> Result<(), HostError> {
        lock(&self.state).session.remove(key);
        Ok(())
    }

    async fn session_entries(&self) -> Result<Vec<(String, Value)>, HostError> {
        Ok(lock(&self.state)
            .session
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn declarative_rules(&self) -> Option<Arc<dyn DeclarativeRuleApi>> {
        self.rules
            .as_ref()
            .map(|rules| Arc::new(MemoryRuleApi(rules.clone())) as Arc<dyn DeclarativeRuleApi>)
    }
}

#[async_trait]
impl SiteSource for MemoryHost {
    async fn load_sites(&self) -> Result<Vec<BlockedSite>, HostError> {
        Ok(lock(&self.state).sites.clone())
    }
}

struct MemoryRuleApi(Arc<Mutex<RuleState>>);

#[async_trait]
impl DeclarativeRuleApi for MemoryRuleApi {
    async fn dynamic_rules(&self) -> Result<Vec<RegexRule>, HostError> {
        let state = lock(&self.0);
        if state.broken {
            return Err(HostError::api("getDynamicRules", "API not callable"));
        }
        Ok(state.rules.values().cloned().collect())
    }

    async fn update_dynamic_rules(
        &self,
        remove_ids: &[u32],
        add_rules: Vec<RegexRule>,
    ) -> Result<(), HostError> {
        let mut state = lock(&self.0);
        if state.broken || state.fail_updates {
            return Err(HostError::api("updateDynamicRules", "rule update rejected"));
        }

        // Validate before touching anything so a rejected update changes nothing
        let mut next = state.rules.clone();
        for id in remove_ids {
            next.remove(id);
        }
        for rule in add_rules {
            if next.contains_key(&rule.id) {
                return Err(HostError::api(
                    "updateDynamicRules",
                    format!("duplicate rule id {}", rule.id),
                ));
            }
            next.insert(rule.id, rule);
        }
        state.rules = next;
        state.updates += 1;
        Ok(())
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance_minutes(&self, minutes: u64) {
        self.advance_ms(minutes * 60_000);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use fg_core::{RegexCondition, ResourceType, RuleAction};

    use super::*;

    fn rule(id: u32) -> RegexRule {
        RegexRule {
            id,
            priority: 1,
            action: RuleAction::Block,
            condition: RegexCondition {
                regex_filter: format!("^https?://r{}\\.com", id),
                resource_types: ResourceType::MAIN_FRAME,
                is_url_filter_case_sensitive: false,
            },
        }
    }

    #[tokio::test]
    async fn rule_updates_are_atomic() {
        let host = MemoryHost::with_declarative_rules();
        let api = host.declarative_rules().unwrap();
        api.update_dynamic_rules(&[], vec![rule(1), rule(2)]).await.unwrap();

        let err = api.update_dynamic_rules(&[], vec![rule(3), rule(2)]).await;
        assert!(err.is_err());
        let ids: Vec<u32> = host.installed_rules().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);

        api.update_dynamic_rules(&[1, 2], vec![rule(2)]).await.unwrap();
        assert_eq!(host.installed_rules().len(), 1);
        assert_eq!(host.rule_updates(), 2);
    }

    #[tokio::test]
    async fn due_wakeups_are_taken_once() {
        let host = MemoryHost::new();
        host.create_wakeup("a", 100).await.unwrap();
        host.create_wakeup("b", 200).await.unwrap();
        host.create_wakeup("a", 150).await.unwrap();

        assert!(host.take_due_wakeups(120).is_empty());
        assert_eq!(host.take_due_wakeups(150), vec!["a".to_string()]);
        assert!(host.take_due_wakeups(150).is_empty());
        assert_eq!(host.wakeup("b"), Some(200));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance_minutes(2);
        assert_eq!(clock.now_ms(), 121_000);
        clock.set(5);
        assert_eq!(clock.now_ms(), 5);
    }
}
