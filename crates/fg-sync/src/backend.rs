//! Blocking backends.
//!
//! Two mutually exclusive ways to enforce blocks:
//!
//! - `DeclarativeBackend`: regex-filter rules handed to the browser's
//!   declarative rule API, enforced natively.
//! - `InterceptionBackend`: predicate rules kept in-process and evaluated
//!   from a live request hook.
//!
//! The choice is made once by [`select_backend`] and fixed for the lifetime of
//! the synchronizer.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use fg_core::matcher::compile_filter;
use fg_core::url::normalize_url;
use fg_core::{PredicateRule, ProviderRule, RegexRule, ResourceType, RuleFormat};
use regex::Regex;

use crate::error::HostError;
use crate::host::{BrowserHost, DeclarativeRuleApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Declarative,
    Interception,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declarative => f.write_str("declarative"),
            Self::Interception => f.write_str("interception"),
        }
    }
}

/// A request the interception backend wants blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptDecision {
    pub rule_id: u32,
    pub site_id: String,
}

#[async_trait]
pub trait BlockingBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Representation `replace_rules` accepts.
    fn format(&self) -> RuleFormat;

    async fn installed_rules(&self) -> Result<Vec<ProviderRule>, HostError>;

    /// Remove `remove_ids` and install `rules` as one update.
    async fn replace_rules(
        &self,
        remove_ids: &[u32],
        rules: Vec<ProviderRule>,
    ) -> Result<(), HostError>;

    /// Decision for a request when this backend enforces in-process.
    /// Natively enforced backends always return `None`.
    fn evaluate(&self, _url: &str, _resource_type: ResourceType) -> Option<InterceptDecision> {
        None
    }
}

/// Select the backend for this process: the declarative API when it is
/// present and answers a read, interception otherwise.
pub async fn select_backend(host: &dyn BrowserHost) -> Arc<dyn BlockingBackend> {
    if let Some(api) = host.declarative_rules() {
        match api.dynamic_rules().await {
            Ok(rules) => {
                log::info!(
                    "Using declarative blocking backend ({} rules installed)",
                    rules.len()
                );
                return Arc::new(DeclarativeBackend::new(api));
            }
            Err(e) => log::warn!("Declarative rule API not callable ({}), falling back", e),
        }
    }
    log::info!("Using interception blocking backend");
    Arc::new(InterceptionBackend::new())
}

// =============================================================================
// Declarative
// =============================================================================

pub struct DeclarativeBackend {
    api: Arc<dyn DeclarativeRuleApi>,
}

impl DeclarativeBackend {
    pub fn new(api: Arc<dyn DeclarativeRuleApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl BlockingBackend for DeclarativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Declarative
    }

    fn format(&self) -> RuleFormat {
        RuleFormat::RegexFilter
    }

    async fn installed_rules(&self) -> Result<Vec<ProviderRule>, HostError> {
        Ok(self
            .api
            .dynamic_rules()
            .await?
            .into_iter()
            .map(ProviderRule::Regex)
            .collect())
    }

    async fn replace_rules(
        &self,
        remove_ids: &[u32],
        rules: Vec<ProviderRule>,
    ) -> Result<(), HostError> {
        let regex_rules = rules
            .into_iter()
            .map(|rule| match rule {
                ProviderRule::Regex(rule) => Ok(rule),
                other => Err(HostError::RuleFormat { id: other.id() }),
            })
            .collect::<Result<Vec<RegexRule>, _>>()?;

        self.api.update_dynamic_rules(remove_ids, regex_rules).await
    }
}

// =============================================================================
// Interception
// =============================================================================

struct CompiledRule {
    rule: PredicateRule,
    regex: Regex,
}

#[derive(Default)]
pub struct InterceptionBackend {
    rules: RwLock<Vec<CompiledRule>>,
}

impl InterceptionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().map(|rules| rules.len()).unwrap_or(0)
    }
}

#[async_trait]
impl BlockingBackend for InterceptionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Interception
    }

    fn format(&self) -> RuleFormat {
        RuleFormat::Predicate
    }

    async fn installed_rules(&self) -> Result<Vec<ProviderRule>, HostError> {
        let rules = self
            .rules
            .read()
            .map_err(|_| HostError::Unavailable("interception rule table"))?;
        Ok(rules
            .iter()
            .map(|compiled| ProviderRule::Predicate(compiled.rule.clone()))
            .collect())
    }

    async fn replace_rules(
        &self,
        remove_ids: &[u32],
        rules: Vec<ProviderRule>,
    ) -> Result<(), HostError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let ProviderRule::Predicate(rule) = rule else {
                return Err(HostError::RuleFormat { id: rule.id() });
            };
            // The translator only emits predicates whose filter compiles
            let Some(regex) = compile_filter(&rule.filter) else {
                continue;
            };
            compiled.push(CompiledRule { rule, regex });
        }

        let remove: HashSet<u32> = remove_ids.iter().copied().collect();
        let mut table = self
            .rules
            .write()
            .map_err(|_| HostError::Unavailable("interception rule table"))?;

        let mut ids: HashSet<u32> = table
            .iter()
            .map(|existing| existing.rule.id)
            .filter(|id| !remove.contains(id))
            .collect();
        for rule in &compiled {
            if !ids.insert(rule.rule.id) {
                return Err(HostError::api(
                    "interception",
                    format!("duplicate rule id {}", rule.rule.id),
                ));
            }
        }

        table.retain(|existing| !remove.contains(&existing.rule.id));
        table.extend(compiled);
        table.sort_by_key(|c| c.rule.id);
        Ok(())
    }

    fn evaluate(&self, url: &str, resource_type: ResourceType) -> Option<InterceptDecision> {
        let url = normalize_url(url)?;
        let rules = self.rules.read().ok()?;
        rules
            .iter()
            .find(|compiled| {
                compiled.rule.resource_types.intersects(resource_type)
                    && compiled.regex.is_match(&url)
            })
            .map(|compiled| InterceptDecision {
                rule_id: compiled.rule.id,
                site_id: compiled.rule.site_id.clone(),
            })
    }
}
