//! FocusGate Core Library
//!
//! This crate holds the pure pieces of the site blocker: the site data model,
//! pattern normalization, URL matching and the translation of user-defined
//! site rules into provider-specific blocking rules.
//!
//! # Modules
//!
//! - `types`: Sites, rules and provider rule representations
//! - `url`: Allocation-free URL helpers
//! - `pattern`: Site pattern normalization and regex generation
//! - `matcher`: Decides whether a URL is blocked by a site
//! - `translator`: Site rules to provider rules, with stable rule identifiers

pub mod types;
pub mod url;
pub mod pattern;
pub mod matcher;
pub mod translator;

// Re-export commonly used types
pub use matcher::{matches, SiteMatcher};
pub use pattern::{HostScope, PatternFilter};
pub use translator::{
    rule_id, rule_position, to_provider_rules, TranslateError, MAX_RULES_PER_SITE, RULE_ID_BASE,
};
pub use types::{
    BlockedSite, PredicateRule, ProviderRule, RegexCondition, RegexRule, ResourceType, RuleAction,
    RuleFormat, SiteRule,
};
