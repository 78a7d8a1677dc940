//! Core type definitions for FocusGate
//!
//! Sites are owned by persistent configuration and read on every sync.
//! Provider rules are derived from them and map directly onto what the
//! browser blocking backends accept.

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::pattern::PatternFilter;

// =============================================================================
// Sites
// =============================================================================

/// One pattern of a blocked site.
///
/// `allow = false` rules block; `allow = true` rules carve exceptions out of
/// the block rules and are only ever evaluated client-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRule {
    pub pattern: String,
    #[serde(default)]
    pub allow: bool,
}

impl SiteRule {
    pub fn block(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            allow: false,
        }
    }

    pub fn allow(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            allow: true,
        }
    }
}

/// A user-defined site with its ordered rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedSite {
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<SiteRule>,
}

fn default_enabled() -> bool {
    true
}

impl BlockedSite {
    pub fn new(id: impl Into<String>, rules: Vec<SiteRule>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            rules,
        }
    }

    /// Block rules with their position in `rules`.
    pub fn block_rules(&self) -> impl Iterator<Item = (usize, &SiteRule)> {
        self.rules.iter().enumerate().filter(|(_, rule)| !rule.allow)
    }

    /// Allow rules with their position in `rules`.
    pub fn allow_rules(&self) -> impl Iterator<Item = (usize, &SiteRule)> {
        self.rules.iter().enumerate().filter(|(_, rule)| rule.allow)
    }
}

// =============================================================================
// Resource Types
// =============================================================================

bitflags::bitflags! {
    /// Resource type mask, named after the browser's request types.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceType: u16 {
        const MAIN_FRAME = 1 << 0;
        const SUB_FRAME = 1 << 1;
        const STYLESHEET = 1 << 2;
        const SCRIPT = 1 << 3;
        const IMAGE = 1 << 4;
        const FONT = 1 << 5;
        const OBJECT = 1 << 6;
        const XMLHTTPREQUEST = 1 << 7;
        const PING = 1 << 8;
        const MEDIA = 1 << 9;
        const WEBSOCKET = 1 << 10;
        const OTHER = 1 << 11;
    }
}

const RESOURCE_TYPE_NAMES: [(ResourceType, &str); 12] = [
    (ResourceType::MAIN_FRAME, "main_frame"),
    (ResourceType::SUB_FRAME, "sub_frame"),
    (ResourceType::STYLESHEET, "stylesheet"),
    (ResourceType::SCRIPT, "script"),
    (ResourceType::IMAGE, "image"),
    (ResourceType::FONT, "font"),
    (ResourceType::OBJECT, "object"),
    (ResourceType::XMLHTTPREQUEST, "xmlhttprequest"),
    (ResourceType::PING, "ping"),
    (ResourceType::MEDIA, "media"),
    (ResourceType::WEBSOCKET, "websocket"),
    (ResourceType::OTHER, "other"),
];

impl ResourceType {
    /// Parse from browser request type string. Unknown names map to `OTHER`.
    pub fn from_browser_name(s: &str) -> Self {
        RESOURCE_TYPE_NAMES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(flag, _)| *flag)
            .unwrap_or(Self::OTHER)
    }

    /// Browser names of every set flag, in declaration order.
    pub fn names(self) -> Vec<&'static str> {
        RESOURCE_TYPE_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl Serialize for ResourceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let names = self.names();
        let mut seq = serializer.serialize_seq(Some(names.len()))?;
        for name in names {
            seq.serialize_element(name)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for ResourceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NamesVisitor;

        impl<'de> Visitor<'de> for NamesVisitor {
            type Value = ResourceType;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a list of resource type names")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut mask = ResourceType::empty();
                while let Some(name) = seq.next_element::<String>()? {
                    let flag = ResourceType::from_browser_name(&name);
                    if flag == ResourceType::OTHER && name != "other" {
                        return Err(de::Error::unknown_variant(&name, &["main_frame", "sub_frame"]));
                    }
                    mask |= flag;
                }
                Ok(mask)
            }
        }

        deserializer.deserialize_seq(NamesVisitor)
    }
}

// =============================================================================
// Provider Rules
// =============================================================================

/// Which representation a blocking backend consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleFormat {
    /// Declarative rules with a regex filter over the full request URL.
    RegexFilter,
    /// Predicate rules evaluated in-process by a live request hook.
    Predicate,
}

impl std::str::FromStr for RuleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "regex" | "regex_filter" | "declarative" => Ok(Self::RegexFilter),
            "predicate" | "interception" => Ok(Self::Predicate),
            other => Err(format!("unknown rule format '{}'", other)),
        }
    }
}

/// Action to take for a matched provider rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuleAction {
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexCondition {
    pub regex_filter: String,
    pub resource_types: ResourceType,
    pub is_url_filter_case_sensitive: bool,
}

/// Declarative block rule in the shape the browser's rule API accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexRule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RegexCondition,
}

/// Block rule evaluated by the interception backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateRule {
    pub id: u32,
    pub site_id: String,
    pub filter: PatternFilter,
    pub resource_types: ResourceType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProviderRule {
    Regex(RegexRule),
    Predicate(PredicateRule),
}

impl ProviderRule {
    pub fn id(&self) -> u32 {
        match self {
            Self::Regex(rule) => rule.id,
            Self::Predicate(rule) => rule.id,
        }
    }

    pub fn format(&self) -> RuleFormat {
        match self {
            Self::Regex(_) => RuleFormat::RegexFilter,
            Self::Predicate(_) => RuleFormat::Predicate,
        }
    }
}
