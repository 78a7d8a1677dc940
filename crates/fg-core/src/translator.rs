//! Translation of site rules into provider rules.
//!
//! Rule identifiers are derived from `(site_index, pattern_index)`:
//!
//! ```text
//! id = RULE_ID_BASE + site_index * MAX_RULES_PER_SITE + pattern_index
//! ```
//!
//! Every site owns a fixed, contiguous id range, so a full resync can remove
//! every installed id and add the new set without ever diffing rules.
//! Allow rules are never translated; they only affect client-side matching.

use crate::matcher::compile_filter;
use crate::pattern::PatternFilter;
use crate::types::{
    BlockedSite, PredicateRule, ProviderRule, RegexCondition, RegexRule, ResourceType, RuleAction,
    RuleFormat,
};

/// First identifier handed out to site rules.
pub const RULE_ID_BASE: u32 = 1000;
/// Size of each site's identifier range.
pub const MAX_RULES_PER_SITE: u32 = 100;
/// Priority of every emitted block rule.
pub const RULE_PRIORITY: u32 = 1;
/// Provider rule ids are signed 32-bit integers on the browser side.
const MAX_RULE_ID: u32 = i32::MAX as u32;

/// Only top-level navigations are blocked, never embedded resources.
pub const BLOCKED_RESOURCE_TYPES: ResourceType = ResourceType::MAIN_FRAME;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("Site '{site_id}' has {count} rules, the limit is {max}")]
    TooManyRules {
        site_id: String,
        count: usize,
        max: u32,
    },
    #[error("Site index {0} is outside the rule identifier space")]
    IdSpaceExhausted(usize),
}

/// Identifier of the rule at `pattern_index` of the site at `site_index`.
pub fn rule_id(site_index: usize, pattern_index: usize) -> Result<u32, TranslateError> {
    let exhausted = || TranslateError::IdSpaceExhausted(site_index);

    let pattern = u32::try_from(pattern_index).map_err(|_| exhausted())?;
    if pattern >= MAX_RULES_PER_SITE {
        return Err(exhausted());
    }

    let id = u32::try_from(site_index)
        .ok()
        .and_then(|site| site.checked_mul(MAX_RULES_PER_SITE))
        .and_then(|offset| offset.checked_add(RULE_ID_BASE))
        .and_then(|start| start.checked_add(pattern))
        .ok_or_else(exhausted)?;

    if id > MAX_RULE_ID {
        return Err(exhausted());
    }
    Ok(id)
}

/// Inverse of [`rule_id`]: `(site_index, pattern_index)` for an id this
/// module handed out.
pub fn rule_position(id: u32) -> Option<(usize, usize)> {
    let offset = id.checked_sub(RULE_ID_BASE)?;
    Some((
        (offset / MAX_RULES_PER_SITE) as usize,
        (offset % MAX_RULES_PER_SITE) as usize,
    ))
}

/// Translate the block rules of `site` into `format`.
///
/// Disabled or unlocked sites are filtered by the caller; this function
/// translates whatever it is given. Patterns that do not normalize to a host
/// are skipped and leave a gap in the site's id range.
pub fn to_provider_rules(
    site: &BlockedSite,
    site_index: usize,
    format: RuleFormat,
) -> Result<Vec<ProviderRule>, TranslateError> {
    if site.rules.len() > MAX_RULES_PER_SITE as usize {
        return Err(TranslateError::TooManyRules {
            site_id: site.id.clone(),
            count: site.rules.len(),
            max: MAX_RULES_PER_SITE,
        });
    }

    let mut rules = Vec::new();
    for (pattern_index, rule) in site.block_rules() {
        let Some(filter) = PatternFilter::parse(&rule.pattern) else {
            log::warn!("Site '{}': skipping pattern '{}'", site.id, rule.pattern);
            continue;
        };
        let id = rule_id(site_index, pattern_index)?;

        let provider_rule = match format {
            RuleFormat::RegexFilter => ProviderRule::Regex(RegexRule {
                id,
                priority: RULE_PRIORITY,
                action: RuleAction::Block,
                condition: RegexCondition {
                    regex_filter: filter.to_regex(),
                    resource_types: BLOCKED_RESOURCE_TYPES,
                    is_url_filter_case_sensitive: false,
                },
            }),
            RuleFormat::Predicate => {
                if compile_filter(&filter).is_none() {
                    continue;
                }
                ProviderRule::Predicate(PredicateRule {
                    id,
                    site_id: site.id.clone(),
                    filter,
                    resource_types: BLOCKED_RESOURCE_TYPES,
                })
            }
        };
        rules.push(provider_rule);
    }

    Ok(rules)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::types::SiteRule;

    fn reddit() -> BlockedSite {
        BlockedSite::new(
            "reddit",
            vec![
                SiteRule::block("*.reddit.com"),
                SiteRule::allow("reddit.com/r/rust"),
                SiteRule::block("https://www.redd.it"),
            ],
        )
    }

    #[test]
    fn assigns_ids_from_site_and_pattern_index() {
        assert_eq!(rule_id(0, 0), Ok(1000));
        assert_eq!(rule_id(0, 99), Ok(1099));
        assert_eq!(rule_id(3, 7), Ok(1307));
        assert_eq!(rule_position(1307), Some((3, 7)));
        assert_eq!(rule_position(999), None);
    }

    #[test]
    fn ids_are_injective_within_cap() {
        let mut seen = HashSet::new();
        for site_index in 0..50 {
            for pattern_index in 0..MAX_RULES_PER_SITE as usize {
                let id = rule_id(site_index, pattern_index).unwrap();
                assert!(seen.insert(id), "duplicate id {}", id);
                assert_eq!(rule_position(id), Some((site_index, pattern_index)));
            }
        }
    }

    #[test]
    fn rejects_ids_outside_the_range() {
        assert!(rule_id(0, MAX_RULES_PER_SITE as usize).is_err());
        assert!(rule_id(usize::MAX, 0).is_err());
        assert!(rule_id(30_000_000, 0).is_err());
    }

    #[test]
    fn translates_only_block_rules() {
        let rules = to_provider_rules(&reddit(), 2, RuleFormat::RegexFilter).unwrap();
        let ids: Vec<u32> = rules.iter().map(ProviderRule::id).collect();
        assert_eq!(ids, vec![1200, 1202]);

        let ProviderRule::Regex(first) = &rules[0] else {
            panic!("expected regex rule");
        };
        assert_eq!(first.condition.resource_types, ResourceType::MAIN_FRAME);
        assert_eq!(first.condition.regex_filter, r"^https?://(?:[^/?#@]*@)?(?:[^/?#@:]+\.)?reddit\.com\.?(?:[:/?#].*)?$");

        let ProviderRule::Regex(second) = &rules[1] else {
            panic!("expected regex rule");
        };
        assert_eq!(second.condition.regex_filter, r"^https?://(?:[^/?#@]*@)?(?:www\.)?redd\.it\.?(?:[:/?#].*)?$");
    }

    #[test]
    fn predicate_format_carries_site_and_filter() {
        let rules = to_provider_rules(&reddit(), 0, RuleFormat::Predicate).unwrap();
        assert_eq!(rules.len(), 2);
        let ProviderRule::Predicate(rule) = &rules[1] else {
            panic!("expected predicate rule");
        };
        assert_eq!(rule.site_id, "reddit");
        assert_eq!(rule.filter.host, "redd.it");
        assert!(rules.iter().all(|r| r.format() == RuleFormat::Predicate));
    }

    #[test]
    fn too_many_rules_is_a_configuration_error() {
        let rules = (0..=MAX_RULES_PER_SITE)
            .map(|i| SiteRule::block(format!("site{}.com", i)))
            .collect();
        let site = BlockedSite::new("big", rules);
        let err = to_provider_rules(&site, 0, RuleFormat::RegexFilter).unwrap_err();
        assert_eq!(
            err,
            TranslateError::TooManyRules {
                site_id: "big".to_string(),
                count: 101,
                max: MAX_RULES_PER_SITE,
            }
        );
    }

    #[test]
    fn skipped_patterns_leave_gaps() {
        let site = BlockedSite::new("x", vec![SiteRule::block(""), SiteRule::block("x.com")]);
        let rules = to_provider_rules(&site, 0, RuleFormat::RegexFilter).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id(), 1001);
    }

    #[test]
    fn regex_rules_agree_with_site_matcher() {
        let site = reddit();
        let matcher = crate::matcher::SiteMatcher::compile(&site);
        let rules = to_provider_rules(&site, 0, RuleFormat::RegexFilter).unwrap();
        let regexes: Vec<regex::Regex> = rules
            .iter()
            .map(|r| match r {
                ProviderRule::Regex(r) => regex::RegexBuilder::new(&r.condition.regex_filter)
                    .case_insensitive(true)
                    .build()
                    .unwrap(),
                ProviderRule::Predicate(_) => panic!("expected regex rule"),
            })
            .collect();

        for url in ["https://old.reddit.com/", "https://redd.it/abc", "https://example.com/"] {
            let provider = regexes.iter().any(|re| re.is_match(url));
            assert_eq!(provider, matcher.matches(url), "{}", url);
        }

        for url in [
            "https://user@redd.it/abc",
            "https://a:b@old.reddit.com/",
            "https://www.reddit.com./r/funny",
        ] {
            assert!(regexes.iter().any(|re| re.is_match(url)), "{}", url);
            assert!(matcher.matches(url), "{}", url);
        }
    }
}
