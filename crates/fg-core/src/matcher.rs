//! URL matching against a site's block/allow rules.
//!
//! A site blocks a URL when at least one block rule matches and no allow rule
//! does. Allow rules always win.

use regex::{Regex, RegexBuilder};

use crate::pattern::PatternFilter;
use crate::types::BlockedSite;
use crate::url::normalize_url;

/// Compile a pattern filter into a case-insensitive URL regex.
pub fn compile_filter(filter: &PatternFilter) -> Option<Regex> {
    match RegexBuilder::new(&filter.to_regex()).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(e) => {
            log::warn!("Skipping pattern for host '{}': {}", filter.host, e);
            None
        }
    }
}

/// A site's rules compiled once for repeated matching.
#[derive(Debug, Clone)]
pub struct SiteMatcher {
    site_id: String,
    block: Vec<Regex>,
    allow: Vec<Regex>,
}

impl SiteMatcher {
    /// Compile every rule of `site`. Patterns that do not normalize to a host
    /// are skipped.
    pub fn compile(site: &BlockedSite) -> Self {
        let mut block = Vec::new();
        let mut allow = Vec::new();

        for rule in &site.rules {
            let Some(filter) = PatternFilter::parse(&rule.pattern) else {
                log::debug!("Site '{}': ignoring empty pattern '{}'", site.id, rule.pattern);
                continue;
            };
            let Some(re) = compile_filter(&filter) else {
                continue;
            };
            if rule.allow {
                allow.push(re);
            } else {
                block.push(re);
            }
        }

        Self {
            site_id: site.id.clone(),
            block,
            allow,
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// True if the site blocks `url`. Internal pages never match.
    pub fn matches(&self, url: &str) -> bool {
        let Some(url) = normalize_url(url) else {
            return false;
        };

        if !self.block.iter().any(|re| re.is_match(&url)) {
            return false;
        }
        !self.allow.iter().any(|re| re.is_match(&url))
    }
}

/// One-shot form of [`SiteMatcher::matches`].
pub fn matches(url: &str, site: &BlockedSite) -> bool {
    SiteMatcher::compile(site).matches(url)
}
