//! Site pattern normalization
//!
//! A site pattern is a host, optionally prefixed with `*.` to include
//! subdomains, optionally followed by a path: `*.reddit.com`,
//! `news.ycombinator.com`, `youtube.com/shorts`. `*` anywhere else is a
//! wildcard matching any run of characters.
//!
//! Both the client-side matcher and the provider rules are built from the
//! regex produced here, so the two never disagree on what a pattern covers.

use serde::Serialize;

use crate::url::strip_scheme;

/// How the host part of a pattern applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HostScope {
    /// The host itself and its `www.` variant.
    Exact,
    /// The host and any subdomain of it.
    WithSubdomains,
}

/// A normalized pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternFilter {
    pub host: String,
    pub path: Option<String>,
    pub scope: HostScope,
}

/// Optional `user[:password]@` ahead of the host.
const USERINFO: &str = r"(?:[^/?#@]*@)?";
/// Anything that may follow a complete host: port, path, query, fragment.
const AFTER_HOST: &str = r"(?:[:/?#].*)?$";
/// Anything that may follow a complete path segment.
const AFTER_PATH: &str = r"(?:[/?#].*)?$";

impl PatternFilter {
    /// Normalize a raw pattern: lower-case, trim, strip scheme, strip a
    /// leading `www.`. Returns `None` when no host remains.
    pub fn parse(pattern: &str) -> Option<Self> {
        let lowered = pattern.trim().to_ascii_lowercase();
        let rest = strip_scheme(&lowered);
        let rest = rest.strip_prefix("www.").unwrap_or(rest);

        let (scope, rest) = match rest.strip_prefix("*.") {
            Some(rest) => (HostScope::WithSubdomains, rest),
            None => (HostScope::Exact, rest),
        };

        let (host, path) = match rest.find('/') {
            Some(pos) => (&rest[..pos], Some(&rest[pos..])),
            None => (rest, None),
        };

        let host = host.trim_end_matches('.');
        if host.is_empty() || host == "*" || host.contains(char::is_whitespace) {
            return None;
        }

        let path = path
            .map(|p| p.trim_end_matches('/'))
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Some(Self {
            host: host.to_string(),
            path,
            scope,
        })
    }

    /// Regex over the full request URL: anchored at the start, `http` or
    /// `https` scheme, optional userinfo, optional `www.` (or any subdomain
    /// for `WithSubdomains`), the host with an optional trailing dot, then the
    /// path if the pattern has one.
    pub fn to_regex(&self) -> String {
        let mut re = String::from("^https?://");
        re.push_str(USERINFO);
        match self.scope {
            HostScope::Exact => re.push_str(r"(?:www\.)?"),
            HostScope::WithSubdomains => re.push_str(r"(?:[^/?#@:]+\.)?"),
        }
        push_glob(&mut re, &self.host);
        re.push_str(r"\.?");

        match &self.path {
            Some(path) => {
                push_glob(&mut re, path);
                re.push_str(AFTER_PATH);
            }
            None => re.push_str(AFTER_HOST),
        }
        re
    }
}

/// Append `glob` with regex metacharacters escaped and `*` as `.*`.
fn push_glob(out: &mut String, glob: &str) {
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '.' | '+' | '?' | '^' | '$' | '{' | '}' | '(' | ')' | '|' | '[' | ']' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(pattern: &str) -> regex::Regex {
        let filter = PatternFilter::parse(pattern).expect("pattern should parse");
        regex::RegexBuilder::new(&filter.to_regex())
            .case_insensitive(true)
            .build()
            .expect("regex should compile")
    }

    #[test]
    fn parse_strips_scheme_and_www() {
        let filter = PatternFilter::parse("  HTTPS://WWW.Example.com/  ").unwrap();
        assert_eq!(filter.host, "example.com");
        assert_eq!(filter.path, None);
        assert_eq!(filter.scope, HostScope::Exact);
    }

    #[test]
    fn parse_subdomain_and_path() {
        let filter = PatternFilter::parse("*.reddit.com").unwrap();
        assert_eq!(filter.scope, HostScope::WithSubdomains);
        assert_eq!(filter.host, "reddit.com");

        let filter = PatternFilter::parse("youtube.com/shorts/").unwrap();
        assert_eq!(filter.path.as_deref(), Some("/shorts"));
    }

    #[test]
    fn parse_rejects_empty_hosts() {
        assert_eq!(PatternFilter::parse(""), None);
        assert_eq!(PatternFilter::parse("https://"), None);
        assert_eq!(PatternFilter::parse("*."), None);
        assert_eq!(PatternFilter::parse("*"), None);
        assert_eq!(PatternFilter::parse("bad host.com"), None);
    }

    #[test]
    fn regex_escapes_metacharacters() {
        let filter = PatternFilter::parse("a+b.com").unwrap();
        assert_eq!(filter.to_regex(), r"^https?://(?:[^/?#@]*@)?(?:www\.)?a\+b\.com\.?(?:[:/?#].*)?$");
    }

    #[test]
    fn exact_pattern_covers_www_and_all_paths() {
        let re = compile("example.com");
        assert!(re.is_match("https://example.com"));
        assert!(re.is_match("http://www.example.com/"));
        assert!(re.is_match("https://example.com/any/path?q=1"));
        assert!(re.is_match("https://example.com:8443/"));
        assert!(!re.is_match("https://sub.example.com/"));
        assert!(!re.is_match("https://example.com.evil.net/"));
        assert!(!re.is_match("https://notexample.com/"));
        assert!(!re.is_match("ftp://example.com/"));
    }

    #[test]
    fn subdomain_pattern_covers_domain_and_children() {
        let re = compile("*.example.com");
        assert!(re.is_match("https://example.com/"));
        assert!(re.is_match("https://foo.example.com/"));
        assert!(re.is_match("https://a.b.example.com/x"));
        assert!(!re.is_match("https://notexample.com/"));
        assert!(!re.is_match("https://evil.net/?x=.example.com"));
    }

    #[test]
    fn path_pattern_respects_segment_boundary() {
        let re = compile("youtube.com/shorts");
        assert!(re.is_match("https://www.youtube.com/shorts"));
        assert!(re.is_match("https://youtube.com/shorts/abc"));
        assert!(re.is_match("https://youtube.com/shorts?feature=x"));
        assert!(!re.is_match("https://youtube.com/shortsfeed"));
        assert!(!re.is_match("https://youtube.com/watch?v=1"));
    }

    #[test]
    fn userinfo_and_trailing_dot_do_not_hide_the_host() {
        let re = compile("youtube.com");
        assert!(re.is_match("https://user@youtube.com/"));
        assert!(re.is_match("https://a:b@www.youtube.com/watch"));
        assert!(re.is_match("https://youtube.com./watch"));
        assert!(re.is_match("https://youtube.com.:443/"));
        assert!(!re.is_match("https://youtube.com@evil.net/"));
        assert!(!re.is_match("https://evil.net/@youtube.com"));
        assert!(!re.is_match("https://youtube.com.evil.net/"));

        let re = compile("*.reddit.com");
        assert!(re.is_match("https://a:b@www.reddit.com/"));
        assert!(re.is_match("https://old.reddit.com./r/rust"));

        let re = compile("youtube.com/shorts");
        assert!(re.is_match("https://u@youtube.com./shorts/1"));
    }

    #[test]
    fn inner_wildcards_match_anything() {
        let re = compile("news.*.com");
        assert!(re.is_match("https://news.google.com/"));
        assert!(!re.is_match("https://google.com/"));
    }
}
