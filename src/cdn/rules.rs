//! Edge Cache and Optimization Rules
//!
//! Rules match request paths with glob patterns (`*` also crosses `/`).
//! Cache rules are kept sorted by priority, highest first, and the first
//! match decides the edge TTL and browser caching headers. Optimization
//! rules are cumulative: every enabled match contributes its techniques.

use crate::cdn::asset::{route, Asset, Technique};
use crate::config::CdnConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use glob::Pattern;
use indexmap::IndexMap;
use std::time::Duration;

/// One year, the edge TTL of fingerprinted static assets
pub const STATIC_ASSET_TTL: Duration = Duration::from_secs(31_536_000);

fn compile(patterns: &[&str]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| Error::InvalidPattern {
                pattern: p.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

// =============================================================================
// Rules
// =============================================================================

/// Edge and browser caching for matching paths
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRule {
    pub patterns: Vec<Pattern>,
    pub ttl: Duration,
    pub priority: i32,
    pub browser_cache: bool,
    pub immutable: bool,
    pub tags: Vec<String>,
}

impl CacheRule {
    /// Rule with browser caching on, priority 0 and no tags
    pub fn new(patterns: &[&str], ttl: Duration) -> Result<Self> {
        Ok(Self {
            patterns: compile(patterns)?,
            ttl,
            priority: 0,
            browser_cache: true,
            immutable: false,
            tags: Vec::new(),
        })
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn browser_cache(mut self, enabled: bool) -> Self {
        self.browser_cache = enabled;
        self
    }

    pub fn immutable(mut self, immutable: bool) -> Self {
        self.immutable = immutable;
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = route(path);
        self.patterns.iter().any(|p| p.matches(path))
    }
}

/// Techniques to apply to matching paths
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationRule {
    pub patterns: Vec<Pattern>,
    pub techniques: Vec<Technique>,
    pub enabled: bool,
}

impl OptimizationRule {
    pub fn new(patterns: &[&str], techniques: Vec<Technique>) -> Result<Self> {
        Ok(Self {
            patterns: compile(patterns)?,
            techniques,
            enabled: true,
        })
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = route(path);
        self.patterns.iter().any(|p| p.matches(path))
    }
}

/// Caching resolved for one path
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeCachePolicy {
    pub ttl: Duration,
    pub browser_cache: bool,
    pub immutable: bool,
    pub tags: Vec<String>,
}

// =============================================================================
// Rule Set
// =============================================================================

/// Ordered cache rules plus optimization rules
#[derive(Debug, Clone)]
pub struct RuleSet {
    default_ttl: Duration,
    cache_rules: Vec<CacheRule>,
    optimization_rules: Vec<OptimizationRule>,
}

impl RuleSet {
    /// Empty rule set; unmatched paths get `default_ttl` with browser caching
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            cache_rules: Vec::new(),
            optimization_rules: Vec::new(),
        }
    }

    /// Built-in rules:
    /// - static assets: one year, browser cached, immutable (priority 10)
    /// - `/api/*`: one minute, no browser cache, tagged `api` (priority 8)
    /// - HTML: five minutes, no browser cache (priority 5)
    /// - images: format, quality and metadata optimization
    /// - scripts, styles, HTML and JSON: minification and compression
    pub fn defaults(config: &CdnConfig) -> Result<Self> {
        let mut rules = Self::new(config.default_ttl);

        rules.add_cache_rule(
            CacheRule::new(
                &[
                    "*.js", "*.css", "*.png", "*.jpg", "*.jpeg", "*.gif", "*.svg", "*.woff",
                    "*.woff2", "*.ttf", "*.eot",
                ],
                STATIC_ASSET_TTL,
            )?
            .priority(10)
            .immutable(true),
        );
        rules.add_cache_rule(
            CacheRule::new(&["*.html"], Duration::from_secs(300))?
                .priority(5)
                .browser_cache(false),
        );
        rules.add_cache_rule(
            CacheRule::new(&["/api/*"], Duration::from_secs(60))?
                .priority(8)
                .browser_cache(false)
                .tags(["api"]),
        );

        rules.add_optimization_rule(
            OptimizationRule::new(
                &["*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp"],
                vec![
                    Technique::FormatOptimization,
                    Technique::QualityOptimization,
                    Technique::MetadataRemoval,
                ],
            )?
            .enabled(config.enable_image_optimization),
        );
        rules.add_optimization_rule(
            OptimizationRule::new(
                &["*.js", "*.css", "*.html", "*.json"],
                vec![Technique::Minification, Technique::Compression],
            )?
            .enabled(config.enable_minification),
        );

        Ok(rules)
    }

    /// Insert keeping priority order; equal priorities keep insertion order
    pub fn add_cache_rule(&mut self, rule: CacheRule) {
        self.cache_rules.push(rule);
        self.cache_rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn add_optimization_rule(&mut self, rule: OptimizationRule) {
        self.optimization_rules.push(rule);
    }

    pub fn cache_rules(&self) -> &[CacheRule] {
        &self.cache_rules
    }

    /// Policy of the highest-priority matching rule
    pub fn resolve(&self, path: &str) -> EdgeCachePolicy {
        match self.cache_rules.iter().find(|rule| rule.matches(path)) {
            Some(rule) => EdgeCachePolicy {
                ttl: rule.ttl,
                browser_cache: rule.browser_cache,
                immutable: rule.immutable,
                tags: rule.tags.clone(),
            },
            None => EdgeCachePolicy {
                ttl: self.default_ttl,
                browser_cache: true,
                immutable: false,
                tags: Vec::new(),
            },
        }
    }

    /// Techniques of every enabled matching rule, without duplicates
    pub fn techniques_for(&self, path: &str) -> Vec<Technique> {
        let mut techniques = Vec::new();
        for rule in self.optimization_rules.iter().filter(|r| r.enabled && r.matches(path)) {
            for technique in &rule.techniques {
                if !techniques.contains(technique) {
                    techniques.push(*technique);
                }
            }
        }
        techniques
    }

    /// Response caching headers plus an ETag for `asset`
    pub fn cache_headers(&self, asset: &Asset, now: DateTime<Utc>) -> IndexMap<String, String> {
        let policy = self.resolve(&asset.path);
        let mut headers = IndexMap::new();

        if policy.browser_cache {
            let mut cache_control = format!("public, max-age={}", policy.ttl.as_secs());
            if policy.immutable {
                cache_control.push_str(", immutable");
            }
            let expires = chrono::Duration::from_std(policy.ttl)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl))
                .unwrap_or(now);

            headers.insert("Cache-Control".to_string(), cache_control);
            headers.insert(
                "Expires".to_string(),
                expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            );
        } else {
            headers.insert(
                "Cache-Control".to_string(),
                "no-cache, no-store, must-revalidate".to_string(),
            );
            headers.insert("Pragma".to_string(), "no-cache".to_string());
            headers.insert("Expires".to_string(), "0".to_string());
        }

        headers.insert("ETag".to_string(), asset.etag());
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn default_rules() -> RuleSet {
        RuleSet::defaults(&CdnConfig::default()).unwrap()
    }

    #[test]
    fn test_default_rules_by_priority() {
        let rules = default_rules();
        let priorities: Vec<i32> = rules.cache_rules().iter().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![10, 8, 5]);

        let js = rules.resolve("/static/app.js?v=2");
        assert_eq!(js.ttl, STATIC_ASSET_TTL);
        assert!(js.browser_cache && js.immutable);

        let api = rules.resolve("/api/users/1");
        assert_eq!(api.ttl, Duration::from_secs(60));
        assert!(!api.browser_cache);
        assert_eq!(api.tags, vec!["api"]);

        // Static extension outranks the API prefix
        assert_eq!(rules.resolve("/api/client.js").ttl, STATIC_ASSET_TTL);

        let other = rules.resolve("/robots.txt");
        assert_eq!(other.ttl, Duration::from_secs(3600));
        assert!(other.browser_cache);
    }

    #[test]
    fn test_added_rule_takes_precedence() {
        let mut rules = default_rules();
        rules.add_cache_rule(
            CacheRule::new(&["/landing/*"], Duration::from_secs(30))
                .unwrap()
                .priority(20)
                .browser_cache(false),
        );

        assert_eq!(rules.resolve("/landing/hero.png").ttl, Duration::from_secs(30));
        assert_eq!(rules.resolve("/other/hero.png").ttl, STATIC_ASSET_TTL);
    }

    #[test]
    fn test_invalid_pattern() {
        let result = CacheRule::new(&["/assets/[a-"], Duration::from_secs(1));
        assert_matches!(result.err(), Some(Error::InvalidPattern { pattern, .. }) if pattern == "/assets/[a-");
    }

    #[test]
    fn test_cache_headers() {
        let rules = default_rules();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let script = Asset::new("/app.js", "run()");
        let headers = rules.cache_headers(&script, now);
        assert_eq!(headers["Cache-Control"], "public, max-age=31536000, immutable");
        assert_eq!(headers["Expires"], "Tue, 31 Dec 2024 00:00:00 GMT");
        assert_eq!(headers["ETag"], script.etag());

        let page = Asset::new("/index.html", "<p>hi</p>");
        let headers = rules.cache_headers(&page, now);
        assert_eq!(headers["Cache-Control"], "no-cache, no-store, must-revalidate");
        assert_eq!(headers["Pragma"], "no-cache");
        assert_eq!(headers["Expires"], "0");
    }

    #[test]
    fn test_techniques_respect_enabled_flags() {
        let rules = default_rules();
        assert_eq!(
            rules.techniques_for("/app.css"),
            vec![Technique::Minification, Technique::Compression]
        );
        assert_eq!(rules.techniques_for("/logo.png").len(), 3);
        assert!(rules.techniques_for("/font.woff2").is_empty());

        let config = CdnConfig {
            enable_minification: false,
            ..Default::default()
        };
        let rules = RuleSet::defaults(&config).unwrap();
        assert!(rules.techniques_for("/app.css").is_empty());
    }
}
