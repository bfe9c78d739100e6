//! Response rewrite rules applied by an engine's network interception.
//!
//! An engine that supports interception checks each outgoing request
//! against the rule list. The first matching rule gets the upstream
//! response body and returns the body handed to the page instead. Requests
//! that match no rule are left alone.

use std::sync::Arc;

use serde_json::Value;

use crate::{Error, Result};

/// One response rewrite
pub trait RewriteRule: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Whether this rule applies to `url`
    fn matches(&self, url: &str) -> bool;

    /// Produce the replacement body from the upstream body
    fn rewrite(&self, body: &[u8]) -> Result<Vec<u8>>;
}

/// Ordered list of rules. Cheap to clone.
#[derive(Clone, Default)]
pub struct RewriteRules {
    rules: Vec<Arc<dyn RewriteRule>>,
}

impl RewriteRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, rule: impl RewriteRule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// First rule matching `url`
    pub fn find(&self, url: &str) -> Option<&dyn RewriteRule> {
        self.rules
            .iter()
            .find(|rule| rule.matches(url))
            .map(|rule| rule.as_ref())
    }
}

impl std::fmt::Debug for RewriteRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.name()))
            .finish()
    }
}

/// Sets boolean fields of a JSON response to fixed values.
///
/// Matches URLs whose scheme-less prefix equals `url_prefix` (so both
/// `https://host/path?x` and `http://host/path` match `host/path`).
#[derive(Debug, Clone)]
pub struct JsonFlagOverride {
    name: String,
    url_prefix: String,
    /// JSON pointers and the value forced at each; missing pointers are skipped
    flags: Vec<(String, bool)>,
}

impl JsonFlagOverride {
    pub fn new(name: impl Into<String>, url_prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url_prefix: url_prefix.into(),
            flags: Vec::new(),
        }
    }

    pub fn force(mut self, pointer: impl Into<String>, value: bool) -> Self {
        self.flags.push((pointer.into(), value));
        self
    }
}

impl RewriteRule for JsonFlagOverride {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, url: &str) -> bool {
        let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
        rest.starts_with(&self.url_prefix)
    }

    fn rewrite(&self, body: &[u8]) -> Result<Vec<u8>> {
        let mut json: Value = serde_json::from_slice(body)
            .map_err(|e| Error::Other(format!("{}: response is not JSON: {}", self.name, e)))?;
        for (pointer, value) in &self.flags {
            if let Some(slot) = json.pointer_mut(pointer) {
                *slot = Value::Bool(*value);
            } else if let Some((parent, field)) = pointer.rsplit_once('/') {
                // Top-level flags are added when absent; nested objects are not created.
                if let Some(Value::Object(map)) = json.pointer_mut(parent) {
                    map.insert(field.to_string(), Value::Bool(*value));
                }
            }
        }
        serde_json::to_vec(&json).map_err(|e| Error::Other(e.to_string()))
    }
}

/// Endpoint the embed widget calls for the post it is about to draw.
pub const EMBED_METADATA_PREFIX: &str = "cdn.syndication.twimg.com/tweet-result";

/// Rule that marks the embedded post (and a quoted post) as not sensitive,
/// so the widget does not cover it with a warning interstitial.
pub fn sensitivity_override(url_prefix: &str) -> JsonFlagOverride {
    JsonFlagOverride::new("sensitivity-override", url_prefix)
        .force("/possibly_sensitive", false)
        .force("/quoted_tweet/possibly_sensitive", false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_only_the_metadata_endpoint() {
        let rule = sensitivity_override(EMBED_METADATA_PREFIX);
        assert!(rule.matches("https://cdn.syndication.twimg.com/tweet-result?id=1&lang=ja"));
        assert!(!rule.matches("https://cdn.syndication.twimg.com/timeline/profile"));
        assert!(!rule.matches("https://platform.twitter.com/embed/Tweet.html"));
    }

    #[test]
    fn forces_flags_to_false() {
        let rule = sensitivity_override(EMBED_METADATA_PREFIX);
        let body = br#"{"id_str":"1","possibly_sensitive":true,"quoted_tweet":{"possibly_sensitive":true}}"#;
        let out: Value = serde_json::from_slice(&rule.rewrite(body).unwrap()).unwrap();
        assert_eq!(out["possibly_sensitive"], Value::Bool(false));
        assert_eq!(out["quoted_tweet"]["possibly_sensitive"], Value::Bool(false));
        assert_eq!(out["id_str"], "1");
    }

    #[test]
    fn missing_parent_is_not_created() {
        let rule = sensitivity_override(EMBED_METADATA_PREFIX);
        let out: Value = serde_json::from_slice(&rule.rewrite(br#"{"id_str":"1"}"#).unwrap()).unwrap();
        assert_eq!(out["possibly_sensitive"], Value::Bool(false));
        assert!(out.get("quoted_tweet").is_none());
    }

    #[test]
    fn non_json_body_is_an_error() {
        let rule = sensitivity_override(EMBED_METADATA_PREFIX);
        assert!(rule.rewrite(b"<html>").is_err());
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = RewriteRules::new()
            .with(JsonFlagOverride::new("a", "host/a"))
            .with(JsonFlagOverride::new("b", "host/"));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.find("https://host/a?x=1").map(|r| r.name()), Some("a"));
        assert_eq!(rules.find("https://host/b").map(|r| r.name()), Some("b"));
        assert!(rules.find("https://other/").is_none());
    }
}
