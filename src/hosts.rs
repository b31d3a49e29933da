//! Push host discovery for the long-poll endpoint.
//!
//! After login the server assigns a regional web host (for example
//! `wx2.qq.com`). Long-polls go to a separate set of push hosts for that
//! region, and their availability varies, so the poller fails over across an
//! ordered candidate list supplied by a [`HostProvider`].
//!
//! # Example
//!
//! ```
//! use webwx_sync::hosts::{HostProvider, PushHostRegistry};
//!
//! let mut registry = PushHostRegistry::with_defaults();
//! assert_eq!(registry.push_hosts("wx2.qq.com")[0], "webpush.wx2.qq.com");
//!
//! registry.register("wx9.example.com", ["push-a.example.com", "push-b.example.com"]);
//! assert_eq!(registry.push_hosts("wx9.example.com").len(), 2);
//!
//! // Unknown regions fall back to the conventional name
//! assert_eq!(registry.push_hosts("web5.example.com"), vec!["webpush.web5.example.com"]);
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

/// Supplies the ordered push hosts to try for a resolved web host.
pub trait HostProvider: Send + Sync + std::fmt::Debug {
    /// Returns candidate push hosts, most preferred first.
    fn push_hosts(&self, web_host: &str) -> Vec<String>;
}

/// Known web hosts and the push hosts that serve them.
static KNOWN_PUSH_HOSTS: LazyLock<HashMap<&'static str, &'static [&'static str]>> =
    LazyLock::new(|| {
        let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();

        // Mainland
        m.insert(
            "wx.qq.com",
            &["webpush.wx.qq.com", "webpush.weixin.qq.com", "webpush2.weixin.qq.com"],
        );
        m.insert("wx2.qq.com", &["webpush.wx2.qq.com", "webpush2.wx2.qq.com"]);
        m.insert("wx8.qq.com", &["webpush.wx8.qq.com"]);
        m.insert("qq.com", &["webpush.weixin.qq.com"]);

        // International
        m.insert("web.wechat.com", &["webpush.web.wechat.com", "webpush.wechat.com"]);
        m.insert("web2.wechat.com", &["webpush.web2.wechat.com", "webpush.wechat.com"]);
        m.insert("wechat.com", &["webpush.wechat.com"]);

        m
    });

/// A customizable registry mapping web hosts to push hosts.
///
/// Resolution order:
/// 1. Custom mappings (added via [`Self::register`])
/// 2. Built-in defaults (if [`Self::with_defaults`] was used)
/// 3. Fallback to `webpush.{host}`
#[derive(Debug, Clone)]
pub struct PushHostRegistry {
    custom: HashMap<String, Vec<String>>,
    use_defaults: bool,
}

impl Default for PushHostRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PushHostRegistry {
    /// Creates an empty registry without built-in defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            custom: HashMap::new(),
            use_defaults: false,
        }
    }

    /// Creates a registry that includes the built-in mappings.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            custom: HashMap::new(),
            use_defaults: true,
        }
    }

    /// Registers the push hosts for a web host, replacing any existing mapping.
    pub fn register<I, H>(&mut self, web_host: impl Into<String>, push_hosts: I)
    where
        I: IntoIterator<Item = H>,
        H: Into<String>,
    {
        self.custom.insert(
            web_host.into().to_lowercase(),
            push_hosts.into_iter().map(Into::into).collect(),
        );
    }

    /// Removes a custom mapping. Built-in defaults are unaffected.
    pub fn unregister(&mut self, web_host: &str) -> Option<Vec<String>> {
        self.custom.remove(&web_host.to_lowercase())
    }

    /// Returns `true` if the web host has an explicit mapping.
    #[must_use]
    pub fn is_known(&self, web_host: &str) -> bool {
        let host = web_host.to_lowercase();
        self.custom.contains_key(&host)
            || (self.use_defaults && KNOWN_PUSH_HOSTS.contains_key(host.as_str()))
    }
}

impl HostProvider for PushHostRegistry {
    fn push_hosts(&self, web_host: &str) -> Vec<String> {
        let host = web_host.to_lowercase();

        if let Some(hosts) = self.custom.get(&host) {
            return hosts.clone();
        }

        if self.use_defaults {
            if let Some(hosts) = KNOWN_PUSH_HOSTS.get(host.as_str()) {
                return hosts.iter().map(|h| (*h).to_string()).collect();
            }
        }

        vec![format!("webpush.{host}")]
    }
}

/// A fixed host list, independent of the resolved region.
#[derive(Debug, Clone)]
pub struct StaticHosts(pub Vec<String>);

impl HostProvider for StaticHosts {
    fn push_hosts(&self, _web_host: &str) -> Vec<String> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_ordered() {
        let registry = PushHostRegistry::with_defaults();
        assert_eq!(
            registry.push_hosts("wx.qq.com"),
            vec!["webpush.wx.qq.com", "webpush.weixin.qq.com", "webpush2.weixin.qq.com"]
        );
    }

    #[test]
    fn test_empty_registry_falls_back() {
        let registry = PushHostRegistry::new();
        assert!(!registry.is_known("wx.qq.com"));
        assert_eq!(registry.push_hosts("wx.qq.com"), vec!["webpush.wx.qq.com"]);
    }

    #[test]
    fn test_custom_overrides_default() {
        let mut registry = PushHostRegistry::with_defaults();
        registry.register("WX2.qq.com", ["edge.example.com"]);
        assert!(registry.is_known("wx2.QQ.com"));
        assert_eq!(registry.push_hosts("wx2.qq.com"), vec!["edge.example.com"]);

        registry.unregister("wx2.qq.com");
        assert_eq!(registry.push_hosts("wx2.qq.com")[0], "webpush.wx2.qq.com");
    }

    #[test]
    fn test_static_hosts_ignore_region() {
        let hosts = StaticHosts(vec!["a".into(), "b".into()]);
        assert_eq!(hosts.push_hosts("anything"), vec!["a", "b"]);
    }
}
