//! Configuration for a web session.
//!
//! Everything that used to be a hardcoded constant (app id, browser identity,
//! retry bounds, intervals) is set here and passed into the client.
//!
//! ```
//! use webwx_sync::SessionConfig;
//! use std::time::Duration;
//!
//! let config = SessionConfig::builder()
//!     .recipient("me@example.com")
//!     .notify_interval(Duration::from_secs(120))
//!     .build()
//!     .expect("valid config");
//! assert_eq!(config.recipients().len(), 1);
//! ```

use crate::decoder::{LiteralDecoder, ResultDecoder};
use crate::error::{Error, Result};
use crate::hosts::{HostProvider, PushHostRegistry};
use crate::proxy::ProxyConfig;
use email_address::EmailAddress;
use std::sync::Arc;
use std::time::Duration;

/// Default web client app id.
pub const DEFAULT_APP_ID: &str = "wx782c26e4c19acffb";

/// Default browser identity.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/61.0.3163.79 Safari/537.36";

/// Default login host.
pub const DEFAULT_LOGIN_URL: &str = "https://login.weixin.qq.com";

/// Default referer.
pub const DEFAULT_REFERER: &str = "https://wx.qq.com/";

/// Where forwarded digests go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardTarget {
    /// A contact display name, looked up in the directory at flush time.
    ///
    /// Display names are not unique; an ambiguous name is reported and skipped.
    NickName(String),
    /// A contact identifier from the current session.
    UserName(String),
}

/// Configuration for one session.
///
/// Create using [`SessionConfig::builder()`].
#[derive(Clone)]
pub struct SessionConfig {
    /// Web client app id sent with the login request.
    pub app_id: String,
    /// Locale requested at login.
    pub locale: String,
    /// `User-Agent` header for every request.
    pub user_agent: String,
    /// `Referer` header for every request.
    pub referer: String,
    /// Base URL of the login host.
    pub login_url: String,
    /// Optional proxy for every request.
    pub proxy: Option<ProxyConfig>,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
    /// Retry bounds and loop pacing.
    pub polling: PollingConfig,
    /// Notification batching.
    pub notify: NotifyConfig,
    /// Optional contact that also receives each digest.
    pub forward: Option<ForwardTarget>,
    recipients: Vec<EmailAddress>,
    hosts: Arc<dyn HostProvider>,
    decoder: Arc<dyn ResultDecoder>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("app_id", &self.app_id)
            .field("locale", &self.locale)
            .field("login_url", &self.login_url)
            .field("proxy", &self.proxy.as_ref().map(ToString::to_string))
            .field("timeouts", &self.timeouts)
            .field("polling", &self.polling)
            .field("notify", &self.notify)
            .field("forward", &self.forward)
            .field("recipients", &self.recipients.len())
            .field("hosts", &self.hosts)
            .field("decoder", &self.decoder.description())
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Notification recipients.
    #[must_use]
    pub fn recipients(&self) -> &[EmailAddress] {
        &self.recipients
    }

    /// The push host provider.
    #[must_use]
    pub fn hosts(&self) -> &dyn HostProvider {
        self.hosts.as_ref()
    }

    /// The response decoder.
    #[must_use]
    pub fn decoder(&self) -> &dyn ResultDecoder {
        self.decoder.as_ref()
    }
}

/// Timeout configuration.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing a connection.
    pub connect: Duration,
    /// Timeout for ordinary requests.
    pub request: Duration,
    /// Timeout for one long-poll; must exceed the server's hold time.
    pub long_poll: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(30),
            long_poll: Duration::from_secs(35),
        }
    }
}

/// Retry bounds and loop pacing.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Scan-status checks before giving up on the QR code.
    pub scan_attempts: u32,
    /// Full passes over the push host list before the poller gives up.
    pub poll_passes: u32,
    /// Pause between passes.
    pub pass_backoff: Duration,
    /// Pause between loop iterations.
    pub loop_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            scan_attempts: 10,
            poll_passes: 3,
            pass_backoff: Duration::from_secs(1),
            loop_interval: Duration::from_millis(10),
        }
    }
}

/// Notification batching.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Flush period.
    pub interval: Duration,
    /// Include message lines in the digest; otherwise send only a count.
    pub detail: bool,
    /// Digest subject.
    pub subject: String,
    /// Maximum queued lines; further lines are dropped until the next flush.
    pub capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            detail: true,
            subject: "New WeChat messages".to_string(),
            capacity: 9999,
        }
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    app_id: Option<String>,
    locale: Option<String>,
    user_agent: Option<String>,
    referer: Option<String>,
    login_url: Option<String>,
    proxy: Option<ProxyConfig>,
    timeouts: Option<TimeoutConfig>,
    polling: Option<PollingConfig>,
    notify: Option<NotifyConfig>,
    forward: Option<ForwardTarget>,
    recipients: Vec<String>,
    hosts: Option<Arc<dyn HostProvider>>,
    decoder: Option<Arc<dyn ResultDecoder>>,
}

impl SessionConfigBuilder {
    /// Sets the web client app id.
    #[must_use]
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Sets the login locale.
    #[must_use]
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Sets the `User-Agent` header.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets the `Referer` header.
    #[must_use]
    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Sets the login host base URL.
    #[must_use]
    pub fn login_url(mut self, url: impl Into<String>) -> Self {
        self.login_url = Some(url.into());
        self
    }

    /// Routes every request through a proxy.
    #[must_use]
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the ordinary request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .request = timeout;
        self
    }

    /// Sets the long-poll timeout.
    #[must_use]
    pub fn long_poll_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .long_poll = timeout;
        self
    }

    /// Sets polling configuration.
    #[must_use]
    pub fn polling(mut self, polling: PollingConfig) -> Self {
        self.polling = Some(polling);
        self
    }

    /// Sets the number of scan-status checks.
    #[must_use]
    pub fn scan_attempts(mut self, attempts: u32) -> Self {
        self.polling
            .get_or_insert_with(PollingConfig::default)
            .scan_attempts = attempts;
        self
    }

    /// Sets the number of passes over the push host list.
    #[must_use]
    pub fn poll_passes(mut self, passes: u32) -> Self {
        self.polling
            .get_or_insert_with(PollingConfig::default)
            .poll_passes = passes;
        self
    }

    /// Sets the pause between passes.
    #[must_use]
    pub fn pass_backoff(mut self, backoff: Duration) -> Self {
        self.polling
            .get_or_insert_with(PollingConfig::default)
            .pass_backoff = backoff;
        self
    }

    /// Sets notification configuration.
    #[must_use]
    pub fn notify(mut self, notify: NotifyConfig) -> Self {
        self.notify = Some(notify);
        self
    }

    /// Sets the flush period.
    #[must_use]
    pub fn notify_interval(mut self, interval: Duration) -> Self {
        self.notify
            .get_or_insert_with(NotifyConfig::default)
            .interval = interval;
        self
    }

    /// Includes or suppresses message lines in digests.
    #[must_use]
    pub fn detail(mut self, detail: bool) -> Self {
        self.notify.get_or_insert_with(NotifyConfig::default).detail = detail;
        self
    }

    /// Adds a notification recipient (validated at build time).
    #[must_use]
    pub fn recipient(mut self, address: impl Into<String>) -> Self {
        self.recipients.push(address.into());
        self
    }

    /// Also forwards each digest to a contact.
    #[must_use]
    pub fn forward(mut self, target: ForwardTarget) -> Self {
        self.forward = Some(target);
        self
    }

    /// Replaces the push host provider.
    #[must_use]
    pub fn host_provider(mut self, hosts: impl HostProvider + 'static) -> Self {
        self.hosts = Some(Arc::new(hosts));
        self
    }

    /// Replaces the response decoder.
    #[must_use]
    pub fn decoder(mut self, decoder: impl ResultDecoder + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL, recipient or bound is invalid.
    pub fn build(self) -> Result<SessionConfig> {
        let login_url = self
            .login_url
            .unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string());
        validate_url("login_url", &login_url)?;

        let app_id = self.app_id.unwrap_or_else(|| DEFAULT_APP_ID.to_string());
        if app_id.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "app_id must not be empty".into(),
            });
        }

        let recipients = self
            .recipients
            .iter()
            .map(String::as_str)
            .map(validate_recipient)
            .collect::<Result<Vec<_>>>()?;

        let polling = self.polling.unwrap_or_default();
        if polling.scan_attempts == 0 || polling.poll_passes == 0 {
            return Err(Error::InvalidConfig {
                message: "scan_attempts and poll_passes must be at least 1".into(),
            });
        }

        let notify = self.notify.unwrap_or_default();
        if notify.capacity == 0 {
            return Err(Error::InvalidConfig {
                message: "notification capacity must be at least 1".into(),
            });
        }

        Ok(SessionConfig {
            app_id,
            locale: self.locale.unwrap_or_else(|| "en_US".to_string()),
            user_agent: self
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            referer: self.referer.unwrap_or_else(|| DEFAULT_REFERER.to_string()),
            login_url: login_url.trim_end_matches('/').to_string(),
            proxy: self.proxy,
            timeouts: self.timeouts.unwrap_or_default(),
            polling,
            notify,
            forward: self.forward,
            recipients,
            hosts: self
                .hosts
                .unwrap_or_else(|| Arc::new(PushHostRegistry::with_defaults())),
            decoder: self.decoder.unwrap_or_else(|| Arc::new(LiteralDecoder::new())),
        })
    }
}

fn validate_url(field: &str, url: &str) -> Result<()> {
    reqwest::Url::parse(url)
        .map(|_| ())
        .map_err(|e| Error::InvalidConfig {
            message: format!("{field} is not a valid URL ({e}): {url}"),
        })
}

fn validate_recipient(address: &str) -> Result<EmailAddress> {
    EmailAddress::parse_with_options(address, email_address::Options::default()).map_err(|_| {
        Error::InvalidRecipient {
            address: address.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::StaticHosts;

    #[test]
    fn test_builder_defaults() {
        let config = SessionConfig::builder().build().unwrap();

        assert_eq!(config.app_id, DEFAULT_APP_ID);
        assert_eq!(config.login_url, DEFAULT_LOGIN_URL);
        assert_eq!(config.polling.scan_attempts, 10);
        assert_eq!(config.polling.poll_passes, 3);
        assert_eq!(config.notify.interval, Duration::from_secs(60));
        assert!(config.notify.detail);
        assert!(config.recipients().is_empty());
        assert_eq!(config.hosts().push_hosts("wx2.qq.com")[0], "webpush.wx2.qq.com");
    }

    #[test]
    fn test_builder_full() {
        let config = SessionConfig::builder()
            .app_id("wx_custom")
            .login_url("https://login.example.com/")
            .proxy(ProxyConfig::socks5("proxy.local", 1080))
            .long_poll_timeout(Duration::from_secs(60))
            .poll_passes(5)
            .detail(false)
            .recipient("me@example.com")
            .forward(ForwardTarget::NickName("Alice".into()))
            .host_provider(StaticHosts(vec!["push.example.com".into()]))
            .build()
            .unwrap();

        assert_eq!(config.app_id, "wx_custom");
        assert_eq!(config.login_url, "https://login.example.com");
        assert!(config.proxy.is_some());
        assert_eq!(config.timeouts.long_poll, Duration::from_secs(60));
        assert_eq!(config.polling.poll_passes, 5);
        assert!(!config.notify.detail);
        assert_eq!(config.recipients()[0].as_str(), "me@example.com");
        assert_eq!(config.hosts().push_hosts("wx.qq.com"), vec!["push.example.com"]);
    }

    #[test]
    fn test_invalid_recipient() {
        let err = SessionConfig::builder()
            .recipient("not-an-email")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRecipient { .. }));
    }

    #[test]
    fn test_invalid_login_url() {
        let result = SessionConfig::builder().login_url("login host").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_bounds_rejected() {
        assert!(SessionConfig::builder().scan_attempts(0).build().is_err());
        assert!(SessionConfig::builder().poll_passes(0).build().is_err());
    }

    #[test]
    fn test_debug_output() {
        let config = SessionConfig::builder()
            .proxy(ProxyConfig::http("proxy.local", 3128).with_auth("u", "hunter2"))
            .build()
            .unwrap();
        let debug_str = format!("{config:?}");
        assert!(debug_str.contains("SessionConfig"));
        assert!(!debug_str.contains("hunter2"));
    }
}
