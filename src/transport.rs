//! HTTP transport used by the login flow, the poller and the fetch step.
//!
//! The [`Transport`] trait exposes only the two request shapes the protocol
//! needs. [`ReqwestTransport`] is the production implementation: one cookie
//! jar for the whole session, a fixed browser identity, and redirects
//! disabled so the bootstrap step can observe the `301`.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, REFERER};
use reqwest::redirect;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument};

/// A minimal HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The final request URL.
    pub url: String,
    /// The response body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns the body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fails with [`Error::HttpStatus`] unless the status is 2xx.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HttpStatus`] for non-2xx statuses.
    pub fn ensure_success(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::HttpStatus {
                url: redact_url(&self.url),
                status: self.status,
            })
        }
    }
}

/// An async HTTP client carrying the session's cookies and browser identity.
pub trait Transport: Send + Sync {
    /// Sends a GET request.
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<HttpResponse>>;

    /// Sends a POST request with a JSON body.
    fn post_json<'a>(&'a self, url: &'a str, body: Vec<u8>) -> BoxFuture<'a, Result<HttpResponse>>;
}

/// A [`reqwest`]-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds the client from the session configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for unusable header values and
    /// [`Error::BuildClient`] if reqwest rejects the configuration.
    #[instrument(
        name = "ReqwestTransport::new",
        skip_all,
        fields(proxy_enabled = config.proxy.is_some())
    )]
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let referer =
            HeaderValue::from_str(&config.referer).map_err(|_| Error::InvalidConfig {
                message: format!("referer is not a valid header value: {}", config.referer),
            })?;
        headers.insert(REFERER, referer);

        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(redirect::Policy::none())
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .connect_timeout(config.timeouts.connect);

        if let Some(proxy) = &config.proxy {
            debug!(proxy = %proxy, "Routing requests through proxy");
            builder = builder.proxy(proxy.to_reqwest()?);
        }

        let inner = builder
            .build()
            .map_err(|source| Error::BuildClient { source })?;

        Ok(Self { inner })
    }

    async fn collect(url: &str, request: reqwest::RequestBuilder) -> Result<HttpResponse> {
        let shown = redact_url(url);
        debug!(url = %shown, "Sending request");

        let failed = |source: reqwest::Error| Error::Request {
            url: shown.clone(),
            source: source.without_url(),
        };
        let resp = request.send().await.map_err(failed)?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp.bytes().await.map_err(failed)?;

        debug!(status, bytes = body.len(), "Received response");

        Ok(HttpResponse {
            status,
            url: final_url,
            body: body.to_vec(),
        })
    }
}

impl Transport for ReqwestTransport {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<HttpResponse>> {
        Self::collect(url, self.inner.get(url)).boxed()
    }

    fn post_json<'a>(&'a self, url: &'a str, body: Vec<u8>) -> BoxFuture<'a, Result<HttpResponse>> {
        let request = self
            .inner
            .post(url)
            .header(CONTENT_TYPE, "application/json;charset=UTF-8")
            .body(body);
        Self::collect(url, request).boxed()
    }
}

/// Strips the query and fragment from `url`, leaving scheme, host and path.
///
/// Session URLs carry `skey`, `sid`, `uin` and `pass_ticket` in the query
/// string. Only the stripped form goes into errors and log fields, and
/// custom [`Transport`] implementations should do the same.
///
/// ```
/// use webwx_sync::transport::redact_url;
///
/// assert_eq!(
///     redact_url("https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxsync?sid=1&skey=%40crypt_x"),
///     "https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxsync"
/// );
/// ```
#[must_use]
pub fn redact_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            let _ = parsed.set_password(None);
            parsed.into()
        }
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    }
}

/// Bounds a request by `limit`, mapping expiry to [`Error::RequestTimeout`].
///
/// Errors coming back from the transport are passed through
/// [`Error::redacted`], so no caller sees a credential-bearing URL.
pub(crate) async fn within<T>(
    limit: Duration,
    url: &str,
    request: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, request).await {
        Ok(result) => result.map_err(Error::redacted),
        Err(_) => Err(Error::RequestTimeout {
            url: redact_url(url),
            timeout: limit,
        }),
    }
}

/// Builds a URL with encoded query parameters.
pub(crate) fn with_query(base: &str, params: &[(&str, &str)]) -> Result<String> {
    reqwest::Url::parse_with_params(base, params)
        .map(String::from)
        .map_err(|e| Error::InvalidConfig {
            message: format!("invalid endpoint URL {base}: {e}"),
        })
}

/// Current Unix time in milliseconds, used as a cache-buster.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
