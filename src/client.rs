//! Web session client: login, long-poll, sync and notification.
//!
//! The [`WebwxClient`] is the main entry point for this crate. It provides
//! async methods to:
//!
//! - Log in by QR code ([`connect`](WebwxClient::connect))
//! - Poll the push hosts and fetch new messages ([`tick`](WebwxClient::tick))
//! - Deliver queued notifications ([`flush`](WebwxClient::flush))
//! - Run all of the above until the session dies ([`run`](WebwxClient::run))
//!
//! # Example
//!
//! ```no_run
//! use webwx_sync::{SessionConfig, WebwxClient};
//!
//! # async fn example() -> webwx_sync::Result<()> {
//! let config = SessionConfig::builder()
//!     .recipient("me@example.com")
//!     .build()?;
//!
//! let mut client = WebwxClient::connect(config, |qr| {
//!     std::fs::write("qr.jpg", &qr.image).ok();
//! })
//! .await?;
//!
//! let fatal = client.run().await;
//! eprintln!("session ended: {fatal}");
//! # Ok(())
//! # }
//! ```

use crate::config::{ForwardTarget, SessionConfig};
use crate::error::{Error, Result};
use crate::login::{check_ret, decode, encode, LoginFlow, QrCode};
use crate::model::{Message, OutgoingMsg, PollResult, SendMsgRequest, SendMsgResponse};
use crate::notify::{Digest, NotificationBatch, Notifier, TracingNotifier};
use crate::poller;
use crate::session::{NameLookup, Session};
use crate::sync::{self, Inbox};
use crate::transport::{with_query, within, ReqwestTransport, Transport};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

const SEND_MSG_PATH: &str = "/cgi-bin/mmwebwx-bin/webwxsendmsg";

/// Async client for one logged-in web session.
///
/// Create using [`WebwxClient::connect`].
///
/// # Lifecycle
///
/// 1. Log in with [`connect`](Self::connect); the QR callback fires once
/// 2. Either call [`run`](Self::run), or drive [`tick`](Self::tick) and
///    [`flush`](Self::flush) yourself
/// 3. When the session is invalidated, log in again with a fresh client
pub struct WebwxClient {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    session: Session,
    inbox: Inbox,
    batch: NotificationBatch,
    notifier: Arc<dyn Notifier>,
    last_flush: Instant,
}

impl WebwxClient {
    /// Logs in and prepares the session.
    ///
    /// `on_qr` receives the QR image to display; the user has
    /// `polling.scan_attempts` status checks to scan and confirm it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The QR code was not confirmed in time ([`Error::ScanTimeout`]); call again for a new code
    /// - The server rejected the login ([`Error::LoginRejected`])
    /// - A request failed or a response had an unexpected shape
    #[instrument(
        name = "WebwxClient::connect",
        skip_all,
        fields(
            login_url = %config.login_url,
            proxy_enabled = config.proxy.is_some()
        )
    )]
    pub async fn connect(
        config: SessionConfig,
        on_qr: impl FnMut(&QrCode) + Send,
    ) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Self::connect_with_transport(config, Arc::new(transport), on_qr).await
    }

    /// Logs in over a caller-supplied transport.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn connect_with_transport(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        mut on_qr: impl FnMut(&QrCode) + Send,
    ) -> Result<Self> {
        let session = LoginFlow::new(transport.as_ref(), &config)
            .run(&mut on_qr)
            .await?;

        info!(
            host = %session.host(),
            contacts = session.contacts().len(),
            "Session ready"
        );

        Ok(Self::from_session(config, transport, session))
    }

    pub(crate) fn from_session(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        session: Session,
    ) -> Self {
        let batch = NotificationBatch::new(config.notify.capacity);
        Self {
            transport,
            config,
            session,
            inbox: Inbox::default(),
            batch,
            notifier: Arc::new(TracingNotifier),
            last_flush: Instant::now(),
        }
    }

    /// Replaces the notifier (default: [`TracingNotifier`]).
    #[must_use]
    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    /// Long-polls the push hosts once, with failover.
    ///
    /// # Errors
    ///
    /// Returns the last error seen once every host failed in every pass.
    /// [`Error::SessionInvalid`] means the session is gone.
    pub async fn poll(&self) -> Result<PollResult> {
        poller::poll(self.transport.as_ref(), &self.config, &self.session).await
    }

    /// Fetches pending messages and queues the new direct ones for notification.
    ///
    /// Returns every newly seen displayable message.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch failed; the cursor is then left unchanged.
    pub async fn sync(&mut self) -> Result<Vec<Message>> {
        sync::sync(
            self.transport.as_ref(),
            &self.config,
            &mut self.session,
            &mut self.inbox,
            &self.batch,
        )
        .await
    }

    /// One loop iteration: poll, then sync if the selector asks for it.
    ///
    /// Sync failures are logged and swallowed.
    ///
    /// # Errors
    ///
    /// Returns the poll error; every poll error ends the session.
    #[instrument(name = "WebwxClient::tick", skip_all)]
    pub async fn tick(&mut self) -> Result<PollResult> {
        let result = self.poll().await?;

        if result.has_data() {
            debug!(selector = %result.selector, "Messages pending");
            if let Err(e) = self.sync().await {
                warn!(error = %e, category = %e.category(), "Sync failed, retrying next cycle");
            }
        }

        Ok(result)
    }

    /// Drains the notification queue and delivers it.
    ///
    /// Returns the number of lines delivered (zero when nothing was queued).
    /// The digest also goes to the configured forward target, if any.
    ///
    /// # Errors
    ///
    /// Returns the first delivery error; the drained lines are not requeued.
    #[instrument(name = "WebwxClient::flush", skip_all)]
    pub async fn flush(&mut self) -> Result<usize> {
        self.last_flush = Instant::now();

        let Some(digest) = Digest::render(self.batch.drain(), &self.config.notify) else {
            return Ok(0);
        };
        let count = digest.lines.len();
        let mut outcome = Ok(count);

        if let Err(e) = self
            .notifier
            .send(self.config.recipients(), &digest.subject, &digest.body)
            .await
        {
            warn!(error = %e, notifier = %self.notifier.description(), "Notification failed");
            outcome = Err(e);
        }

        if let Some(target) = self.config.forward.clone() {
            if let Err(e) = self.forward(&target, &digest).await {
                warn!(error = %e, target = ?target, "Forwarding failed");
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }

        info!(count, "Flushed notifications");
        outcome
    }

    /// Runs the poll/sync/notify loop until a poll fails.
    ///
    /// Before returning, any queued lines are flushed and an alert with the
    /// error in its subject is sent through the notifier.
    #[instrument(name = "WebwxClient::run", skip_all, fields(host = %self.session.host()))]
    pub async fn run(&mut self) -> Error {
        loop {
            if self.last_flush.elapsed() >= self.config.notify.interval {
                if let Err(e) = self.flush().await {
                    warn!(error = %e, "Flush failed");
                }
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, category = %e.category(), fatal = e.is_fatal(), "Sync check failed, stopping");
                self.alert(&e).await;
                return e;
            }

            tokio::time::sleep(self.config.polling.loop_interval).await;
        }
    }

    /// Sends a text message to a contact identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the request failed or the server rejected it.
    #[instrument(name = "WebwxClient::send_text", skip(self, content), fields(chars = content.chars().count()))]
    pub async fn send_text(&mut self, to: &str, content: &str) -> Result<()> {
        let from = match self.session.user() {
            Some(user) => user.user_name.clone(),
            None => {
                return Err(Error::ProtocolMismatch {
                    endpoint: "webwxinit",
                    detail: "own identity unknown, cannot send".into(),
                })
            }
        };

        let local_id = self.session.next_nonce().to_string();
        let url = with_query(
            &self.session.web_url(SEND_MSG_PATH),
            &[("pass_ticket", self.session.pass_ticket())],
        )?;
        let body = encode(&SendMsgRequest {
            base_request: self.session.base_request(),
            msg: OutgoingMsg {
                kind: 1,
                content,
                from_user_name: &from,
                to_user_name: to,
                local_id: &local_id,
                client_msg_id: &local_id,
            },
            scene: 0,
        })?;

        let resp = within(
            self.config.timeouts.request,
            &url,
            self.transport.post_json(&url, body),
        )
        .await?
        .ensure_success()?;
        let resp: SendMsgResponse = decode("webwxsendmsg", &resp.body)?;
        check_ret(
            "webwxsendmsg",
            resp.base_response.ret,
            resp.base_response.err_msg,
        )?;

        debug!("Message sent");
        Ok(())
    }

    /// Returns the session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of lines waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Private methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolves the forward target and sends the digest lines to it.
    async fn forward(&mut self, target: &ForwardTarget, digest: &Digest) -> Result<()> {
        let to = match target {
            ForwardTarget::UserName(user_name) => user_name.clone(),
            ForwardTarget::NickName(name) => match self.session.contacts().find_by_name(name) {
                NameLookup::Unique(user_name) => user_name.to_string(),
                NameLookup::Ambiguous(matches) => {
                    return Err(Error::AmbiguousContact {
                        name: name.clone(),
                        matches,
                    })
                }
                NameLookup::Missing => return Err(Error::ContactNotFound { name: name.clone() }),
            },
        };

        self.send_text(&to, &digest.forward_text()).await
    }

    /// Flushes what is left and reports the fatal error.
    async fn alert(&mut self, cause: &Error) {
        if let Err(e) = self.flush().await {
            warn!(error = %e, "Final flush failed");
        }

        let subject = format!("SyncCheck failed: {cause}");
        if let Err(e) = self
            .notifier
            .send(self.config.recipients(), &subject, "")
            .await
        {
            warn!(error = %e, "Failure alert not delivered");
        }
    }
}

impl std::fmt::Debug for WebwxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebwxClient")
            .field("host", &self.session.host())
            .field("notifier", &self.notifier.description())
            .field("pending", &self.batch.len())
            .field("seen", &self.inbox.len())
            .finish_non_exhaustive()
    }
}
