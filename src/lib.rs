//! # webwx-sync
//!
//! Async client for the WeChat web protocol that logs in by QR code, keeps the
//! session alive with long-polls and batches incoming messages into periodic
//! notifications.
//!
//! This crate provides a high-level, async API for:
//! - Logging in by QR code and resolving the regional web host
//! - Long-polling the push hosts with failover
//! - Fetching, deduplicating and classifying new messages
//! - Delivering digests through a pluggable [`Notifier`], and forwarding them to a contact
//!
//! ## Features
//!
//! - **`integration-tests`**: Marks the live tests that need a phone to scan the QR code.
//!
//! ## Quick Start
//!
//! ```no_run
//! use webwx_sync::{SessionConfig, WebwxClient};
//!
//! # async fn example() -> webwx_sync::Result<()> {
//! let config = SessionConfig::builder()
//!     .recipient("me@example.com")
//!     .build()?;
//!
//! // Show the QR code however you like; here it is saved to disk.
//! let mut client = WebwxClient::connect(config, |qr| {
//!     std::fs::write("qr.jpg", &qr.image).ok();
//! })
//! .await?;
//!
//! // Runs until the session is invalidated.
//! let fatal = client.run().await;
//! eprintln!("stopped: {fatal}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Driving the Loop Yourself
//!
//! ```no_run
//! use webwx_sync::{SessionConfig, WebwxClient};
//!
//! # async fn example() -> webwx_sync::Result<()> {
//! # let config = SessionConfig::builder().build()?;
//! let mut client = WebwxClient::connect(config, |_| {}).await?;
//!
//! let result = client.poll().await?;
//! if result.has_data() {
//!     for message in client.sync().await? {
//!         println!("{}", message.line());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Using a Proxy
//!
//! ```
//! use webwx_sync::{ProxyConfig, SessionConfig};
//!
//! let config = SessionConfig::builder()
//!     .proxy(ProxyConfig::socks5("proxy.example.com", 1080).with_auth("user", "pass"))
//!     .build()
//!     .unwrap();
//! assert!(config.proxy.is_some());
//! ```
//!
//! ## Error Handling
//!
//! All errors implement `std::error::Error` and provide context. Use [`Error::is_retryable`]
//! and [`Error::is_fatal`] to decide what to do next:
//!
//! ```
//! use webwx_sync::Error;
//!
//! fn handle_error(error: &Error) {
//!     if error.is_fatal() {
//!         println!("Session is gone, log in again: {}", error);
//!     } else if error.is_retryable() {
//!         println!("Transient error, can retry: {}", error);
//!     } else {
//!         println!("Permanent error: {}", error);
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation. All network operations emit spans with
//! structured fields suitable for distributed tracing.
//!
//! ### Span Naming Convention
//!
//! - `WebwxClient::connect` - Login handshake
//! - `LoginFlow::obtain_uuid`, `LoginFlow::await_scan`, `LoginFlow::bootstrap`, ... - Login steps
//! - `poller::poll` - Long-poll with failover
//! - `sync::fetch` - Message fetch
//! - `WebwxClient::flush` - Notification delivery
//! - `WebwxClient::run` - The session loop
//!
//! ### Standard Fields
//!
//! - `host` - Resolved web host
//! - `push_host` - Push host being polled
//! - `retcode`, `selector` - Long-poll result
//! - `msg_id`, `msg_type` - Message identity
//!
//! Session keys and pass tickets never appear in logs or `Debug` output. Request
//! URLs are logged and stored in errors without their query string; see
//! [`transport::redact_url`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod config;
pub mod decoder;
pub mod error;
pub mod hosts;
pub mod notify;
pub mod proxy;
pub mod transport;

// Internal modules
mod client;
mod login;
mod model;
mod poller;
mod session;
mod sync;

// Re-exports for ergonomic API
pub use client::WebwxClient;
pub use config::{
    ForwardTarget, NotifyConfig, PollingConfig, SessionConfig, SessionConfigBuilder,
    TimeoutConfig,
};
pub use decoder::{LiteralDecoder, ResultDecoder};
pub use email_address::EmailAddress;
pub use error::{Error, ErrorCategory, Result};
pub use hosts::{HostProvider, PushHostRegistry, StaticHosts};
pub use login::{LoginState, QrCode};
pub use model::{LoginInfo, Member, Message, MessageKind, PollResult, SyncKey, SyncKeyEntry};
pub use notify::{Digest, NotificationBatch, Notifier, TracingNotifier};
pub use proxy::{ProxyConfig, ProxyScheme};
pub use session::{ContactDirectory, NameLookup, Session};
pub use transport::{HttpResponse, ReqwestTransport, Transport};
