//! Notification batching and delivery.
//!
//! Admitted messages are queued as `sender: content` lines in a
//! [`NotificationBatch`]. On every flush the whole queue is drained at once
//! and rendered into a [`Digest`], which a [`Notifier`] delivers.
//!
//! # Example
//!
//! ```
//! use webwx_sync::notify::{Digest, NotificationBatch};
//! use webwx_sync::config::NotifyConfig;
//!
//! let batch = NotificationBatch::new(10);
//! batch.push("Alice: hi".to_string());
//! batch.push("Bob: hello".to_string());
//!
//! let digest = Digest::render(batch.drain(), &NotifyConfig::default()).unwrap();
//! assert_eq!(digest.body, "Alice: hi\nBob: hello");
//! assert!(batch.is_empty());
//! ```

use crate::config::NotifyConfig;
use crate::error::Result;
use email_address::EmailAddress;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::info;

/// Bounded, ordered queue of notification lines.
///
/// Appends and drains take the same lock, so a line is either in the drained
/// batch or still queued, never both and never lost.
#[derive(Debug)]
pub struct NotificationBatch {
    lines: Mutex<Vec<String>>,
    capacity: usize,
}

impl NotificationBatch {
    /// Creates an empty batch holding at most `capacity` lines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Appends a line. Returns `false` and drops the line if the batch is full.
    pub fn push(&self, line: String) -> bool {
        let mut lines = self.lines.lock();
        if lines.len() >= self.capacity {
            return false;
        }
        lines.push(line);
        true
    }

    /// Removes and returns every queued line in order.
    #[must_use]
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }

    /// Number of queued lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Maximum number of queued lines.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    /// Notification subject.
    pub subject: String,
    /// Notification body; empty when detail is suppressed.
    pub body: String,
    /// The drained lines, kept for forwarding.
    pub lines: Vec<String>,
}

impl Digest {
    /// Renders drained lines. Returns `None` when there is nothing to send.
    #[must_use]
    pub fn render(lines: Vec<String>, config: &NotifyConfig) -> Option<Self> {
        if lines.is_empty() {
            return None;
        }

        let (subject, body) = if config.detail {
            (config.subject.clone(), lines.join("\n"))
        } else {
            (format!("{} ({})", config.subject, lines.len()), String::new())
        };

        Some(Self {
            subject,
            body,
            lines,
        })
    }

    /// The text sent to a forward target: always the full lines.
    #[must_use]
    pub fn forward_text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Delivers notifications to recipients.
///
/// Implement this to plug in a mail transport or any other channel.
pub trait Notifier: Send + Sync {
    /// Sends one notification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Delivery`](crate::Error::Delivery) if the channel rejects it.
    fn send<'a>(
        &'a self,
        recipients: &'a [EmailAddress],
        subject: &'a str,
        body: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Human-readable description used in logs.
    fn description(&self) -> &str;
}

/// A [`Notifier`] that writes notifications to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn send<'a>(
        &'a self,
        recipients: &'a [EmailAddress],
        subject: &'a str,
        body: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            info!(
                recipients = recipients.len(),
                subject = %subject,
                body = %body,
                "Notification"
            );
            Ok(())
        }
        .boxed()
    }

    fn description(&self) -> &str {
        "tracing log"
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_batch_is_bounded() {
        let batch = NotificationBatch::new(2);
        assert!(batch.push("a".into()));
        assert!(batch.push("b".into()));
        assert!(!batch.push("c".into()));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.drain(), vec!["a", "b"]);
        assert!(batch.push("d".into()));
    }

    #[test]
    fn test_drain_empties_atomically() {
        let batch = Arc::new(NotificationBatch::new(10_000));
        let producer = {
            let batch = Arc::clone(&batch);
            std::thread::spawn(move || {
                for i in 0..1000 {
                    batch.push(format!("line {i}"));
                }
            })
        };

        let mut drained = Vec::new();
        while drained.len() < 1000 {
            drained.extend(batch.drain());
            if producer.is_finished() {
                drained.extend(batch.drain());
                break;
            }
        }
        producer.join().unwrap();
        drained.extend(batch.drain());

        assert_eq!(drained.len(), 1000);
        assert_eq!(drained[0], "line 0");
        assert_eq!(drained[999], "line 999");
    }

    #[test]
    fn test_render_with_detail() {
        let digest =
            Digest::render(vec!["A: x".into(), "B: y".into()], &NotifyConfig::default()).unwrap();
        assert_eq!(digest.subject, "New WeChat messages");
        assert_eq!(digest.body, "A: x\nB: y");
    }

    #[test]
    fn test_render_without_detail() {
        let config = NotifyConfig {
            detail: false,
            ..NotifyConfig::default()
        };
        let digest = Digest::render(vec!["A: x".into(), "B: y".into()], &config).unwrap();
        assert_eq!(digest.subject, "New WeChat messages (2)");
        assert!(digest.body.is_empty());
        assert_eq!(digest.forward_text(), "A: x\nB: y");
    }

    #[test]
    fn test_render_nothing() {
        assert!(Digest::render(Vec::new(), &NotifyConfig::default()).is_none());
    }

    #[tokio::test]
    async fn test_tracing_notifier() {
        let recipients = vec!["me@example.com".parse::<EmailAddress>().unwrap()];
        TracingNotifier
            .send(&recipients, "subject", "body")
            .await
            .unwrap();
        assert_eq!(TracingNotifier.description(), "tracing log");
    }
}
