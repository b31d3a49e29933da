//! Example: Watch a session and send periodic digests.
//!
//! Logs in (issuing a fresh QR code whenever the previous one expires), then
//! runs the poll/sync/notify loop until the session is invalidated. Digests
//! go to the log; plug in your own [`Notifier`] to send mail instead.
//!
//! # Usage
//!
//! ```bash
//! export WEBWX_RECIPIENT="you@example.com"
//! # Optional: also forward each digest to a contact
//! export WEBWX_FORWARD_TO="Alice"
//! # Optional: send only a count, not the message text
//! export WEBWX_NO_DETAIL=1
//!
//! cargo run --example watch
//! ```
//!
//! [`Notifier`]: webwx_sync::Notifier

use std::env;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use webwx_sync::{Error, ForwardTarget, SessionConfig, TracingNotifier, WebwxClient};

const QR_PATH: &str = "qr.jpg";

fn build_config() -> webwx_sync::Result<SessionConfig> {
    let mut builder = SessionConfig::builder().notify_interval(Duration::from_secs(60));

    if let Ok(recipient) = env::var("WEBWX_RECIPIENT") {
        builder = builder.recipient(recipient);
    }
    if let Ok(name) = env::var("WEBWX_FORWARD_TO") {
        builder = builder.forward(ForwardTarget::NickName(name));
    }
    if env::var("WEBWX_NO_DETAIL").is_ok() {
        builder = builder.detail(false);
    }

    builder.build()
}

async fn login() -> webwx_sync::Result<WebwxClient> {
    loop {
        let result = WebwxClient::connect(build_config()?, |qr| {
            match std::fs::write(QR_PATH, &qr.image) {
                Ok(()) => println!("Scan {QR_PATH} to log in (uuid {})", qr.uuid),
                Err(e) => eprintln!("Could not save QR image: {e}"),
            }
        })
        .await;

        match result {
            Err(Error::ScanTimeout { attempts }) => {
                tracing::warn!(attempts, "QR code expired, issuing a new one");
            }
            other => return other,
        }
    }
}

#[tokio::main]
async fn main() -> webwx_sync::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webwx_sync=info")),
        )
        .init();

    let mut client = login().await?.with_notifier(TracingNotifier);
    tracing::info!(
        host = %client.session().host(),
        contacts = client.session().contacts().len(),
        "Watching for messages"
    );

    Err(client.run().await)
}
