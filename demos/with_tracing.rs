//! Example: Using tracing for observability.
//!
//! This example demonstrates how to enable structured logging using
//! the `tracing` ecosystem. All network operations in webwx-sync emit
//! tracing spans and events.
//!
//! # Usage
//!
//! ```bash
//! # Set log level (trace, debug, info, warn, error)
//! export RUST_LOG=webwx_sync=debug
//!
//! cargo run --example with_tracing
//! ```

use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;
use webwx_sync::{SessionConfig, WebwxClient};

#[tokio::main]
async fn main() -> webwx_sync::Result<()> {
    // Initialize tracing subscriber with environment filter
    // Use RUST_LOG environment variable to control log levels
    // Example: RUST_LOG=webwx_sync=debug,info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webwx_sync=info")),
        )
        .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    tracing::info!("Starting webwx-sync example");

    let config = SessionConfig::builder()
        .scan_attempts(6)
        .long_poll_timeout(Duration::from_secs(40))
        .build()?;

    tracing::debug!(?config, "Configuration built successfully");

    // Login emits one span per handshake step
    let mut client = WebwxClient::connect(config, |qr| {
        if let Err(e) = std::fs::write("qr.jpg", &qr.image) {
            tracing::error!(error = %e, "Could not save QR image");
        } else {
            println!("\nScan qr.jpg with your phone");
        }
    })
    .await?;

    tracing::info!(host = %client.session().host(), "Logged in, polling");

    // A single poll emits spans for every push host tried
    let result = client.poll().await?;
    if result.has_data() {
        for message in client.sync().await? {
            println!("{}", message.line());
        }
    } else {
        println!("\nNothing new");
    }

    tracing::info!("Example completed successfully");

    Ok(())
}
