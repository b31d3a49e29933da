//! Long-poll against the push hosts with failover.
//!
//! Hosts come from the configured [`HostProvider`](crate::hosts::HostProvider)
//! in order. A host is accepted only when it answers with retcode `0`; any
//! other outcome moves on to the next host. The whole list is retried
//! `poll_passes` times with `pass_backoff` between passes.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::model::PollResult;
use crate::session::Session;
use crate::transport::{now_millis, with_query, within, HttpResponse, Transport};
use tracing::{debug, instrument, warn};

const SYNC_CHECK_PATH: &str = "/cgi-bin/mmwebwx-bin/synccheck";

/// Polls until one push host accepts the session.
///
/// Returns the last error observed when every host fails in every pass. A
/// nonzero retcode is reported as [`Error::SessionInvalid`].
#[instrument(
    name = "poller::poll",
    skip_all,
    fields(host = %session.host(), passes = config.polling.poll_passes)
)]
pub(crate) async fn poll(
    transport: &dyn Transport,
    config: &SessionConfig,
    session: &Session,
) -> Result<PollResult> {
    let hosts = config.hosts().push_hosts(session.host());
    if hosts.is_empty() {
        return Err(Error::InvalidConfig {
            message: format!("no push hosts for {}", session.host()),
        });
    }

    let mut last_error = None;

    for pass in 1..=config.polling.poll_passes {
        if pass > 1 {
            tokio::time::sleep(config.polling.pass_backoff).await;
        }

        for push_host in &hosts {
            match poll_host(transport, config, session, push_host).await {
                Ok(result) if result.is_success() => {
                    debug!(
                        push_host = %push_host,
                        pass,
                        selector = %result.selector,
                        "Sync check succeeded"
                    );
                    return Ok(result);
                }
                Ok(result) => {
                    warn!(
                        push_host = %push_host,
                        pass,
                        retcode = %result.retcode,
                        selector = %result.selector,
                        "Sync check returned nonzero retcode"
                    );
                    last_error = Some(Error::SessionInvalid {
                        host: push_host.clone(),
                        retcode: result.retcode,
                        selector: result.selector,
                    });
                }
                Err(e) => {
                    warn!(
                        push_host = %push_host,
                        pass,
                        error = %e,
                        category = %e.category(),
                        "Sync check failed"
                    );
                    last_error = Some(e);
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::InvalidConfig {
        message: "poll_passes must be at least 1".into(),
    }))
}

async fn poll_host(
    transport: &dyn Transport,
    config: &SessionConfig,
    session: &Session,
    push_host: &str,
) -> Result<PollResult> {
    let now = now_millis().to_string();
    let uin = session.uin().to_string();
    let cursor = session.cursor().to_string();
    let url = with_query(
        &format!("https://{push_host}{SYNC_CHECK_PATH}"),
        &[
            ("r", now.as_str()),
            ("skey", session.skey()),
            ("sid", session.sid()),
            ("uin", uin.as_str()),
            ("deviceid", session.device_id()),
            ("synckey", cursor.as_str()),
            ("_", now.as_str()),
        ],
    )?;

    let resp = within(config.timeouts.long_poll, &url, transport.get(&url))
        .await
        .and_then(HttpResponse::ensure_success)?;
    config.decoder().poll_result(&resp.text())
}
