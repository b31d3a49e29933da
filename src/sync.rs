//! Message fetch, classification and deduplication.

use crate::config::SessionConfig;
use crate::error::Result;
use crate::login::{check_ret, decode, encode};
use crate::model::{Message, MessageKind, RawMessage, SyncRequest, SyncResponse};
use crate::notify::NotificationBatch;
use crate::session::{ContactDirectory, Session};
use crate::transport::{with_query, within, Transport};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

const SYNC_PATH: &str = "/cgi-bin/mmwebwx-bin/webwxsync";

/// What happened to one raw message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Admission {
    /// New, displayable, from a direct chat.
    Notify(Message),
    /// New and displayable, but from a group chat.
    GroupOnly(Message),
    /// Already seen.
    Duplicate,
    /// Type code outside the displayable set.
    Unsupported(i32),
}

/// The set of message ids seen during the session.
#[derive(Debug, Default)]
pub(crate) struct Inbox {
    seen: HashSet<String>,
}

impl Inbox {
    /// Classifies a message, recording it as seen if displayable.
    pub(crate) fn admit(&mut self, raw: RawMessage, contacts: &ContactDirectory) -> Admission {
        let Some(kind) = MessageKind::from_code(raw.kind) else {
            return Admission::Unsupported(raw.kind);
        };
        if !self.seen.insert(raw.id.clone()) {
            return Admission::Duplicate;
        }

        let sender = contacts.display_name(&raw.from).to_string();
        let message = Message::new(raw, kind, sender);
        if message.is_group() {
            Admission::GroupOnly(message)
        } else {
            Admission::Notify(message)
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.seen.len()
    }
}

/// Fetches pending messages and advances the cursor.
///
/// The cursor is replaced whenever the server accepts the request, even if
/// no message came back. On any failure it is left untouched.
#[instrument(name = "sync::fetch", skip_all, fields(host = %session.host()))]
pub(crate) async fn fetch(
    transport: &dyn Transport,
    config: &SessionConfig,
    session: &mut Session,
) -> Result<Vec<RawMessage>> {
    let rr = session.next_nonce();
    let url = with_query(
        &session.web_url(SYNC_PATH),
        &[
            ("sid", session.sid()),
            ("skey", session.skey()),
            ("pass_ticket", session.pass_ticket()),
        ],
    )?;
    let body = encode(&SyncRequest {
        base_request: session.base_request(),
        sync_key: session.cursor(),
        rr,
    })?;

    let resp = within(
        config.timeouts.request,
        &url,
        transport.post_json(&url, body),
    )
    .await?
    .ensure_success()?;
    let resp: SyncResponse = decode("webwxsync", &resp.body)?;
    check_ret("webwxsync", resp.base_response.ret, resp.base_response.err_msg)?;

    debug!(
        add_msg_count = resp.add_msg_count,
        received = resp.add_msg_list.len(),
        members = resp.member_list.len(),
        cursor = %resp.sync_key,
        "Fetched messages"
    );
    session.replace_cursor(resp.sync_key);
    Ok(resp.add_msg_list)
}

/// Fetches, classifies and queues new messages.
///
/// Returns every newly seen displayable message, group ones included.
pub(crate) async fn sync(
    transport: &dyn Transport,
    config: &SessionConfig,
    session: &mut Session,
    inbox: &mut Inbox,
    batch: &NotificationBatch,
) -> Result<Vec<Message>> {
    let raw = fetch(transport, config, session).await?;
    let mut admitted = Vec::new();

    for message in raw {
        let msg_id = message.id.clone();
        match inbox.admit(message, session.contacts()) {
            Admission::Notify(message) => {
                info!(msg_id = %msg_id, msg_type = message.kind().code(), "{}", message.line());
                if !batch.push(message.line()) {
                    warn!(msg_id = %msg_id, capacity = batch.capacity(), "Notification batch full, dropping line");
                }
                admitted.push(message);
            }
            Admission::GroupOnly(message) => {
                info!(
                    msg_id = %msg_id,
                    msg_type = message.kind().code(),
                    group = %message.from_user(),
                    "{}",
                    message.line()
                );
                admitted.push(message);
            }
            Admission::Duplicate => debug!(msg_id = %msg_id, "Skipping redelivered message"),
            Admission::Unsupported(code) => {
                debug!(msg_id = %msg_id, msg_type = code, "Skipping non-displayable message");
            }
        }
    }

    debug!(seen = inbox.len(), queued = batch.len(), "Sync complete");
    Ok(admitted)
}
