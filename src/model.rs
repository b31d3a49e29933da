//! Wire types exchanged with the web endpoints, and the domain values built from them.

use serde::{Deserialize, Serialize};

/// Fields of the bootstrap XML body, as returned by a [`ResultDecoder`].
///
/// [`ResultDecoder`]: crate::decoder::ResultDecoder
#[derive(Clone, Default, PartialEq, Eq)]
pub struct LoginInfo {
    /// `"0"` on success.
    pub ret: String,
    /// Server message, usually empty on success.
    pub message: String,
    /// Session key.
    pub skey: String,
    /// Session id.
    pub wxsid: String,
    /// Numeric user id, as text.
    pub wxuin: String,
    /// Pass ticket.
    pub pass_ticket: String,
    /// Grayscale flag.
    pub isgrayscale: String,
}

impl std::fmt::Debug for LoginInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginInfo")
            .field("ret", &self.ret)
            .field("message", &self.message)
            .field("wxsid", &self.wxsid)
            .field("wxuin", &self.wxuin)
            .field("skey", &"[REDACTED]")
            .field("pass_ticket", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Authentication block echoed on every JSON request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct BaseRequest<'a> {
    #[serde(rename = "Uin")]
    pub uin: u64,
    #[serde(rename = "Sid")]
    pub sid: &'a str,
    #[serde(rename = "Skey")]
    pub skey: &'a str,
    #[serde(rename = "DeviceID")]
    pub device_id: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct InitRequest<'a> {
    #[serde(rename = "BaseRequest")]
    pub base_request: BaseRequest<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SyncRequest<'a> {
    #[serde(rename = "BaseRequest")]
    pub base_request: BaseRequest<'a>,
    #[serde(rename = "SyncKey")]
    pub sync_key: &'a SyncKey,
    #[serde(rename = "rr")]
    pub rr: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct SendMsgRequest<'a> {
    #[serde(rename = "BaseRequest")]
    pub base_request: BaseRequest<'a>,
    #[serde(rename = "Msg")]
    pub msg: OutgoingMsg<'a>,
    #[serde(rename = "Scene")]
    pub scene: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct OutgoingMsg<'a> {
    #[serde(rename = "Type")]
    pub kind: i32,
    #[serde(rename = "Content")]
    pub content: &'a str,
    #[serde(rename = "FromUserName")]
    pub from_user_name: &'a str,
    #[serde(rename = "ToUserName")]
    pub to_user_name: &'a str,
    #[serde(rename = "LocalID")]
    pub local_id: &'a str,
    #[serde(rename = "ClientMsgId")]
    pub client_msg_id: &'a str,
}

/// Protocol-level status of a JSON response.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct BaseResponse {
    #[serde(rename = "Ret")]
    pub ret: i64,
    #[serde(rename = "ErrMsg", default)]
    pub err_msg: String,
}

/// Server-issued sync cursor.
///
/// Entries must be echoed back in the order received, so they are kept in a
/// `Vec` and never sorted or merged.
///
/// ```
/// use webwx_sync::SyncKey;
///
/// let key = SyncKey::from_pairs([(1, 100), (2, 200), (3, 300)]);
/// assert_eq!(key.to_string(), "1_100|2_200|3_300");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncKey {
    #[serde(rename = "Count")]
    count: usize,
    #[serde(rename = "List")]
    list: Vec<SyncKeyEntry>,
}

/// One `(key, value)` counter of a [`SyncKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncKeyEntry {
    /// Counter identifier.
    #[serde(rename = "Key")]
    pub key: u64,
    /// Counter value.
    #[serde(rename = "Val")]
    pub val: u64,
}

impl SyncKey {
    /// Builds a cursor from `(key, value)` pairs in order.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u64, u64)>) -> Self {
        let list: Vec<SyncKeyEntry> = pairs
            .into_iter()
            .map(|(key, val)| SyncKeyEntry { key, val })
            .collect();
        Self {
            count: list.len(),
            list,
        }
    }

    /// The entries in server order.
    #[must_use]
    pub fn entries(&self) -> &[SyncKeyEntry] {
        &self.list
    }

    /// Returns `true` if the cursor has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl std::fmt::Display for SyncKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, entry) in self.list.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            write!(f, "{}_{}", entry.key, entry.val)?;
        }
        Ok(())
    }
}

/// A contact as returned by the init and directory endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Member {
    /// Opaque, session-scoped identifier.
    #[serde(rename = "UserName")]
    pub user_name: String,
    /// Display name.
    #[serde(rename = "NickName", default)]
    pub nick_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InitResponse {
    #[serde(rename = "BaseResponse")]
    pub base_response: BaseResponse,
    #[serde(rename = "SyncKey")]
    pub sync_key: SyncKey,
    #[serde(rename = "User", default)]
    pub user: Option<Member>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContactsResponse {
    #[serde(rename = "BaseResponse")]
    pub base_response: BaseResponse,
    #[serde(rename = "MemberList", default)]
    pub member_list: Vec<Member>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SendMsgResponse {
    #[serde(rename = "BaseResponse")]
    pub base_response: BaseResponse,
}

/// A message as delivered by the fetch endpoint, before filtering.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawMessage {
    #[serde(rename = "MsgId")]
    pub id: String,
    #[serde(rename = "MsgType")]
    pub kind: i32,
    #[serde(rename = "Content", default)]
    pub content: String,
    #[serde(rename = "FromUserName")]
    pub from: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SyncResponse {
    #[serde(rename = "BaseResponse")]
    pub base_response: BaseResponse,
    #[serde(rename = "AddMsgCount", default)]
    pub add_msg_count: usize,
    #[serde(rename = "AddMsgList", default)]
    pub add_msg_list: Vec<RawMessage>,
    #[serde(rename = "SyncKey")]
    pub sync_key: SyncKey,
    #[serde(rename = "MemberList", default)]
    pub member_list: Vec<Member>,
}

/// The displayable message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Plain text (1).
    Text,
    /// Picture (3).
    Image,
    /// Voice clip (34).
    Voice,
    /// Video (43).
    Video,
    /// Short video (62).
    MicroVideo,
    /// Sticker (47).
    Emoticon,
}

impl MessageKind {
    /// Classifies a wire type code, returning `None` for non-displayable types.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Text),
            3 => Some(Self::Image),
            34 => Some(Self::Voice),
            43 => Some(Self::Video),
            62 => Some(Self::MicroVideo),
            47 => Some(Self::Emoticon),
            _ => None,
        }
    }

    /// The wire type code.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Text => 1,
            Self::Image => 3,
            Self::Voice => 34,
            Self::Video => 43,
            Self::MicroVideo => 62,
            Self::Emoticon => 47,
        }
    }
}

/// Prefix that marks a group-chat identifier.
pub(crate) const GROUP_PREFIX: &str = "@@";

/// An accepted incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: String,
    kind: MessageKind,
    from: String,
    sender: String,
    content: String,
}

impl Message {
    pub(crate) fn new(raw: RawMessage, kind: MessageKind, sender: String) -> Self {
        Self {
            id: raw.id,
            kind,
            from: raw.from,
            sender,
            content: raw.content,
        }
    }

    /// Server-assigned identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Message type.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Sender identifier.
    #[must_use]
    pub fn from_user(&self) -> &str {
        &self.from
    }

    /// Sender display name, or the raw identifier when the sender is not in the directory.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Message body.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns `true` if the message comes from a group chat.
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.from.starts_with(GROUP_PREFIX)
    }

    /// Renders the `sender: content` notification line.
    #[must_use]
    pub fn line(&self) -> String {
        format!("{}: {}", self.sender, self.content)
    }
}

/// Outcome of one long-poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    /// `"0"` on success; anything else means the session was invalidated.
    pub retcode: String,
    /// `"0"` when nothing is pending; anything else requires a fetch.
    pub selector: String,
}

impl PollResult {
    /// Returns `true` if the server accepted the session.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.retcode == "0"
    }

    /// Returns `true` if a fetch is required.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.selector != "0"
    }
}
