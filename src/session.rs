//! Per-login session state.
//!
//! A [`Session`] is created by the login flow and then owned by exactly one
//! client. All mutation (cursor replacement, nonce refresh) goes through
//! `&mut self`, so two in-flight requests can never observe different cursors.

use crate::model::{BaseRequest, Member, SyncKey};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;

/// The authentication triple plus the pass ticket.
#[derive(Clone)]
pub(crate) struct Credentials {
    pub sid: String,
    pub skey: SecretString,
    pub uin: u64,
    pub pass_ticket: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("sid", &self.sid)
            .field("skey", &"[REDACTED]")
            .field("uin", &self.uin)
            .field("pass_ticket", &"[REDACTED]")
            .finish()
    }
}

/// Result of looking a contact up by display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameLookup<'a> {
    /// Exactly one contact carries the name.
    Unique(&'a str),
    /// Several contacts carry the name.
    Ambiguous(usize),
    /// No contact carries the name.
    Missing,
}

/// Mapping from opaque user identifier to display name.
#[derive(Debug, Clone, Default)]
pub struct ContactDirectory {
    names: HashMap<String, String>,
}

impl ContactDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, member: Member) {
        self.names.insert(member.user_name, member.nick_name);
    }

    pub(crate) fn extend(&mut self, members: impl IntoIterator<Item = Member>) {
        for member in members {
            self.insert(member);
        }
    }

    /// Returns the display name for an identifier, falling back to the identifier itself.
    #[must_use]
    pub fn display_name<'a>(&'a self, user_name: &'a str) -> &'a str {
        match self.names.get(user_name) {
            Some(name) if !name.is_empty() => name,
            _ => user_name,
        }
    }

    /// Finds the identifier of the contact with the given display name.
    ///
    /// Display names are not unique; callers must handle [`NameLookup::Ambiguous`].
    #[must_use]
    pub fn find_by_name(&self, nick_name: &str) -> NameLookup<'_> {
        let mut matches = self
            .names
            .iter()
            .filter(|(_, name)| name.as_str() == nick_name)
            .map(|(user_name, _)| user_name.as_str());

        match (matches.next(), matches.count()) {
            (None, _) => NameLookup::Missing,
            (Some(user_name), 0) => NameLookup::Unique(user_name),
            (Some(_), rest) => NameLookup::Ambiguous(rest + 1),
        }
    }

    /// Number of known contacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` if no contact is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// An authenticated session.
pub struct Session {
    credentials: Credentials,
    device_id: String,
    cursor: SyncKey,
    host: String,
    contacts: ContactDirectory,
    user: Option<Member>,
    last_nonce: i64,
}

impl Session {
    pub(crate) fn new(credentials: Credentials, host: String, device_id: String) -> Self {
        Self {
            credentials,
            device_id,
            cursor: SyncKey::default(),
            host,
            contacts: ContactDirectory::new(),
            user: None,
            last_nonce: 0,
        }
    }

    /// The web host assigned at login, e.g. `wx2.qq.com`.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The current sync cursor.
    #[must_use]
    pub fn cursor(&self) -> &SyncKey {
        &self.cursor
    }

    /// The contact directory.
    #[must_use]
    pub fn contacts(&self) -> &ContactDirectory {
        &self.contacts
    }

    /// The logged-in user, if the init response carried it.
    #[must_use]
    pub fn user(&self) -> Option<&Member> {
        self.user.as_ref()
    }

    /// Device identifier sent with every request.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub(crate) fn sid(&self) -> &str {
        &self.credentials.sid
    }

    pub(crate) fn skey(&self) -> &str {
        self.credentials.skey.expose_secret()
    }

    pub(crate) fn uin(&self) -> u64 {
        self.credentials.uin
    }

    pub(crate) fn pass_ticket(&self) -> &str {
        self.credentials.pass_ticket.expose_secret()
    }

    pub(crate) fn base_request(&self) -> BaseRequest<'_> {
        BaseRequest {
            uin: self.credentials.uin,
            sid: &self.credentials.sid,
            skey: self.skey(),
            device_id: &self.device_id,
        }
    }

    /// Builds an endpoint URL on the resolved web host.
    pub(crate) fn web_url(&self, path: &str) -> String {
        format!("https://{}{}", self.host, path)
    }

    pub(crate) fn replace_cursor(&mut self, cursor: SyncKey) {
        self.cursor = cursor;
    }

    pub(crate) fn set_user(&mut self, user: Member) {
        self.contacts.insert(user.clone());
        self.user = Some(user);
    }

    pub(crate) fn contacts_mut(&mut self) -> &mut ContactDirectory {
        &mut self.contacts
    }

    /// Returns a millisecond timestamp strictly greater than any previously returned.
    pub(crate) fn next_nonce(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        self.last_nonce = now.max(self.last_nonce + 1);
        self.last_nonce
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("credentials", &self.credentials)
            .field("device_id", &self.device_id)
            .field("cursor", &self.cursor.to_string())
            .field("contacts", &self.contacts.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_session(host: &str) -> Session {
    Session::new(
        Credentials {
            sid: "sid-1".into(),
            skey: SecretString::from("@crypt_secret".to_string()),
            uin: 1001,
            pass_ticket: SecretString::from("ticket-secret".to_string()),
        },
        host.to_string(),
        "e000000000000001".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(user_name: &str, nick_name: &str) -> Member {
        Member {
            user_name: user_name.into(),
            nick_name: nick_name.into(),
        }
    }

    #[test]
    fn test_display_name_falls_back_to_identifier() {
        let mut contacts = ContactDirectory::new();
        contacts.insert(member("@a", "Alice"));
        contacts.insert(member("@blank", ""));

        assert_eq!(contacts.display_name("@a"), "Alice");
        assert_eq!(contacts.display_name("@unknown"), "@unknown");
        assert_eq!(contacts.display_name("@blank"), "@blank");
    }

    #[test]
    fn test_find_by_name_flags_duplicates() {
        let mut contacts = ContactDirectory::new();
        contacts.extend([member("@a", "Alice"), member("@b", "Bob"), member("@c", "Bob")]);

        assert_eq!(contacts.find_by_name("Alice"), NameLookup::Unique("@a"));
        assert_eq!(contacts.find_by_name("Bob"), NameLookup::Ambiguous(2));
        assert_eq!(contacts.find_by_name("Carol"), NameLookup::Missing);
    }

    #[test]
    fn test_nonce_is_monotonic() {
        let mut session = test_session("wx.qq.com");
        let first = session.next_nonce();
        let second = session.next_nonce();
        assert!(second > first);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let session = test_session("wx.qq.com");
        let debug_str = format!("{session:?}");
        assert!(!debug_str.contains("@crypt_secret"));
        assert!(!debug_str.contains("ticket-secret"));
        assert!(debug_str.contains("wx.qq.com"));
    }

    #[test]
    fn test_self_user_joins_directory() {
        let mut session = test_session("wx.qq.com");
        session.set_user(member("@me", "Me"));
        assert_eq!(session.contacts().display_name("@me"), "Me");
        assert_eq!(session.web_url("/x"), "https://wx.qq.com/x");
    }
}
