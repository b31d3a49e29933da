//! Scripted end-to-end session tests.
//!
//! These drive the public API over an in-memory [`Transport`] that answers by
//! URL substring, so the whole login → poll → sync → flush path runs without
//! network access.

use email_address::EmailAddress;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use webwx_sync::{
    Error, HttpResponse, LoginState, Notifier, QrCode, SessionConfig, StaticHosts, Transport,
    WebwxClient,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Doubles
// ─────────────────────────────────────────────────────────────────────────────

/// URL-substring router over canned replies.
///
/// The crate's own scripted transport is `#[cfg(test)]` and private, so it is
/// not visible here; this one goes through the public [`Transport`] trait only.
#[derive(Default)]
struct Script {
    routes: Mutex<Vec<(&'static str, VecDeque<(u16, String)>)>>,
    hits: Mutex<Vec<String>>,
}

impl Script {
    fn on(self, needle: &'static str, replies: &[(u16, &str)]) -> Self {
        let replies = replies
            .iter()
            .map(|(status, body)| (*status, (*body).to_string()))
            .collect();
        self.routes.lock().push((needle, replies));
        self
    }

    fn hits(&self, needle: &str) -> usize {
        self.hits.lock().iter().filter(|url| url.contains(needle)).count()
    }

    fn answer(&self, url: &str) -> webwx_sync::Result<HttpResponse> {
        self.hits.lock().push(url.to_string());

        let mut routes = self.routes.lock();
        let (status, body) = routes
            .iter_mut()
            .find(|(needle, _)| url.contains(*needle))
            .and_then(|(_, replies)| {
                if replies.len() > 1 {
                    replies.pop_front()
                } else {
                    replies.front().cloned()
                }
            })
            .unwrap_or((404, String::new()));

        if status >= 400 {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status,
            });
        }
        Ok(HttpResponse {
            status,
            url: url.to_string(),
            body: body.into_bytes(),
        })
    }
}

struct Shared(Arc<Script>);

impl Transport for Shared {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, webwx_sync::Result<HttpResponse>> {
        let result = self.0.answer(url);
        async move { result }.boxed()
    }

    fn post_json<'a>(
        &'a self,
        url: &'a str,
        _body: Vec<u8>,
    ) -> BoxFuture<'a, webwx_sync::Result<HttpResponse>> {
        let result = self.0.answer(url);
        async move { result }.boxed()
    }
}

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
}

struct SharedOutbox(Arc<Outbox>);

impl Notifier for SharedOutbox {
    fn send<'a>(
        &'a self,
        _recipients: &'a [EmailAddress],
        subject: &'a str,
        body: &'a str,
    ) -> BoxFuture<'a, webwx_sync::Result<()>> {
        self.0
            .sent
            .lock()
            .push((subject.to_string(), body.to_string()));
        async { Ok(()) }.boxed()
    }

    fn description(&self) -> &str {
        "outbox"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

const REDIRECT: &str = r#"window.code=200;
window.redirect_uri="https://wx2.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=T&uuid=U";"#;

const LOGIN_XML: &str = "<error><ret>0</ret><message></message><skey>@crypt_1</skey>\
<wxsid>sid</wxsid><wxuin>77</wxuin><pass_ticket>pt</pass_ticket><isgrayscale>1</isgrayscale></error>";

const INIT: &str = r#"{"BaseResponse":{"Ret":0,"ErrMsg":""},
"SyncKey":{"Count":2,"List":[{"Key":1,"Val":100},{"Key":2,"Val":200}]},
"User":{"UserName":"@me","NickName":"Me"}}"#;

const CONTACTS: &str = r#"{"BaseResponse":{"Ret":0,"ErrMsg":""},
"MemberList":[{"UserName":"u1","NickName":"Alice"},{"UserName":"@@u2","NickName":"Group"}]}"#;

const SYNC_M1: &str = r#"{"BaseResponse":{"Ret":0,"ErrMsg":""},"AddMsgCount":1,
"AddMsgList":[{"MsgId":"M1","MsgType":1,"Content":"first","FromUserName":"u1"}],
"SyncKey":{"Count":2,"List":[{"Key":1,"Val":101},{"Key":2,"Val":200}]}}"#;

const SYNC_M1_M2: &str = r#"{"BaseResponse":{"Ret":0,"ErrMsg":""},"AddMsgCount":2,
"AddMsgList":[{"MsgId":"M1","MsgType":1,"Content":"first","FromUserName":"u1"},
{"MsgId":"M2","MsgType":1,"Content":"second","FromUserName":"@@u2"}],
"SyncKey":{"Count":2,"List":[{"Key":1,"Val":102},{"Key":2,"Val":201}]}}"#;

const POLL_PENDING: &str = r#"window.synccheck={retcode:"0",selector:"2"}"#;
const POLL_LOGGED_OUT: &str = r#"window.synccheck={retcode:"1101",selector:"0"}"#;

fn login_script() -> Script {
    Script::default()
        .on("jslogin", &[(200, r#"window.QRLogin.code = 200; window.QRLogin.uuid = "qr==";"#)])
        .on("qrcode/", &[(200, "JPEG")])
        .on("mmwebwx-bin/login", &[(200, "window.code=408;"), (200, REDIRECT)])
        .on("webwxnewloginpage", &[(301, LOGIN_XML)])
        .on("webwxinit", &[(200, INIT)])
        .on("webwxgetcontact", &[(200, CONTACTS)])
}

fn config(hosts: &[&str]) -> SessionConfig {
    SessionConfig::builder()
        .recipient("me@example.com")
        .host_provider(StaticHosts(hosts.iter().map(|h| (*h).to_string()).collect()))
        .pass_backoff(Duration::from_millis(50))
        .build()
        .expect("valid config")
}

async fn login(script: Arc<Script>, config: SessionConfig) -> webwx_sync::Result<WebwxClient> {
    WebwxClient::connect_with_transport(config, Arc::new(Shared(script)), |qr: &QrCode| {
        assert_eq!(qr.uuid, "qr==");
    })
    .await
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_resolves_host_and_cursor() {
    let script = Arc::new(login_script());
    let client = login(script.clone(), config(&["push.example"])).await.unwrap();

    let session = client.session();
    assert_eq!(session.host(), "wx2.qq.com");
    assert_eq!(session.cursor().to_string(), "1_100|2_200");
    assert_eq!(session.contacts().display_name("u1"), "Alice");
    assert_eq!(session.user().map(|u| u.user_name.as_str()), Some("@me"));
    assert_eq!(script.hits("mmwebwx-bin/login"), 2);
}

#[tokio::test]
async fn test_dedup_and_group_suppression_end_to_end() {
    let script = Arc::new(
        login_script()
            .on("synccheck", &[(200, POLL_PENDING)])
            .on("webwxsync", &[(200, SYNC_M1), (200, SYNC_M1_M2)]),
    );
    let outbox = Arc::new(Outbox::default());
    let mut client = login(script.clone(), config(&["push.example"]))
        .await
        .unwrap()
        .with_notifier(SharedOutbox(outbox.clone()));

    client.tick().await.unwrap();
    client.tick().await.unwrap();
    assert_eq!(client.session().cursor().to_string(), "1_102|2_201");

    assert_eq!(client.flush().await.unwrap(), 1);
    let sent = outbox.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "New WeChat messages");
    assert_eq!(sent[0].1, "Alice: first");
}

#[tokio::test]
async fn test_failover_skips_dead_host() {
    let script = Arc::new(
        login_script()
            .on("dead.example", &[(503, "")])
            .on("live.example", &[(200, r#"window.synccheck={retcode:"0",selector:"0"}"#)]),
    );
    let client = login(script.clone(), config(&["dead.example", "live.example"]))
        .await
        .unwrap();

    let result = client.poll().await.unwrap();

    assert!(result.is_success());
    assert_eq!(script.hits("dead.example"), 1);
    assert_eq!(script.hits("live.example"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_logged_out_session_is_fatal() {
    let script = Arc::new(login_script().on("synccheck", &[(200, POLL_LOGGED_OUT)]));
    let outbox = Arc::new(Outbox::default());
    let mut client = login(script, config(&["push.example"]))
        .await
        .unwrap()
        .with_notifier(SharedOutbox(outbox.clone()));

    let err = client.run().await;

    assert!(matches!(err, Error::SessionInvalid { ref retcode, .. } if retcode == "1101"));
    assert!(err.is_fatal());
    let sent = outbox.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.starts_with("SyncCheck failed"));
}

#[tokio::test(start_paused = true)]
async fn test_transport_outage_is_distinct_from_logout() {
    let script = Arc::new(login_script().on("synccheck", &[(502, "")]));
    let mut client = login(script, config(&["push.example"])).await.unwrap();

    let err = client.tick().await.unwrap_err();

    assert!(matches!(err, Error::HttpStatus { status: 502, .. }));
    assert!(!err.is_fatal());
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unscanned_qr_times_out() {
    let script = Arc::new(
        Script::default()
            .on("jslogin", &[(200, r#"window.QRLogin.uuid = "qr==";"#)])
            .on("qrcode/", &[(200, "JPEG")])
            .on("mmwebwx-bin/login", &[(200, "window.code=408;")]),
    );
    let config = SessionConfig::builder()
        .scan_attempts(4)
        .build()
        .expect("valid config");

    let err = login(script.clone(), config).await.unwrap_err();

    assert!(matches!(err, Error::ScanTimeout { attempts: 4 }));
    assert_eq!(err.category().to_string(), "user_timeout");
    assert_eq!(script.hits("mmwebwx-bin/login"), 4);
    assert_eq!(LoginState::Failed.to_string(), "failed");
}
