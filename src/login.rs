//! QR-code login handshake.
//!
//! The flow walks through [`LoginState`] in order: obtain a UUID, hand the QR
//! image to the application, wait for the scan, follow the redirect to get
//! credentials, then initialize the session and load the contact directory.
//! Every step except the directory fetch is fatal on failure.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::model::{ContactsResponse, InitRequest, InitResponse};
use crate::session::{Credentials, Session};
use crate::transport::{now_millis, redact_url, with_query, within, HttpResponse, Transport};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// Position in the login handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    /// Nothing has happened yet.
    Unauthenticated,
    /// A login UUID was issued.
    UuidObtained,
    /// The QR image was handed to the application.
    QrIssued,
    /// Waiting for the user to scan and confirm.
    AwaitingScan,
    /// The scan was confirmed and a redirect URI received.
    Redirected,
    /// Credentials were obtained from the redirect.
    Bootstrapped,
    /// The session is initialized and usable.
    Ready,
    /// A step failed; the handshake must start over.
    Failed,
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoginState::Unauthenticated => "unauthenticated",
            LoginState::UuidObtained => "uuid_obtained",
            LoginState::QrIssued => "qr_issued",
            LoginState::AwaitingScan => "awaiting_scan",
            LoginState::Redirected => "redirected",
            LoginState::Bootstrapped => "bootstrapped",
            LoginState::Ready => "ready",
            LoginState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A QR code to be shown to the user.
#[derive(Clone, PartialEq, Eq)]
pub struct QrCode {
    /// The login UUID the image encodes.
    pub uuid: String,
    /// The image bytes as served (JPEG).
    pub image: Vec<u8>,
}

impl fmt::Debug for QrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QrCode")
            .field("uuid", &self.uuid)
            .field("image_bytes", &self.image.len())
            .finish()
    }
}

const SCAN_STATUS_PATH: &str = "/cgi-bin/mmwebwx-bin/login";
const INIT_PATH: &str = "/cgi-bin/mmwebwx-bin/webwxinit";
const CONTACTS_PATH: &str = "/cgi-bin/mmwebwx-bin/webwxgetcontact";

/// Drives the handshake over a transport.
pub(crate) struct LoginFlow<'a> {
    transport: &'a dyn Transport,
    config: &'a SessionConfig,
    state: LoginState,
}

impl<'a> LoginFlow<'a> {
    pub(crate) fn new(transport: &'a dyn Transport, config: &'a SessionConfig) -> Self {
        Self {
            transport,
            config,
            state: LoginState::Unauthenticated,
        }
    }

    pub(crate) fn state(&self) -> LoginState {
        self.state
    }

    fn advance(&mut self, next: LoginState) {
        info!(from = %self.state, to = %next, "Login state changed");
        self.state = next;
    }

    /// Runs every step, returning a ready session.
    pub(crate) async fn run(&mut self, on_qr: &mut (dyn FnMut(&QrCode) + Send)) -> Result<Session> {
        match self.steps(on_qr).await {
            Ok(session) => Ok(session),
            Err(e) => {
                warn!(error = %e, category = %e.category(), state = %self.state, "Login failed");
                self.advance(LoginState::Failed);
                Err(e)
            }
        }
    }

    async fn steps(&mut self, on_qr: &mut (dyn FnMut(&QrCode) + Send)) -> Result<Session> {
        let uuid = self.obtain_uuid().await?;
        self.advance(LoginState::UuidObtained);

        let qr = self.fetch_qr(&uuid).await?;
        on_qr(&qr);
        self.advance(LoginState::QrIssued);

        self.advance(LoginState::AwaitingScan);
        let redirect_uri = self.await_scan(&uuid).await?;
        self.advance(LoginState::Redirected);

        let mut session = self.bootstrap(&redirect_uri).await?;
        self.advance(LoginState::Bootstrapped);

        self.init(&mut session).await?;
        if let Err(source) = self.fetch_contacts(&mut session).await {
            let cause = source.to_string();
            let degraded = Error::DirectoryUnavailable {
                source: Box::new(source),
            };
            warn!(
                error = %degraded,
                cause = %cause,
                category = %degraded.category(),
                "Continuing with an empty contact directory"
            );
        }
        self.advance(LoginState::Ready);

        Ok(session)
    }

    /// Requests a login UUID.
    #[instrument(name = "LoginFlow::obtain_uuid", skip_all)]
    pub(crate) async fn obtain_uuid(&self) -> Result<String> {
        let base = format!("{}/jslogin", self.config.login_url);
        let url = with_query(
            &base,
            &[
                ("appid", self.config.app_id.as_str()),
                ("fun", "new"),
                ("lang", self.config.locale.as_str()),
                ("_", &now_millis().to_string()),
            ],
        )?;

        let resp = self.get(&url).await?.ensure_success()?;
        let uuid = self.config.decoder().uuid(&resp.text())?;

        debug!(uuid = %uuid, "Obtained login UUID");
        Ok(uuid)
    }

    /// Downloads the QR image for a UUID.
    #[instrument(name = "LoginFlow::fetch_qr", skip_all, fields(uuid = %uuid))]
    pub(crate) async fn fetch_qr(&self, uuid: &str) -> Result<QrCode> {
        let url = format!("{}/qrcode/{uuid}?t=webwx", self.config.login_url);
        let resp = self.get(&url).await?.ensure_success()?;

        debug!(bytes = resp.body.len(), "Downloaded QR image");
        Ok(QrCode {
            uuid: uuid.to_string(),
            image: resp.body,
        })
    }

    /// Polls the scan status until the redirect URI appears.
    ///
    /// Transport failures consume an attempt and are otherwise ignored.
    #[instrument(
        name = "LoginFlow::await_scan",
        skip_all,
        fields(uuid = %uuid, max_attempts = self.config.polling.scan_attempts)
    )]
    pub(crate) async fn await_scan(&self, uuid: &str) -> Result<String> {
        let attempts = self.config.polling.scan_attempts;
        let base = format!("{}{SCAN_STATUS_PATH}", self.config.login_url);
        let decoder = self.config.decoder();

        for attempt in 1..=attempts {
            let url = with_query(
                &base,
                &[("uuid", uuid), ("tip", "0"), ("_", &now_millis().to_string())],
            )?;

            let resp = match within(self.config.timeouts.long_poll, &url, self.transport.get(&url))
                .await
                .and_then(HttpResponse::ensure_success)
            {
                Ok(resp) => resp,
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "Scan status check failed");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let body = resp.text();
            if let Some(uri) = decoder.redirect_uri(&body) {
                debug!(attempt, "Scan confirmed");
                return Ok(uri);
            }

            match decoder.scan_code(&body).as_deref() {
                Some("201") => info!(attempt, "QR code scanned, waiting for confirmation"),
                Some(code) => debug!(attempt, code, "Waiting for scan"),
                None => debug!(attempt, "Scan status without code"),
            }
        }

        Err(Error::ScanTimeout { attempts })
    }

    /// Follows the redirect URI and builds a session from the returned credentials.
    #[instrument(name = "LoginFlow::bootstrap", skip_all)]
    pub(crate) async fn bootstrap(&self, redirect_uri: &str) -> Result<Session> {
        let resp = self.get(redirect_uri).await?;
        if resp.status != 301 {
            return Err(Error::UnexpectedStatus {
                url: redact_url(redirect_uri),
                expected: 301,
                actual: resp.status,
            });
        }

        let info = self.config.decoder().login_info(&resp.text())?;
        if info.ret != "0" {
            return Err(Error::LoginRejected {
                ret: info.ret,
                message: info.message,
            });
        }

        for (tag, value) in [
            ("skey", &info.skey),
            ("wxsid", &info.wxsid),
            ("wxuin", &info.wxuin),
            ("pass_ticket", &info.pass_ticket),
        ] {
            if value.trim().is_empty() {
                return Err(Error::ProtocolMismatch {
                    endpoint: "webwxnewloginpage",
                    detail: format!("accepted login without <{tag}>"),
                });
            }
        }

        let uin = info.wxuin.parse::<u64>().map_err(|_| Error::ProtocolMismatch {
            endpoint: "webwxnewloginpage",
            detail: format!("wxuin is not numeric: {}", info.wxuin),
        })?;

        let host = reqwest::Url::parse(redirect_uri)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .ok_or_else(|| Error::ProtocolMismatch {
                endpoint: "webwxnewloginpage",
                detail: format!("redirect URI has no host: {}", redact_url(redirect_uri)),
            })?;

        info!(host = %host, uin, grayscale = %info.isgrayscale, "Resolved web host");

        let credentials = Credentials {
            sid: info.wxsid,
            skey: SecretString::from(info.skey),
            uin,
            pass_ticket: SecretString::from(decode_component(&info.pass_ticket)),
        };

        Ok(Session::new(credentials, host, device_id()))
    }

    /// Initializes the session: loads the first cursor and the user's own identity.
    #[instrument(name = "LoginFlow::init", skip_all, fields(host = %session.host()))]
    pub(crate) async fn init(&self, session: &mut Session) -> Result<()> {
        let url = self.authenticated_url(session, INIT_PATH)?;
        let body = encode(&InitRequest {
            base_request: session.base_request(),
        })?;

        let resp: InitResponse = self.post("webwxinit", &url, body).await?;
        check_ret("webwxinit", resp.base_response.ret, resp.base_response.err_msg)?;

        debug!(cursor = %resp.sync_key, "Session initialized");
        session.replace_cursor(resp.sync_key);
        if let Some(user) = resp.user {
            debug!(user = %user.user_name, nick = %user.nick_name, "Logged in as");
            session.set_user(user);
        }
        Ok(())
    }

    /// Loads the contact directory.
    #[instrument(name = "LoginFlow::fetch_contacts", skip_all, fields(host = %session.host()))]
    pub(crate) async fn fetch_contacts(&self, session: &mut Session) -> Result<()> {
        let url = self.authenticated_url(session, CONTACTS_PATH)?;
        let body = encode(&InitRequest {
            base_request: session.base_request(),
        })?;

        let resp: ContactsResponse = self.post("webwxgetcontact", &url, body).await?;
        check_ret(
            "webwxgetcontact",
            resp.base_response.ret,
            resp.base_response.err_msg,
        )?;

        let count = resp.member_list.len();
        session.contacts_mut().extend(resp.member_list);
        info!(count, total = session.contacts().len(), "Loaded contact directory");
        Ok(())
    }

    fn authenticated_url(&self, session: &Session, path: &str) -> Result<String> {
        with_query(
            &session.web_url(path),
            &[
                ("pass_ticket", session.pass_ticket()),
                ("skey", session.skey()),
                ("r", &now_millis().to_string()),
            ],
        )
    }

    async fn get(&self, url: &str) -> Result<HttpResponse> {
        within(self.config.timeouts.request, url, self.transport.get(url)).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        url: &str,
        body: Vec<u8>,
    ) -> Result<T> {
        let resp = within(
            self.config.timeouts.request,
            url,
            self.transport.post_json(url, body),
        )
        .await?
        .ensure_success()?;
        decode(endpoint, &resp.body)
    }
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::InvalidConfig {
        message: format!("request body could not be serialized: {e}"),
    })
}

pub(crate) fn decode<T: DeserializeOwned>(endpoint: &'static str, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|source| Error::Decode { endpoint, source })
}

pub(crate) fn check_ret(endpoint: &'static str, ret: i64, message: String) -> Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(Error::ServerRejected {
            endpoint,
            ret,
            message,
        })
    }
}

/// `e` followed by fifteen digits.
fn device_id() -> String {
    format!("e{:015}", now_millis().rem_euclid(1_000_000_000_000_000))
}

/// Percent-decodes a value that the server hands out already encoded.
fn decode_component(raw: &str) -> String {
    reqwest::Url::parse(&format!("https://localhost/?v={raw}"))
        .ok()
        .and_then(|url| url.query_pairs().next().map(|(_, v)| v.into_owned()))
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{Reply, ScriptedTransport};

    const LOGIN_XML: &str = "<error><ret>0</ret><message></message><skey>@crypt_k</skey>\
<wxsid>sid-9</wxsid><wxuin>424242</wxuin><pass_ticket>a%2Bb</pass_ticket>\
<isgrayscale>1</isgrayscale></error>";

    fn config() -> SessionConfig {
        SessionConfig::builder().scan_attempts(3).build().unwrap()
    }

    fn redirect() -> String {
        "https://wx2.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=T&uuid=U".to_string()
    }

    #[tokio::test]
    async fn test_obtain_uuid() {
        let transport = ScriptedTransport::default().route(
            "jslogin",
            [Reply::ok(r#"window.QRLogin.code = 200; window.QRLogin.uuid = "abc==";"#)],
        );
        let config = config();
        let flow = LoginFlow::new(&transport, &config);

        assert_eq!(flow.obtain_uuid().await.unwrap(), "abc==");
        let url = &transport.requests()[0];
        assert!(url.starts_with("https://login.weixin.qq.com/jslogin?appid=wx782c26e4c19acffb"));
        assert!(url.contains("lang=en_US"));
    }

    #[tokio::test]
    async fn test_obtain_uuid_blocked_page() {
        let transport =
            ScriptedTransport::default().route("jslogin", [Reply::ok("<html>blocked</html>")]);
        let config = config();
        let err = LoginFlow::new(&transport, &config).obtain_uuid().await.unwrap_err();
        assert!(matches!(err, Error::ProtocolMismatch { .. }));
    }

    #[tokio::test]
    async fn test_await_scan_bounded() {
        let transport = ScriptedTransport::default()
            .route("mmwebwx-bin/login", [Reply::ok("window.code=408;")]);
        let config = config();
        let err = LoginFlow::new(&transport, &config)
            .await_scan("abc")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ScanTimeout { attempts: 3 }));
        assert_eq!(transport.count("mmwebwx-bin/login"), 3);
    }

    #[tokio::test]
    async fn test_await_scan_survives_transport_errors() {
        let transport = ScriptedTransport::default().route(
            "mmwebwx-bin/login",
            [
                Reply::Status(502),
                Reply::ok("window.code=201;"),
                Reply::ok(format!("window.code=200;\nwindow.redirect_uri=\"{}\";", redirect())),
            ],
        );
        let config = config();
        let uri = LoginFlow::new(&transport, &config)
            .await_scan("abc")
            .await
            .unwrap();
        assert_eq!(uri, redirect());
    }

    #[tokio::test]
    async fn test_bootstrap_resolves_host() {
        let transport =
            ScriptedTransport::default().route("webwxnewloginpage", [Reply::Body(301, LOGIN_XML.into())]);
        let config = config();
        let session = LoginFlow::new(&transport, &config)
            .bootstrap(&redirect())
            .await
            .unwrap();

        assert_eq!(session.host(), "wx2.qq.com");
        assert_eq!(session.uin(), 424242);
        assert_eq!(session.sid(), "sid-9");
        assert_eq!(session.pass_ticket(), "a+b");
        assert!(session.device_id().starts_with('e'));
        assert_eq!(session.device_id().len(), 16);
    }

    #[tokio::test]
    async fn test_bootstrap_requires_301() {
        let transport =
            ScriptedTransport::default().route("webwxnewloginpage", [Reply::ok(LOGIN_XML)]);
        let config = config();
        let err = LoginFlow::new(&transport, &config)
            .bootstrap(&redirect())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedStatus {
                expected: 301,
                actual: 200,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_rejected() {
        let xml = "<error><ret>1203</ret><message>blocked</message></error>";
        let transport =
            ScriptedTransport::default().route("webwxnewloginpage", [Reply::Body(301, xml.into())]);
        let config = config();
        let err = LoginFlow::new(&transport, &config)
            .bootstrap(&redirect())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LoginRejected { ref ret, .. } if ret == "1203"));
    }

    #[tokio::test]
    async fn test_bootstrap_accepted_without_credentials() {
        let xml = "<error><ret>0</ret><message></message><wxuin>7</wxuin></error>";
        let transport =
            ScriptedTransport::default().route("webwxnewloginpage", [Reply::Body(301, xml.into())]);
        let config = config();
        let err = LoginFlow::new(&transport, &config)
            .bootstrap(&redirect())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ProtocolMismatch { endpoint: "webwxnewloginpage", ref detail } if detail.contains("<skey>")
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_blank_pass_ticket() {
        let xml = LOGIN_XML.replace("a%2Bb", " ");
        let transport =
            ScriptedTransport::default().route("webwxnewloginpage", [Reply::Body(301, xml)]);
        let config = config();
        let err = LoginFlow::new(&transport, &config)
            .bootstrap(&redirect())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ProtocolMismatch { ref detail, .. } if detail.contains("<pass_ticket>")
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_status_error_hides_ticket() {
        let transport =
            ScriptedTransport::default().route("webwxnewloginpage", [Reply::ok(LOGIN_XML)]);
        let config = config();
        let err = LoginFlow::new(&transport, &config)
            .bootstrap(&redirect())
            .await
            .unwrap_err();

        assert!(!err.to_string().contains("ticket=T"));
        assert!(err.to_string().contains("/cgi-bin/mmwebwx-bin/webwxnewloginpage"));
    }

    #[tokio::test]
    async fn test_full_flow_with_directory_failure() {
        let transport = ScriptedTransport::default()
            .route("jslogin", [Reply::ok(r#"window.QRLogin.uuid = "abc==";"#)])
            .route("qrcode/abc==", [Reply::ok("JPEG")])
            .route(
                "mmwebwx-bin/login",
                [Reply::ok(format!("window.redirect_uri=\"{}\";", redirect()))],
            )
            .route("webwxnewloginpage", [Reply::Body(301, LOGIN_XML.into())])
            .route(
                "webwxinit",
                [Reply::ok(
                    r#"{"BaseResponse":{"Ret":0},"SyncKey":{"Count":1,"List":[{"Key":1,"Val":5}]},
                        "User":{"UserName":"@me","NickName":"Me"}}"#,
                )],
            )
            .route("webwxgetcontact", [Reply::Status(500)]);
        let config = config();
        let mut flow = LoginFlow::new(&transport, &config);

        let mut shown = Vec::new();
        let session = flow.run(&mut |qr: &QrCode| shown.push(qr.clone())).await.unwrap();

        assert_eq!(flow.state(), LoginState::Ready);
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].image, b"JPEG");
        assert_eq!(session.cursor().to_string(), "1_5");
        assert_eq!(session.contacts().display_name("@me"), "Me");
        assert!(transport
            .requests()
            .iter()
            .any(|url| url.starts_with("https://wx2.qq.com/cgi-bin/mmwebwx-bin/webwxinit")));

        let init_body = &transport.bodies("webwxinit")[0];
        assert!(init_body.contains(r#""Uin":424242"#));
    }

    #[tokio::test]
    async fn test_failure_marks_state() {
        let transport = ScriptedTransport::default().route("jslogin", [Reply::Status(503)]);
        let config = config();
        let mut flow = LoginFlow::new(&transport, &config);

        let err = flow.run(&mut |_: &QrCode| {}).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(flow.state(), LoginState::Failed);
    }

    #[test]
    fn test_decode_component() {
        assert_eq!(decode_component("a%2Bb%3D"), "a+b=");
        assert_eq!(decode_component("plain"), "plain");
    }
}
