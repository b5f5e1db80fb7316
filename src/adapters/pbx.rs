//! Client for the Soft-LCR 4.0 management interface of Auerswald PBX systems.
//!
//! The interface is a set of HTTP endpoints behind Digest authentication:
//!
//! | operation | request |
//! |-----------|---------|
//! | login probe | `GET /lcr35tabellen_list` |
//! | download | `GET /lcr35datensicherung_export` (gzip XML) |
//! | upload | `POST /lcr35datensicherung_import?h_ulfilename=NAME` (multipart, gzip XML) |
//! | defaults | `POST /lcr35datensicherung_default` |
//! | erase | `GET /<table>_state` then `POST /<table>_save` per table |
//!
//! Nothing here retries. Every failure surfaces as one of `AuthError`, `TransportError`,
//! `ProtocolError` or `RejectedError`.

use crate::adapters::wire::{DebugSink, WireEvent};
use crate::config::PbxConfig;
use crate::domain::model::LcrDocument;
use crate::domain::ports::{LcrTableService, PbxConnector};
use crate::utils::error::{LcrError, Result};
use async_trait::async_trait;
use digest_auth::{AuthContext, WwwAuthenticateHeader};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{
    HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, WWW_AUTHENTICATE,
};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use url::form_urlencoded;

const PROBE_PATH: &str = "/lcr35tabellen_list";
const EXPORT_PATH: &str = "/lcr35datensicherung_export";
const IMPORT_PATH: &str = "/lcr35datensicherung_import";
const DEFAULTS_PATH: &str = "/lcr35datensicherung_default";

/// Tables cleared by `erase`, in order.
const ERASABLE_TABLES: [&str; 2] = ["lcr35netze", "lcr35provider"];

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    Networks,
    Providers,
    Tables,
}

impl Listing {
    fn path(self) -> &'static str {
        match self {
            Listing::Networks => "/lcr35netze_state",
            Listing::Providers => "/lcr35tabellen_provider",
            Listing::Tables => PROBE_PATH,
        }
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// Unauthenticated handle on one PBX. `authenticate` turns it into a [`PbxSession`].
#[derive(Clone)]
pub struct PbxClient {
    base_url: String,
    credentials: Credentials,
    http: reqwest::Client,
    sink: Option<Arc<dyn DebugSink>>,
}

impl fmt::Debug for PbxClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PbxClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .field("debug_sink", &self.sink.is_some())
            .finish()
    }
}

impl PbxClient {
    pub fn new(config: &PbxConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        Ok(Self {
            base_url: config.base_url(),
            credentials: Credentials {
                username: config.username.clone(),
                password: config.password.clone(),
            },
            http,
            sink: None,
        })
    }

    pub fn with_debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn set_debug_sink(&mut self, sink: Option<Arc<dyn DebugSink>>) {
        self.sink = sink;
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Runs the Digest handshake against the listing endpoint and checks the PBX answers
    /// like a Soft-LCR 4.0 interface.
    pub async fn authenticate(&self) -> Result<PbxSession> {
        tracing::debug!("Authenticating against {}", self.base_url);

        let probe = self.http.get(self.url(PROBE_PATH)).build()?;
        let challenge_reply = self.execute(probe).await?;
        if challenge_reply.status != StatusCode::UNAUTHORIZED {
            return Err(LcrError::protocol(format!(
                "expected a Digest challenge from {}, got {}",
                PROBE_PATH, challenge_reply.status
            )));
        }

        let header = challenge_reply
            .headers
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| LcrError::protocol("401 reply carries no WWW-Authenticate header"))?;
        let challenge = digest_auth::parse(header)
            .map_err(|e| LcrError::protocol(format!("unsupported authentication challenge: {}", e)))?;

        let session = PbxSession {
            client: self.clone(),
            challenge: Mutex::new(challenge),
        };

        let reply = session.exchange(Outgoing::get(PROBE_PATH)).await?;
        if reply.status == StatusCode::UNAUTHORIZED || reply.status == StatusCode::FORBIDDEN {
            return Err(LcrError::auth(format!(
                "PBX refused user '{}' ({})",
                self.credentials.username, reply.status
            )));
        }
        check_status(PROBE_PATH, &reply)?;
        serde_json::from_slice::<Value>(&reply.body).map_err(|_| {
            LcrError::protocol(format!(
                "{} did not return JSON; is this a Soft-LCR 4.0 interface?",
                PROBE_PATH
            ))
        })?;

        tracing::info!("🔐 Authenticated as '{}'", self.credentials.username);
        Ok(session)
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }

    async fn execute(&self, request: reqwest::Request) -> Result<Exchange> {
        if let Some(sink) = &self.sink {
            sink.record(&WireEvent::Request {
                method: request.method().as_str(),
                url: request.url().as_str(),
                headers: request.headers(),
                body: request.body().and_then(|body| body.as_bytes()),
            });
        }

        let response = self.http.execute(request).await?;
        let status = response.status();
        let url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        if let Some(sink) = &self.sink {
            sink.record(&WireEvent::Response {
                status,
                url: &url,
                headers: &headers,
                body: &body,
            });
        }

        Ok(Exchange {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl PbxConnector for PbxClient {
    type Session = PbxSession;

    async fn authenticate(&self) -> Result<PbxSession> {
        PbxClient::authenticate(self).await
    }
}

struct Exchange {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

struct Outgoing {
    method: Method,
    path: String,
    content_type: Option<String>,
    content_encoding: Option<&'static str>,
    body: Vec<u8>,
}

impl Outgoing {
    fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            content_type: None,
            content_encoding: None,
            body: Vec::new(),
        }
    }

    fn post(path: impl Into<String>, content_type: Option<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            content_type,
            content_encoding: None,
            body,
        }
    }
}

/// One authenticated conversation with the PBX. Dropping it forgets the credentials'
/// nonce state; a new session needs a new handshake.
pub struct PbxSession {
    client: PbxClient,
    challenge: Mutex<WwwAuthenticateHeader>,
}

impl fmt::Debug for PbxSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PbxSession")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ImportReply {
    #[serde(default)]
    errors: Vec<ImportMessage>,
    #[serde(default)]
    warnings: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ImportMessage {
    err_str: String,
}

impl PbxSession {
    /// Fetches the active table set as exported by the PBX.
    pub async fn download(&self) -> Result<LcrDocument> {
        let reply = self.call(Outgoing::get(EXPORT_PATH)).await?;
        let raw = decode_export(reply.body)?;
        let document = LcrDocument::from_bytes(raw).map_err(|e| {
            LcrError::protocol(format!("{} did not return an LCR table: {}", EXPORT_PATH, e))
        })?;

        tracing::info!(
            "📥 Downloaded LCR tables ({} bytes): {:?}",
            document.as_bytes().len(),
            document.table_counts()
        );
        Ok(document)
    }

    /// Replaces the active table set with `document`.
    pub async fn upload(&self, filename: &str, document: &LcrDocument) -> Result<()> {
        let compressed = gzip(document.as_bytes())?;
        let boundary = format!(
            "----auerswald-lcr-{}",
            chrono::Utc::now().timestamp_micros()
        );
        let body = multipart_file(&boundary, filename, &compressed);
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("h_ulfilename", filename)
            .finish();

        let mut outgoing = Outgoing::post(
            format!("{}?{}", IMPORT_PATH, query),
            Some(format!("multipart/form-data; boundary={}", boundary)),
            body,
        );
        outgoing.content_encoding = Some("gzip");

        tracing::debug!(
            "Uploading {} ({} bytes, {} compressed)",
            filename,
            document.as_bytes().len(),
            compressed.len()
        );
        let reply = self.exchange(outgoing).await?;
        if reply.status == StatusCode::PAYLOAD_TOO_LARGE {
            return Err(LcrError::RejectedError {
                messages: vec!["table too large for the PBX".to_string()],
            });
        }
        check_status(IMPORT_PATH, &reply)?;

        let result: ImportReply = serde_json::from_slice(&reply.body).map_err(|e| {
            LcrError::protocol(format!("unexpected reply from {}: {}", IMPORT_PATH, e))
        })?;
        let mut messages: Vec<String> = result.errors.into_iter().map(|e| e.err_str).collect();
        messages.extend(result.warnings.iter().map(|w| match w {
            Value::String(text) => format!("warning: {}", text),
            other => format!("warning: {}", other),
        }));
        if !messages.is_empty() {
            return Err(LcrError::RejectedError { messages });
        }

        tracing::info!("📤 Uploaded {}: {:?}", filename, document.table_counts());
        Ok(())
    }

    pub async fn reset_to_defaults(&self) -> Result<()> {
        self.call(Outgoing::post(DEFAULTS_PATH, None, Vec::new()))
            .await?;
        tracing::info!("♻️ LCR reset to factory defaults");
        Ok(())
    }

    /// Deletes every network and provider row. Only ever run on explicit request.
    pub async fn erase(&self) -> Result<()> {
        for table in ERASABLE_TABLES {
            let state_path = format!("/{}_state", table);
            let state = self.get_json(&state_path).await?;
            let ids = row_ids(&state_path, &state)?;
            if ids.is_empty() {
                tracing::debug!("{} is already empty", table);
                continue;
            }

            self.call(Outgoing::post(
                format!("/{}_save", table),
                Some("application/x-www-form-urlencoded".to_string()),
                erase_form(&ids).into_bytes(),
            ))
            .await?;
            tracing::info!("🗑️ Deleted {} rows from {}", ids.len(), table);
        }
        Ok(())
    }

    pub async fn list(&self, listing: Listing) -> Result<Value> {
        self.get_json(listing.path()).await
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let reply = self.call(Outgoing::get(path)).await?;
        serde_json::from_slice(&reply.body)
            .map_err(|e| LcrError::protocol(format!("{} did not return JSON: {}", path, e)))
    }

    /// Authenticated exchange whose status must be a success.
    async fn call(&self, outgoing: Outgoing) -> Result<Exchange> {
        let path = outgoing.path.clone();
        let reply = self.exchange(outgoing).await?;
        check_status(&path, &reply)?;
        Ok(reply)
    }

    async fn exchange(&self, outgoing: Outgoing) -> Result<Exchange> {
        let authorization = self.authorization(&outgoing)?;
        let has_body = outgoing.method == Method::POST;

        let mut request = self
            .client
            .http
            .request(outgoing.method, self.client.url(&outgoing.path))
            .header(AUTHORIZATION, authorization);
        if let Some(content_type) = outgoing.content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        if let Some(encoding) = outgoing.content_encoding {
            request = request.header(CONTENT_ENCODING, HeaderValue::from_static(encoding));
        }
        if has_body {
            request = request.body(outgoing.body);
        }

        self.client.execute(request.build()?).await
    }

    fn authorization(&self, outgoing: &Outgoing) -> Result<String> {
        let credentials = &self.client.credentials;
        let context = if outgoing.method == Method::POST {
            AuthContext::new_post(
                credentials.username.as_str(),
                credentials.password.as_str(),
                outgoing.path.as_str(),
                Some(outgoing.body.as_slice()),
            )
        } else {
            AuthContext::new(
                credentials.username.as_str(),
                credentials.password.as_str(),
                outgoing.path.as_str(),
            )
        };

        let mut challenge = self
            .challenge
            .lock()
            .map_err(|_| LcrError::protocol("authentication state poisoned"))?;
        let header = challenge
            .respond(&context)
            .map_err(|e| LcrError::protocol(format!("cannot answer Digest challenge: {}", e)))?;
        Ok(header.to_header_string())
    }
}

#[async_trait]
impl LcrTableService for PbxSession {
    async fn download(&self) -> Result<LcrDocument> {
        PbxSession::download(self).await
    }

    async fn upload(&self, filename: &str, document: &LcrDocument) -> Result<()> {
        PbxSession::upload(self, filename, document).await
    }

    async fn reset_to_defaults(&self) -> Result<()> {
        PbxSession::reset_to_defaults(self).await
    }

    async fn erase(&self) -> Result<()> {
        PbxSession::erase(self).await
    }
}

fn check_status(path: &str, reply: &Exchange) -> Result<()> {
    match reply.status {
        status if status.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED => Err(LcrError::protocol(format!(
            "session expired: {} answered 401",
            path
        ))),
        status => Err(LcrError::protocol(format!(
            "{} answered {}: {}",
            path,
            status,
            String::from_utf8_lossy(&reply.body).chars().take(200).collect::<String>()
        ))),
    }
}

fn decode_export(body: Vec<u8>) -> Result<Vec<u8>> {
    if !body.starts_with(&GZIP_MAGIC) {
        return Ok(body);
    }
    let mut xml = Vec::new();
    GzDecoder::new(body.as_slice())
        .read_to_end(&mut xml)
        .map_err(|e| LcrError::protocol(format!("corrupt gzip export: {}", e)))?;
    Ok(xml)
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn multipart_file(boundary: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let filename = filename.replace('"', "%22");
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: text/xml\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

fn row_ids(path: &str, state: &Value) -> Result<Vec<String>> {
    let rows = state
        .get("rows")
        .and_then(Value::as_array)
        .ok_or_else(|| LcrError::protocol(format!("{} has no rows array", path)))?;

    rows.iter()
        .map(|row| match row.get("id") {
            Some(Value::Number(id)) => Ok(id.to_string()),
            Some(Value::String(id)) => Ok(id.clone()),
            _ => Err(LcrError::protocol(format!("{} has a row without id", path))),
        })
        .collect()
}

/// Grid-save form marking every row deleted. The `!` in the status key must reach the PBX
/// unescaped.
fn erase_form(ids: &[String]) -> String {
    let mut form = form_urlencoded::Serializer::new(String::new());
    form.append_pair("ids", &ids.join(","));
    for id in ids {
        form.append_pair(&format!("{}_gr_id", id), id);
        form.append_pair(&format!("{}_!nativeeditor_status", id), "deleted");
    }
    form.finish().replace("%21", "!")
}
