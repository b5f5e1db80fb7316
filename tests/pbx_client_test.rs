use anyhow::Result;
use auerswald_lcr::adapters::wire::{DebugSink, WireEvent};
use auerswald_lcr::adapters::{Listing, PbxClient};
use auerswald_lcr::config::PbxConfig;
use auerswald_lcr::{LcrDocument, LcrError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use httpmock::prelude::*;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

const CHALLENGE: &str = r#"Digest realm="PBX", nonce="abc123", qop="auth", algorithm=MD5"#;

const TABLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Slcr4TablesDB>
<SlcrProvider_table>
<SlcrProvider providerId="1234" vorwahl="01013" name="Tele2"></SlcrProvider>
</SlcrProvider_table>
<SlcrRoutingEntry_table>
<SlcrRoutingEntry routingEntryId="10001" routingId="1234" preisProMinute="1"></SlcrRoutingEntry>
</SlcrRoutingEntry_table>
</Slcr4TablesDB>
"#;

fn config(server: &MockServer) -> PbxConfig {
    PbxConfig {
        address: server.base_url(),
        username: "sub-admin".to_string(),
        password: "secret".to_string(),
        verify_tls: false,
        timeout_seconds: Some(5),
    }
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Authorized probe first: httpmock answers with the earliest registered mock that matches.
async fn mock_login(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/lcr35tabellen_list")
                .header_exists("authorization");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"rows":[]}"#);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/lcr35tabellen_list");
            then.status(401).header("www-authenticate", CHALLENGE);
        })
        .await;
}

#[derive(Default)]
struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl DebugSink for RecordingSink {
    fn record(&self, event: &WireEvent<'_>) {
        let rendered = String::from_utf8_lossy(&event.render()).into_owned();
        self.lines.lock().unwrap().push(rendered);
    }
}

/// Keeps the raw request bodies sent to `path`.
struct BodyCapture {
    path: &'static str,
    bodies: Mutex<Vec<Vec<u8>>>,
}

impl DebugSink for BodyCapture {
    fn record(&self, event: &WireEvent<'_>) {
        if let WireEvent::Request {
            url,
            body: Some(body),
            ..
        } = event
        {
            if url.contains(self.path) {
                self.bodies.lock().unwrap().push(body.to_vec());
            }
        }
    }
}

/// The gzip'd file part of a single-part multipart body, decompressed.
fn multipart_xml(body: &[u8]) -> String {
    let start = body
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("part headers")
        + 4;
    let end = body
        .windows(4)
        .rposition(|w| w == b"\r\n--")
        .expect("closing boundary");
    let mut xml = String::new();
    GzDecoder::new(&body[start..end])
        .read_to_string(&mut xml)
        .unwrap();
    xml
}

#[tokio::test]
async fn test_authenticate_with_digest() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server).await;

    let client = PbxClient::new(&config(&server))?;
    client.authenticate().await?;
    Ok(())
}

#[tokio::test]
async fn test_wrong_credentials_are_an_auth_error() -> Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/lcr35tabellen_list");
            then.status(401).header("www-authenticate", CHALLENGE);
        })
        .await;

    let client = PbxClient::new(&config(&server))?;
    let err = client.authenticate().await.unwrap_err();
    assert!(matches!(err, LcrError::AuthError { .. }), "got {:?}", err);
    assert_eq!(err.exit_code(), 2);
    Ok(())
}

#[tokio::test]
async fn test_non_lcr_device_is_a_protocol_error() -> Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/lcr35tabellen_list");
            then.status(200).body("<html>router login</html>");
        })
        .await;

    let client = PbxClient::new(&config(&server))?;
    let err = client.authenticate().await.unwrap_err();
    assert!(matches!(err, LcrError::ProtocolError { .. }), "got {:?}", err);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_pbx_is_a_transport_error() -> Result<()> {
    // Port 9 (discard) is closed on test hosts.
    let client = PbxClient::new(&PbxConfig {
        address: "http://127.0.0.1:9".to_string(),
        username: "u".to_string(),
        password: "p".to_string(),
        verify_tls: false,
        timeout_seconds: Some(2),
    })?;

    let err = client.authenticate().await.unwrap_err();
    assert!(matches!(err, LcrError::TransportError(_)), "got {:?}", err);
    assert_eq!(err.exit_code(), 3);
    Ok(())
}

#[tokio::test]
async fn test_download_gzip_export() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server).await;
    let export = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/lcr35datensicherung_export")
                .header_exists("authorization");
            then.status(200)
                .header("content-type", "application/octet-stream")
                .body(gzip(TABLE.as_bytes()));
        })
        .await;

    let session = PbxClient::new(&config(&server))?.authenticate().await?;
    let document = session.download().await?;

    export.assert_async().await;
    assert_eq!(document.as_str(), TABLE);
    assert_eq!(document.routing_entry_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_download_of_html_is_a_protocol_error() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/lcr35datensicherung_export");
            then.status(200).body("<html><body>Session expired</body></html>");
        })
        .await;

    let session = PbxClient::new(&config(&server))?.authenticate().await?;
    let err = session.download().await.unwrap_err();
    assert!(matches!(err, LcrError::ProtocolError { .. }), "got {:?}", err);
    assert_eq!(err.exit_code(), 4);
    Ok(())
}

#[tokio::test]
async fn test_upload_sends_gzip_multipart() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server).await;
    let import = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/lcr35datensicherung_import")
                .query_param("h_ulfilename", "lcr-2026-10-16_040000.xml")
                .header("content-encoding", "gzip")
                .header_exists("authorization")
                .header_exists("content-type");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"errors":[],"warnings":[]}"#);
        })
        .await;

    let capture = Arc::new(BodyCapture {
        path: "/lcr35datensicherung_import",
        bodies: Mutex::new(Vec::new()),
    });
    let session = PbxClient::new(&config(&server))?
        .with_debug_sink(capture.clone())
        .authenticate()
        .await?;
    let document = LcrDocument::parse(TABLE)?;
    session
        .upload("lcr-2026-10-16_040000.xml", &document)
        .await?;

    import.assert_async().await;
    let bodies = capture.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    let body = String::from_utf8_lossy(&bodies[0]);
    assert!(body.contains("name=\"file\"; filename=\"lcr-2026-10-16_040000.xml\""));
    assert!(body.contains("Content-Type: text/xml"));
    assert_eq!(multipart_xml(&bodies[0]), document.as_str());
    Ok(())
}

#[tokio::test]
async fn test_upload_errors_are_rejections() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server).await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/lcr35datensicherung_import");
            then.status(200).body(
                r#"{"errors":[{"err_str":"Provider 4711 unknown"},{"err_str":"Zeile 12 ungültig"}],"warnings":[]}"#,
            );
        })
        .await;

    let session = PbxClient::new(&config(&server))?.authenticate().await?;
    let err = session
        .upload("lcr.xml", &LcrDocument::parse(TABLE)?)
        .await
        .unwrap_err();

    match err {
        LcrError::RejectedError { messages } => {
            assert_eq!(messages, vec!["Provider 4711 unknown", "Zeile 12 ungültig"]);
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_upload_warnings_are_rejections() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server).await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/lcr35datensicherung_import");
            then.status(200)
                .body(r#"{"errors":[],"warnings":["Tabelle gekürzt"]}"#);
        })
        .await;

    let session = PbxClient::new(&config(&server))?.authenticate().await?;
    let err = session
        .upload("lcr.xml", &LcrDocument::parse(TABLE)?)
        .await
        .unwrap_err();

    assert!(matches!(err, LcrError::RejectedError { ref messages } if messages.len() == 1));
    assert_eq!(err.exit_code(), 5);
    Ok(())
}

#[tokio::test]
async fn test_repeated_resets_succeed() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server).await;
    let reset = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/lcr35datensicherung_default")
                .header_exists("authorization");
            then.status(200).body("{}");
        })
        .await;

    let session = PbxClient::new(&config(&server))?.authenticate().await?;
    session.reset_to_defaults().await?;
    session.reset_to_defaults().await?;

    assert_eq!(reset.hits_async().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_erase_deletes_networks_then_providers() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/lcr35netze_state");
            then.status(200).body(r#"{"rows":[{"id":3},{"id":8}]}"#);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/lcr35provider_state");
            then.status(200).body(r#"{"rows":[]}"#);
        })
        .await;
    let save_networks = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/lcr35netze_save")
                .header("content-type", "application/x-www-form-urlencoded")
                .body_contains("3_!nativeeditor_status=deleted")
                .body_contains("8_gr_id=8");
            then.status(200).body("{}");
        })
        .await;
    let save_providers = server
        .mock_async(|when, then| {
            when.method(POST).path("/lcr35provider_save");
            then.status(200).body("{}");
        })
        .await;

    let session = PbxClient::new(&config(&server))?.authenticate().await?;
    session.erase().await?;

    save_networks.assert_async().await;
    // empty provider table needs no save
    assert_eq!(save_providers.hits_async().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_list_networks() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/lcr35netze_state");
            then.status(200)
                .body(r#"{"rows":[{"id":42,"name":"Deutschland (Festnetz)"}]}"#);
        })
        .await;

    let session = PbxClient::new(&config(&server))?.authenticate().await?;
    let listing = session.list(Listing::Networks).await?;
    assert_eq!(listing["rows"][0]["id"], 42);
    Ok(())
}

#[tokio::test]
async fn test_debug_sink_sees_every_exchange() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_login(&server).await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/lcr35datensicherung_default");
            then.status(200).body("{}");
        })
        .await;

    let sink = Arc::new(RecordingSink::default());
    let client = PbxClient::new(&config(&server))?.with_debug_sink(sink.clone());
    client.authenticate().await?.reset_to_defaults().await?;

    let lines = sink.lines.lock().unwrap();
    // challenge, authorized probe, reset: one request and one response each
    assert_eq!(lines.len(), 6);
    assert!(lines[0].starts_with(">>> GET "));
    assert!(lines[1].starts_with("<<< 401 "));
    assert!(lines[2].contains("authorization: Digest"));
    assert!(lines[4].starts_with(">>> POST "));
    assert!(lines[4].contains("/lcr35datensicherung_default"));
    Ok(())
}
