//! Raw capture of the HTTP exchange with the PBX.
//!
//! Sinks observe traffic only; a failing sink never fails the request it observed.

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::io::Write;
use std::sync::Mutex;

#[derive(Debug)]
pub enum WireEvent<'a> {
    Request {
        method: &'a str,
        url: &'a str,
        headers: &'a HeaderMap,
        body: Option<&'a [u8]>,
    },
    Response {
        status: StatusCode,
        url: &'a str,
        headers: &'a HeaderMap,
        body: &'a [u8],
    },
}

impl WireEvent<'_> {
    fn parts(&self) -> (String, &HeaderMap, &[u8]) {
        match self {
            WireEvent::Request {
                method,
                url,
                headers,
                body,
            } => (format!(">>> {} {}", method, url), *headers, body.unwrap_or(&[])),
            WireEvent::Response {
                status,
                url,
                headers,
                body,
            } => (format!("<<< {} {}", status, url), *headers, *body),
        }
    }

    /// HTTP/1.1-style rendering: start line, headers, blank line, body bytes untouched.
    pub fn render(&self) -> Vec<u8> {
        let (start_line, headers, body) = self.parts();

        let mut out = Vec::with_capacity(start_line.len() + body.len() + 256);
        out.extend_from_slice(start_line.as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in headers {
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Same layout as [`render`](Self::render), as text. A body that is not UTF-8, such as
    /// the gzip export or upload, is replaced by a summary line with its size and first bytes.
    pub fn render_text(&self) -> String {
        let (start_line, headers, body) = self.parts();

        let mut out = start_line;
        out.push_str("\r\n");
        for (name, value) in headers {
            out.push_str(name.as_str());
            out.push_str(": ");
            out.push_str(&String::from_utf8_lossy(value.as_bytes()));
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        match std::str::from_utf8(body) {
            Ok(text) => out.push_str(text),
            Err(_) => {
                let head: String = body.iter().take(16).map(|b| format!("{:02x}", b)).collect();
                out.push_str(&format!("[{} bytes binary body: {}...]", body.len(), head));
            }
        }
        out.push_str("\r\n");
        out
    }
}

pub trait DebugSink: Send + Sync {
    fn record(&self, event: &WireEvent<'_>);
}

/// Emits each exchange as a debug event on the `wire` target, rendered with
/// [`WireEvent::render_text`]. Binary bodies only appear as a summary; use [`WriterSink`]
/// for a byte-exact capture.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DebugSink for TracingSink {
    fn record(&self, event: &WireEvent<'_>) {
        tracing::debug!(target: "wire", "{}", event.render_text());
    }
}

/// Writes every exchange verbatim to `W` (stderr, a trace file, a buffer in tests).
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> DebugSink for WriterSink<W> {
    fn record(&self, event: &WireEvent<'_>) {
        let mut writer = match self.writer.lock() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writer.write_all(&event.render()).and_then(|_| writer.flush()) {
            tracing::warn!("⚠️ Wire trace write failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, CONTENT_TYPE};

    #[test]
    fn test_render_request() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/xml"));
        let event = WireEvent::Request {
            method: "POST",
            url: "https://pbx/lcr35datensicherung_default",
            headers: &headers,
            body: Some(b"\x1f\x8b\x00"),
        };

        let rendered = event.render();
        let expected_head = b">>> POST https://pbx/lcr35datensicherung_default\r\ncontent-type: text/xml\r\n\r\n";
        assert!(rendered.starts_with(expected_head));
        assert!(rendered.ends_with(b"\x1f\x8b\x00\r\n"));
    }

    #[test]
    fn test_render_text_summarizes_binary_body() {
        let headers = HeaderMap::new();
        let gzip_body = [0x1f, 0x8b, 0x08, 0x00, 0xff, 0xfe];
        let event = WireEvent::Response {
            status: StatusCode::OK,
            url: "https://pbx/lcr35datensicherung_export",
            headers: &headers,
            body: &gzip_body,
        };

        let text = event.render_text();
        assert!(text.starts_with("<<< 200 OK https://pbx/lcr35datensicherung_export\r\n"));
        assert!(text.contains("[6 bytes binary body: 1f8b0800fffe...]"));
        // the byte-exact rendering keeps the body
        assert!(event.render().ends_with(&[0xff, 0xfe, b'\r', b'\n']));

        let json = WireEvent::Response {
            status: StatusCode::OK,
            url: "https://pbx/lcr35tabellen_list",
            headers: &headers,
            body: br#"{"rows":[]}"#,
        };
        assert!(json.render_text().ends_with("{\"rows\":[]}\r\n"));
    }

    #[test]
    fn test_writer_sink_collects_events() {
        let sink = WriterSink::new(Vec::new());
        let headers = HeaderMap::new();
        sink.record(&WireEvent::Response {
            status: StatusCode::UNAUTHORIZED,
            url: "https://pbx/lcr35tabellen_list",
            headers: &headers,
            body: b"denied",
        });

        let trace = String::from_utf8(sink.into_inner()).unwrap();
        assert!(trace.starts_with("<<< 401 Unauthorized https://pbx/lcr35tabellen_list"));
        assert!(trace.contains("denied"));
    }
}
