//! HTTP interface
//!
//! [`Service::handle`] maps a transport-neutral [`HttpRequest`] to an
//! [`HttpReply`]; [`serve`] binds it to a `tiny_http` listener with one thread
//! per request.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;

use crate::storage::Storage;
use crate::{CancelToken, ConversionRequest, Converter, Error, Launcher, PageFormat, Result};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A request as seen by the service
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Split a raw request target into path and decoded query pairs.
    pub fn new(method: &str, target: &str, content_type: Option<String>, body: Vec<u8>) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query: url::form_urlencoded::parse(query.as_bytes()).into_owned().collect(),
            content_type,
            body,
        }
    }
}

/// A response ready to be written by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            headers: Vec::new(),
            body: value.to_string().into_bytes(),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "error": message }))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parse the body as JSON; `Value::Null` when it is not JSON.
    pub fn json_body(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertBody {
    #[serde(default)]
    html_content: Option<String>,
    #[serde(default)]
    page_format: Option<String>,
}

/// Routes requests to the converter and the object store
pub struct Service<L: Launcher> {
    converter: Converter<L>,
    storage: Storage,
    started: Instant,
}

impl<L: Launcher> Service<L> {
    pub fn new(converter: Converter<L>, storage: Storage) -> Self {
        Self {
            converter,
            storage,
            started: Instant::now(),
        }
    }

    pub fn handle(&self, req: &HttpRequest) -> HttpReply {
        match (req.method.as_str(), req.path.as_str()) {
            ("POST", "/api/convert-pdf") => self.convert_pdf(req),
            ("GET", "/api/health") => self.health(),
            ("POST", "/api/upload") => self.upload(req),
            ("GET", "/api/download") => self.download(req),
            (_, "/api/convert-pdf" | "/api/health" | "/api/upload" | "/api/download") => {
                HttpReply::error(405, "Method not allowed")
            }
            _ => HttpReply::error(404, "Not found"),
        }
    }

    fn convert_pdf(&self, req: &HttpRequest) -> HttpReply {
        let body: ConvertBody = match serde_json::from_slice(&req.body) {
            Ok(body) => body,
            Err(e) => {
                warn!("Malformed conversion body: {}", e);
                return HttpReply::error(400, "Request body must be JSON");
            }
        };
        let html = body.html_content.unwrap_or_default();
        if html.trim().is_empty() {
            return HttpReply::error(400, "HTML content is missing");
        }
        let page_format = match body.page_format.as_deref() {
            Some("single") => PageFormat::Continuous,
            _ => PageFormat::Paged,
        };
        info!("Starting PDF conversion ({} chars, format {})", html.len(), page_format);

        let request = ConversionRequest::new(html, page_format);
        match self.converter.convert(&request, &CancelToken::new()) {
            Ok(pdf) => HttpReply {
                status: 200,
                content_type: "application/pdf".to_string(),
                headers: vec![(
                    "Content-Disposition".to_string(),
                    format!(
                        "attachment; filename=\"document-{}.pdf\"",
                        chrono::Utc::now().timestamp_millis()
                    ),
                )],
                body: pdf.bytes,
            },
            Err(err) => failure_reply("PDF conversion failed", &err),
        }
    }

    fn health(&self) -> HttpReply {
        HttpReply::json(
            200,
            json!({
                "status": "ok",
                "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                "uptime": self.started.elapsed().as_secs_f64(),
                "memory": { "rss": resident_memory_bytes() },
                "version": VERSION,
            }),
        )
    }

    fn upload(&self, req: &HttpRequest) -> HttpReply {
        let name = match req.query.get("name").filter(|n| !n.trim().is_empty()) {
            Some(name) => name,
            None => return HttpReply::error(400, "No file found"),
        };
        if !is_html_upload(name, req.content_type.as_deref()) {
            return HttpReply::error(400, "The file must be an HTML file");
        }
        match self.storage.upload(&req.body, name) {
            Ok(key) => HttpReply::json(
                200,
                json!({
                    "success": true,
                    "cloudStoragePath": key,
                    "message": "File uploaded",
                }),
            ),
            Err(err) => failure_reply("Upload failed", &err),
        }
    }

    fn download(&self, req: &HttpRequest) -> HttpReply {
        let key = match req.query.get("key").filter(|k| !k.is_empty()) {
            Some(key) => key,
            None => return HttpReply::error(400, "Missing key"),
        };
        match self.storage.download(key) {
            Ok(bytes) => HttpReply {
                status: 200,
                content_type: "text/html; charset=utf-8".to_string(),
                headers: Vec::new(),
                body: bytes,
            },
            Err(err) => failure_reply("Download failed", &err),
        }
    }
}

fn failure_reply(context: &str, err: &Error) -> HttpReply {
    let status = err.status_code();
    if status >= 500 {
        error!("{}: {}", context, err);
    }
    match err {
        Error::Validation(msg) => HttpReply::error(status, msg),
        _ => HttpReply::json(status, json!({ "error": context, "details": err.to_string() })),
    }
}

/// An upload is accepted when either its name or its content type says HTML.
pub fn is_html_upload(name: &str, content_type: Option<&str>) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".html")
        || lower.ends_with(".htm")
        || content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("html"))
}

fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

/// Serve `service` on `addr` until the listener fails.
pub fn serve<L>(service: Arc<Service<L>>, addr: &str) -> Result<()>
where
    L: Launcher + Send + Sync + 'static,
{
    let server = tiny_http::Server::http(addr)
        .map_err(|e| Error::Config(format!("Failed to bind {}: {}", addr, e)))?;
    info!("Listening on http://{}", addr);

    for mut request in server.incoming_requests() {
        let service = service.clone();
        thread::spawn(move || {
            let content_type = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("Content-Type"))
                .map(|h| h.value.as_str().to_string());
            let mut body = Vec::new();
            if let Err(e) = request.as_reader().read_to_end(&mut body) {
                warn!("Failed to read request body: {}", e);
                let _ = request.respond(tiny_http::Response::empty(tiny_http::StatusCode(400)));
                return;
            }

            let req = HttpRequest::new(
                request.method().as_str(),
                request.url(),
                content_type,
                body,
            );
            let started = Instant::now();
            let reply = service.handle(&req);
            info!(
                "{} {} -> {} in {}ms",
                req.method,
                req.path,
                reply.status,
                started.elapsed().as_millis()
            );

            let mut response = tiny_http::Response::from_data(reply.body)
                .with_status_code(tiny_http::StatusCode(reply.status));
            let headers = std::iter::once(("Content-Type".to_string(), reply.content_type))
                .chain(reply.headers);
            for (name, value) in headers {
                match tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                    Ok(header) => response.add_header(header),
                    Err(()) => warn!("Dropping invalid header {}", name),
                }
            }
            if let Err(e) = request.respond(response) {
                warn!("Failed to write response: {}", e);
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_parsing_decodes_query() {
        let req = HttpRequest::new("get", "/api/download?key=a%2Fb.html&x=1", None, vec![]);
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/api/download");
        assert_eq!(req.query.get("key").map(String::as_str), Some("a/b.html"));
    }

    #[test]
    fn html_upload_detection() {
        assert!(is_html_upload("Page.HTML", None));
        assert!(is_html_upload("page.htm", None));
        assert!(is_html_upload("page.txt", Some("text/html")));
        assert!(!is_html_upload("page.txt", Some("text/plain")));
        assert!(!is_html_upload("page", None));
    }

    #[test]
    fn validation_failures_keep_their_message() {
        let reply = failure_reply("PDF conversion failed", &Error::Validation("bad".into()));
        assert_eq!(reply.status, 400);
        assert_eq!(reply.json_body(), json!({ "error": "bad" }));

        let reply = failure_reply("PDF conversion failed", &Error::Render("boom".into()));
        assert_eq!(reply.status, 500);
        assert_eq!(reply.json_body()["details"], "Rendering failed: boom");
    }

    #[test]
    fn storage_unconfigured_is_503() {
        let reply = failure_reply("Upload failed", &Error::StorageUnconfigured("no dir".into()));
        assert_eq!(reply.status, 503);
    }
}
