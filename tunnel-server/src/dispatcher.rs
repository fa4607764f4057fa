//! HTTP request dispatcher (§4.G) and the encrypted-only gate (§4.I).

use std::collections::BTreeMap;

use async_trait::async_trait;
use tunnel_shared::Frame;
use url::Url;

/// A request synthesized from a tunneled `http_request` frame and handed
/// to the application. `encrypted` is always `true` here — only the
/// dispatcher constructs these, so direct outer HTTP requests never carry
/// one, which is exactly what the encrypted-only gate checks.
pub struct SyntheticRequest {
    pub method: String,
    pub pathname: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Body,
    pub encrypted: bool,
}

#[derive(Debug, Clone)]
pub enum Body {
    None,
    Json(serde_json::Value),
    Form(BTreeMap<String, String>),
    Text(String),
}

pub struct HttpResult {
    pub status: u16,
    pub status_text: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait HttpHandler: Send + Sync {
    async fn handle(&self, request: SyntheticRequest) -> HttpResult;
}

/// The encrypted-only gate: reject anything whose request wasn't marked as
/// arriving via the dispatcher.
pub fn encrypted_only(request: &SyntheticRequest) -> Result<(), u16> {
    if request.encrypted {
        Ok(())
    } else {
        Err(403)
    }
}

fn default_status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400..=499 => "Client Error",
        500..=599 => "Internal Server Error",
        _ => "Unknown",
    }
}

fn parse_body(content_type: Option<&str>, raw: &str) -> Body {
    match content_type.map(|ct| ct.split(';').next().unwrap_or(ct).trim()) {
        Some("application/json") => match serde_json::from_str(raw) {
            Ok(v) => Body::Json(v),
            Err(_) => Body::Text(raw.to_string()),
        },
        Some("application/x-www-form-urlencoded") => {
            let map = url::form_urlencoded::parse(raw.as_bytes())
                .into_owned()
                .collect();
            Body::Form(map)
        }
        _ => Body::Text(raw.to_string()),
    }
}

/// Decode an `http_request` frame, build the synthetic request, invoke the
/// application handler, and produce the matching `http_response` frame.
/// Handler panics aren't caught here (that's a runtime-level concern); a
/// handler returning an error path should do so via `HttpResult.error`.
pub async fn dispatch(handler: &dyn HttpHandler, frame: Frame) -> Frame {
    let Frame::HttpRequest {
        request_id,
        method,
        url,
        headers,
        body,
    } = frame
    else {
        panic!("dispatch called with a non-http_request frame");
    };

    let parsed_url = Url::parse(&url).ok();
    let pathname = parsed_url
        .as_ref()
        .map(|u| u.path().to_string())
        .unwrap_or_else(|| url.clone());
    let query: BTreeMap<String, String> = parsed_url
        .as_ref()
        .map(|u| u.query_pairs().into_owned().collect())
        .unwrap_or_default();

    let content_type = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.as_str());
    let parsed_body = match &body {
        Some(raw) => parse_body(content_type, raw),
        None => Body::None,
    };

    let request = SyntheticRequest {
        method,
        pathname,
        query,
        headers,
        body: parsed_body,
        encrypted: true,
    };

    let result = handler.handle(request).await;

    let status_text = result
        .status_text
        .unwrap_or_else(|| default_status_text(result.status).to_string());
    let body = if result.status == 204 { None } else { result.body };

    Frame::HttpResponse {
        request_id,
        status: result.status,
        status_text,
        headers: result.headers,
        body,
        error: result.error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl HttpHandler for EchoHandler {
        async fn handle(&self, request: SyntheticRequest) -> HttpResult {
            HttpResult {
                status: 200,
                status_text: None,
                headers: BTreeMap::new(),
                body: Some(request.pathname),
                error: None,
            }
        }
    }

    #[tokio::test]
    async fn dispatch_fills_default_status_text() {
        let frame = Frame::HttpRequest {
            request_id: "r1".into(),
            method: "GET".into(),
            url: "http://host/uptime".into(),
            headers: BTreeMap::new(),
            body: None,
        };
        let response = dispatch(&EchoHandler, frame).await;
        match response {
            Frame::HttpResponse { status, status_text, body, .. } => {
                assert_eq!(status, 200);
                assert_eq!(status_text, "OK");
                assert_eq!(body.as_deref(), Some("/uptime"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn json_body_is_parsed_by_content_type() {
        struct JsonEcho;
        #[async_trait]
        impl HttpHandler for JsonEcho {
            async fn handle(&self, request: SyntheticRequest) -> HttpResult {
                let ok = matches!(request.body, Body::Json(_));
                HttpResult {
                    status: 200,
                    status_text: None,
                    headers: BTreeMap::new(),
                    body: Some(ok.to_string()),
                    error: None,
                }
            }
        }
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let frame = Frame::HttpRequest {
            request_id: "r1".into(),
            method: "POST".into(),
            url: "http://host/x".into(),
            headers,
            body: Some("{\"a\":1}".into()),
        };
        let response = dispatch(&JsonEcho, frame).await;
        match response {
            Frame::HttpResponse { body, .. } => assert_eq!(body.as_deref(), Some("true")),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn gate_rejects_non_tunneled_requests() {
        let request = SyntheticRequest {
            method: "GET".into(),
            pathname: "/secret".into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: Body::None,
            encrypted: false,
        };
        assert_eq!(encrypted_only(&request), Err(403));
    }
}
