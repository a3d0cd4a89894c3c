//! HTTP forwarding through the tunnel

use crate::server::EdgeState;
use crate::session::ResolvedTenant;
use axum::{
    body::{to_bytes, Body as AxumBody},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use bytes::Bytes;
use edgelink_proto::headers::{append_header, header_value, is_hop_by_hop};
use edgelink_proto::{Body, ForwardedHttpRequest, ForwardedHttpResponse, Headers};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Handler for every authorized public HTTP request
pub async fn http_ingress(
    State(state): State<Arc<EdgeState>>,
    Extension(resolved): Extension<ResolvedTenant>,
    request: Request,
) -> Response {
    forward_http(&state, resolved, request).await
}

/// Forward one request to the tenant's agent and turn its reply into a response
///
/// Failures never escape: an unanswered or undeliverable request becomes an
/// empty 500.
pub async fn forward_http(state: &EdgeState, resolved: ResolvedTenant, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let declared_length = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared_length.is_some_and(|length| length > state.config.max_body_bytes) {
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }

    let bytes = match to_bytes(body, state.config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(tenant = %resolved.tenant, "Failed to read request body: {}", e);
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let headers = collect_headers(&parts.headers);
    let content_type = header_value(&headers, "content-type").map(str::to_string);
    let (path, params) = split_url(&resolved.url);

    if tracing::enabled!(tracing::Level::DEBUG) {
        debug!(
            tenant = %resolved.tenant,
            method = %parts.method,
            url = %resolved.url,
            path = %path,
            params = ?params,
            headers = ?headers,
            body = %describe_body(content_type.as_deref(), &bytes),
            "Forwarding request"
        );
    }

    let forwarded = ForwardedHttpRequest {
        id: Uuid::new_v4(),
        method: parts.method.to_string(),
        url: resolved.url.clone(),
        path,
        params,
        headers,
        body: classify_body(content_type.as_deref(), bytes),
    };
    let correlation_id = forwarded.id;

    match state
        .control
        .forward(&resolved.tenant, forwarded, state.config.request_timeout)
        .await
    {
        Ok(reply) => build_response(reply),
        Err(e) => {
            warn!(
                tenant = %resolved.tenant,
                correlation_id = %correlation_id,
                "Forwarding failed: {}",
                e
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Copy request headers into the tunnel representation
pub fn collect_headers(headers: &HeaderMap) -> Headers {
    let mut collected = Headers::new();
    for (name, value) in headers {
        append_header(
            &mut collected,
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    collected
}

/// Split a stripped url into its path and decoded query parameters
pub fn split_url(url: &str) -> (String, HashMap<String, String>) {
    match url.split_once('?') {
        Some((path, query)) => (
            path.to_string(),
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        ),
        None => (url.to_string(), HashMap::new()),
    }
}

fn media_type(content_type: Option<&str>) -> String {
    content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Decide how a captured request body travels through the tunnel
///
/// Form bodies are relayed as the exact bytes received so the private service
/// sees them unchanged.
pub fn classify_body(content_type: Option<&str>, bytes: Bytes) -> Body {
    if bytes.is_empty() {
        return Body::Empty;
    }

    let media_type = media_type(content_type);
    let textual = media_type == "application/x-www-form-urlencoded"
        || media_type == "application/json"
        || media_type.ends_with("+json")
        || media_type.starts_with("text/");

    if textual {
        match String::from_utf8(bytes.to_vec()) {
            Ok(text) => return Body::Text(text),
            Err(e) => return Body::Bytes(e.into_bytes()),
        }
    }
    Body::Bytes(bytes.to_vec())
}

/// Human-readable rendering of a body for debug logs
fn describe_body(content_type: Option<&str>, bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }

    if media_type(content_type) == "application/x-www-form-urlencoded" {
        let fields: HashMap<String, String> =
            url::form_urlencoded::parse(bytes).into_owned().collect();
        return format!("{:?}", fields);
    }

    if bytes.first() == Some(&b'{') {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(bytes) {
            return value.to_string();
        }
    }

    String::from_utf8_lossy(bytes).into_owned()
}

/// Turn an agent's reply into the public HTTP response
pub fn build_response(reply: ForwardedHttpResponse) -> Response {
    let status = match reply.status {
        Some(code) => StatusCode::from_u16(code).unwrap_or_else(|_| {
            warn!(correlation_id = %reply.id, status = code, "Agent replied with an invalid status");
            StatusCode::INTERNAL_SERVER_ERROR
        }),
        None => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut headers = HeaderMap::new();
    for (name, field) in &reply.headers {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!(header = %name, "Skipping invalid response header name");
            continue;
        };
        for value in field.values() {
            match HeaderValue::from_str(value) {
                Ok(header_value) => {
                    headers.append(header_name.clone(), header_value);
                }
                Err(_) => warn!(header = %name, "Skipping invalid response header value"),
            }
        }
    }

    let body = match reply.data {
        Body::Empty => AxumBody::empty(),
        Body::Text(text) => AxumBody::from(text),
        Body::Bytes(bytes) => {
            if !headers.contains_key(header::CONTENT_TYPE) {
                warn!(
                    correlation_id = %reply.id,
                    "Binary reply without content-type, defaulting to application/octet-stream"
                );
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/octet-stream"),
                );
            }
            AxumBody::from(bytes)
        }
        Body::Json(value) => {
            headers
                .entry(header::CONTENT_TYPE)
                .or_insert(HeaderValue::from_static("application/json"));
            AxumBody::from(value.to_string())
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgelink_proto::HeaderField;
    use serde_json::json;

    fn reply(headers: Headers, data: Body) -> ForwardedHttpResponse {
        ForwardedHttpResponse {
            id: Uuid::new_v4(),
            status: Some(200),
            headers,
            data,
        }
    }

    async fn body_bytes(response: Response) -> Bytes {
        to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    #[test]
    fn test_classify_form_body_keeps_bytes() {
        let raw = "name=J%C3%B6rg+M&tags=a&tags=b&empty=";
        let body = classify_body(
            Some("application/x-www-form-urlencoded; charset=UTF-8"),
            Bytes::from(raw),
        );
        assert_eq!(body, Body::Text(raw.to_string()));
    }

    #[test]
    fn test_classify_bodies() {
        assert_eq!(classify_body(Some("text/plain"), Bytes::new()), Body::Empty);
        assert_eq!(
            classify_body(Some("application/json"), Bytes::from(r#"{"a":1}"#)),
            Body::Text(r#"{"a":1}"#.to_string())
        );
        assert_eq!(
            classify_body(Some("image/png"), Bytes::from_static(&[0x89, 0x50])),
            Body::Bytes(vec![0x89, 0x50])
        );
        assert_eq!(
            classify_body(Some("text/plain"), Bytes::from_static(&[0xff, 0xfe])),
            Body::Bytes(vec![0xff, 0xfe])
        );
        assert_eq!(
            classify_body(None, Bytes::from("raw")),
            Body::Bytes(b"raw".to_vec())
        );
    }

    #[test]
    fn test_split_url() {
        let (path, params) = split_url("/api/history?filter=light%20on&minimal=1");
        assert_eq!(path, "/api/history");
        assert_eq!(params.get("filter").map(String::as_str), Some("light on"));
        assert_eq!(params.get("minimal").map(String::as_str), Some("1"));

        let (path, params) = split_url("/");
        assert_eq!(path, "/");
        assert!(params.is_empty());
    }

    #[test]
    fn test_describe_body() {
        assert_eq!(
            describe_body(Some("application/x-www-form-urlencoded"), b"a=1"),
            r#"{"a": "1"}"#
        );
        assert_eq!(describe_body(None, br#"{"a": 1}"#), r#"{"a":1}"#);
        assert_eq!(describe_body(None, b"plain"), "plain");
    }

    #[tokio::test]
    async fn test_binary_reply_defaults_content_type() {
        let response = build_response(reply(Headers::new(), Body::Bytes(vec![1, 2, 3])));

        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/octet-stream"
        );
        assert_eq!(&body_bytes(response).await[..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_json_reply_is_serialized() {
        let response = build_response(reply(Headers::new(), Body::Json(json!({"state": "on"}))));

        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(&body_bytes(response).await[..], br#"{"state":"on"}"#);
    }

    #[tokio::test]
    async fn test_reply_headers_are_filtered() {
        let headers = Headers::from([
            ("x-custom".to_string(), HeaderField::from("yes")),
            ("transfer-encoding".to_string(), HeaderField::from("chunked")),
            ("content-length".to_string(), HeaderField::from("999")),
            ("bad header".to_string(), HeaderField::from("x")),
            (
                "set-cookie".to_string(),
                HeaderField::Multiple(vec!["a=1".to_string(), "b=2".to_string()]),
            ),
        ]);
        let response = build_response(reply(headers, Body::Text("ok".to_string())));

        assert_eq!(response.headers().get("x-custom").unwrap(), "yes");
        assert!(response.headers().get("transfer-encoding").is_none());
        assert!(response.headers().get("bad header").is_none());
        assert_eq!(response.headers().get_all("set-cookie").iter().count(), 2);
        assert_eq!(&body_bytes(response).await[..], b"ok");
    }

    #[test]
    fn test_missing_status_is_500() {
        let mut without_status = reply(Headers::new(), Body::Empty);
        without_status.status = None;
        assert_eq!(
            build_response(without_status).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
