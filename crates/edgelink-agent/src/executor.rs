//! Replays forwarded HTTP requests against the private service

use crate::error::ExecutorError;
use edgelink_proto::headers::{append_header, is_hop_by_hop};
use edgelink_proto::{Body, ForwardedHttpRequest, ForwardedHttpResponse, Headers};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};
use url::Url;

/// Request headers never passed to the private service
const STRIPPED_REQUEST_HEADERS: &[&str] = &["x-forwarded-for", "host", "content-length"];

/// Status reported when the private service could not be reached
const BAD_GATEWAY: u16 = 502;

/// HTTP client bound to the private service's base URL
#[derive(Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpExecutor {
    pub fn new(base_url: Url) -> Result<Self, ExecutorError> {
        // Redirects belong to the public client, not to us
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Execute a forwarded request; always produces exactly one reply
    ///
    /// Error statuses of the private service are relayed as they are. Failing
    /// to reach it at all yields a 502 with the error as text.
    pub async fn execute(&self, request: ForwardedHttpRequest) -> ForwardedHttpResponse {
        let id = request.id;
        match self.try_execute(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(correlation_id = %id, "Local request failed: {}", e);
                ForwardedHttpResponse {
                    id,
                    status: Some(BAD_GATEWAY),
                    headers: Headers::from([(
                        "content-type".to_string(),
                        "text/plain; charset=utf-8".into(),
                    )]),
                    data: Body::Text(e.to_string()),
                }
            }
        }
    }

    async fn try_execute(
        &self,
        request: ForwardedHttpRequest,
    ) -> Result<ForwardedHttpResponse, ExecutorError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ExecutorError::InvalidMethod(request.method.clone()))?;
        let url = join_url(&self.base_url, &request.url)?;

        debug!(
            correlation_id = %request.id,
            method = %method,
            url = %url,
            "Executing local request"
        );

        let mut builder = self
            .client
            .request(method, url)
            .headers(outgoing_headers(&request.headers));
        if !request.body.is_empty() {
            builder = builder.body(request.body.into_bytes());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();

        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            append_header(
                &mut headers,
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }

        let bytes = response.bytes().await?;
        let data = if bytes.is_empty() {
            Body::Empty
        } else {
            Body::Bytes(bytes.to_vec())
        };

        debug!(correlation_id = %request.id, status, "Local request completed");

        Ok(ForwardedHttpResponse {
            id: request.id,
            status: Some(status),
            headers,
            data,
        })
    }
}

/// Append a forwarded path and query to the base URL, keeping any base path
pub fn join_url(base: &Url, path_and_query: &str) -> Result<Url, ExecutorError> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path_and_query.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|source| ExecutorError::InvalidUrl {
        url: joined,
        source,
    })
}

/// Headers for the local request: everything except hop-by-hop and
/// proxy-added headers
pub fn outgoing_headers(headers: &Headers) -> HeaderMap {
    let mut outgoing = HeaderMap::new();
    for (name, field) in headers {
        let lowercase = name.to_ascii_lowercase();
        if is_hop_by_hop(&lowercase) || STRIPPED_REQUEST_HEADERS.contains(&lowercase.as_str()) {
            continue;
        }
        let Ok(header_name) = HeaderName::from_bytes(lowercase.as_bytes()) else {
            warn!(header = %name, "Skipping invalid request header name");
            continue;
        };
        for value in field.values() {
            match HeaderValue::from_str(value) {
                Ok(header_value) => {
                    outgoing.append(header_name.clone(), header_value);
                }
                Err(_) => warn!(header = %name, "Skipping invalid request header value"),
            }
        }
    }
    outgoing
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgelink_proto::HeaderField;

    #[test]
    fn test_join_url() {
        let base = Url::parse("http://homeassistant.local:8123").unwrap();
        assert_eq!(
            join_url(&base, "/api/states?x=1").unwrap().as_str(),
            "http://homeassistant.local:8123/api/states?x=1"
        );
        assert_eq!(
            join_url(&base, "/").unwrap().as_str(),
            "http://homeassistant.local:8123/"
        );

        let nested = Url::parse("http://10.0.0.2/ha/").unwrap();
        assert_eq!(
            join_url(&nested, "/api").unwrap().as_str(),
            "http://10.0.0.2/ha/api"
        );
    }

    #[test]
    fn test_outgoing_headers_are_stripped() {
        let headers = Headers::from([
            ("x-forwarded-for".to_string(), HeaderField::from("1.2.3.4")),
            ("host".to_string(), HeaderField::from("edge.example.com")),
            ("connection".to_string(), HeaderField::from("upgrade")),
            ("content-length".to_string(), HeaderField::from("10")),
            ("authorization".to_string(), HeaderField::from("Bearer abc")),
            (
                "accept".to_string(),
                HeaderField::Multiple(vec!["text/html".to_string(), "*/*".to_string()]),
            ),
        ]);

        let outgoing = outgoing_headers(&headers);
        assert_eq!(outgoing.len(), 3);
        assert_eq!(outgoing.get("authorization").unwrap(), "Bearer abc");
        assert_eq!(outgoing.get_all("accept").iter().count(), 2);
        assert!(outgoing.get("x-forwarded-for").is_none());
        assert!(outgoing.get("host").is_none());
    }
}
