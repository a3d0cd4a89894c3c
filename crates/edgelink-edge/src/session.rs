//! Tenant resolution and session pinning
//!
//! Every public request must name its tenant, either with a leading path
//! segment or with the sticky-routing cookie set by an earlier response.
//! Anything else is answered with 404 before it can reach a tunnel.

use crate::server::EdgeState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use edgelink_proto::STICKY_COOKIE_NAME;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tenant a public request was resolved to, stored in request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTenant {
    pub tenant: String,
    /// Path and query with the tenant prefix removed
    pub url: String,
}

/// Strip `/<tenant>` from the front of `path_and_query` on a segment boundary
pub fn strip_tenant_prefix(path_and_query: &str, tenant: &str) -> Option<String> {
    let rest = path_and_query
        .strip_prefix('/')
        .and_then(|path| path.strip_prefix(tenant))?;

    if rest.is_empty() {
        Some("/".to_string())
    } else if rest.starts_with('/') {
        Some(rest.to_string())
    } else if rest.starts_with('?') {
        Some(format!("/{}", rest))
    } else {
        None
    }
}

/// Values of the sticky-routing cookie found in the request's cookie headers
pub fn sticky_cookie_values(headers: &HeaderMap) -> Vec<String> {
    let prefix = format!("{}=", STICKY_COOKIE_NAME);
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .map(str::trim)
        .filter_map(|cookie| cookie.strip_prefix(prefix.as_str()))
        .map(str::to_string)
        .collect()
}

/// Resolve the tenant of a request
///
/// A path prefix wins over the cookie. A cookie only counts when it names a
/// configured tenant.
pub fn resolve_tenant(
    tenants: &[String],
    path_and_query: &str,
    cookie_values: &[String],
) -> Option<ResolvedTenant> {
    for tenant in tenants {
        if let Some(url) = strip_tenant_prefix(path_and_query, tenant) {
            return Some(ResolvedTenant {
                tenant: tenant.clone(),
                url,
            });
        }
    }

    cookie_values
        .iter()
        .find(|value| tenants.iter().any(|tenant| tenant == *value))
        .map(|tenant| ResolvedTenant {
            tenant: tenant.clone(),
            url: path_and_query.to_string(),
        })
}

/// `Set-Cookie` value pinning a client to `tenant`
pub fn session_cookie(tenant: &str, domain: &str) -> String {
    format!(
        "{}={}; Domain={}; Path=/; HttpOnly",
        STICKY_COOKIE_NAME, tenant, domain
    )
}

/// Middleware resolving the tenant of every public request
///
/// Authorized requests get a [`ResolvedTenant`] extension and their response
/// carries a fresh sticky-routing cookie.
pub async fn pin_session(
    State(state): State<Arc<EdgeState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == state.config.tunnel_path {
        return next.run(request).await;
    }

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let cookies = sticky_cookie_values(request.headers());

    let Some(resolved) = resolve_tenant(&state.config.tenants, path_and_query, &cookies) else {
        debug!(
            method = %request.method(),
            path = %request.uri().path(),
            "No tenant for request"
        );
        return StatusCode::NOT_FOUND.into_response();
    };

    let cookie = session_cookie(&resolved.tenant, &state.config.cookie_domain);
    request.extensions_mut().insert(resolved);

    let mut response = next.run(request).await;
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => warn!("Cannot build session cookie: {}", e),
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EdgeConfig;
    use axum::{body::Body, middleware, routing::any, Extension, Router};
    use edgelink_control::ControlPlane;
    use tower::ServiceExt;

    fn tenants() -> Vec<String> {
        vec!["alpha".to_string(), "beta".to_string()]
    }

    #[test]
    fn test_strip_prefix_on_segment_boundary() {
        assert_eq!(strip_tenant_prefix("/alpha", "alpha"), Some("/".to_string()));
        assert_eq!(
            strip_tenant_prefix("/alpha/api/states", "alpha"),
            Some("/api/states".to_string())
        );
        assert_eq!(
            strip_tenant_prefix("/alpha?x=1", "alpha"),
            Some("/?x=1".to_string())
        );
        assert_eq!(strip_tenant_prefix("/alphabet", "alpha"), None);
        assert_eq!(strip_tenant_prefix("/api/alpha", "alpha"), None);
    }

    #[test]
    fn test_resolve_prefers_path() {
        let resolved = resolve_tenant(&tenants(), "/beta/api?x=1", &["alpha".to_string()]).unwrap();
        assert_eq!(resolved.tenant, "beta");
        assert_eq!(resolved.url, "/api?x=1");
    }

    #[test]
    fn test_resolve_by_cookie() {
        let resolved = resolve_tenant(&tenants(), "/api/states", &["alpha".to_string()]).unwrap();
        assert_eq!(resolved.tenant, "alpha");
        assert_eq!(resolved.url, "/api/states");

        assert_eq!(
            resolve_tenant(&tenants(), "/api/states", &["gamma".to_string()]),
            None
        );
        assert_eq!(resolve_tenant(&tenants(), "/api/states", &[]), None);
    }

    #[test]
    fn test_sticky_cookie_values() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; __HostUrlPrefix=alpha; other=1"),
        );
        assert_eq!(sticky_cookie_values(&headers), vec!["alpha".to_string()]);
    }

    #[test]
    fn test_session_cookie() {
        assert_eq!(
            session_cookie("alpha", "example.com"),
            "__HostUrlPrefix=alpha; Domain=example.com; Path=/; HttpOnly"
        );
    }

    fn create_test_app() -> Router {
        let config = EdgeConfig {
            tenants: tenants(),
            ..Default::default()
        };
        let state = Arc::new(EdgeState {
            control: ControlPlane::new(config.tenants.clone()),
            config,
        });

        async fn echo(Extension(resolved): Extension<ResolvedTenant>) -> String {
            format!("{} {}", resolved.tenant, resolved.url)
        }

        Router::new()
            .route("/{*rest}", any(echo))
            .layer(middleware::from_fn_with_state(state.clone(), pin_session))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_authorized_request_gets_cookie() {
        let response = create_test_app()
            .oneshot(
                Request::builder()
                    .uri("/alpha/api/states")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::SET_COOKIE).unwrap(),
            "__HostUrlPrefix=alpha; Domain=localhost; Path=/; HttpOnly"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"alpha /api/states");
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_not_found() {
        for method in ["GET", "POST", "DELETE"] {
            let response = create_test_app()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri("/gamma/api/states")
                        .header(header::COOKIE, "__HostUrlPrefix=gamma")
                        .body(Body::from("payload"))
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert!(response.headers().get(header::SET_COOKIE).is_none());
        }
    }
}
