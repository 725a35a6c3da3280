use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::Request,
    http::{
        HeaderValue, StatusCode,
        header::{ACCEPT_ENCODING, CONNECTION, HOST},
        uri::{InvalidUriParts, PathAndQuery},
    },
    response::{IntoResponse, Response},
};
use hyper::Uri;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tracing::debug;

/// Pass-through proxy to the device HTTP API
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Base URI of the device API, forwarded paths are appended to its path
    pub device_uri: Uri,
    /// Local path prefix stripped before forwarding
    pub prefix: String,
    /// Maximum time to wait for the device to start answering
    pub timeout: Duration,
}

impl ProxyConfig {
    pub fn new(device_uri: Uri) -> Self {
        Self {
            device_uri,
            prefix: "/api".to_owned(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct DeviceProxy {
    config: Arc<ProxyConfig>,
    client: Client<HttpConnector, Body>,
}

impl DeviceProxy {
    pub fn new(config: ProxyConfig) -> Self {
        // the device closes connections after every exchange
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build_http();

        Self {
            config: Arc::new(config),
            client,
        }
    }

    /// Return the device path for a local path under the proxy prefix
    fn device_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        let prefix = self.config.prefix.trim_end_matches('/');
        match path.strip_prefix(prefix)? {
            "" => Some("/"),
            rest if rest.starts_with('/') => Some(rest),
            _ => None,
        }
    }
}

/// Forward a request under the proxy prefix to the device
pub async fn proxy(proxy: DeviceProxy, request: Request) -> Result<Response, ProxyError> {
    let path = proxy
        .device_path(request.uri().path())
        .ok_or(ProxyError::NotFound)?;

    let base = proxy.config.device_uri.path().trim_end_matches('/');
    let path_and_query = match request.uri().query() {
        Some(query) => format!("{base}{path}?{query}"),
        None => format!("{base}{path}"),
    };

    // Build target URI
    let mut target_parts = proxy.config.device_uri.clone().into_parts();
    let path_and_query = PathAndQuery::try_from(path_and_query)
        .map_err(|e| ProxyError::InvalidPath(e.to_string()))?;
    target_parts.path_and_query = Some(path_and_query);
    let target_uri = Uri::from_parts(target_parts)?;

    debug!(target = %target_uri, "proxying request");

    let (mut parts, body) = request.into_parts();
    parts.uri = target_uri;
    parts.headers.remove(HOST);
    parts
        .headers
        .insert(CONNECTION, HeaderValue::from_static("close"));
    parts
        .headers
        .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    let proxy_request = hyper::Request::from_parts(parts, body);

    let response = tokio::time::timeout(
        proxy.config.timeout,
        proxy.client.request(proxy_request),
    )
    .await
    .map_err(|_| ProxyError::Timeout)??;

    // Convert the response directly without buffering the body
    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, Body::new(body)))
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("not found")]
    NotFound,

    #[error("invalid target path: {0}")]
    InvalidPath(String),

    #[error("invalid target URI: {0}")]
    InvalidUri(#[from] InvalidUriParts),

    #[error("device connection failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("device did not answer in time")]
    Timeout,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match self {
            ProxyError::NotFound => StatusCode::NOT_FOUND,
            ProxyError::InvalidPath(_) | ProxyError::InvalidUri(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        };

        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use mockito::{Matcher, Server};
    use tokio::net::TcpListener;

    fn create_proxy(device_uri: &str, timeout: Duration) -> DeviceProxy {
        DeviceProxy::new(ProxyConfig {
            device_uri: device_uri.parse().unwrap(),
            prefix: "/api".to_owned(),
            timeout,
        })
    }

    fn create_request(method: Method, path: &str, body: Body) -> Request {
        Request::builder()
            .method(method)
            .uri(path)
            .header("host", "dashboard.local")
            .header("accept-encoding", "gzip, br")
            .body(body)
            .unwrap()
    }

    #[test]
    fn test_device_path_strips_prefix() {
        let proxy = create_proxy("http://10.0.0.2", Duration::from_secs(1));
        assert_eq!(proxy.device_path("/api/state"), Some("/state"));
        assert_eq!(proxy.device_path("/api"), Some("/"));
        assert_eq!(proxy.device_path("/api/"), Some("/"));
        assert_eq!(proxy.device_path("/apis/state"), None);
        assert_eq!(proxy.device_path("/v1/state"), None);
    }

    #[tokio::test]
    async fn test_request_is_forwarded_without_prefix() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/speed?source=dial")
            .match_header("connection", "close")
            .match_header("accept-encoding", "identity")
            .match_header("host", Matcher::Regex("127.0.0.1".into()))
            .match_body(Matcher::Json(serde_json::json!({"speed": 40})))
            .with_status(200)
            .with_body(r#"{"speed": 40}"#)
            .create_async()
            .await;

        let proxy = create_proxy(&server.url(), Duration::from_secs(5));
        let request = create_request(
            Method::POST,
            "/api/speed?source=dial",
            Body::from(r#"{"speed": 40}"#),
        );

        let response = super::proxy(proxy, request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_response_status_forwarded() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/state")
            .with_status(500)
            .with_body("driver fault")
            .create_async()
            .await;

        let proxy = create_proxy(&server.url(), Duration::from_secs(5));
        let request = create_request(Method::GET, "/api/state", Body::empty());

        let response = super::proxy(proxy, request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_device_base_path_is_kept() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/state")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let proxy = create_proxy(&format!("{}/api", server.url()), Duration::from_secs(5));
        let request = create_request(Method::GET, "/api/state", Body::empty());

        let response = super::proxy(proxy, request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_paths_outside_prefix_are_not_forwarded() {
        let proxy = create_proxy("http://127.0.0.1:1", Duration::from_secs(1));
        let request = create_request(Method::GET, "/assets/logo.png", Body::empty());

        let err = super::proxy(proxy, request).await.unwrap_err();
        assert!(matches!(err, ProxyError::NotFound));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_connection_error_is_bad_gateway() {
        // bind to get a free port and release it right away
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let proxy = create_proxy(&format!("http://{addr}"), Duration::from_secs(5));
        let request = create_request(Method::GET, "/api/state", Body::empty());

        let err = super::proxy(proxy, request).await.unwrap_err();
        assert!(matches!(err, ProxyError::Upstream(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_slow_device_times_out() {
        // accept connections but never answer
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });

        let proxy = create_proxy(&format!("http://{addr}"), Duration::from_millis(100));
        let request = create_request(Method::GET, "/api/state", Body::empty());

        let err = super::proxy(proxy, request).await.unwrap_err();
        assert!(matches!(err, ProxyError::Timeout));
        assert_eq!(err.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
