use std::fmt;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CONTENT_TYPE};
use serde_json::Value;
use thiserror::Error;
use tracing::{Span, debug, field, instrument};

use crate::http::{InvalidUriError, Uri};
use crate::interrupt::Interrupt;
use crate::json::parse_lenient;

/// A non-2xx response from the remote end.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct TransportError {
    /// HTTP status code
    pub status: u16,
    /// Canonical reason phrase for the status, empty if unknown
    pub status_text: String,
    /// Best-effort response body, empty if it could not be read
    pub body: String,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = format!("{} {} {}", self.status, self.status_text, self.body);
        f.write_str(msg.trim())
    }
}

/// Errors that can occur when talking to the device
#[derive(Debug, Error)]
pub enum RequestError {
    /// The device answered with a non-success status
    #[error(transparent)]
    Status(#[from] TransportError),

    /// The request never produced a response (refused, reset, timed out)
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("invalid request URI: {0}")]
    InvalidUri(#[from] InvalidUriError),

    /// The request was interrupted before it completed
    #[error("request cancelled")]
    Cancelled,

    #[error("failed to build HTTP client: {0}")]
    Setup(#[source] reqwest::Error),
}

impl RequestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RequestError::Cancelled)
    }
}

/// Configuration for HTTP request behavior
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Maximum time to wait for a single request to complete, including the body.
    pub timeout: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// JSON-over-HTTP client for a single device.
///
/// Embedded HTTP servers tend to be fragile, so the client never keeps idle
/// connections around and asks for uncompressed responses. Responses with an
/// empty or unparseable body are returned as `None` instead of an error.
#[derive(Debug, Clone)]
pub struct Client {
    client: reqwest::Client,
    base: Uri,
    config: RequestConfig,
}

impl Client {
    /// Creates a client for the device reachable at `base`.
    ///
    /// # Example
    /// ```rust,ignore
    /// let client = Client::new("http://10.127.245.160".parse()?, RequestConfig::default())?;
    /// let state = client.get("/api/state", &Interrupt::new()).await?;
    /// ```
    pub fn new(base: Uri, config: RequestConfig) -> Result<Self, RequestError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .map_err(RequestError::Setup)?;

        Ok(Self {
            client,
            base,
            config,
        })
    }

    /// Performs a GET request on `path`, relative to the device base URI
    pub async fn get(&self, path: &str, interrupt: &Interrupt) -> Result<Option<Value>, RequestError> {
        self.fetch(Method::GET, path, None, interrupt).await
    }

    /// Performs a POST request on `path` with a JSON body
    pub async fn post(
        &self,
        path: &str,
        body: &Value,
        interrupt: &Interrupt,
    ) -> Result<Option<Value>, RequestError> {
        self.fetch(Method::POST, path, Some(body), interrupt).await
    }

    #[instrument(name = "fetch", skip_all, fields(method = %method, path = path, status = field::Empty))]
    async fn fetch(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        interrupt: &Interrupt,
    ) -> Result<Option<Value>, RequestError> {
        let uri = self.base.join(path)?;

        let mut request = self
            .client
            .request(method, uri.to_string())
            .timeout(self.config.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header(ACCEPT_ENCODING, "identity");

        if let Some(body) = body {
            request = request.json(body);
        }

        let exchange = async move {
            let response = request
                .send()
                .await
                .map_err(|e| RequestError::Connection(e.to_string()))?;

            let status = response.status();
            Span::current().record("status", status.as_u16());

            let text = response.text().await;
            if !status.is_success() {
                return Err(TransportError {
                    status: status.as_u16(),
                    status_text: status.canonical_reason().unwrap_or_default().to_owned(),
                    body: text.unwrap_or_default(),
                }
                .into());
            }

            match text {
                Ok(text) => {
                    let value = parse_lenient(&text);
                    if value.is_none() && !text.trim().is_empty() {
                        debug!("ignoring malformed response body");
                    }
                    Ok(value)
                }
                Err(e) => {
                    debug!("failed to read response body: {e}");
                    Ok(None)
                }
            }
        };

        tokio::select! {
            biased;
            _ = interrupt.wait() => Err(RequestError::Cancelled),
            res = exchange => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::net::TcpListener;

    fn client_for(url: String) -> Client {
        Client::new(
            url.parse().unwrap(),
            RequestConfig {
                timeout: Duration::from_secs(5),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_returns_parsed_body() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/api/state")
            .match_header("content-type", "application/json")
            .match_header("accept-encoding", "identity")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"power": "ON", "direction": "Forward", "speed": 75}"#)
            .create_async()
            .await;

        let client = client_for(server.url());
        let value = client.get("/api/state", &Interrupt::new()).await.unwrap();

        assert_eq!(
            value,
            Some(json!({"power": "ON", "direction": "Forward", "speed": 75}))
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("POST", "/api/power")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({"power": "ON"})))
            .with_status(200)
            .with_body(r#"{"power": "ON"}"#)
            .create_async()
            .await;

        let client = client_for(server.url());
        let value = client
            .post("/api/power", &json!({"power": "ON"}), &Interrupt::new())
            .await
            .unwrap();

        assert_eq!(value, Some(json!({"power": "ON"})));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_or_malformed_body_is_not_an_error() {
        let mut server = Server::new_async().await;

        let empty = server
            .mock("POST", "/api/speed")
            .with_status(204)
            .create_async()
            .await;
        let garbage = server
            .mock("GET", "/api/state")
            .with_status(200)
            .with_body("OK")
            .create_async()
            .await;

        let client = client_for(server.url());
        let interrupt = Interrupt::new();

        let res = client
            .post("/api/speed", &json!({"speed": 40}), &interrupt)
            .await;
        assert!(matches!(res, Ok(None)));

        let res = client.get("/api/state", &interrupt).await;
        assert!(matches!(res, Ok(None)));

        empty.assert_async().await;
        garbage.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_carries_details() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/api/state")
            .with_status(500)
            .with_body("motor driver fault")
            .create_async()
            .await;

        let client = client_for(server.url());
        let err = client
            .get("/api/state", &Interrupt::new())
            .await
            .unwrap_err();

        match &err {
            RequestError::Status(e) => {
                assert_eq!(e.status, 500);
                assert_eq!(e.status_text, "Internal Server Error");
                assert_eq!(e.body, "motor driver fault");
            }
            _ => panic!("expected status error, got {err:?}"),
        }
        assert_eq!(err.to_string(), "500 Internal Server Error motor driver fault");
        assert!(!err.is_cancelled());

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_error_message_without_body() {
        let err = TransportError {
            status: 404,
            status_text: "Not Found".to_owned(),
            body: String::new(),
        };
        assert_eq!(err.to_string(), "404 Not Found");
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // bind to get a free port and release it right away
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_for(format!("http://{addr}"));
        let err = client
            .get("/api/state", &Interrupt::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RequestError::Connection(_)));
    }

    #[tokio::test]
    async fn test_interrupt_cancels_in_flight_request() {
        // accept connections but never answer
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });

        let client = client_for(format!("http://{addr}"));
        let interrupt = Interrupt::new();

        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });

        let err = client.get("/api/state", &interrupt).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_triggered_interrupt_skips_request() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/api/state")
            .with_status(200)
            .expect(0)
            .create_async()
            .await;

        let client = client_for(server.url());
        let interrupt = Interrupt::new();
        interrupt.trigger();

        let err = client.get("/api/state", &interrupt).await.unwrap_err();
        assert!(err.is_cancelled());

        mock.assert_async().await;
    }

    #[test]
    fn test_client_setup_error_is_reported() {
        let source = reqwest::Client::new()
            .get("not a uri")
            .build()
            .unwrap_err();
        let err = RequestError::Setup(source);

        assert!(!err.is_cancelled());
        assert!(err.to_string().starts_with("failed to build HTTP client:"));
    }
}
