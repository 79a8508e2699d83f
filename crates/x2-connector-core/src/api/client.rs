//! Request pipeline for the x2 REST API.
//!
//! `ApiClient` performs one HTTP call per `request`: it builds the URL from
//! the configured base URL, attaches the session token when asked to, runs
//! the registered middlewares, and classifies the outcome into an
//! `ApiResponse` or an `ApiError`.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::SharedSession;
use crate::config::DEFAULT_BASE_URL;
use crate::events::{Event, Notifier, RequestTarget};

use super::transport::{HttpRequest, HttpResponse, Transport};
use super::{ApiError, Middlewares};

const ACCEPT_ANY: &str = "application/json, text/plain, */*";
const APPLICATION_JSON: &str = "application/json";

/// A request as seen by `before` middlewares.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl RequestConfig {
    fn target(&self) -> RequestTarget {
        RequestTarget {
            method: self.method.clone(),
            url: self.url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Empty,
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl ApiResponse {
    /// The body as a JSON value; text becomes a string, no body is null.
    pub fn data(&self) -> Value {
        match &self.body {
            ResponseBody::Json(value) => value.clone(),
            ResponseBody::Text(text) => Value::String(text.clone()),
            ResponseBody::Empty => Value::Null,
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        match &self.body {
            ResponseBody::Json(value) => serde_json::from_value(value.clone())
                .map_err(|e| ApiError::InvalidResponse(format!("Unexpected response shape: {}", e))),
            ResponseBody::Text(text) => serde_json::from_str(text)
                .map_err(|e| ApiError::InvalidResponse(format!("Response is not JSON: {}", e))),
            ResponseBody::Empty => Err(ApiError::InvalidResponse("Empty response body".to_string())),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct ClientSettings {
    base_url: String,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
    middlewares: Middlewares,
}

/// API client for the x2 backend.
/// Clone is cheap - all state is shared behind `Arc`s.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    session: SharedSession,
    notifier: Notifier,
    settings: Arc<RwLock<ClientSettings>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url())
            .field("authenticated", &self.session.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, session: SharedSession, notifier: Notifier) -> Self {
        Self {
            transport,
            session,
            notifier,
            settings: Arc::new(RwLock::new(ClientSettings {
                base_url: DEFAULT_BASE_URL.to_string(),
                default_headers: HeaderMap::new(),
                timeout: None,
                middlewares: Middlewares::new(),
            })),
        }
    }

    fn settings(&self) -> RwLockReadGuard<'_, ClientSettings> {
        self.settings.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn settings_mut(&self) -> RwLockWriteGuard<'_, ClientSettings> {
        self.settings.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn base_url(&self) -> String {
        self.settings().base_url.clone()
    }

    pub fn set_base_url(&self, base_url: impl Into<String>) {
        self.settings_mut().base_url = base_url.into();
    }

    /// Merge headers into the set sent with every request.
    pub fn set_default_headers(&self, headers: HeaderMap) {
        let mut settings = self.settings_mut();
        for (name, value) in headers.iter() {
            settings.default_headers.insert(name.clone(), value.clone());
        }
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.settings_mut().timeout = timeout;
    }

    pub fn add_middlewares(&self, middlewares: Middlewares) {
        self.settings_mut().middlewares.extend(middlewares);
    }

    /// Base URL and path joined by plain concatenation. Absolute URLs are
    /// used as given.
    pub fn url_for(&self, path: &str) -> String {
        Self::join_url(&self.settings().base_url, path)
    }

    fn join_url(base_url: &str, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", base_url, path)
        }
    }

    fn build_config(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        requires_auth: bool,
    ) -> Result<(RequestConfig, Middlewares, Option<Duration>), ApiError> {
        let settings = self.settings();

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT_ANY));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        for (name, value) in settings.default_headers.iter() {
            headers.insert(name.clone(), value.clone());
        }

        if requires_auth {
            if let Some(token) = self.session.token() {
                let value = HeaderValue::from_str(&token)
                    .map_err(|e| ApiError::InvalidHeader(format!("authorization: {}", e)))?;
                headers.insert(header::AUTHORIZATION, value);
            }
        }

        let config = RequestConfig {
            method,
            url: Self::join_url(&settings.base_url, path),
            headers,
            body,
        };
        Ok((config, settings.middlewares.clone(), settings.timeout))
    }

    /// Perform one request. `requires_auth` attaches the session token when
    /// there is one; it never fails for lack of a token.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        requires_auth: bool,
    ) -> Result<ApiResponse, ApiError> {
        let (config, middlewares, timeout) = self.build_config(method, path, body, requires_auth)?;
        let config = middlewares.apply_before(config);
        let target = config.target();

        self.notifier.emit(&Event::Before(target.clone()));
        debug!(method = %target.method, url = %target.url, "Sending request");

        let result = match self.execute(&config, timeout).await {
            Ok(response) => {
                let response = middlewares.apply_success(response);
                self.notifier.emit(&Event::Success {
                    target: target.clone(),
                    status: response.status.as_u16(),
                });
                Ok(response)
            }
            Err(err) => {
                warn!(method = %target.method, url = %target.url, error = %err, "Request failed");
                middlewares.notify_error(&err);
                self.notifier.emit(&Event::Error {
                    target: Some(target.clone()),
                    status: err.status(),
                    message: err.to_string(),
                });
                Err(err)
            }
        };

        middlewares.notify_after(&config);
        self.notifier.emit(&Event::After(target));
        result
    }

    async fn execute(&self, config: &RequestConfig, timeout: Option<Duration>) -> Result<ApiResponse, ApiError> {
        let body = match &config.body {
            Some(value) => Some(serde_json::to_vec(value)?),
            None => None,
        };

        let response = self
            .transport
            .send(HttpRequest {
                method: config.method.clone(),
                url: config.url.clone(),
                headers: config.headers.clone(),
                body,
                timeout,
            })
            .await?;

        Self::check_response(response)
    }

    /// Check if response is successful, returning an error with body if not.
    fn check_response(response: HttpResponse) -> Result<ApiResponse, ApiError> {
        if !response.status.is_success() {
            let body = String::from_utf8_lossy(&response.body);
            return Err(ApiError::from_status(response.status, &body));
        }

        let body = Self::parse_body(&response.headers, &response.body)?;
        Ok(ApiResponse {
            status: response.status,
            headers: response.headers,
            body,
        })
    }

    fn parse_body(headers: &HeaderMap, bytes: &[u8]) -> Result<ResponseBody, ApiError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(ResponseBody::Empty);
        }

        let is_json = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains(APPLICATION_JSON))
            .unwrap_or(false);

        if is_json {
            serde_json::from_slice(bytes)
                .map(ResponseBody::Json)
                .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e)))
        } else {
            Ok(ResponseBody::Text(String::from_utf8_lossy(bytes).into_owned()))
        }
    }

    // ===== Convenience methods =====

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.request(Method::GET, path, None, true).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse, ApiError> {
        let body = serde_json::to_value(body)?;
        self.request(Method::POST, path, Some(body), true).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse, ApiError> {
        let body = serde_json::to_value(body)?;
        self.request(Method::PUT, path, Some(body), true).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.request(Method::DELETE, path, None, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::TransportError;
    use crate::auth::Session;
    use crate::events::EventKind;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers every request with the same canned response and records it.
    struct StaticTransport {
        status: StatusCode,
        content_type: Option<&'static str>,
        body: &'static str,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl StaticTransport {
        fn json(status: StatusCode, body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                status,
                content_type: Some("application/json; charset=utf-8"),
                body,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn last(&self) -> HttpRequest {
            self.seen.lock().unwrap().last().cloned().expect("no request sent")
        }
    }

    #[async_trait]
    impl Transport for StaticTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            let mut headers = HeaderMap::new();
            if let Some(ct) = self.content_type {
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(ct));
            }
            Ok(HttpResponse {
                status: self.status,
                headers,
                body: self.body.as_bytes().to_vec(),
            })
        }
    }

    struct DownTransport;

    #[async_trait]
    impl Transport for DownTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            Err(TransportError::Connection("connection refused".to_string()))
        }
    }

    fn client_with(transport: Arc<dyn Transport>, token: Option<&str>) -> ApiClient {
        let session = SharedSession::new(Session {
            token: token.map(str::to_string),
            ..Session::default()
        });
        let client = ApiClient::new(transport, session, Notifier::new());
        client.set_base_url("http://localhost:8080");
        client
    }

    #[tokio::test]
    async fn test_authenticated_request_carries_token() {
        let transport = StaticTransport::json(StatusCode::OK, r#"{"foo":"bar"}"#);
        let client = client_with(transport.clone(), Some("T1"));

        let response = client.get("/foo").await.unwrap();
        assert_eq!(response.data(), json!({"foo": "bar"}));

        let sent = transport.last();
        assert_eq!(sent.url, "http://localhost:8080/foo");
        assert_eq!(sent.method, Method::GET);
        assert_eq!(sent.headers.get(header::AUTHORIZATION).unwrap(), "T1");
        assert_eq!(sent.headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_anonymous_or_unauthenticated_requests_have_no_token() {
        let transport = StaticTransport::json(StatusCode::OK, "{}");
        let anonymous = client_with(transport.clone(), None);
        anonymous.get("/foo").await.unwrap();
        assert!(transport.last().headers.get(header::AUTHORIZATION).is_none());

        let logged_in = client_with(transport.clone(), Some("T1"));
        logged_in.request(Method::POST, "/token", None, false).await.unwrap();
        assert!(transport.last().headers.get(header::AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_body_is_serialized_as_json() {
        let transport = StaticTransport::json(StatusCode::OK, "{}");
        let client = client_with(transport.clone(), None);
        client.post("/foo", &json!({"a": 1})).await.unwrap();
        let sent = transport.last();
        assert_eq!(sent.method, Method::POST);
        assert_eq!(sent.body.as_deref(), Some(br#"{"a":1}"#.as_slice()));
    }

    #[tokio::test]
    async fn test_non_json_content_type_returns_text() {
        let transport = Arc::new(StaticTransport {
            status: StatusCode::OK,
            content_type: Some("text/plain"),
            body: "pong",
            seen: Mutex::new(Vec::new()),
        });
        let client = client_with(transport, None);
        let response = client.get("/ping").await.unwrap();
        assert_eq!(response.text(), Some("pong"));
        assert_eq!(response.data(), json!("pong"));
    }

    #[tokio::test]
    async fn test_empty_body_is_empty() {
        let transport = StaticTransport::json(StatusCode::NO_CONTENT, "");
        let client = client_with(transport, None);
        let response = client.delete("/token").await.unwrap();
        assert_eq!(response.body, ResponseBody::Empty);
        assert!(response.json::<Value>().is_err());
    }

    #[tokio::test]
    async fn test_error_status_is_classified_and_emitted() {
        let transport = StaticTransport::json(StatusCode::UNAUTHORIZED, r#"{"message":"expired"}"#);
        let client = client_with(transport, Some("T1"));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        client.notifier().subscribe(EventKind::Error, move |event| {
            s.lock().unwrap().push(event.clone());
        });

        let err = client.get("/user/current").await.unwrap_err();
        assert!(err.is_unauthorized());

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Error { status, message, target } => {
                assert_eq!(*status, Some(401));
                assert_eq!(message, &err.to_string());
                assert_eq!(target.as_ref().unwrap().url, "http://localhost:8080/user/current");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_is_network_error() {
        let client = client_with(Arc::new(DownTransport), None);
        let err = client.get("/foo").await.unwrap_err();
        assert!(err.is_network());
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn test_redirect_status_is_an_error() {
        let transport = StaticTransport::json(StatusCode::MOVED_PERMANENTLY, "");
        let client = client_with(transport, None);
        let err = client.get("/moved").await.unwrap_err();
        assert_eq!(err.status(), Some(301));
    }

    #[tokio::test]
    async fn test_invalid_json_is_invalid_response() {
        let transport = StaticTransport::json(StatusCode::OK, "{not json");
        let client = client_with(transport, None);
        let err = client.get("/foo").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_events_and_middlewares_run_in_order() {
        let transport = StaticTransport::json(StatusCode::OK, r#"{"n":1}"#);
        let client = client_with(transport.clone(), None);
        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        for kind in [EventKind::Before, EventKind::Success, EventKind::Error, EventKind::After] {
            let l = Arc::clone(&log);
            client.notifier().subscribe(kind, move |e| {
                l.lock().unwrap().push(format!("event:{}", e.kind()));
            });
        }

        let (l1, l2, l3) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));
        client.add_middlewares(
            Middlewares::new()
                .before(move |mut config| {
                    l1.lock().unwrap().push("before".to_string());
                    config
                        .headers
                        .insert("x-trace", HeaderValue::from_static("abc"));
                    config
                })
                .success(move |mut response| {
                    l2.lock().unwrap().push("success".to_string());
                    response.body = ResponseBody::Json(json!({"n": 2}));
                    response
                })
                .after(move |_| l3.lock().unwrap().push("after".to_string())),
        );

        let response = client.get("/count").await.unwrap();
        assert_eq!(response.data(), json!({"n": 2}));
        assert_eq!(transport.last().headers.get("x-trace").unwrap(), "abc");
        assert_eq!(
            *log.lock().unwrap(),
            vec!["before", "event:before", "success", "event:success", "after", "event:after"]
        );
    }

    #[test]
    fn test_url_joining() {
        assert_eq!(ApiClient::join_url("http://host:8080", "/foo"), "http://host:8080/foo");
        assert_eq!(ApiClient::join_url("http://host:8080/", "/foo"), "http://host:8080//foo");
        assert_eq!(
            ApiClient::join_url("http://host:8080", "https://cdn.example.com/config.json"),
            "https://cdn.example.com/config.json"
        );
    }

    #[tokio::test]
    async fn test_default_headers_are_sent() {
        let transport = StaticTransport::json(StatusCode::OK, "{}");
        let client = client_with(transport.clone(), None);
        let mut headers = HeaderMap::new();
        headers.insert("x-client", HeaderValue::from_static("cli"));
        client.set_default_headers(headers);
        client.get("/foo").await.unwrap();
        assert_eq!(transport.last().headers.get("x-client").unwrap(), "cli");
    }
}
