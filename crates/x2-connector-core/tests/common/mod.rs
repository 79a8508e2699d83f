#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use x2_connector_core::api::{HttpRequest, HttpResponse};
use x2_connector_core::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use x2_connector_core::{
    Clock, Event, EventKind, InitOptions, Method, PersistentSession, SessionSettings, StatusCode,
    TokioClock, Transport, TransportError, X2Connector,
};

pub const BASE_URL: &str = "http://x2.test";

pub type Reply = Result<(StatusCode, Value), TransportError>;
type Handler = Arc<dyn Fn(&HttpRequest) -> Reply + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub authorization: Option<String>,
    pub body: Option<Value>,
    pub at: Instant,
}

/// In-memory backend: routes keyed by method and path under `BASE_URL`.
/// Unrouted requests get a 404.
#[derive(Default)]
pub struct MockServer {
    routes: Mutex<HashMap<(Method, String), Handler>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on<F>(&self, method: Method, path: &str, handler: F)
    where
        F: Fn(&HttpRequest) -> Reply + Send + Sync + 'static,
    {
        self.routes
            .lock()
            .unwrap()
            .insert((method, format!("{}{}", BASE_URL, path)), Arc::new(handler));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> Vec<RecordedCall> {
        let url = format!("{}{}", BASE_URL, path);
        self.calls()
            .into_iter()
            .filter(|c| c.method == method && c.url == url)
            .collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.calls_to(method, path).len()
    }
}

#[async_trait]
impl Transport for MockServer {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            authorization: request
                .headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: request
                .body
                .as_deref()
                .and_then(|b| serde_json::from_slice(b).ok()),
            at: Instant::now(),
        });

        let handler = self
            .routes
            .lock()
            .unwrap()
            .get(&(request.method.clone(), request.url.clone()))
            .cloned();

        let (status, body) = match handler {
            Some(handler) => handler(&request)?,
            None => (StatusCode::NOT_FOUND, Value::String("not found".to_string())),
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = if body.is_null() {
            Vec::new()
        } else {
            serde_json::to_vec(&body).unwrap()
        };
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

pub struct Harness {
    pub x2: X2Connector,
    pub server: Arc<MockServer>,
    pub storage: PersistentSession,
    pub clock: TokioClock,
    pub events: Arc<Mutex<Vec<Event>>>,
}

impl Harness {
    pub fn expired_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::SessionExpired))
            .count()
    }

    pub fn errors(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == EventKind::Error)
            .cloned()
            .collect()
    }
}

/// Connector wired to a `MockServer` with `/token` routes: login returns
/// `T1` valid for `ttl_ms`, renewal extends by `ttl_ms`, revoke succeeds.
/// Must be called inside a (paused) tokio runtime.
pub async fn harness(settings: SessionSettings, ttl_ms: i64) -> Harness {
    harness_with_storage(settings, ttl_ms, PersistentSession::in_memory()).await
}

pub async fn harness_with_storage(
    settings: SessionSettings,
    ttl_ms: i64,
    storage: PersistentSession,
) -> Harness {
    let clock = TokioClock::new();
    let server = MockServer::new();

    server.on(Method::POST, "/token", move |_| {
        let at = clock.now() + chrono::Duration::milliseconds(ttl_ms);
        Ok((
            StatusCode::OK,
            serde_json::json!({"token": "T1", "expiresAt": at.to_rfc3339()}),
        ))
    });
    server.on(Method::PUT, "/token", move |_| {
        let at = clock.now() + chrono::Duration::milliseconds(ttl_ms);
        Ok((StatusCode::OK, serde_json::json!({"expiresAt": at.to_rfc3339()})))
    });
    server.on(Method::DELETE, "/token", |_| Ok((StatusCode::NO_CONTENT, Value::Null)));

    let x2 = X2Connector::builder()
        .transport(server.clone())
        .storage(storage.clone())
        .clock(Arc::new(clock))
        .settings(settings)
        .build()
        .unwrap();
    x2.init(InitOptions::new().base_url(BASE_URL)).await.unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in [EventKind::Error, EventKind::SessionExpired] {
        let events = Arc::clone(&events);
        x2.subscribe(kind, move |event| events.lock().unwrap().push(event.clone()));
    }

    Harness {
        x2,
        server,
        storage,
        clock,
        events,
    }
}

pub fn settings_with_duration(ms: u64) -> SessionSettings {
    SessionSettings {
        token_duration: std::time::Duration::from_millis(ms),
        ..SessionSettings::default()
    }
}
