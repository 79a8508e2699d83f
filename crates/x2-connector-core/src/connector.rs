//! The object applications talk to.
//!
//! `X2Connector` composes the request pipeline, the session manager, the
//! persistent session and the notifier. There is no global instance: build
//! one and clone it wherever it is needed.

use std::sync::{Arc, RwLock};

use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::api::{ApiClient, ApiError, ApiResponse, ReqwestTransport, Transport};
use crate::auth::{ActivityMonitor, Session, SessionManager, SessionSettings, SessionState, SharedSession};
use crate::clock::{Clock, SystemClock};
use crate::config::{HttpConfig, InitOptions, RemoteConfig, DEFAULT_ENVIRONMENT, PRODUCTION_ENVIRONMENT};
use crate::events::{Event, EventKind, Notifier, Subscription};
use crate::storage::PersistentSession;

const USER_CURRENT_PATH: &str = "/user/current";
const PASSWORD_RESET_REQUEST_PATH: &str = "/user/send-password-reset";
const PASSWORD_RESET_PATH: &str = "/user/reset-password";

#[derive(Default)]
pub struct X2ConnectorBuilder {
    transport: Option<Arc<dyn Transport>>,
    storage: Option<PersistentSession>,
    clock: Option<Arc<dyn Clock>>,
    notifier: Option<Notifier>,
    settings: SessionSettings,
}

impl X2ConnectorBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn storage(mut self, storage: PersistentSession) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Defaults: reqwest transport, in-memory storage, system clock.
    pub fn build(self) -> Result<X2Connector, ApiError> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let storage = self.storage.unwrap_or_else(PersistentSession::in_memory);
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let notifier = self.notifier.unwrap_or_default();

        let api = ApiClient::new(transport, SharedSession::default(), notifier);
        let sessions = SessionManager::new(api.clone(), storage, clock, self.settings);

        Ok(X2Connector {
            api,
            sessions,
            environment: Arc::new(RwLock::new(DEFAULT_ENVIRONMENT.to_string())),
        })
    }
}

/// HTTP connector for the x2 services.
#[derive(Debug, Clone)]
pub struct X2Connector {
    api: ApiClient,
    sessions: SessionManager,
    environment: Arc<RwLock<String>>,
}

impl X2Connector {
    pub fn builder() -> X2ConnectorBuilder {
        X2ConnectorBuilder::default()
    }

    /// Connector with the default reqwest transport and in-memory storage.
    pub fn new() -> Result<Self, ApiError> {
        Self::builder().build()
    }

    /// Configure the base URL, default headers and middlewares, either from
    /// `options` directly or from the document at `options.config_path`.
    /// On failure nothing is changed.
    pub async fn init(&self, options: InitOptions) -> Result<(), ApiError> {
        let Some(config_path) = options.config_path.clone() else {
            let base_url = options.local_base_url();
            self.apply_http_config(&options.http_config, base_url)?;
            self.api.add_middlewares(options.middlewares);
            return Ok(());
        };

        let remote = self
            .fetch_remote_config(&config_path)
            .await
            .map_err(|e| ApiError::ConfigFetch {
                path: config_path.clone(),
                source: Box::new(e),
            })?;

        let http_config = remote.http_config.clone().unwrap_or_default();
        self.apply_http_config(&http_config, remote.base_url())?;
        self.api.add_middlewares(options.middlewares);

        if let Some(env) = remote.environment() {
            *self.environment.write().unwrap_or_else(|p| p.into_inner()) = env.to_string();
        }
        if let Some(duration) = remote.token_duration() {
            self.sessions.set_token_duration(duration);
        }
        info!(
            config_path = %config_path,
            env = %self.get_environment(),
            base_url = %self.api.base_url(),
            "Remote config applied"
        );
        Ok(())
    }

    async fn fetch_remote_config(&self, config_path: &str) -> Result<RemoteConfig, ApiError> {
        debug!(config_path, "Fetching remote config");
        self.api
            .request(Method::GET, config_path, None, false)
            .await?
            .json()
    }

    fn apply_http_config(&self, http_config: &HttpConfig, base_url: String) -> Result<(), ApiError> {
        let headers = http_config.header_map()?;
        self.api.set_default_headers(headers);
        self.api.set_timeout(http_config.timeout());
        self.api.set_base_url(base_url);
        Ok(())
    }

    pub fn get_environment(&self) -> String {
        self.environment
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn is_prod(&self) -> bool {
        self.get_environment() == PRODUCTION_ENVIRONMENT
    }

    pub fn base_url(&self) -> String {
        self.api.base_url()
    }

    // ===== Session =====

    pub async fn login(&self, email: &str, password: &str) -> Result<(), ApiError> {
        self.sessions.login(email, password).await
    }

    pub fn logout(&self) -> Result<(), ApiError> {
        Ok(self.sessions.logout()?)
    }

    /// Fetch the current user's profile and keep it with the session.
    pub async fn get_session(&self) -> Result<ApiResponse, ApiError> {
        let response = self.api.get(USER_CURRENT_PATH).await?;
        self.sessions.set_profile(response.data())?;
        Ok(response)
    }

    pub async fn reset_password_request(&self, email: &str) -> Result<Value, ApiError> {
        let path = format!("{}/{}", PASSWORD_RESET_REQUEST_PATH, email);
        let response = self.api.request(Method::POST, &path, None, false).await?;
        Ok(response.data())
    }

    pub async fn reset_password(&self, new_password: &str, reset_token: &str) -> Result<Value, ApiError> {
        let path = format!("{}/{}", PASSWORD_RESET_PATH, reset_token);
        let body = json!({ "newPassword": new_password });
        let response = self.api.request(Method::POST, &path, Some(body), false).await?;
        Ok(response.data())
    }

    pub fn watch_for_inactivity(&self) -> ActivityMonitor {
        self.sessions.watch_for_inactivity()
    }

    /// Report user input; equivalent to `activity().record_activity()`.
    pub fn record_activity(&self) {
        self.sessions.activity().record_activity();
    }

    pub fn activity(&self) -> ActivityMonitor {
        self.sessions.activity()
    }

    pub fn state(&self) -> SessionState {
        self.sessions.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.sessions.is_authenticated()
    }

    pub fn token(&self) -> Option<String> {
        self.sessions.token()
    }

    pub fn session(&self) -> Session {
        self.sessions.session()
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.api.notifier().subscribe(kind, handler)
    }

    // ===== Requests =====

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        requires_auth: bool,
    ) -> Result<ApiResponse, ApiError> {
        self.api.request(method, path, body, requires_auth).await
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.api.get(path).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse, ApiError> {
        self.api.post(path, body).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse, ApiError> {
        self.api.put(path, body).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.api.delete(path).await
    }
}
