//! Session lifecycle: login, token renewal, inactivity detection, logout.
//!
//! While watching and authenticated the manager keeps two timers running:
//! a one-shot renewal timer armed for `tokenExpiresAt`, and an inactivity
//! check that ticks every 500ms. A check that finds no recorded activity
//! arms a single countdown of `token_duration`; when the countdown fires
//! the token is revoked server-side and `session-expired` is emitted.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::clock::Clock;
use crate::events::{Event, Notifier, RequestTarget};
use crate::storage::{PersistentSession, StorageError};

use super::activity::ActivityMonitor;
use super::session::{parse_timestamp, Session, SessionState, SharedSession};
use super::timer::{TimerHandle, TimerSlot};

pub const TOKEN_PATH: &str = "/token";

/// Default inactivity window: 20 minutes.
pub const DEFAULT_TOKEN_DURATION: Duration = Duration::from_secs(20 * 60);

/// How often the inactivity check looks at the activity flag.
pub const INACTIVITY_CHECK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Continuous inactivity after which the session expires.
    pub token_duration: Duration,
    pub check_interval: Duration,
    /// Log out locally once `session-expired` has been emitted.
    pub logout_on_expiry: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            token_duration: DEFAULT_TOKEN_DURATION,
            check_interval: INACTIVITY_CHECK_INTERVAL,
            logout_on_expiry: false,
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    #[serde(rename = "expiresAt", default)]
    expires_at: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RenewResponse {
    #[serde(rename = "expiresAt", default)]
    expires_at: Option<Value>,
}

#[derive(Debug, Default)]
struct Timers {
    watching: bool,
    renewal: TimerSlot,
    countdown: TimerSlot,
    check: TimerSlot,
    /// `session-expired` already went out for the current inactivity spell.
    expiry_announced: bool,
}

#[derive(Debug)]
struct Inner {
    api: ApiClient,
    session: SharedSession,
    storage: PersistentSession,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    activity: ActivityMonitor,
    settings: Mutex<SessionSettings>,
    timers: Mutex<Timers>,
}

/// Owns the authentication state and the timers that keep it alive.
/// Clone is cheap; all clones drive the same session.
#[derive(Debug, Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager sharing `api`'s session, hydrated from `storage`.
    pub fn new(
        api: ApiClient,
        storage: PersistentSession,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        let manager = Self {
            inner: Arc::new(Inner {
                session: api.session().clone(),
                notifier: api.notifier().clone(),
                api,
                storage,
                clock,
                activity: ActivityMonitor::new(),
                settings: Mutex::new(settings),
                timers: Mutex::new(Timers::default()),
            }),
        };

        match manager.restore_existing_session() {
            Ok(restored) => debug!(restored, "Session storage read"),
            Err(e) => warn!(error = %e, "Failed to read stored session, starting anonymous"),
        }
        manager
    }

    /// Load token and expiry from storage into memory. Returns whether a
    /// token was found.
    pub fn restore_existing_session(&self) -> Result<bool, StorageError> {
        let token = self.inner.storage.token()?;
        let expires_at = self.inner.storage.token_expires_at()?;
        let profile = self.inner.storage.profile()?;

        let mut session = self.inner.session.lock();
        session.token_expires_at = token.as_ref().and(expires_at);
        session.token = token;
        if session.profile.is_none() {
            session.profile = profile;
        }
        Ok(session.is_authenticated())
    }

    pub fn state(&self) -> SessionState {
        let watching = self.inner.timers().watching;
        match (self.inner.session.is_authenticated(), watching) {
            (false, _) => SessionState::Anonymous,
            (true, false) => SessionState::AuthenticatedIdle,
            (true, true) => SessionState::AuthenticatedWatching,
        }
    }

    pub fn session(&self) -> Session {
        self.inner.session.snapshot()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.session.is_authenticated()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.session.token()
    }

    pub fn is_watching(&self) -> bool {
        self.inner.timers().watching
    }

    /// Handle the host uses to report user input.
    pub fn activity(&self) -> ActivityMonitor {
        self.inner.activity.clone()
    }

    pub fn settings(&self) -> SessionSettings {
        self.inner.settings().clone()
    }

    /// Takes effect for the next countdown that gets armed.
    pub fn set_token_duration(&self, token_duration: Duration) {
        self.inner.settings().token_duration = token_duration;
    }

    pub fn set_logout_on_expiry(&self, enabled: bool) {
        self.inner.settings().logout_on_expiry = enabled;
    }

    pub fn has_pending_renewal(&self) -> bool {
        self.inner.timers().renewal.is_armed()
    }

    pub fn has_inactivity_countdown(&self) -> bool {
        self.inner.timers().countdown.is_armed()
    }

    pub fn is_checking_inactivity(&self) -> bool {
        self.inner.timers().check.is_armed()
    }

    /// Exchange credentials for a token. On failure nothing changes.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), ApiError> {
        let body = serde_json::to_value(LoginRequest { email, password })?;
        let response = self
            .inner
            .api
            .request(Method::POST, TOKEN_PATH, Some(body), false)
            .await?;
        let login: LoginResponse = response.json()?;

        let expires_at = login.expires_at.as_ref().and_then(parse_timestamp);
        if login.expires_at.as_ref().is_some_and(|v| !v.is_null()) && expires_at.is_none() {
            warn!("Unrecognised expiresAt in login response, renewal will not be scheduled");
        }

        {
            let mut session = self.inner.session.lock();
            self.inner.storage.save_token(&login.token, expires_at)?;
            session.token = Some(login.token);
            session.token_expires_at = expires_at;
        }
        info!(expires_at = ?expires_at, "Logged in");

        if self.is_watching() {
            self.inner.start_timers();
        }
        Ok(())
    }

    /// Arm inactivity detection. Idempotent. Timers start now if already
    /// authenticated, otherwise on the next successful login. Must be
    /// called from within a tokio runtime.
    pub fn watch_for_inactivity(&self) -> ActivityMonitor {
        let start_now = {
            let mut timers = self.inner.timers();
            if timers.watching {
                return self.inner.activity.clone();
            }
            timers.watching = true;
            self.inner.session.is_authenticated()
        };

        info!(start_now, "Watching for inactivity");
        if start_now {
            self.inner.start_timers();
        }
        self.inner.activity.clone()
    }

    /// Cancel every timer and forget the token, in memory and in storage.
    /// Safe to call when already logged out.
    pub fn logout(&self) -> Result<(), StorageError> {
        self.inner.logout()
    }

    /// Store the profile document in memory and under the `session` key.
    pub fn set_profile(&self, profile: Value) -> Result<(), StorageError> {
        let mut session = self.inner.session.lock();
        self.inner.storage.save_profile(&profile)?;
        session.profile = Some(profile);
        Ok(())
    }
}

impl Inner {
    fn timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn settings(&self) -> MutexGuard<'_, SessionSettings> {
        self.settings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn token_target(&self, method: Method) -> RequestTarget {
        RequestTarget {
            method,
            url: self.api.url_for(TOKEN_PATH),
        }
    }

    /// (Re)start the renewal timer and the inactivity check.
    fn start_timers(self: &Arc<Self>) {
        self.activity.reset();
        let period = self.settings().check_interval;

        let mut timers = self.timers();
        timers.expiry_announced = false;
        timers.countdown.cancel();
        self.schedule_renewal(&mut timers, false);

        let weak = Arc::downgrade(self);
        timers.check.arm(|generation| {
            TimerHandle::repeating(period, move || {
                let weak = Weak::clone(&weak);
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.check_inactivity(generation);
                    }
                }
            })
        });
    }

    fn schedule_renewal(self: &Arc<Self>, timers: &mut Timers, from_renewal: bool) {
        let Some(expires_at) = self.session.token_expires_at() else {
            debug!("Token expiry unknown, renewal not scheduled");
            if !from_renewal {
                timers.renewal.cancel();
            }
            return;
        };

        // An expiry in the past fires right away.
        let delay = (expires_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        debug!(delay_ms = delay.as_millis() as u64, "Scheduling token renewal");

        let weak = Arc::downgrade(self);
        let make = move |generation| {
            TimerHandle::once(delay, async move {
                if let Some(inner) = weak.upgrade() {
                    inner.renew(generation).await;
                }
            })
        };
        if from_renewal {
            timers.renewal.rearm_detached(make);
        } else {
            timers.renewal.arm(make);
        }
    }

    async fn renew(self: Arc<Self>, generation: u64) {
        if !self.timers().renewal.is_current(generation) {
            return;
        }

        debug!("Renewing token");
        let result = self
            .api
            .request(Method::PUT, TOKEN_PATH, None, true)
            .await
            .and_then(|response| response.json::<RenewResponse>())
            .and_then(|renewed| {
                renewed
                    .expires_at
                    .as_ref()
                    .and_then(parse_timestamp)
                    .ok_or_else(|| ApiError::InvalidResponse("Renewal response has no usable expiresAt".to_string()))
            })
            .and_then(|expires_at| {
                // Rescheduling on an expiry that already passed would renew in a tight loop.
                if expires_at > self.clock.now() {
                    Ok(expires_at)
                } else {
                    Err(ApiError::InvalidResponse(format!(
                        "Renewed expiry {} is not in the future",
                        expires_at.to_rfc3339()
                    )))
                }
            });

        let failure = {
            let mut timers = self.timers();
            if !timers.renewal.is_current(generation) {
                debug!("Renewal superseded by logout or login, result discarded");
                return;
            }
            match result.and_then(|expires_at| self.store_expiry(expires_at)) {
                Ok(true) => {
                    self.schedule_renewal(&mut timers, true);
                    None
                }
                Ok(false) => {
                    timers.renewal.release(generation);
                    None
                }
                Err(e) => {
                    timers.renewal.release(generation);
                    Some(e)
                }
            }
        };

        if let Some(err) = failure {
            self.report_renewal_failure(err);
        }
    }

    /// Returns false when the session was logged out in the meantime.
    fn store_expiry(&self, expires_at: chrono::DateTime<chrono::Utc>) -> Result<bool, ApiError> {
        let mut session = self.session.lock();
        if !session.is_authenticated() {
            return Ok(false);
        }
        self.storage.save_token_expires_at(Some(expires_at))?;
        session.token_expires_at = Some(expires_at);
        info!(expires_at = %expires_at, "Token renewed");
        Ok(true)
    }

    fn report_renewal_failure(&self, err: ApiError) {
        let err = ApiError::Renewal(Box::new(err));
        warn!(error = %err, "Keeping current token until logout or inactivity timeout");
        self.notifier.emit(&Event::Error {
            target: Some(self.token_target(Method::PUT)),
            status: err.status(),
            message: err.to_string(),
        });
    }

    fn check_inactivity(self: &Arc<Self>, generation: u64) {
        let mut timers = self.timers();
        if !timers.check.is_current(generation) {
            return;
        }

        if self.activity.take() {
            timers.expiry_announced = false;
            if timers.countdown.is_armed() {
                debug!("Activity detected, inactivity countdown cancelled");
                timers.countdown.cancel();
            }
            return;
        }

        if timers.expiry_announced || timers.countdown.is_armed() || !self.session.is_authenticated() {
            return;
        }

        let duration = self.settings().token_duration;
        debug!(duration_ms = duration.as_millis() as u64, "No activity, inactivity countdown armed");
        let weak = Arc::downgrade(self);
        timers.countdown.arm(|generation| {
            TimerHandle::once(duration, async move {
                if let Some(inner) = weak.upgrade() {
                    inner.expire(generation).await;
                }
            })
        });
    }

    async fn expire(self: Arc<Self>, generation: u64) {
        {
            let mut timers = self.timers();
            if !timers.countdown.is_current(generation) {
                return;
            }
            timers.expiry_announced = true;
        }

        info!("Inactivity timeout reached, revoking token");
        // Best effort: the pipeline already logs and emits the failure.
        if let Err(e) = self.api.request(Method::DELETE, TOKEN_PATH, None, true).await {
            debug!(error = %e, "Token revoke failed");
        }

        if !self.timers().countdown.release(generation) {
            return;
        }
        self.notifier.emit(&Event::SessionExpired);

        if self.settings().logout_on_expiry {
            if let Err(e) = self.logout() {
                warn!(error = %e, "Failed to clear stored session after expiry");
            }
        }
    }

    fn logout(&self) -> Result<(), StorageError> {
        {
            let mut timers = self.timers();
            timers.renewal.cancel();
            timers.countdown.cancel();
            timers.check.cancel();
            timers.expiry_announced = false;
        }
        self.activity.reset();

        let mut session = self.session.lock();
        let was_authenticated = session.is_authenticated();
        session.token = None;
        session.token_expires_at = None;
        self.storage.clear_token()?;

        if was_authenticated {
            info!("Logged out");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::TransportError;
    use crate::api::transport::{HttpRequest, HttpResponse, Transport};
    use crate::clock::TokioClock;
    use async_trait::async_trait;
    use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
    use reqwest::StatusCode;

    /// Login succeeds with a token expiring in an hour; everything else 200s.
    struct LoginOnly {
        clock: TokioClock,
        calls: std::sync::Mutex<Vec<(Method, String)>>,
    }

    #[async_trait]
    impl Transport for LoginOnly {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((request.method.clone(), request.url.clone()));
            let body = if request.method == Method::POST {
                let at = self.clock.now() + chrono::Duration::hours(1);
                format!(r#"{{"token":"T1","expiresAt":"{}"}}"#, at.to_rfc3339())
            } else {
                "{}".to_string()
            };
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            Ok(HttpResponse {
                status: StatusCode::OK,
                headers,
                body: body.into_bytes(),
            })
        }
    }

    fn manager() -> (SessionManager, PersistentSession) {
        let clock = TokioClock::new();
        let transport = Arc::new(LoginOnly {
            clock,
            calls: std::sync::Mutex::new(Vec::new()),
        });
        let api = ApiClient::new(transport, SharedSession::default(), Notifier::new());
        let storage = PersistentSession::in_memory();
        let manager = SessionManager::new(api, storage.clone(), Arc::new(clock), SessionSettings::default());
        (manager, storage)
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transitions() {
        let (manager, _) = manager();
        assert_eq!(manager.state(), SessionState::Anonymous);

        manager.login("user", "password").await.unwrap();
        assert_eq!(manager.state(), SessionState::AuthenticatedIdle);
        assert!(!manager.has_pending_renewal());

        manager.watch_for_inactivity();
        assert_eq!(manager.state(), SessionState::AuthenticatedWatching);
        assert!(manager.has_pending_renewal());
        assert!(manager.is_checking_inactivity());

        manager.logout().unwrap();
        assert_eq!(manager.state(), SessionState::Anonymous);
        assert!(!manager.has_pending_renewal());
        assert!(!manager.is_checking_inactivity());
        assert!(manager.is_watching());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_before_login_defers_timers() {
        let (manager, _) = manager();
        manager.watch_for_inactivity();
        assert!(!manager.has_pending_renewal());
        assert!(!manager.is_checking_inactivity());

        manager.login("user", "password").await.unwrap();
        assert!(manager.has_pending_renewal());
        assert!(manager.is_checking_inactivity());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_from_storage() {
        let (manager, storage) = manager();
        storage.save_token("stored", None).unwrap();
        assert!(manager.restore_existing_session().unwrap());
        assert_eq!(manager.token().as_deref(), Some("stored"));
        assert_eq!(manager.state(), SessionState::AuthenticatedIdle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_is_idempotent() {
        let (manager, storage) = manager();
        manager.logout().unwrap();
        manager.logout().unwrap();
        assert_eq!(storage.token().unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_profile_persists() {
        let (manager, storage) = manager();
        manager.set_profile(serde_json::json!({"_id": 1})).unwrap();
        assert_eq!(storage.profile().unwrap(), Some(serde_json::json!({"_id": 1})));
        assert_eq!(manager.session().profile, Some(serde_json::json!({"_id": 1})));
    }

    /// Reads find nothing; every write fails.
    struct ReadOnlyBackend;

    impl crate::storage::StorageBackend for ReadOnlyBackend {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(std::io::Error::other("read-only").into())
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(std::io::Error::other("read-only").into())
        }

        fn apply(&self, _changes: &[(&str, Option<&str>)]) -> Result<(), StorageError> {
            Err(std::io::Error::other("read-only").into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_storage_failure_leaves_session_untouched() {
        let clock = TokioClock::new();
        let transport = Arc::new(LoginOnly {
            clock,
            calls: std::sync::Mutex::new(Vec::new()),
        });
        let api = ApiClient::new(transport, SharedSession::default(), Notifier::new());
        let storage = PersistentSession::new(Arc::new(ReadOnlyBackend));
        let manager = SessionManager::new(api, storage, Arc::new(clock), SessionSettings::default());
        manager.watch_for_inactivity();

        let err = manager.login("user", "password").await.unwrap_err();

        assert!(matches!(err, ApiError::Storage(_)));
        assert_eq!(manager.state(), SessionState::Anonymous);
        assert_eq!(manager.session().token_expires_at, None);
        assert!(!manager.has_pending_renewal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_on_expiry_can_be_toggled() {
        let (manager, _) = manager();
        assert!(!manager.settings().logout_on_expiry);
        manager.set_logout_on_expiry(true);
        assert!(manager.settings().logout_on_expiry);
    }

    #[test]
    fn test_default_settings() {
        let settings = SessionSettings::default();
        assert_eq!(settings.token_duration, Duration::from_millis(1_200_000));
        assert_eq!(settings.check_interval, Duration::from_millis(500));
        assert!(!settings.logout_on_expiry);
    }
}
