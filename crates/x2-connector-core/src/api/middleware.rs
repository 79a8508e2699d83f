//! Request/response hooks, applied in registration order.

use std::fmt;
use std::sync::Arc;

use super::client::{ApiResponse, RequestConfig};
use super::ApiError;

pub type BeforeHook = Arc<dyn Fn(RequestConfig) -> RequestConfig + Send + Sync>;
pub type SuccessHook = Arc<dyn Fn(ApiResponse) -> ApiResponse + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&ApiError) + Send + Sync>;
pub type AfterHook = Arc<dyn Fn(&RequestConfig) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Middlewares {
    before: Vec<BeforeHook>,
    success: Vec<SuccessHook>,
    error: Vec<ErrorHook>,
    after: Vec<AfterHook>,
}

impl fmt::Debug for Middlewares {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middlewares")
            .field("before", &self.before.len())
            .field("success", &self.success.len())
            .field("error", &self.error.len())
            .field("after", &self.after.len())
            .finish()
    }
}

impl Middlewares {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite the request before it is sent.
    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(RequestConfig) -> RequestConfig + Send + Sync + 'static,
    {
        self.before.push(Arc::new(hook));
        self
    }

    /// Rewrite a successful response before it reaches the caller.
    pub fn success<F>(mut self, hook: F) -> Self
    where
        F: Fn(ApiResponse) -> ApiResponse + Send + Sync + 'static,
    {
        self.success.push(Arc::new(hook));
        self
    }

    pub fn error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ApiError) + Send + Sync + 'static,
    {
        self.error.push(Arc::new(hook));
        self
    }

    /// Runs once per request after either outcome.
    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RequestConfig) + Send + Sync + 'static,
    {
        self.after.push(Arc::new(hook));
        self
    }

    /// Append `other`'s hooks after ours.
    pub fn extend(&mut self, other: Middlewares) {
        self.before.extend(other.before);
        self.success.extend(other.success);
        self.error.extend(other.error);
        self.after.extend(other.after);
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.success.is_empty() && self.error.is_empty() && self.after.is_empty()
    }

    pub(crate) fn apply_before(&self, config: RequestConfig) -> RequestConfig {
        self.before.iter().fold(config, |config, hook| hook(config))
    }

    pub(crate) fn apply_success(&self, response: ApiResponse) -> ApiResponse {
        self.success.iter().fold(response, |response, hook| hook(response))
    }

    pub(crate) fn notify_error(&self, err: &ApiError) {
        for hook in &self.error {
            hook(err);
        }
    }

    pub(crate) fn notify_after(&self, config: &RequestConfig) {
        for hook in &self.after {
            hook(config);
        }
    }
}
