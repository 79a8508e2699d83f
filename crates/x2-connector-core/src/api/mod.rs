//! REST API client module for the x2 backend.
//!
//! This module provides the `ApiClient` request pipeline, the `Transport`
//! seam it sends through, and the `Middlewares` applied to every request.
//!
//! Authenticated requests carry the session token verbatim in the
//! `authorization` header.

pub mod client;
pub mod error;
pub mod middleware;
pub mod transport;

pub use client::{ApiClient, ApiResponse, RequestConfig, ResponseBody};
pub use error::{ApiError, TransportError};
pub use middleware::Middlewares;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
