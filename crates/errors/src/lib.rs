//! Error tagging shared across the backend.
//!
//! An [`ErrorMetadata`] is attached to an `anyhow` error chain via
//! `.context(e)` and classifies the failure for the HTTP layer, metrics,
//! and tests.

use std::{
    borrow::Cow,
    time::Duration,
};

use http::StatusCode;

mod metrics;

pub use crate::metrics::log_error_metadata;

/// `ErrorMetadata` can be attached to an anyhow error chain via
/// `.context(e /*ErrorMetadata*/)`. It tags an error with the information
/// used to classify it at the edges of the system.
///
/// The `msg` is conveyed as the client facing error message if it makes it
/// to the HTTP layer.
///
/// The `short_msg` is the stable wire code (SCREAMING_SNAKE_CASE, e.g.
/// `PROJECT_NOT_FOUND`). It is sent as the `code` field of the error
/// envelope and is resilient to changes in copy, so tests and clients match
/// on it rather than on `msg`.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    /// The error class, determining the HTTP status code.
    pub code: ErrorCode,
    /// Stable wire code, e.g. `RATE_LIMIT_EXCEEDED`.
    pub short_msg: Cow<'static, str>,
    /// Human readable, developer facing description.
    pub msg: Cow<'static, str>,
    /// For `RateLimited` errors, how long until a retry can succeed. Sent
    /// as a `Retry-After` header.
    pub retry_after: Option<Duration>,
}

#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    Unauthenticated,
    Forbidden,
    NotFound,
    PayloadTooLarge,
    RequestTimeout,
    RateLimited,

    Overloaded,
    OperationalInternalServerError,
}

pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
pub const INTERNAL_SERVER_ERROR_MSG: &str = "Your request couldn't be completed. Try again later.";

impl ErrorMetadata {
    /// Bad request. Maps to 400 in HTTP.
    ///
    /// The short_msg should be the stable wire code (eg
    /// `INVALID_QUERY_STRUCTURE`). The msg should be a descriptive message
    /// targeted toward the developer.
    pub fn bad_request(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
            retry_after: None,
        }
    }

    /// Resource not found. Maps to 404 in HTTP.
    pub fn not_found(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::NotFound,
            short_msg: short_msg.into(),
            msg: msg.into(),
            retry_after: None,
        }
    }

    /// Not authenticated. Maps to 401 in HTTP.
    pub fn unauthenticated(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Unauthenticated,
            short_msg: short_msg.into(),
            msg: msg.into(),
            retry_after: None,
        }
    }

    /// Forbidden. Maps to 403 in HTTP.
    pub fn forbidden(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Forbidden,
            short_msg: short_msg.into(),
            msg: msg.into(),
            retry_after: None,
        }
    }

    /// Payload or stored quota exceeded. Maps to 413 in HTTP.
    pub fn payload_too_large(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::PayloadTooLarge,
            short_msg: short_msg.into(),
            msg: msg.into(),
            retry_after: None,
        }
    }

    /// Deadline exceeded while serving the request. Maps to 408 in HTTP.
    pub fn request_timeout(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::RequestTimeout,
            short_msg: short_msg.into(),
            msg: msg.into(),
            retry_after: None,
        }
    }

    /// Admission control rejected the request. Maps to 429 in HTTP; when
    /// `retry_after` is set the HTTP layer emits a `Retry-After` header.
    pub fn rate_limited(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
        retry_after: Option<Duration>,
    ) -> Self {
        Self {
            code: ErrorCode::RateLimited,
            short_msg: short_msg.into(),
            msg: msg.into(),
            retry_after,
        }
    }

    /// Internal error with a client visible message indicating that the
    /// caller hit a defensive limit. Maps to 503 in HTTP.
    pub fn overloaded(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Overloaded,
            short_msg: short_msg.into(),
            msg: msg.into(),
            retry_after: None,
        }
    }

    /// Operational internal server error (maps to 500 in HTTP).
    ///
    /// Produces a very general error message for the caller. If you do not
    /// need a custom error message, do not use this method: plain `anyhow`
    /// errors without any `ErrorMetadata` are already shown to the caller as
    /// a generic internal server error.
    pub fn operational_internal_server_error() -> Self {
        Self {
            code: ErrorCode::OperationalInternalServerError,
            short_msg: INTERNAL_SERVER_ERROR.into(),
            msg: INTERNAL_SERVER_ERROR_MSG.into(),
            retry_after: None,
        }
    }

    pub fn is_bad_request(&self) -> bool {
        self.code == ErrorCode::BadRequest
    }

    pub fn is_unauthenticated(&self) -> bool {
        self.code == ErrorCode::Unauthenticated
    }

    pub fn is_forbidden(&self) -> bool {
        self.code == ErrorCode::Forbidden
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }

    pub fn is_rate_limited(&self) -> bool {
        self.code == ErrorCode::RateLimited
    }

    pub fn is_request_timeout(&self) -> bool {
        self.code == ErrorCode::RequestTimeout
    }

    pub fn is_overloaded(&self) -> bool {
        self.code == ErrorCode::Overloaded
    }

    /// Return true if this error is deterministically caused by the caller.
    /// Such errors are safe to surface verbatim and are not reported as
    /// server faults.
    pub fn is_deterministic_user_error(&self) -> bool {
        match self.code {
            ErrorCode::BadRequest
            | ErrorCode::Unauthenticated
            | ErrorCode::Forbidden
            | ErrorCode::NotFound
            | ErrorCode::PayloadTooLarge => true,
            ErrorCode::RequestTimeout
            | ErrorCode::RateLimited
            | ErrorCode::Overloaded
            | ErrorCode::OperationalInternalServerError => false,
        }
    }
}

impl ErrorCode {
    pub fn http_status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            // HTTP has the unfortunate naming of 401 as unauthorized when
            // it's really about authentication.
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::OperationalInternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn metric_tag_value(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotFound => "not_found",
            ErrorCode::PayloadTooLarge => "payload_too_large",
            ErrorCode::RequestTimeout => "request_timeout",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::Overloaded => "overloaded",
            ErrorCode::OperationalInternalServerError => "operational",
        }
    }
}

/// Classification helpers for `anyhow::Error` chains that may or may not
/// carry an [`ErrorMetadata`]. Untagged errors classify as internal server
/// errors.
pub trait ErrorMetadataAnyhowExt {
    fn is_deterministic_user_error(&self) -> bool;
    fn http_status(&self) -> StatusCode;
    fn short_msg(&self) -> &str;
    fn msg(&self) -> &str;
    fn retry_after(&self) -> Option<Duration>;
    fn is_bad_request(&self) -> bool;
    fn is_unauthenticated(&self) -> bool;
    fn is_forbidden(&self) -> bool;
    fn is_not_found(&self) -> bool;
    fn is_rate_limited(&self) -> bool;
    fn is_request_timeout(&self) -> bool;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn is_deterministic_user_error(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(|e| e.is_deterministic_user_error())
    }

    fn http_status(&self) -> StatusCode {
        match self.downcast_ref::<ErrorMetadata>() {
            Some(e) => e.code.http_status_code(),
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn short_msg(&self) -> &str {
        match self.downcast_ref::<ErrorMetadata>() {
            Some(e) => &e.short_msg,
            None => INTERNAL_SERVER_ERROR,
        }
    }

    fn msg(&self) -> &str {
        match self.downcast_ref::<ErrorMetadata>() {
            Some(e) => &e.msg,
            None => INTERNAL_SERVER_ERROR_MSG,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        self.downcast_ref::<ErrorMetadata>()
            .and_then(|e| e.retry_after)
    }

    fn is_bad_request(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(|e| e.is_bad_request())
    }

    fn is_unauthenticated(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(|e| e.is_unauthenticated())
    }

    fn is_forbidden(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(|e| e.is_forbidden())
    }

    fn is_not_found(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(|e| e.is_not_found())
    }

    fn is_rate_limited(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(|e| e.is_rate_limited())
    }

    fn is_request_timeout(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(|e| e.is_request_timeout())
    }
}
