//! HTTP plumbing shared by every route: the error envelope, wrapped
//! extractors, and the `/metrics` endpoint.

use std::{
    borrow::Cow,
    time::Duration,
};

use axum::response::{
    IntoResponse,
    Response,
};
use errors::ErrorMetadataAnyhowExt;
use http::{
    header::RETRY_AFTER,
    HeaderValue,
    StatusCode,
};
use metrics::LOGBULL_METRICS_REGISTRY;
use prometheus::{
    Encoder,
    TextEncoder,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::report_error_sync;

pub mod extract;

mod http_metrics {
    use std::time::Duration;

    use metrics::{
        log_distribution_with_labels,
        register_logbull_histogram,
        MetricLabel,
    };

    register_logbull_histogram!(
        HTTP_HANDLE_DURATION_SECONDS,
        "Time to handle an HTTP request",
        &["endpoint", "method", "status"]
    );

    pub fn log_http_request(route: &str, method: &str, status: &str, duration: Duration) {
        let labels = vec![
            MetricLabel::new("endpoint", route.to_owned()),
            MetricLabel::new("method", method.to_owned()),
            MetricLabel::new("status", status.to_owned()),
        ];
        log_distribution_with_labels(&HTTP_HANDLE_DURATION_SECONDS, duration.as_secs_f64(), labels);
    }
}

pub use self::http_metrics::log_http_request;

/// Wire shape of every error the API returns.
#[derive(Serialize, Deserialize)]
pub struct ResponseErrorMessage {
    pub error: Cow<'static, str>,
    pub code: Cow<'static, str>,
}

/// `HttpError` is the vehicle for getting client facing error messages to
/// callers over HTTP. Errors tagged with `ErrorMetadata` build these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    status_code: StatusCode,
    /// Stable wire code sent in the `code` field, e.g. `RATE_LIMIT_EXCEEDED`.
    error_code: Cow<'static, str>,
    /// Detailed client-facing error message.
    msg: Cow<'static, str>,
    retry_after: Option<Duration>,
}

impl HttpError {
    pub fn new<S, T>(status_code: StatusCode, error_code: S, msg: T) -> Self
    where
        S: Into<Cow<'static, str>>,
        T: Into<Cow<'static, str>>,
    {
        Self {
            status_code,
            error_code: error_code.into(),
            msg: msg.into(),
            retry_after: None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn error_code(&self) -> &str {
        &self.error_code
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    pub fn into_response(self) -> Response {
        let mut response = (
            self.status_code,
            extract::Json(ResponseErrorMessage {
                error: self.msg,
                code: self.error_code,
            }),
        )
            .into_response();
        if let Some(retry_after) = self.retry_after {
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

/// `HttpResponseError` converts `anyhow::Error` (and the `HttpError` inside
/// it if present) into the `http::Response` returned from handlers. All
/// HTTP handlers return `HttpResponseError`s; errors are reported in the
/// `IntoResponse` impl, the exit point of the HTTP layer.
#[derive(Debug)]
pub struct HttpResponseError {
    trace: anyhow::Error,
    http_error: HttpError,
}

impl IntoResponse for HttpResponseError {
    fn into_response(mut self) -> Response {
        // This is the only place HTTP-layer errors are logged, because it is
        // the exit point of the HTTP layer.
        report_error_sync(&mut self.trace);
        self.http_error.into_response()
    }
}

impl From<anyhow::Error> for HttpResponseError {
    fn from(err: anyhow::Error) -> HttpResponseError {
        let http_error = HttpError {
            status_code: err.http_status(),
            error_code: err.short_msg().to_string().into(),
            msg: err.msg().to_string().into(),
            retry_after: err.retry_after(),
        };
        Self {
            trace: err,
            http_error,
        }
    }
}

impl From<HttpResponseError> for anyhow::Error {
    fn from(value: HttpResponseError) -> Self {
        value.trace
    }
}

/// Prometheus text-format dump of every registered metric.
pub async fn metrics() -> Result<impl IntoResponse, HttpResponseError> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = LOGBULL_METRICS_REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(anyhow::Error::from)?;
    Ok(String::from_utf8(buffer).map_err(anyhow::Error::from)?)
}

#[cfg(test)]
mod tests {
    use errors::ErrorMetadata;
    use http::StatusCode;

    use super::HttpResponseError;

    #[test]
    fn test_error_metadata_to_http_error() {
        let err = anyhow::anyhow!(ErrorMetadata::rate_limited(
            "RATE_LIMIT_EXCEEDED",
            "project over its ingest rate",
            Some(std::time::Duration::from_secs(3)),
        ));
        let response_err: HttpResponseError = err.into();
        assert_eq!(
            response_err.http_error.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(response_err.http_error.error_code(), "RATE_LIMIT_EXCEEDED");

        let response = response_err.http_error.into_response();
        assert_eq!(
            response.headers().get(http::header::RETRY_AFTER).unwrap(),
            "3"
        );
    }

    #[test]
    fn test_untagged_error_is_opaque_500() {
        let err = anyhow::anyhow!("connection reset by peer");
        let response_err: HttpResponseError = err.into();
        assert_eq!(
            response_err.http_error.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        // The wire message must not leak internals.
        assert!(!response_err.http_error.message().contains("connection"));
    }
}
