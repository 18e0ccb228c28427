//! Header parsing: resolved client IP and caller identity.

use axum::extract::{
    ConnectInfo,
    FromRequestParts,
};
use common::{
    auth::Identity,
    http::HttpResponseError,
    types::UserId,
};
use errors::ErrorMetadata;
use http::{
    header::AUTHORIZATION,
    request::Parts,
    HeaderMap,
};

pub const AUTHENTICATION_REQUIRED: &str = "AUTHENTICATION_REQUIRED";

/// The client IP a log event is stamped with: first `X-Forwarded-For`
/// entry, then `X-Real-IP`, then the connection's peer address.
pub struct ExtractClientIp(pub String);

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl<S: Send + Sync> FromRequestParts<S> for ExtractClientIp {
    type Rejection = HttpResponseError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(forwarded) = header_str(&parts.headers, "x-forwarded-for") {
            let first = forwarded.split(',').next().unwrap_or(forwarded).trim();
            if !first.is_empty() {
                return Ok(ExtractClientIp(first.to_owned()));
            }
        }
        if let Some(real_ip) = header_str(&parts.headers, "x-real-ip") {
            return Ok(ExtractClientIp(real_ip.to_owned()));
        }
        let connection_ip = parts
            .extensions
            .get::<ConnectInfo<std::net::SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_owned());
        Ok(ExtractClientIp(connection_ip))
    }
}

/// The request origin consumed by the domain filter: `Origin`, falling back
/// to `Referer`.
pub fn request_origin(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "origin")
        .or_else(|| header_str(headers, "referer"))
        .map(str::to_owned)
}

pub fn api_key(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-api-key").map(str::to_owned)
}

/// Resolved caller identity for the query endpoints. Session management is
/// the user service's concern; this backend accepts `Bearer <user id>` from
/// the fronting proxy.
pub struct ExtractIdentity(pub Identity);

impl<S: Send + Sync> FromRequestParts<S> for ExtractIdentity {
    type Rejection = HttpResponseError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(header) = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
        else {
            return Err(anyhow::anyhow!(ErrorMetadata::unauthenticated(
                AUTHENTICATION_REQUIRED,
                "missing Authorization header",
            ))
            .into());
        };
        let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
        let user_id: UserId = token.parse().map_err(|_| {
            anyhow::anyhow!(ErrorMetadata::unauthenticated(
                AUTHENTICATION_REQUIRED,
                "malformed bearer token",
            ))
        })?;
        Ok(ExtractIdentity(Identity::User(user_id)))
    }
}
