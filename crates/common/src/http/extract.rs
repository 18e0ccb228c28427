//! Extractors that reject with our error envelope instead of axum's
//! plain-text defaults.

use axum::{
    extract::{
        FromRequest,
        FromRequestParts,
        Request,
    },
    response::{
        IntoResponse,
        Response,
    },
};
use errors::ErrorMetadata;
use http::request::Parts;
use serde::{
    de::DeserializeOwned,
    Serialize,
};

use super::HttpResponseError;

pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

pub struct Json<T>(pub T);

impl<S, T> FromRequest<S> for Json<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = HttpResponseError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(Json(value)),
            Err(rejection) => Err(anyhow::anyhow!(ErrorMetadata::bad_request(
                INVALID_REQUEST,
                rejection.body_text(),
            ))
            .into()),
        }
    }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

pub struct Query<T>(pub T);

impl<S, T> FromRequestParts<S> for Query<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = HttpResponseError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match axum::extract::Query::<T>::from_request_parts(parts, state).await {
            Ok(axum::extract::Query(value)) => Ok(Query(value)),
            Err(rejection) => Err(anyhow::anyhow!(ErrorMetadata::bad_request(
                INVALID_REQUEST,
                rejection.body_text(),
            ))
            .into()),
        }
    }
}

pub struct Path<T>(pub T);

impl<S, T> FromRequestParts<S> for Path<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = HttpResponseError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match axum::extract::Path::<T>::from_request_parts(parts, state).await {
            Ok(axum::extract::Path(value)) => Ok(Path(value)),
            Err(rejection) => Err(anyhow::anyhow!(ErrorMetadata::bad_request(
                INVALID_REQUEST,
                rejection.body_text(),
            ))
            .into()),
        }
    }
}
