//! Extractors that reject with the API envelope.

use axum::extract::{FromRequest, FromRequestParts, Query};
use axum::http::request::Parts;
use axum::Json;
use std::convert::Infallible;
use timbel_auth::Claims;
use timbel_core::ids::PipelineId;

use crate::error::ApiError;

/// JSON body; malformed input is a 400 in the envelope.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query string; malformed input is a 400 in the envelope.
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Subject of the verified bearer token, if auth is enabled.
pub struct Caller(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Caller(parts.extensions.get::<Claims>().map(|c| c.sub.clone())))
    }
}

impl Caller {
    /// The authenticated subject wins over an actor named in the body.
    pub fn actor(self, claimed: Option<String>) -> Option<String> {
        self.0.or(claimed)
    }
}

/// Unknown and malformed ids are both reported as not found.
pub fn pipeline_id(raw: &str) -> Result<PipelineId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("Pipeline not found: {}", raw)))
}
