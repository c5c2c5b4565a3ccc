//! Request extraction: decode, validate, then check the api key.

use std::sync::Arc;

use axum::Json;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ApiError, Problems};
use crate::state::AppState;

/// A JSON request body carrying an `api_key`.
pub trait ApiRequest: DeserializeOwned + Send + 'static {
    /// What the handler receives once the body is valid.
    type Valid: Send;

    fn api_key(&self) -> Option<&str>;

    /// Check every field, reporting all problems at once.
    fn validate(self) -> Result<Self::Valid, Problems>;
}

/// Extractor for a decoded, validated and authorized request.
pub struct Authorized<R: ApiRequest>(pub R::Valid);

impl<R: ApiRequest> FromRequest<Arc<AppState>> for Authorized<R> {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        state.increment_requests();

        let Json(body) = Json::<R>::from_request(req, state).await.map_err(|rejection| {
            debug!("Rejected request body: {}", rejection.body_text());
            ApiError::Decode(rejection.body_text())
        })?;

        let api_key = body.api_key().map(str::to_owned);
        let valid = body.validate().map_err(ApiError::Validation)?;

        if !state.is_authorized(api_key.as_deref()) {
            warn!("Request rejected: invalid api key");
            return Err(ApiError::Unauthorized);
        }

        Ok(Self(valid))
    }
}

/// Record `field` as missing.
pub(crate) fn require(problems: &mut Problems, field: &str) {
    problems.insert(field.to_string(), format!("field {field} is required"));
}
