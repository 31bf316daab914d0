use axum::{
    async_trait,
    body::to_bytes,
    extract::{FromRequest, Request},
    http::{HeaderMap, header::CONTENT_TYPE},
};
use serde::de::DeserializeOwned;

use crate::errors::AppError;

pub const MAX_BODY_SIZE_BYTES: usize = 64 * 1024; // 64 KiB upper bound for request bodies

/// Strict form extractor: requires a urlencoded content type, bounds the
/// body size, and reports deserialization failures through [`AppError`]
/// so they surface as rendered error pages.
#[derive(Debug)]
pub struct ValidatedForm<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedForm<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();
        validate_content_type(&parts.headers)?;

        let body_bytes = to_bytes(body, MAX_BODY_SIZE_BYTES)
            .await
            .map_err(|_| AppError::PayloadTooLarge)?;

        let value = serde_urlencoded::from_bytes(&body_bytes)
            .map_err(|err| AppError::InvalidForm(err.to_string()))?;

        Ok(ValidatedForm(value))
    }
}

fn validate_content_type(headers: &HeaderMap) -> Result<(), AppError> {
    let is_form = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);

    if is_form {
        Ok(())
    } else {
        Err(AppError::UnsupportedMediaType)
    }
}
