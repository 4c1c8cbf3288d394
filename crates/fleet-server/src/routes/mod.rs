pub mod agents;
pub mod mesh;
pub mod packages;
pub mod resources;
pub mod volumes;

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// Parse a JSON body that callers may omit entirely.
pub(crate) fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::bad_request(format!("invalid request body: {e}")))
}
