//! The `{status, message, _embedded}` wrapper around every backend response.

use serde::{Deserialize, Serialize};

use super::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Success,
    #[serde(other)]
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericResponseV2<T> {
    pub status: ResponseStatus,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "_embedded", default = "Option::default")]
    pub embedded: Option<T>,
}

impl<T> GenericResponseV2<T> {
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Unwrap the embedded payload, surfacing backend failures verbatim.
    pub fn into_result(self) -> Result<T, ApiError> {
        if !self.is_success() {
            return Err(ApiError::Backend(self.message));
        }
        self.embedded.ok_or_else(|| {
            ApiError::InvalidResponse("successful response without _embedded payload".to_string())
        })
    }

    /// For endpoints that only report a message.
    pub fn into_message(self) -> Result<String, ApiError> {
        if self.is_success() {
            Ok(self.message)
        } else {
            Err(ApiError::Backend(self.message))
        }
    }
}
