//! The `{ success, result: { data, message } }` envelope every REST endpoint
//! of the backend wraps its payload in.

use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ApiResult<T>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResult<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            result: Some(ApiResult {
                data: Some(data),
                message: None,
            }),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Some(ApiResult {
                data: None,
                message: Some(message.into()),
            }),
        }
    }

    /// Server-supplied message, if any.
    pub fn message(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.message.as_deref())
    }

    /// Unwrap the payload, turning `success: false` or a missing `data`
    /// into an error.
    pub fn into_data(self) -> Result<T, EnvelopeError> {
        if !self.success {
            let message = self
                .message()
                .unwrap_or("request was not successful")
                .to_string();
            return Err(EnvelopeError::Rejected(message));
        }

        self.result
            .and_then(|r| r.data)
            .ok_or(EnvelopeError::MissingData)
    }
}
