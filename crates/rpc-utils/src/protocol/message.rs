//! Request and response envelopes carried inside frames.

use super::codec;
use super::framing::{Frame, FrameType};
use crate::error::{CodecError, HandlerError};
use ciborium::Value;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named call with positional arguments.
///
/// The same envelope is used for requests and notifications; only the frame
/// type differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation.
    pub id: Uuid,
    /// Name of the function to invoke.
    pub function: String,
    /// Positional arguments.
    pub args: Vec<Value>,
}

impl RequestEnvelope {
    /// Create an envelope with a fresh request ID.
    #[must_use]
    pub fn new(function: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            function: function.into(),
            args,
        }
    }

    /// Encode into a frame of the given type.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments cannot be serialized.
    pub fn into_frame(self, frame_type: FrameType) -> Result<Frame, CodecError> {
        Ok(Frame::new(frame_type, codec::encode(&self)?))
    }
}

/// Response envelope for wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response is for.
    pub request_id: Uuid,
    /// Return value; `Null` for unit results and failures.
    pub result: Value,
    /// Set when the call failed.
    pub error: Option<ErrorInfo>,
}

/// Error information for failed requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code for categorization.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl From<&HandlerError> for ErrorInfo {
    fn from(err: &HandlerError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl ResponseEnvelope {
    /// Successful response carrying `result`.
    #[must_use]
    pub const fn success(request_id: Uuid, result: Value) -> Self {
        Self {
            request_id,
            result,
            error: None,
        }
    }

    /// Failed response describing `err`.
    #[must_use]
    pub fn failure(request_id: Uuid, err: &HandlerError) -> Self {
        Self {
            request_id,
            result: Value::Null,
            error: Some(err.into()),
        }
    }

    /// Encode into a `Response` frame, or an `Error` frame for failures.
    ///
    /// # Errors
    ///
    /// Returns an error if the result cannot be serialized.
    pub fn into_frame(self) -> Result<Frame, CodecError> {
        let frame_type = if self.error.is_some() {
            FrameType::Error
        } else {
            FrameType::Response
        };
        Ok(Frame::new(frame_type, codec::encode(&self)?))
    }
}
