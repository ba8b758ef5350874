//! Error taxonomy for jobs and capture sessions.
//!
//! Every error carries an explicit recovery policy. Frame-level failures are
//! absorbed at the frame boundary (the frame contributes zero detections);
//! everything else aborts the job or session that raised it, never the process.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The detector failed to initialize. Fatal for the service instance.
    #[error("model is not loaded on the server: {0}")]
    ModelUnavailable(String),

    /// A frame could not be decoded.
    #[error("could not decode the provided frame: {0}")]
    Decode(String),

    /// The detector returned a class id missing from its class table.
    #[error("unknown class id {0}")]
    UnknownClass(u32),

    /// A single detector call did not return in time.
    #[error("detector call exceeded {0:?}")]
    DetectorTimeout(Duration),

    /// A batch job was stopped by its caller.
    #[error("job cancelled")]
    Cancelled,

    #[error("an internal error occurred: {0}")]
    Internal(String),
}

/// What the frame-processing boundary does with an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recovery {
    /// Drop the frame, keep the job or session running.
    SkipFrame,
    /// End the job or session that raised the error.
    Abort,
}

impl PipelineError {
    pub fn recovery(&self) -> Recovery {
        match self {
            PipelineError::Decode(_)
            | PipelineError::UnknownClass(_)
            | PipelineError::DetectorTimeout(_) => Recovery::SkipFrame,
            PipelineError::ModelUnavailable(_)
            | PipelineError::Cancelled
            | PipelineError::Internal(_) => Recovery::Abort,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recovery() == Recovery::SkipFrame
    }

    /// Stable machine-readable kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ModelUnavailable(_) => "model_unavailable",
            PipelineError::Decode(_) => "decode_error",
            PipelineError::UnknownClass(_) => "unknown_class",
            PipelineError::DetectorTimeout(_) => "detector_timeout",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Internal(_) => "internal_error",
        }
    }

    /// Status hint for the transport layer that reports this error.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::ModelUnavailable(_) => 503,
            PipelineError::Decode(_) => 400,
            PipelineError::DetectorTimeout(_) => 504,
            PipelineError::Cancelled => 499,
            PipelineError::UnknownClass(_) | PipelineError::Internal(_) => 500,
        }
    }

    pub fn to_payload(&self) -> FailurePayload {
        FailurePayload {
            status: "error",
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Internal(format!("{:#}", err))
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

/// Structured failure body returned to batch callers instead of a bare
/// transport failure.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct FailurePayload {
    pub status: &'static str,
    pub kind: &'static str,
    pub message: String,
}
