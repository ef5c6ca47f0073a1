//! Dispatch error type and its mapping onto prediction failures.

use predikit_core::schemas::{Prediction, PredictionErrorKind};
use predikit_core::{ApiError, CodecError};
use predikit_registry::CacheError;

use crate::native::NativeError;

/// Anything that can go wrong between accepting inputs and producing a
/// terminal prediction.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Native(#[from] NativeError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("prediction deadline exceeded")]
    DeadlineExceeded,
}

impl DispatchError {
    /// The failure kind reported on the resulting prediction.
    pub fn kind(&self) -> PredictionErrorKind {
        match self {
            DispatchError::Codec(CodecError::UnsupportedType(_)) => {
                PredictionErrorKind::UnsupportedType
            }
            DispatchError::Codec(CodecError::TypeMismatch { .. }) => {
                PredictionErrorKind::InvalidInput
            }
            DispatchError::Codec(_) => PredictionErrorKind::Decode,
            DispatchError::Api(ApiError::Unavailable(_)) => PredictionErrorKind::RemoteUnavailable,
            DispatchError::Api(ApiError::Rejected { .. }) => PredictionErrorKind::RequestRejected,
            DispatchError::Api(ApiError::Timeout) => PredictionErrorKind::Timeout,
            DispatchError::Api(ApiError::Decode(_)) => PredictionErrorKind::Decode,
            DispatchError::Api(ApiError::InvalidUrl(_)) => PredictionErrorKind::RequestRejected,
            DispatchError::Cache(CacheError::Integrity { .. }) => {
                PredictionErrorKind::ResourceIntegrity
            }
            DispatchError::Cache(_) => PredictionErrorKind::ResourceFetch,
            DispatchError::Native(_) => PredictionErrorKind::NativeExecution,
            DispatchError::InvalidInput(_) => PredictionErrorKind::InvalidInput,
            DispatchError::DeadlineExceeded => PredictionErrorKind::Timeout,
        }
    }

    /// Fold this error into a terminal failed prediction.
    pub fn into_failure(self, id: impl Into<String>, tag: impl Into<String>) -> Prediction {
        let kind = self.kind();
        Prediction::failed(id, tag, kind, self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_error_source() {
        let err = DispatchError::Cache(CacheError::Integrity {
            name: "lib.so".into(),
            expected: "aa".into(),
            actual: "bb".into(),
        });
        assert_eq!(err.kind(), PredictionErrorKind::ResourceIntegrity);
        assert_eq!(
            DispatchError::DeadlineExceeded.kind(),
            PredictionErrorKind::Timeout
        );
        assert_eq!(
            DispatchError::InvalidInput("missing".into()).kind(),
            PredictionErrorKind::InvalidInput
        );
    }

    #[test]
    fn into_failure_is_terminal() {
        let prediction =
            DispatchError::InvalidInput("missing required input: name".into())
                .into_failure("pred_1", "@fxn/greeting");
        assert!(!prediction.succeeded());
        assert!(prediction.results.is_none());
    }
}
