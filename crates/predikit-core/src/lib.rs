//! Core types for the Predikit client: prediction values, predictor
//! schemas, the wire codec used across the native boundary, and the
//! blocking API client.

pub mod client;
mod json;
pub mod schemas;
pub mod value;
pub mod wire;

pub use client::{ApiClient, ApiError, NamedValue, PredictionRequest, RetryPolicy};
pub use schemas::{
    Acceleration, EnumerationMember, Parameter, Prediction, PredictionErrorKind,
    PredictionFailure, PredictionResource, Predictor, PredictorAccess, PredictorStatus, Signature,
};
pub use value::{CodecError, Dtype, EnumValue, Tensor, Value};
