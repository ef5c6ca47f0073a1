//! API schema types shared by the client, registry and runtime.

use serde::{Deserialize, Serialize};

use crate::value::{EnumValue, Value};

/// Predictor lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PredictorStatus {
    Provisioning,
    Active,
    Invalid,
    Archived,
}

/// Predictor visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PredictorAccess {
    Public,
    Private,
}

/// Hardware class a prediction should run on.
///
/// Variants form a bitmask so a module can advertise several targets at once.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Acceleration {
    #[default]
    Auto,
    Cpu,
    Gpu,
    Npu,
}

impl Acceleration {
    /// Bitmask value. `Auto` is zero and matches anything.
    pub fn bits(self) -> u32 {
        match self {
            Acceleration::Auto => 0,
            Acceleration::Cpu => 1,
            Acceleration::Gpu => 2,
            Acceleration::Npu => 4,
        }
    }

    /// Whether a module advertising `supported` can serve this request.
    pub fn satisfied_by(self, supported: u32) -> bool {
        match self {
            Acceleration::Auto => true,
            other => supported & other.bits() != 0,
        }
    }
}

/// Named member of a parameter enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumerationMember {
    pub name: String,
    pub value: EnumValue,
}

/// One input or output of a predictor signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// Expected dtype. Absent when the predictor accepts any value.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<crate::value::Dtype>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub optional: bool,
    /// Inclusive numeric range, `[min, max]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<Vec<EnumerationMember>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Free-form JSON schema for structured parameters.
    #[serde(rename = "schema", default, skip_serializing_if = "Option::is_none")]
    pub value_schema: Option<serde_json::Value>,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dtype: None,
            description: None,
            optional: false,
            range: None,
            enumeration: None,
            default_value: None,
            value_schema: None,
        }
    }

    pub fn with_dtype(mut self, dtype: crate::value::Dtype) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Predictor input and output declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default)]
    pub inputs: Vec<Parameter>,
    #[serde(default)]
    pub outputs: Vec<Parameter>,
}

/// A downloadable artifact backing a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResource {
    /// File name the resource is stored under.
    pub name: String,
    /// Resource kind, e.g. `dso` for a native module library.
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    /// Lowercase hex SHA-256 of the file contents, when the server knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// A predictor as returned by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictor {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: PredictorStatus,
    pub access: PredictorAccess,
    #[serde(default)]
    pub signature: Signature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// RFC 3339 creation timestamp, as returned by the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default)]
    pub resources: Vec<PredictionResource>,
}

/// Why a prediction failed.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PredictionErrorKind {
    UnsupportedType,
    Decode,
    InvalidInput,
    ResourceFetch,
    ResourceIntegrity,
    NativeExecution,
    RemoteUnavailable,
    RequestRejected,
    Timeout,
}

/// Terminal failure attached to a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionFailure {
    pub kind: PredictionErrorKind,
    pub message: String,
}

/// Result of dispatching inputs to a predictor.
///
/// Exactly one of `results` and `error` is set once the prediction is
/// terminal; streamed predictions may carry neither while in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Value>>,
    /// Wall-clock latency in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PredictionFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

impl Prediction {
    /// A terminal failed prediction carrying no results.
    pub fn failed(
        id: impl Into<String>,
        tag: impl Into<String>,
        kind: PredictionErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tag: tag.into(),
            results: None,
            latency_ms: None,
            error: Some(PredictionFailure {
                kind,
                message: message.into(),
            }),
            logs: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.results.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Dtype;

    #[test]
    fn predictor_parses_with_missing_optional_fields() {
        let raw = r#"{
            "tag": "@fxn/greeting",
            "status": "ACTIVE",
            "access": "PUBLIC",
            "signature": {
                "inputs": [{ "name": "name", "type": "string" }],
                "outputs": [{ "name": "greeting", "type": "string" }]
            }
        }"#;
        let predictor: Predictor = serde_json::from_str(raw).unwrap();
        assert_eq!(predictor.status, PredictorStatus::Active);
        assert!(predictor.resources.is_empty());
        assert_eq!(predictor.signature.inputs[0].dtype, Some(Dtype::String));
        assert!(!predictor.signature.inputs[0].optional);
    }

    #[test]
    fn resource_kind_uses_type_key() {
        let raw = r#"{
            "name": "libgreeting.so",
            "type": "dso",
            "url": "https://cdn.example.com/libgreeting.so",
            "checksum": "ab"
        }"#;
        let resource: PredictionResource = serde_json::from_str(raw).unwrap();
        assert_eq!(resource.kind, "dso");
        assert_eq!(resource.checksum.as_deref(), Some("ab"));
    }

    #[test]
    fn acceleration_parses_and_masks() {
        assert_eq!("gpu".parse::<Acceleration>().unwrap(), Acceleration::Gpu);
        assert!(Acceleration::Auto.satisfied_by(0));
        assert!(Acceleration::Gpu.satisfied_by(Acceleration::Cpu.bits() | Acceleration::Gpu.bits()));
        assert!(!Acceleration::Npu.satisfied_by(Acceleration::Cpu.bits()));
    }

    #[test]
    fn failed_prediction_is_terminal() {
        let p = Prediction::failed(
            "pred_1",
            "@fxn/greeting",
            PredictionErrorKind::InvalidInput,
            "missing required input: name",
        );
        assert!(!p.succeeded());
        assert_eq!(p.error.as_ref().map(|e| e.kind), Some(PredictionErrorKind::InvalidInput));
    }

    #[test]
    fn error_kind_names_are_stable() {
        assert_eq!(PredictionErrorKind::ResourceFetch.to_string(), "resource_fetch");
        assert_eq!(
            serde_json::to_string(&PredictionErrorKind::RemoteUnavailable).unwrap(),
            "\"remote_unavailable\""
        );
    }
}
