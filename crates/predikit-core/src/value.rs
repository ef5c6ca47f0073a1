//! Typed prediction values and conversions between host data and the
//! Predikit value representation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Errors raised by the value codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The host value has no Predikit representation.
    #[error("unsupported host type: {0}")]
    UnsupportedType(String),
    /// A wire or JSON payload could not be decoded.
    #[error("failed to decode value: {0}")]
    Decode(String),
    /// The value's tag is structurally incompatible with the requested type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: Dtype, actual: Dtype },
    /// A tensor buffer does not match its declared shape.
    #[error("tensor buffer of {len} bytes does not match shape {shape:?} for {dtype}")]
    ShapeMismatch {
        dtype: Dtype,
        shape: Vec<usize>,
        len: usize,
    },
}

/// Value type, following `numpy`-style dtype names on the API surface.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Dtype {
    Null,
    Float16,
    Float32,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Bool,
    String,
    List,
    Dict,
    Image,
    Binary,
}

impl Dtype {
    /// Size in bytes of one element, for dtypes that can back a tensor.
    pub fn elem_size(self) -> Option<usize> {
        match self {
            Dtype::Float16 => Some(2),
            Dtype::Float32 => Some(4),
            Dtype::Float64 => Some(8),
            Dtype::Int8 | Dtype::Uint8 | Dtype::Bool => Some(1),
            Dtype::Int16 | Dtype::Uint16 => Some(2),
            Dtype::Int32 | Dtype::Uint32 => Some(4),
            Dtype::Int64 | Dtype::Uint64 => Some(8),
            _ => None,
        }
    }

    /// Whether values of this dtype carry a shape.
    pub fn is_tensor(self) -> bool {
        self.elem_size().is_some()
    }
}

/// Contiguous tensor buffer with explicit shape and element dtype.
///
/// The buffer is little-endian and must hold exactly `shape.product()`
/// elements of `dtype`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: Dtype,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl Tensor {
    pub fn new(dtype: Dtype, shape: Vec<usize>, data: Vec<u8>) -> Result<Self, CodecError> {
        let elem = dtype
            .elem_size()
            .ok_or_else(|| CodecError::UnsupportedType(format!("tensor of dtype {dtype}")))?;
        let count: usize = shape.iter().product();
        if count * elem != data.len() {
            return Err(CodecError::ShapeMismatch {
                dtype,
                shape,
                len: data.len(),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    /// Build a float32 tensor from a host slice.
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Result<Self, CodecError> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(Dtype::Float32, shape, data)
    }

    /// Build an int32 tensor from a host slice.
    pub fn from_i32(shape: Vec<usize>, values: &[i32]) -> Result<Self, CodecError> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(Dtype::Int32, shape, data)
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_parts(self) -> (Dtype, Vec<usize>, Vec<u8>) {
        (self.dtype, self.shape, self.data)
    }
}

/// Member value of a parameter enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnumValue {
    Str(String),
    Int(i64),
}

/// A typed prediction value.
///
/// The tag fully determines how the value is marshalled; see [`crate::wire`]
/// for the binary form used across the native boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Binary {
        data: Vec<u8>,
        mime: Option<String>,
    },
    List(Vec<Value>),
    /// String-keyed record with preserved field order.
    Record(Vec<(String, Value)>),
    File {
        path: PathBuf,
        mime: Option<String>,
    },
    Tensor(Tensor),
    Enum {
        name: String,
        value: EnumValue,
    },
}

impl Value {
    /// The dtype a consumer should use to interpret this value.
    ///
    /// Tensors report their element dtype; files report a dtype derived from
    /// their media type.
    pub fn dtype(&self) -> Dtype {
        match self {
            Value::Null => Dtype::Null,
            Value::Bool(_) => Dtype::Bool,
            Value::Int8(_) => Dtype::Int8,
            Value::Int16(_) => Dtype::Int16,
            Value::Int32(_) => Dtype::Int32,
            Value::Int64(_) => Dtype::Int64,
            Value::UInt8(_) => Dtype::Uint8,
            Value::UInt16(_) => Dtype::Uint16,
            Value::UInt32(_) => Dtype::Uint32,
            Value::UInt64(_) => Dtype::Uint64,
            Value::Float32(_) => Dtype::Float32,
            Value::Float64(_) => Dtype::Float64,
            Value::String(_) => Dtype::String,
            Value::Binary { mime, .. } => dtype_for_mime(mime.as_deref()),
            Value::List(_) => Dtype::List,
            Value::Record(_) => Dtype::Dict,
            Value::File { mime, .. } => dtype_for_mime(mime.as_deref()),
            Value::Tensor(t) => t.dtype(),
            Value::Enum { value, .. } => match value {
                EnumValue::Str(_) => Dtype::String,
                EnumValue::Int(_) => Dtype::Int64,
            },
        }
    }

    /// Build a record value from named fields, preserving order.
    pub fn record(fields: impl IntoIterator<Item = (impl Into<String>, Value)>) -> Self {
        Value::Record(
            fields
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    /// Build a tensor value from raw parts.
    pub fn tensor(dtype: Dtype, shape: Vec<usize>, data: Vec<u8>) -> Result<Self, CodecError> {
        Tensor::new(dtype, shape, data).map(Value::Tensor)
    }

    /// Coerce this value to a target dtype.
    ///
    /// Identity and lossless conversions succeed; conversions the target
    /// explicitly requests (e.g. narrowing an integer) succeed when the
    /// concrete value fits, and fail with [`CodecError::Decode`] when it does
    /// not. Structurally incompatible tags fail with
    /// [`CodecError::TypeMismatch`].
    pub fn coerce(&self, target: Dtype) -> Result<Value, CodecError> {
        let actual = self.dtype();
        if actual == target {
            return Ok(self.clone());
        }
        let mismatch = || CodecError::TypeMismatch {
            expected: target,
            actual,
        };
        match self {
            Value::Int8(v) => int_to(*v as i128, target).ok_or_else(mismatch)?,
            Value::Int16(v) => int_to(*v as i128, target).ok_or_else(mismatch)?,
            Value::Int32(v) => int_to(*v as i128, target).ok_or_else(mismatch)?,
            Value::Int64(v) => int_to(*v as i128, target).ok_or_else(mismatch)?,
            Value::UInt8(v) => int_to(*v as i128, target).ok_or_else(mismatch)?,
            Value::UInt16(v) => int_to(*v as i128, target).ok_or_else(mismatch)?,
            Value::UInt32(v) => int_to(*v as i128, target).ok_or_else(mismatch)?,
            Value::UInt64(v) => int_to(*v as i128, target).ok_or_else(mismatch)?,
            Value::Float32(v) if target == Dtype::Float64 => Ok(Value::Float64(*v as f64)),
            Value::Float64(v) if target == Dtype::Float32 => {
                let narrowed = *v as f32;
                if narrowed as f64 == *v {
                    Ok(Value::Float32(narrowed))
                } else {
                    Err(CodecError::Decode(format!(
                        "value {v} cannot be represented as float32 without loss"
                    )))
                }
            }
            Value::Enum { value, .. } => match value {
                EnumValue::Str(s) if target == Dtype::String => Ok(Value::String(s.clone())),
                EnumValue::Int(v) => int_to(*v as i128, target).ok_or_else(mismatch)?,
                EnumValue::Str(_) => Err(mismatch()),
            },
            // Rank-0 tensors decay to the matching scalar when one is asked for.
            Value::Tensor(t) if t.shape().is_empty() => {
                scalar_from_bytes(t.dtype(), t.data())?.coerce(target)
            }
            _ => Err(mismatch()),
        }
    }

    /// Encode an untyped host JSON value.
    ///
    /// Integers become `int32` when they fit (`int64`/`uint64` otherwise),
    /// floats become `float64`, objects become ordered records.
    pub fn from_json(json: &serde_json::Value) -> Result<Value, CodecError> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Ok(i32::try_from(v).map_or(Value::Int64(v), Value::Int32))
                } else if let Some(v) = n.as_u64() {
                    Ok(Value::UInt64(v))
                } else if let Some(v) = n.as_f64() {
                    Ok(Value::Float64(v))
                } else {
                    Err(CodecError::UnsupportedType(format!("number {n}")))
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Array(items) => Ok(Value::List(
                items.iter().map(Value::from_json).collect::<Result<_, _>>()?,
            )),
            serde_json::Value::Object(fields) => Ok(Value::Record(
                fields
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), Value::from_json(value)?)))
                    .collect::<Result<_, CodecError>>()?,
            )),
        }
    }
}

fn dtype_for_mime(mime: Option<&str>) -> Dtype {
    match mime {
        Some(m) if m.starts_with("image/") => Dtype::Image,
        _ => Dtype::Binary,
    }
}

/// Convert an integer through `i128` to an exact-width target.
///
/// `None` marks a structural mismatch (non-integer target); an out-of-range
/// value is a decode failure on its own.
pub(crate) fn int_to(v: i128, target: Dtype) -> Option<Result<Value, CodecError>> {
    let out_of_range = || CodecError::Decode(format!("value {v} does not fit {target}"));
    let result = match target {
        Dtype::Int8 => i8::try_from(v).map(Value::Int8).map_err(|_| out_of_range()),
        Dtype::Int16 => i16::try_from(v).map(Value::Int16).map_err(|_| out_of_range()),
        Dtype::Int32 => i32::try_from(v).map(Value::Int32).map_err(|_| out_of_range()),
        Dtype::Int64 => i64::try_from(v).map(Value::Int64).map_err(|_| out_of_range()),
        Dtype::Uint8 => u8::try_from(v).map(Value::UInt8).map_err(|_| out_of_range()),
        Dtype::Uint16 => u16::try_from(v).map(Value::UInt16).map_err(|_| out_of_range()),
        Dtype::Uint32 => u32::try_from(v).map(Value::UInt32).map_err(|_| out_of_range()),
        Dtype::Uint64 => u64::try_from(v).map(Value::UInt64).map_err(|_| out_of_range()),
        Dtype::Float32 => {
            let f = v as f32;
            if f as i128 == v {
                Ok(Value::Float32(f))
            } else {
                Err(out_of_range())
            }
        }
        Dtype::Float64 => {
            let f = v as f64;
            if f as i128 == v {
                Ok(Value::Float64(f))
            } else {
                Err(out_of_range())
            }
        }
        _ => return None,
    };
    Some(result)
}

/// Reinterpret a rank-0 tensor payload as the matching scalar value.
pub(crate) fn scalar_from_bytes(dtype: Dtype, data: &[u8]) -> Result<Value, CodecError> {
    fn arr<const N: usize>(data: &[u8], dtype: Dtype) -> Result<[u8; N], CodecError> {
        data.get(..N)
            .and_then(|bytes| <[u8; N]>::try_from(bytes).ok())
            .ok_or_else(|| CodecError::Decode(format!("scalar payload too short for {dtype}")))
    }
    Ok(match dtype {
        Dtype::Bool => Value::Bool(arr::<1>(data, dtype)?[0] != 0),
        Dtype::Int8 => Value::Int8(arr::<1>(data, dtype)?[0] as i8),
        Dtype::Int16 => Value::Int16(i16::from_le_bytes(arr(data, dtype)?)),
        Dtype::Int32 => Value::Int32(i32::from_le_bytes(arr(data, dtype)?)),
        Dtype::Int64 => Value::Int64(i64::from_le_bytes(arr(data, dtype)?)),
        Dtype::Uint8 => Value::UInt8(arr::<1>(data, dtype)?[0]),
        Dtype::Uint16 => Value::UInt16(u16::from_le_bytes(arr(data, dtype)?)),
        Dtype::Uint32 => Value::UInt32(u32::from_le_bytes(arr(data, dtype)?)),
        Dtype::Uint64 => Value::UInt64(u64::from_le_bytes(arr(data, dtype)?)),
        Dtype::Float32 => Value::Float32(f32::from_le_bytes(arr(data, dtype)?)),
        Dtype::Float64 => Value::Float64(f64::from_le_bytes(arr(data, dtype)?)),
        other => {
            return Err(CodecError::Decode(format!(
                "dtype {other} has no scalar form"
            )))
        }
    })
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(data: Vec<u8>) -> Self {
        Value::Binary { data, mime: None }
    }
}

impl From<Tensor> for Value {
    fn from(t: Tensor) -> Self {
        Value::Tensor(t)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}
