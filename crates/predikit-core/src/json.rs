//! JSON form of [`Value`], used on the remote prediction API.
//!
//! Every value is a tagged object: `{"type": "...", "data": ...}`. Tensors
//! add a `"shape"` array and carry their buffer hex-encoded; records keep
//! field order by encoding `data` as an array of `[name, value]` pairs.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Number};

use crate::value::{CodecError, Dtype, EnumValue, Tensor, Value};

pub(crate) fn to_repr(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => json!({ "type": "null" }),
        Value::Bool(v) => json!({ "type": "bool", "data": v }),
        Value::Int8(v) => json!({ "type": "int8", "data": v }),
        Value::Int16(v) => json!({ "type": "int16", "data": v }),
        Value::Int32(v) => json!({ "type": "int32", "data": v }),
        Value::Int64(v) => json!({ "type": "int64", "data": v }),
        Value::UInt8(v) => json!({ "type": "uint8", "data": v }),
        Value::UInt16(v) => json!({ "type": "uint16", "data": v }),
        Value::UInt32(v) => json!({ "type": "uint32", "data": v }),
        Value::UInt64(v) => json!({ "type": "uint64", "data": v }),
        Value::Float32(v) => json!({ "type": "float32", "data": *v as f64 }),
        Value::Float64(v) => json!({ "type": "float64", "data": v }),
        Value::String(s) => json!({ "type": "string", "data": s }),
        Value::Binary { data, mime } => {
            let mut obj = Map::new();
            obj.insert("type".into(), "binary".into());
            obj.insert("data".into(), hex::encode(data).into());
            if let Some(mime) = mime {
                obj.insert("mime".into(), mime.clone().into());
            }
            serde_json::Value::Object(obj)
        }
        Value::List(items) => json!({
            "type": "list",
            "data": items.iter().map(to_repr).collect::<Vec<_>>(),
        }),
        Value::Record(fields) => json!({
            "type": "dict",
            "data": fields
                .iter()
                .map(|(name, value)| json!([name, to_repr(value)]))
                .collect::<Vec<_>>(),
        }),
        Value::File { path, mime } => {
            let mut obj = Map::new();
            obj.insert("type".into(), "file".into());
            obj.insert("path".into(), path.to_string_lossy().into_owned().into());
            if let Some(mime) = mime {
                obj.insert("mime".into(), mime.clone().into());
            }
            serde_json::Value::Object(obj)
        }
        Value::Tensor(t) => json!({
            "type": t.dtype().to_string(),
            "shape": t.shape(),
            "data": hex::encode(t.data()),
        }),
        Value::Enum { name, value } => {
            let data = match value {
                EnumValue::Str(s) => serde_json::Value::String(s.clone()),
                EnumValue::Int(v) => serde_json::Value::Number(Number::from(*v)),
            };
            json!({ "type": "enum", "name": name, "data": data })
        }
    }
}

pub(crate) fn from_repr(raw: &serde_json::Value) -> Result<Value, CodecError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| CodecError::Decode("value must be a tagged object".into()))?;
    let tag = obj
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| CodecError::Decode("value is missing its type tag".into()))?;

    if let Some(shape) = obj.get("shape") {
        let dtype: Dtype = tag
            .parse()
            .map_err(|_| CodecError::Decode(format!("unknown tensor dtype: {tag}")))?;
        let shape = parse_shape(shape)?;
        let data = parse_hex(obj.get("data"))?;
        return Tensor::new(dtype, shape, data).map(Value::Tensor);
    }

    match tag {
        "null" => Ok(Value::Null),
        "bool" => Ok(Value::Bool(require_data(obj)?.as_bool().ok_or_else(|| {
            CodecError::Decode("bool data must be a boolean".into())
        })?)),
        "int8" => parse_int(obj, Dtype::Int8),
        "int16" => parse_int(obj, Dtype::Int16),
        "int32" => parse_int(obj, Dtype::Int32),
        "int64" => parse_int(obj, Dtype::Int64),
        "uint8" => parse_int(obj, Dtype::Uint8),
        "uint16" => parse_int(obj, Dtype::Uint16),
        "uint32" => parse_int(obj, Dtype::Uint32),
        "uint64" => parse_int(obj, Dtype::Uint64),
        "float32" => parse_float(obj).map(|v| Value::Float32(v as f32)),
        "float64" => parse_float(obj).map(Value::Float64),
        "string" => Ok(Value::String(
            require_data(obj)?
                .as_str()
                .ok_or_else(|| CodecError::Decode("string data must be a string".into()))?
                .to_string(),
        )),
        "binary" => Ok(Value::Binary {
            data: parse_hex(obj.get("data"))?,
            mime: parse_mime(obj),
        }),
        "list" => {
            let items = require_data(obj)?
                .as_array()
                .ok_or_else(|| CodecError::Decode("list data must be an array".into()))?;
            Ok(Value::List(
                items.iter().map(from_repr).collect::<Result<_, _>>()?,
            ))
        }
        "dict" => {
            let pairs = require_data(obj)?
                .as_array()
                .ok_or_else(|| CodecError::Decode("dict data must be an array of pairs".into()))?;
            let mut fields = Vec::with_capacity(pairs.len());
            for pair in pairs {
                let pair = pair
                    .as_array()
                    .filter(|p| p.len() == 2)
                    .ok_or_else(|| CodecError::Decode("dict entry must be a [name, value] pair".into()))?;
                let name = pair[0]
                    .as_str()
                    .ok_or_else(|| CodecError::Decode("dict field name must be a string".into()))?;
                fields.push((name.to_string(), from_repr(&pair[1])?));
            }
            Ok(Value::Record(fields))
        }
        "file" => {
            let path = obj
                .get("path")
                .and_then(|p| p.as_str())
                .ok_or_else(|| CodecError::Decode("file value is missing its path".into()))?;
            Ok(Value::File {
                path: path.into(),
                mime: parse_mime(obj),
            })
        }
        "enum" => {
            let name = obj
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| CodecError::Decode("enum value is missing its member name".into()))?;
            let value = match require_data(obj)? {
                serde_json::Value::String(s) => EnumValue::Str(s.clone()),
                serde_json::Value::Number(n) => EnumValue::Int(n.as_i64().ok_or_else(|| {
                    CodecError::Decode("enum member value must be an integer".into())
                })?),
                _ => {
                    return Err(CodecError::Decode(
                        "enum member value must be a string or integer".into(),
                    ))
                }
            };
            Ok(Value::Enum {
                name: name.to_string(),
                value,
            })
        }
        other => Err(CodecError::Decode(format!("unknown value tag: {other}"))),
    }
}

fn require_data<'a>(obj: &'a Map<String, serde_json::Value>) -> Result<&'a serde_json::Value, CodecError> {
    obj.get("data")
        .ok_or_else(|| CodecError::Decode("value is missing its data field".into()))
}

fn parse_mime(obj: &Map<String, serde_json::Value>) -> Option<String> {
    obj.get("mime").and_then(|m| m.as_str()).map(str::to_string)
}

fn parse_shape(raw: &serde_json::Value) -> Result<Vec<usize>, CodecError> {
    raw.as_array()
        .ok_or_else(|| CodecError::Decode("tensor shape must be an array".into()))?
        .iter()
        .map(|d| {
            d.as_u64()
                .map(|d| d as usize)
                .ok_or_else(|| CodecError::Decode("tensor dimensions must be non-negative".into()))
        })
        .collect()
}

fn parse_hex(raw: Option<&serde_json::Value>) -> Result<Vec<u8>, CodecError> {
    let text = raw
        .and_then(|d| d.as_str())
        .ok_or_else(|| CodecError::Decode("binary data must be a hex string".into()))?;
    hex::decode(text).map_err(|e| CodecError::Decode(format!("invalid hex payload: {e}")))
}

fn parse_float(obj: &Map<String, serde_json::Value>) -> Result<f64, CodecError> {
    require_data(obj)?
        .as_f64()
        .ok_or_else(|| CodecError::Decode("float data must be a number".into()))
}

fn parse_int(obj: &Map<String, serde_json::Value>, dtype: Dtype) -> Result<Value, CodecError> {
    let data = require_data(obj)?;
    let wide = if let Some(v) = data.as_i64() {
        v as i128
    } else if let Some(v) = data.as_u64() {
        v as i128
    } else {
        return Err(CodecError::Decode("integer data must be a number".into()));
    };
    match crate::value::int_to(wide, dtype) {
        Some(result) => result,
        None => Err(CodecError::Decode(format!(
            "cannot decode integer as {dtype}"
        ))),
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        to_repr(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        from_repr(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Value) {
        let text = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(Value::Null);
        round_trip(Value::Bool(false));
        round_trip(Value::Int32(-42));
        round_trip(Value::UInt64(u64::MAX));
        round_trip(Value::Float32(0.25));
        round_trip(Value::Float64(std::f64::consts::PI));
        round_trip(Value::String("Hello, Peter!".into()));
    }

    #[test]
    fn tensors_carry_shape_and_hex_data() {
        let t = Tensor::from_i32(vec![2, 2], &[1, 2, 3, 4]).unwrap();
        let repr = to_repr(&Value::Tensor(t.clone()));
        assert_eq!(repr["type"], "int32");
        assert_eq!(repr["shape"], json!([2, 2]));
        round_trip(Value::Tensor(t));
    }

    #[test]
    fn records_keep_field_order() {
        let value = Value::record([("b", Value::Int32(2)), ("a", Value::Int32(1))]);
        let text = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        match back {
            Value::Record(fields) => {
                assert_eq!(fields[0].0, "b");
                assert_eq!(fields[1].0, "a");
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_fails_to_decode() {
        let raw = json!({ "type": "quaternion", "data": 1 });
        assert!(matches!(from_repr(&raw), Err(CodecError::Decode(_))));
    }

    #[test]
    fn scalar_int_widths_are_preserved() {
        let raw = json!({ "type": "int8", "data": 12 });
        assert_eq!(from_repr(&raw).unwrap(), Value::Int8(12));
        let raw = json!({ "type": "int8", "data": 4096 });
        assert!(matches!(from_repr(&raw), Err(CodecError::Decode(_))));
    }
}
