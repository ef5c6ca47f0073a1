//! Input validation against a predictor signature.
//!
//! Validation happens before a dispatch target is chosen, so a bad request
//! never downloads resources or reaches an adapter.

use predikit_core::schemas::{Parameter, Signature};
use predikit_core::value::{CodecError, EnumValue, Value};

use crate::error::DispatchError;

/// Check caller inputs against the signature and return them in signature
/// order, with coercions and defaults applied.
pub fn validate_inputs(
    signature: &Signature,
    inputs: &[(String, Value)],
) -> Result<Vec<(String, Value)>, DispatchError> {
    for (index, (name, _)) in inputs.iter().enumerate() {
        if !signature.inputs.iter().any(|p| &p.name == name) {
            return Err(DispatchError::InvalidInput(format!("unknown input: {name}")));
        }
        if inputs[..index].iter().any(|(prior, _)| prior == name) {
            return Err(DispatchError::InvalidInput(format!(
                "duplicate input: {name}"
            )));
        }
    }

    let mut validated = Vec::with_capacity(signature.inputs.len());
    for param in &signature.inputs {
        let provided = inputs
            .iter()
            .find(|(name, _)| name == &param.name)
            .map(|(_, value)| value);
        let value = match provided {
            Some(value) => check_value(param, value)?,
            None => match &param.default_value {
                Some(default) => default.clone(),
                None if param.optional => continue,
                None => {
                    return Err(DispatchError::InvalidInput(format!(
                        "missing required input: {}",
                        param.name
                    )))
                }
            },
        };
        validated.push((param.name.clone(), value));
    }
    Ok(validated)
}

fn check_value(param: &Parameter, value: &Value) -> Result<Value, DispatchError> {
    if param.optional && *value == Value::Null {
        return Ok(Value::Null);
    }
    if let Some(members) = &param.enumeration {
        return check_enumeration(param, members, value);
    }
    let coerced = match param.dtype {
        Some(dtype) => value.coerce(dtype).map_err(|e| invalid(param, &e))?,
        None => value.clone(),
    };
    if let Some([min, max]) = param.range {
        if let Some(v) = numeric(&coerced) {
            if v < min || v > max {
                return Err(DispatchError::InvalidInput(format!(
                    "input {} is out of range: {v} not in [{min}, {max}]",
                    param.name
                )));
            }
        }
    }
    Ok(coerced)
}

/// Match against an enumeration, by member value or by member name.
fn check_enumeration(
    param: &Parameter,
    members: &[predikit_core::schemas::EnumerationMember],
    value: &Value,
) -> Result<Value, DispatchError> {
    for member in members {
        let matches = match (&member.value, value) {
            (EnumValue::Str(expected), Value::String(actual)) => expected == actual,
            (EnumValue::Int(expected), actual) => actual
                .coerce(predikit_core::value::Dtype::Int64)
                .map(|v| v == Value::Int64(*expected))
                .unwrap_or(false),
            _ => false,
        };
        let named = matches!(value, Value::String(s) if s == &member.name);
        if matches || named {
            return Ok(match &member.value {
                EnumValue::Str(s) => Value::String(s.clone()),
                EnumValue::Int(v) => Value::Int64(*v),
            });
        }
    }
    let allowed: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
    Err(DispatchError::InvalidInput(format!(
        "input {} is not a member of [{}]",
        param.name,
        allowed.join(", ")
    )))
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int8(v) => Some(*v as f64),
        Value::Int16(v) => Some(*v as f64),
        Value::Int32(v) => Some(*v as f64),
        Value::Int64(v) => Some(*v as f64),
        Value::UInt8(v) => Some(*v as f64),
        Value::UInt16(v) => Some(*v as f64),
        Value::UInt32(v) => Some(*v as f64),
        Value::UInt64(v) => Some(*v as f64),
        Value::Float32(v) => Some(*v as f64),
        Value::Float64(v) => Some(*v),
        _ => None,
    }
}

fn invalid(param: &Parameter, cause: &CodecError) -> DispatchError {
    DispatchError::InvalidInput(format!("input {}: {cause}", param.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use predikit_core::schemas::EnumerationMember;
    use predikit_core::value::Dtype;

    fn greeting_signature() -> Signature {
        Signature {
            inputs: vec![Parameter::new("name").with_dtype(Dtype::String)],
            outputs: vec![Parameter::new("greeting").with_dtype(Dtype::String)],
        }
    }

    fn named(name: &str, value: Value) -> (String, Value) {
        (name.to_string(), value)
    }

    #[test]
    fn valid_inputs_pass_through() {
        let inputs = vec![named("name", Value::String("Peter".into()))];
        let validated = validate_inputs(&greeting_signature(), &inputs).unwrap();
        assert_eq!(validated, inputs);
    }

    #[test]
    fn unknown_input_is_rejected() {
        let inputs = vec![named("nom", Value::String("Peter".into()))];
        let err = validate_inputs(&greeting_signature(), &inputs).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidInput(m) if m.contains("nom")));
    }

    #[test]
    fn missing_required_input_is_rejected() {
        let err = validate_inputs(&greeting_signature(), &[]).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidInput(m) if m.contains("name")));
    }

    #[test]
    fn duplicate_input_is_rejected() {
        let inputs = vec![
            named("name", Value::String("a".into())),
            named("name", Value::String("b".into())),
        ];
        let err = validate_inputs(&greeting_signature(), &inputs).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidInput(m) if m.contains("duplicate")));
    }

    #[test]
    fn values_are_coerced_to_the_declared_dtype() {
        let signature = Signature {
            inputs: vec![Parameter::new("count").with_dtype(Dtype::Int32)],
            outputs: vec![],
        };
        let validated =
            validate_inputs(&signature, &[named("count", Value::Int64(7))]).unwrap();
        assert_eq!(validated, vec![named("count", Value::Int32(7))]);

        let err =
            validate_inputs(&signature, &[named("count", Value::String("x".into()))]).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidInput(_)));
    }

    #[test]
    fn defaults_fill_absent_inputs() {
        let mut param = Parameter::new("scale").with_dtype(Dtype::Float32).optional();
        param.default_value = Some(Value::Float32(1.0));
        let signature = Signature {
            inputs: vec![param],
            outputs: vec![],
        };
        let validated = validate_inputs(&signature, &[]).unwrap();
        assert_eq!(validated, vec![named("scale", Value::Float32(1.0))]);
    }

    #[test]
    fn absent_optional_without_default_is_skipped() {
        let signature = Signature {
            inputs: vec![Parameter::new("hint").with_dtype(Dtype::String).optional()],
            outputs: vec![],
        };
        assert!(validate_inputs(&signature, &[]).unwrap().is_empty());
    }

    #[test]
    fn enumeration_matches_by_value_or_name() {
        let mut param = Parameter::new("size");
        param.enumeration = Some(vec![
            EnumerationMember {
                name: "Small".into(),
                value: EnumValue::Int(512),
            },
            EnumerationMember {
                name: "Large".into(),
                value: EnumValue::Int(2048),
            },
        ]);
        let signature = Signature {
            inputs: vec![param],
            outputs: vec![],
        };

        let by_value = validate_inputs(&signature, &[named("size", Value::Int32(512))]).unwrap();
        assert_eq!(by_value, vec![named("size", Value::Int64(512))]);

        let by_name =
            validate_inputs(&signature, &[named("size", Value::String("Large".into()))]).unwrap();
        assert_eq!(by_name, vec![named("size", Value::Int64(2048))]);

        let err = validate_inputs(&signature, &[named("size", Value::Int32(99))]).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidInput(m) if m.contains("Small")));
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let mut param = Parameter::new("temperature").with_dtype(Dtype::Float32);
        param.range = Some([0.0, 2.0]);
        let signature = Signature {
            inputs: vec![param],
            outputs: vec![],
        };
        assert!(validate_inputs(&signature, &[named("temperature", Value::Float32(2.0))]).is_ok());
        let err = validate_inputs(&signature, &[named("temperature", Value::Float32(2.5))])
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidInput(m) if m.contains("range")));
    }
}
