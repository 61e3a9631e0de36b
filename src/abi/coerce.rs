//! JSON to ABI value coercion.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_json_abi::Param;
use alloy_primitives::{Address, B256, I256, U256};
use serde_json::{Number, Value};
use std::fmt;

/// Largest integer a JSON number may carry without loss.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A coercion failure and where in the value it happened.
#[derive(Debug)]
pub(super) struct CoerceError {
    path: String,
    reason: String,
}

impl CoerceError {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CoerceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "{}: {}", self.path, self.reason)
        }
    }
}

type Coerced = Result<DynSolValue, CoerceError>;

/// Coerce `value` into `ty`. `components` names the fields of `ty` (or of its
/// element type) when it is a tuple.
pub(super) fn coerce(ty: &DynSolType, components: &[Param], value: &Value) -> Coerced {
    coerce_at("", ty, components, value)
}

fn coerce_at(path: &str, ty: &DynSolType, components: &[Param], value: &Value) -> Coerced {
    match ty {
        DynSolType::Bool => match value {
            Value::Bool(b) => Ok(DynSolValue::Bool(*b)),
            _ => Err(CoerceError::new(path, "expected a boolean")),
        },
        DynSolType::Uint(bits) => {
            let (negative, magnitude) = integer(path, value)?;
            if negative && !magnitude.is_zero() {
                return Err(CoerceError::new(path, format!("negative value for uint{bits}")));
            }
            if *bits < 256 && magnitude >> *bits != U256::ZERO {
                return Err(CoerceError::new(path, format!("value out of range for uint{bits}")));
            }
            Ok(DynSolValue::Uint(magnitude, *bits))
        }
        DynSolType::Int(bits) => {
            let (negative, magnitude) = integer(path, value)?;
            let limit = U256::from(1u8) << (*bits - 1);
            let in_range = if negative {
                magnitude <= limit
            } else {
                magnitude < limit
            };
            if !in_range {
                return Err(CoerceError::new(path, format!("value out of range for int{bits}")));
            }
            let raw = I256::from_raw(magnitude);
            let signed = if negative { raw.wrapping_neg() } else { raw };
            Ok(DynSolValue::Int(signed, *bits))
        }
        DynSolType::Address => {
            let text = hex_string(path, value)?;
            let address = text
                .parse::<Address>()
                .map_err(|e| CoerceError::new(path, format!("invalid address: {e}")))?;
            Ok(DynSolValue::Address(address))
        }
        DynSolType::Bytes => Ok(DynSolValue::Bytes(hex_bytes(path, value)?)),
        DynSolType::FixedBytes(size) => {
            let bytes = hex_bytes(path, value)?;
            if bytes.len() != *size {
                return Err(CoerceError::new(
                    path,
                    format!("expected {size} bytes, got {}", bytes.len()),
                ));
            }
            let mut word = [0u8; 32];
            word[..*size].copy_from_slice(&bytes);
            Ok(DynSolValue::FixedBytes(B256::from(word), *size))
        }
        DynSolType::String => match value {
            Value::String(s) => Ok(DynSolValue::String(s.clone())),
            _ => Err(CoerceError::new(path, "expected a string")),
        },
        DynSolType::Array(inner) => {
            let items = array(path, value)?;
            let values = items
                .iter()
                .enumerate()
                .map(|(i, item)| coerce_at(&format!("{path}[{i}]"), inner, components, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DynSolValue::Array(values))
        }
        DynSolType::FixedArray(inner, len) => {
            let items = array(path, value)?;
            if items.len() != *len {
                return Err(CoerceError::new(
                    path,
                    format!("expected {len} elements, got {}", items.len()),
                ));
            }
            let values = items
                .iter()
                .enumerate()
                .map(|(i, item)| coerce_at(&format!("{path}[{i}]"), inner, components, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DynSolValue::FixedArray(values))
        }
        DynSolType::Tuple(types) => tuple(path, types, components, value),
        DynSolType::Function => Err(CoerceError::new(path, "function values are not supported")),
        #[allow(unreachable_patterns)]
        _ => Err(CoerceError::new(path, format!("unsupported type {}", ty.sol_type_name()))),
    }
}

fn tuple(path: &str, types: &[DynSolType], components: &[Param], value: &Value) -> Coerced {
    let values = match value {
        Value::Array(items) => {
            if items.len() != types.len() {
                return Err(CoerceError::new(
                    path,
                    format!("expected {} tuple fields, got {}", types.len(), items.len()),
                ));
            }
            types
                .iter()
                .zip(items)
                .enumerate()
                .map(|(i, (ty, item))| {
                    let field = field_path(path, components, i);
                    coerce_at(&field, ty, child_components(components, i), item)
                })
                .collect::<Result<Vec<_>, _>>()?
        }
        Value::Object(fields) => {
            if components.len() != types.len() {
                return Err(CoerceError::new(path, "tuple fields are unnamed"));
            }
            types
                .iter()
                .enumerate()
                .map(|(i, ty)| {
                    let name = components[i].name.as_str();
                    if name.is_empty() {
                        return Err(CoerceError::new(path, format!("tuple field {i} is unnamed")));
                    }
                    let field = field_path(path, components, i);
                    let item = fields
                        .get(name)
                        .ok_or_else(|| CoerceError::new(&field, "missing"))?;
                    coerce_at(&field, ty, child_components(components, i), item)
                })
                .collect::<Result<Vec<_>, _>>()?
        }
        _ => return Err(CoerceError::new(path, "expected an array or object for tuple")),
    };
    Ok(DynSolValue::Tuple(values))
}

fn field_path(path: &str, components: &[Param], i: usize) -> String {
    match components.get(i).map(|c| c.name.as_str()) {
        Some(name) if !name.is_empty() => join(path, name),
        _ => format!("{path}[{i}]"),
    }
}

fn child_components(components: &[Param], i: usize) -> &[Param] {
    components.get(i).map_or(&[], |c| c.components.as_slice())
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn array<'a>(path: &str, value: &'a Value) -> Result<&'a [Value], CoerceError> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(CoerceError::new(path, "expected an array")),
    }
}

/// Sign and magnitude of an integer given as a JSON number, a decimal string
/// or a `0x` hex string.
fn integer(path: &str, value: &Value) -> Result<(bool, U256), CoerceError> {
    match value {
        Value::Number(n) => number(path, n),
        Value::String(s) => {
            let s = s.trim();
            let (negative, digits) = match s.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, s),
            };
            let magnitude = if let Some(hex) = digits
                .strip_prefix("0x")
                .or_else(|| digits.strip_prefix("0X"))
            {
                U256::from_str_radix(hex, 16)
            } else if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                U256::from_str_radix(digits, 10)
            } else {
                return Err(CoerceError::new(path, format!("not an integer: {s:?}")));
            };
            magnitude
                .map(|m| (negative, m))
                .map_err(|_| CoerceError::new(path, "integer exceeds 256 bits"))
        }
        _ => Err(CoerceError::new(path, "expected an integer")),
    }
}

fn number(path: &str, n: &Number) -> Result<(bool, U256), CoerceError> {
    if let Some(u) = n.as_u64() {
        return Ok((false, U256::from(u)));
    }
    if let Some(i) = n.as_i64() {
        return Ok((i < 0, U256::from(i.unsigned_abs())));
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER => {
            // Exact: the magnitude is an integer below 2^53.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let magnitude = f.abs() as u64;
            Ok((f < 0.0, U256::from(magnitude)))
        }
        Some(f) if f.fract() == 0.0 => Err(CoerceError::new(
            path,
            "integer too large for a JSON number; pass it as a string",
        )),
        _ => Err(CoerceError::new(path, format!("not an integer: {n}"))),
    }
}

fn hex_string<'a>(path: &str, value: &'a Value) -> Result<&'a str, CoerceError> {
    match value {
        Value::String(s) if s.starts_with("0x") || s.starts_with("0X") => Ok(s),
        _ => Err(CoerceError::new(path, "expected a 0x-prefixed hex string")),
    }
}

fn hex_bytes(path: &str, value: &Value) -> Result<Vec<u8>, CoerceError> {
    let text = hex_string(path, value)?;
    hex::decode(&text[2..]).map_err(|e| CoerceError::new(path, format!("invalid hex: {e}")))
}
