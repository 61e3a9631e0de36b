//! ABI codec for filter output.
//!
//! A signature is the JSON description of one ABI parameter, as found in a
//! contract ABI (`{"type": "tuple", "components": [...]}`). Parsing a
//! signature and encoding a value against it fail in distinct ways, see
//! [`AbiError`].
//!
//! Encoding is `abi.encode(value)`: the same signature and value always give
//! the same bytes.

mod coerce;

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::Param;
use alloy_primitives::Bytes;
use serde_json::Value;
use thiserror::Error;

/// ABI failures, split by stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    /// The signature is not valid JSON or names an unknown type.
    #[error("invalid ABI signature: {0}")]
    Signature(String),

    /// The value does not fit the type.
    #[error("cannot encode value: {0}")]
    Encode(String),
}

/// A parsed signature.
#[derive(Debug, Clone)]
pub struct AbiSignature {
    param: Param,
    ty: DynSolType,
}

impl AbiSignature {
    /// Parse a JSON parameter description.
    ///
    /// # Errors
    ///
    /// Returns [`AbiError::Signature`] on malformed JSON or an unresolvable
    /// type.
    pub fn parse(signature: &str) -> Result<Self, AbiError> {
        let param: Param =
            serde_json::from_str(signature).map_err(|e| AbiError::Signature(e.to_string()))?;
        let ty = param
            .resolve()
            .map_err(|e| AbiError::Signature(e.to_string()))?;
        Ok(Self { param, ty })
    }

    /// Canonical type string, e.g. `(uint256,string)[]`.
    #[must_use]
    pub fn type_name(&self) -> String {
        self.ty.sol_type_name().into_owned()
    }

    /// Coerce `value` into this type without encoding it.
    ///
    /// # Errors
    ///
    /// Returns [`AbiError::Encode`] if the value does not fit.
    pub fn coerce(&self, value: &Value) -> Result<DynSolValue, AbiError> {
        coerce::coerce(&self.ty, &self.param.components, value)
            .map_err(|e| AbiError::Encode(e.to_string()))
    }

    /// ABI-encode `value` as a single parameter.
    ///
    /// # Errors
    ///
    /// Returns [`AbiError::Encode`] if the value does not fit.
    pub fn encode(&self, value: &Value) -> Result<Bytes, AbiError> {
        Ok(self.coerce(value)?.abi_encode().into())
    }
}

/// Parse `signature` and encode `value` against it.
///
/// # Errors
///
/// Returns [`AbiError::Signature`] or [`AbiError::Encode`].
pub fn encode(signature: &str, value: &Value) -> Result<Bytes, AbiError> {
    AbiSignature::parse(signature)?.encode(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use serde_json::json;

    const PRICE_SIGNATURE: &str = r#"{
        "components": [
            {"internalType": "string", "name": "symbol", "type": "string"},
            {"internalType": "uint256", "name": "price", "type": "uint256"},
            {"internalType": "int64", "name": "change", "type": "int64"}
        ],
        "internalType": "struct PriceData",
        "name": "priceData",
        "type": "tuple"
    }"#;

    fn word(n: u64) -> [u8; 32] {
        U256::from(n).to_be_bytes()
    }

    #[test]
    fn test_uint256() {
        let encoded = encode(r#"{"type":"uint256","name":"v"}"#, &json!(42)).unwrap();
        assert_eq!(encoded.as_ref(), &word(42));
    }

    #[test]
    fn test_string_layout() {
        let encoded = encode(r#"{"type":"string","name":"s"}"#, &json!("hi")).unwrap();
        assert_eq!(encoded.len(), 96);
        assert_eq!(&encoded[..32], &word(32));
        assert_eq!(&encoded[32..64], &word(2));
        assert_eq!(&encoded[64..66], b"hi");
    }

    #[test]
    fn test_tuple_from_object_or_array() {
        let by_name = encode(
            PRICE_SIGNATURE,
            &json!({"symbol": "BTC", "price": "68000000000", "change": -125}),
        )
        .unwrap();
        let by_position = encode(PRICE_SIGNATURE, &json!(["BTC", 68_000_000_000u64, "-125"])).unwrap();
        assert_eq!(by_name, by_position);
    }

    #[test]
    fn test_deterministic() {
        let value = json!({"symbol": "ETH", "price": 3500, "change": 12});
        let first = encode(PRICE_SIGNATURE, &value).unwrap();
        for _ in 0..10 {
            assert_eq!(encode(PRICE_SIGNATURE, &value).unwrap(), first);
        }
    }

    #[test]
    fn test_signature_errors_are_distinct() {
        assert!(matches!(
            encode("{not json", &json!(1)),
            Err(AbiError::Signature(_))
        ));
        assert!(matches!(
            encode(r#"{"type":"uint7","name":"v"}"#, &json!(1)),
            Err(AbiError::Signature(_))
        ));
        assert!(matches!(
            encode(r#"{"type":"banana","name":"v"}"#, &json!(1)),
            Err(AbiError::Signature(_))
        ));
    }

    #[test]
    fn test_shape_mismatch_is_encode_error() {
        assert!(matches!(
            encode(r#"{"type":"uint256[]","name":"v"}"#, &json!({"a": 1})),
            Err(AbiError::Encode(_))
        ));
        assert!(matches!(
            encode(r#"{"type":"uint8","name":"v"}"#, &json!(256)),
            Err(AbiError::Encode(_))
        ));
        assert!(matches!(
            encode(PRICE_SIGNATURE, &json!({"symbol": "BTC"})),
            Err(AbiError::Encode(_))
        ));
    }

    #[test]
    fn test_type_name() {
        let signature = AbiSignature::parse(PRICE_SIGNATURE).unwrap();
        assert_eq!(signature.type_name(), "(string,uint256,int64)");
    }
}
