//! JSON-RPC 2.0 Codec
//!
//! Turns raw text payloads into requests and applies the structural checks
//! in priority order:
//!
//! 1. Payload parses as JSON, else `ParseError`.
//! 2. Top level is an object or a non-empty array, else `InvalidRequest`.
//! 3. Each element is an object with a scalar or null `id` and a string
//!    `method`, else `InvalidRequest`.
//!
//! Method resolution, params and business checks happen in the dispatcher.

pub mod messages;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::aggregation::SubmitError;
use crate::domain::instrument::RegistryError;

pub use messages::{Method, Request, Response};

// =============================================================================
// Errors
// =============================================================================

/// Protocol-level error reported to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum RpcError {
    /// Payload is not valid JSON.
    #[error("parse error")]
    ParseError,
    /// Payload is not a valid request.
    #[error("invalid request")]
    InvalidRequest,
    /// Method is not served.
    #[error("method not found")]
    MethodNotFound,
    /// Params do not match the method.
    #[error("invalid params")]
    InvalidParams,
    /// Instrument reference does not resolve.
    #[error("unknown symbol")]
    UnknownSymbol,
    /// Session may not publish to the instrument.
    #[error("missing publish permission")]
    MissingPermission,
    /// Publishing is unavailable.
    #[error("not ready to publish")]
    NotReady,
}

impl RpcError {
    /// Wire error code.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::UnknownSymbol => -32000,
            Self::MissingPermission => -32001,
            Self::NotReady => -32002,
        }
    }
}

impl From<SubmitError> for RpcError {
    fn from(error: SubmitError) -> Self {
        match error {
            SubmitError::UnknownInstrument(_) => Self::UnknownSymbol,
            SubmitError::Unauthorized { .. } => Self::MissingPermission,
            SubmitError::InvalidParams(_) => Self::InvalidParams,
        }
    }
}

impl From<RegistryError> for RpcError {
    fn from(_: RegistryError) -> Self {
        Self::UnknownSymbol
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// One element of a payload after structural validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Well-formed request.
    Call(Request),
    /// Element rejected before dispatch.
    Invalid {
        /// Id to echo (null when it could not be determined).
        id: Value,
        /// Rejection reason.
        error: RpcError,
    },
}

/// A decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A single request object.
    Single(Envelope),
    /// A non-empty batch, in input order.
    Batch(Vec<Envelope>),
}

/// Decode a text payload.
///
/// # Errors
///
/// Returns `ParseError` for invalid JSON and `InvalidRequest` for a
/// top-level scalar or an empty array. These are answered with a single
/// error object whose id is null.
pub fn decode(text: &str) -> Result<Payload, RpcError> {
    let value: Value = serde_json::from_str(text).map_err(|_| RpcError::ParseError)?;

    match value {
        Value::Object(map) => Ok(Payload::Single(envelope(map))),
        Value::Array(items) if items.is_empty() => Err(RpcError::InvalidRequest),
        Value::Array(items) => Ok(Payload::Batch(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => envelope(map),
                    _ => Envelope::Invalid {
                        id: Value::Null,
                        error: RpcError::InvalidRequest,
                    },
                })
                .collect(),
        )),
        _ => Err(RpcError::InvalidRequest),
    }
}

fn envelope(mut map: Map<String, Value>) -> Envelope {
    let id = match map.remove("id") {
        Some(id @ (Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_))) => id,
        _ => {
            return Envelope::Invalid {
                id: Value::Null,
                error: RpcError::InvalidRequest,
            };
        }
    };

    let Some(Value::String(method)) = map.remove("method") else {
        return Envelope::Invalid {
            id,
            error: RpcError::InvalidRequest,
        };
    };

    Envelope::Call(Request {
        id,
        method,
        params: map.remove("params"),
    })
}

// =============================================================================
// Encoding
// =============================================================================

/// Serialize an outbound message.
///
/// # Errors
///
/// Returns `CodecError::Encode` if serialization fails.
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(CodecError::Encode)
}

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Outbound message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    #[test_case("{", RpcError::ParseError ; "truncated object")]
    #[test_case("not json", RpcError::ParseError ; "garbage")]
    #[test_case("", RpcError::ParseError ; "empty payload")]
    #[test_case("[]", RpcError::InvalidRequest ; "empty batch")]
    #[test_case("42", RpcError::InvalidRequest ; "number")]
    #[test_case("\"hello\"", RpcError::InvalidRequest ; "string")]
    #[test_case("null", RpcError::InvalidRequest ; "null")]
    fn top_level_rejections(payload: &str, expected: RpcError) {
        assert_eq!(decode(payload), Err(expected));
    }

    #[test_case(RpcError::ParseError, -32700 ; "parse")]
    #[test_case(RpcError::InvalidRequest, -32600 ; "invalid request")]
    #[test_case(RpcError::MethodNotFound, -32601 ; "method not found")]
    #[test_case(RpcError::InvalidParams, -32602 ; "invalid params")]
    #[test_case(RpcError::UnknownSymbol, -32000 ; "unknown symbol")]
    #[test_case(RpcError::MissingPermission, -32001 ; "missing permission")]
    #[test_case(RpcError::NotReady, -32002 ; "not ready")]
    fn error_codes(error: RpcError, code: i64) {
        assert_eq!(error.code(), code);
    }

    #[test]
    fn single_request() {
        let payload = decode(r#"{"jsonrpc":"2.0","id":1,"method":"get_product_list"}"#).unwrap();
        assert_eq!(
            payload,
            Payload::Single(Envelope::Call(Request {
                id: json!(1),
                method: "get_product_list".to_string(),
                params: None,
            }))
        );
    }

    #[test]
    fn null_and_string_ids_are_valid() {
        for id in [json!(null), json!("abc"), json!(true), json!(1.5)] {
            let text = json!({"id": id, "method": "m"}).to_string();
            assert!(matches!(
                decode(&text).unwrap(),
                Payload::Single(Envelope::Call(Request { id: ref got, .. })) if *got == id
            ));
        }
    }

    #[test]
    fn missing_id_is_invalid() {
        assert_eq!(
            decode(r#"{"method":"get_product_list"}"#).unwrap(),
            Payload::Single(Envelope::Invalid {
                id: Value::Null,
                error: RpcError::InvalidRequest
            })
        );
    }

    #[test]
    fn structured_id_is_invalid_with_null_id() {
        for text in [
            r#"{"id":{"a":1},"method":"m"}"#,
            r#"{"id":[1],"method":"m"}"#,
        ] {
            assert_eq!(
                decode(text).unwrap(),
                Payload::Single(Envelope::Invalid {
                    id: Value::Null,
                    error: RpcError::InvalidRequest
                })
            );
        }
    }

    #[test]
    fn non_string_method_echoes_id() {
        for text in [r#"{"id":7,"method":5}"#, r#"{"id":7}"#] {
            assert_eq!(
                decode(text).unwrap(),
                Payload::Single(Envelope::Invalid {
                    id: json!(7),
                    error: RpcError::InvalidRequest
                })
            );
        }
    }

    #[test]
    fn batch_preserves_order_and_flags_non_objects() {
        let payload = decode(r#"[{"id":1,"method":"a"}, 5, {"id":2,"method":"b"}]"#).unwrap();
        let Payload::Batch(items) = payload else {
            panic!("expected batch");
        };
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], Envelope::Call(r) if r.method == "a"));
        assert_eq!(
            items[1],
            Envelope::Invalid {
                id: Value::Null,
                error: RpcError::InvalidRequest
            }
        );
        assert!(matches!(&items[2], Envelope::Call(r) if r.method == "b"));
    }

    #[test]
    fn submit_errors_map_to_codes() {
        assert_eq!(
            RpcError::from(SubmitError::UnknownInstrument("x".into())).code(),
            -32000
        );
        assert_eq!(
            RpcError::from(SubmitError::Unauthorized {
                account: "x".into(),
                publisher: None
            })
            .code(),
            -32001
        );
        assert_eq!(
            RpcError::from(SubmitError::InvalidParams("x".into())).code(),
            -32602
        );
        assert_eq!(
            RpcError::from(RegistryError::NotFound("x".into())),
            RpcError::UnknownSymbol
        );
    }

    #[test]
    fn encode_response() {
        let text = encode(&Response::success(json!(1), json!(0))).unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","result":0,"id":1}"#);
    }
}
