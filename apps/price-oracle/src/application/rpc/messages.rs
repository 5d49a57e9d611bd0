//! JSON-RPC Message Types
//!
//! Requests, responses, notifications and the typed params and results of
//! each method.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::aggregation::{Aggregate, PriceStatus};
use crate::domain::subscription::SubscriptionId;

use super::RpcError;

/// Protocol version carried by every outbound message.
pub const JSONRPC_VERSION: &str = "2.0";

// =============================================================================
// Methods
// =============================================================================

/// Methods served by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// List products and their price instruments.
    GetProductList,
    /// Subscribe to aggregate price updates.
    SubscribePrice,
    /// Subscribe to submission slot notifications.
    SubscribePriceSched,
    /// Submit a publisher quote.
    UpdatePrice,
}

impl Method {
    /// Resolve a method name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "get_product_list" => Some(Self::GetProductList),
            "subscribe_price" => Some(Self::SubscribePrice),
            "subscribe_price_sched" => Some(Self::SubscribePriceSched),
            "update_price" => Some(Self::UpdatePrice),
            _ => None,
        }
    }

    /// Wire name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetProductList => "get_product_list",
            Self::SubscribePrice => "subscribe_price",
            Self::SubscribePriceSched => "subscribe_price_sched",
            Self::UpdatePrice => "update_price",
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// A structurally valid request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Request id (JSON scalar or null).
    pub id: Value,
    /// Method name, not yet resolved.
    pub method: String,
    /// Raw params.
    pub params: Option<Value>,
}

/// Params of `subscribe_price` and `subscribe_price_sched`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscribeParams {
    /// Instrument account or symbol.
    pub account: String,
}

/// Params of `update_price`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdatePriceParams {
    /// Instrument account or symbol.
    pub account: String,
    /// Submitted price.
    pub price: i64,
    /// Submitted confidence, bounded so `price ± conf` stays signed.
    #[serde(deserialize_with = "bounded_conf")]
    pub conf: u64,
    /// Submitted status.
    pub status: PriceStatus,
}

fn bounded_conf<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let conf = u64::deserialize(deserializer)?;
    if conf > i64::MAX.unsigned_abs() {
        return Err(serde::de::Error::custom(format!(
            "confidence {conf} out of range"
        )));
    }
    Ok(conf)
}

/// Decode method params, which must be a JSON object.
///
/// # Errors
///
/// Returns `RpcError::InvalidParams` when params are absent, not an object,
/// or do not match `T`.
pub fn parse_params<T>(params: Option<&Value>) -> Result<T, RpcError>
where
    T: for<'de> Deserialize<'de>,
{
    match params {
        Some(value @ Value::Object(_)) => {
            T::deserialize(value).map_err(|_| RpcError::InvalidParams)
        }
        _ => Err(RpcError::InvalidParams),
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Error member of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

impl From<RpcError> for ErrorObject {
    fn from(error: RpcError) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

/// Response to a single request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    /// Echoed request id.
    pub id: Value,
}

impl Response {
    /// Successful response.
    #[must_use]
    pub const fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Error response.
    #[must_use]
    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: None,
            error: Some(error.into()),
            id,
        }
    }
}

/// Result of a successful subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubscribeResult {
    /// New subscription id.
    pub subscription: SubscriptionId,
}

/// Server-initiated message.
#[derive(Debug, Clone, Serialize)]
pub struct Notification<P> {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Notification method.
    pub method: &'static str,
    /// Notification params.
    pub params: P,
}

impl<P> Notification<P> {
    const fn new(method: &'static str, params: P) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// Params of `notify_price`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PriceNotifyParams<'a> {
    /// Target subscription.
    pub subscription: SubscriptionId,
    /// Current aggregate.
    pub result: &'a Aggregate,
}

/// Params of `notify_price_sched`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SchedNotifyParams {
    /// Target subscription.
    pub subscription: SubscriptionId,
}

/// Build a `notify_price` message.
#[must_use]
pub const fn notify_price(
    subscription: SubscriptionId,
    aggregate: &Aggregate,
) -> Notification<PriceNotifyParams<'_>> {
    Notification::new(
        "notify_price",
        PriceNotifyParams {
            subscription,
            result: aggregate,
        },
    )
}

/// Build a `notify_price_sched` message.
#[must_use]
pub const fn notify_price_sched(subscription: SubscriptionId) -> Notification<SchedNotifyParams> {
    Notification::new("notify_price_sched", SchedNotifyParams { subscription })
}

/// Product entry of a `get_product_list` result.
#[derive(Debug, Clone, Serialize)]
pub struct ProductEntry<'a> {
    /// Product account.
    pub account: &'a str,
    /// Reference attributes.
    pub attr_dict: &'a BTreeMap<String, String>,
    /// Price instruments of the product.
    pub price: Vec<PriceEntry<'a>>,
}

/// Price instrument entry of a `get_product_list` result.
#[derive(Debug, Clone, Serialize)]
pub struct PriceEntry<'a> {
    /// Instrument account.
    pub account: &'a str,
    /// Decimal exponent.
    pub price_exponent: i32,
    /// Declared price type.
    pub price_type: &'static str,
}
