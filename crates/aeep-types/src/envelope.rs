//! The envelope wire format and its typed message payloads.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::canonicalize_value;
use crate::did::Did;
use crate::error::CanonicalizationError;
use crate::timestamp::Timestamp;

/// The enumerated kinds of envelope this protocol carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "x811/request")]
    Request,
    #[serde(rename = "x811/offer")]
    Offer,
    #[serde(rename = "x811/accept")]
    Accept,
    #[serde(rename = "x811/reject")]
    Reject,
    #[serde(rename = "x811/result")]
    Result,
    #[serde(rename = "x811/verify")]
    Verify,
    #[serde(rename = "x811/payment")]
    Payment,
    #[serde(rename = "x811/payment-failed")]
    PaymentFailed,
    #[serde(rename = "x811/heartbeat")]
    Heartbeat,
}

impl MessageType {
    /// Whether this message type drives the negotiation state machine, as
    /// opposed to being routed only (e.g. a heartbeat).
    pub fn is_negotiation_message(self) -> bool {
        !matches!(self, MessageType::Heartbeat)
    }
}

/// The signed unit of communication exchanged between agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: String,
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub from: Did,
    pub to: Did,
    pub created: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<Timestamp>,
    pub payload: Value,
    pub nonce: String,
    pub signature: String,
}

impl Envelope {
    /// The canonical JSON of every field except `signature` — the exact
    /// byte string that is signed and later re-derived for verification.
    pub fn signing_input(&self) -> Result<String, CanonicalizationError> {
        let mut value = serde_json::to_value(self).expect("Envelope always serializes");
        if let Value::Object(ref mut map) = value {
            map.remove("signature");
        }
        canonicalize_value(value)
    }
}

/// `x811/request` payload: initiator proposes a priced task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPayload {
    pub task_type: String,
    pub parameters: Value,
    pub max_budget: Decimal,
    pub currency: String,
    pub deadline: u64,
    pub acceptance_policy: AcceptancePolicy,
    pub idempotency_key: String,
}

/// Initiator-declared rule governing how offers are accepted off-server.
/// The server stores it but does not enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptancePolicy {
    Auto,
    HumanApproval,
    Threshold,
}

/// `x811/offer` payload: provider prices the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferPayload {
    pub request_id: String,
    pub price: Decimal,
    pub protocol_fee: Decimal,
    pub total_cost: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `x811/accept` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptPayload {
    pub offer_id: String,
    pub offer_hash: String,
}

/// `x811/reject` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectPayload {
    pub offer_id: String,
    pub reason_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `x811/result` payload: provider delivers the outcome of the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    pub request_id: String,
    pub result_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// `x811/verify` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPayload {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_hash: Option<String>,
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispute_code: Option<String>,
}

/// `x811/payment` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentPayload {
    pub request_id: String,
    pub tx_hash: String,
    pub amount: Decimal,
}

/// `x811/payment-failed` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedPayload {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `x811/heartbeat` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub availability: Availability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// Availability state an agent self-reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Online,
    Busy,
    Offline,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_wire_names() {
        let s = serde_json::to_string(&MessageType::PaymentFailed).unwrap();
        assert_eq!(s, "\"x811/payment-failed\"");
        let parsed: MessageType = serde_json::from_str(&s).unwrap();
        assert_eq!(parsed, MessageType::PaymentFailed);
    }

    #[test]
    fn heartbeat_is_not_a_negotiation_message() {
        assert!(!MessageType::Heartbeat.is_negotiation_message());
        assert!(MessageType::Request.is_negotiation_message());
    }
}
