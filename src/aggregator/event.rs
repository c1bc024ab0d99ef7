//! Decoding of raw payment-completion payloads.
//!
//! Two shapes are accepted:
//!
//! - the provider envelope, `{"data": {"payment": {...}}}`, where `amount_money.amount` is an
//!   integer count of minor units and `payment.id` is the provider's transaction id;
//! - a flat confirmation, `{"amount": 15, "name": ..., "message": ..., "externalId": ...}`, where
//!   `amount` is a decimal in major units (number or string).

use serde_json::{Map, Value};

use super::{IngestError, IngestResult};
use crate::db::prelude::Amount;

/// A decoded, validated payment event; names and messages are still raw at this point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipEvent {
    pub amount: Amount,
    pub contributor_name: Option<String>,
    pub message: Option<String>,
    pub external_id: Option<String>,
}

pub fn decode(raw: &[u8]) -> IngestResult<TipEvent> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| IngestError::MalformedEvent(format!("payload is not valid json: {e}")))?;

    let Value::Object(root) = value else {
        return Err(IngestError::MalformedEvent(
            "payload must be a json object".into(),
        ));
    };

    match root.get("data") {
        Some(data) => decode_envelope(data),
        None => decode_flat(&root),
    }
}

fn decode_envelope(data: &Value) -> IngestResult<TipEvent> {
    let payment = data
        .get("payment")
        .filter(|payment| payment.is_object())
        .ok_or_else(|| IngestError::MalformedEvent("missing 'data.payment' object".into()))?;

    // structural problems are reported before the amount, so a garbled payload is never
    // mistaken for a merely invalid one
    let contributor_name = optional_str(
        payment.get("customer").and_then(|c| c.get("given_name")),
        "customer.given_name",
    )?;
    let message = optional_str(payment.get("note"), "note")?;
    let external_id = optional_str(payment.get("id"), "id")?;

    let amount = minor_units(payment.get("amount_money").and_then(|m| m.get("amount")))?;

    Ok(TipEvent {
        amount: ensure_positive(amount)?,
        contributor_name,
        message,
        external_id,
    })
}

fn decode_flat(root: &Map<String, Value>) -> IngestResult<TipEvent> {
    let contributor_name = optional_str(root.get("name"), "name")?;
    let message = optional_str(root.get("message"), "message")?;
    let external_id = optional_str(root.get("externalId"), "externalId")?;

    let amount = major_units(root.get("amount"))?;

    Ok(TipEvent {
        amount: ensure_positive(amount)?,
        contributor_name,
        message,
        external_id,
    })
}

fn optional_str(value: Option<&Value>, field: &str) -> IngestResult<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(IngestError::MalformedEvent(format!(
            "'{field}' must be a string"
        ))),
    }
}

fn minor_units(value: Option<&Value>) -> IngestResult<Amount> {
    let parsed = match value {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };

    parsed
        .map(Amount::from_minor)
        .ok_or_else(|| unparsable(value))
}

fn major_units(value: Option<&Value>) -> IngestResult<Amount> {
    let parsed = match value {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Amount::parse_major(&n.to_string()),
        Some(Value::String(s)) => Amount::parse_major(s),
        Some(_) => None,
    };

    parsed.ok_or_else(|| unparsable(value))
}

fn unparsable(value: Option<&Value>) -> IngestError {
    match value {
        None | Some(Value::Null) => IngestError::InvalidAmount("amount is missing".into()),
        Some(v) => IngestError::InvalidAmount(format!("unparsable amount {v}")),
    }
}

fn ensure_positive(amount: Amount) -> IngestResult<Amount> {
    if amount.is_positive() {
        Ok(amount)
    } else {
        Err(IngestError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )))
    }
}
