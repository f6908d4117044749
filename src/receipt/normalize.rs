//! Receipt normalization
//!
//! Nodes return receipts with hex-encoded quantities and hashes of varying
//! case and padding. `normalize` rewrites a raw receipt into canonical form:
//! quantities become integers, hashes and addresses become lowercase,
//! zero-padded fixed-length hex. Fields it does not know are left alone, and
//! normalizing a normalized receipt changes nothing.

use crate::error::{SchedulerError, SchedulerResult};

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Integer quantities
const NUMERIC_FIELDS: &[&str] = &[
    "blockNumber",
    "transactionIndex",
    "logIndex",
    "cumulativeGasUsed",
    "gasUsed",
    "status",
    "type",
    "effectiveGasPrice",
    "l1FeeScalar",
    "l1GasUsed",
    "l1GasPrice",
    "l1Fee",
];

/// 32-byte hashes
const HASH_FIELDS: &[&str] = &["blockHash", "transactionHash"];

/// 20-byte addresses
const ADDRESS_FIELDS: &[&str] = &["to", "from", "contractAddress", "address"];

/// Variable-length byte strings
const BYTES_FIELDS: &[&str] = &["logsBloom", "data"];

/// Lists of 32-byte values
const HASH_LIST_FIELDS: &[&str] = &["topics"];

/// Rewrite a raw receipt (or any JSON value nested in one) into canonical form
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| (key.clone(), normalize_field(key, v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

fn normalize_field(key: &str, value: &Value) -> Value {
    match value {
        Value::String(s) if NUMERIC_FIELDS.contains(&key) => normalize_quantity(s),
        Value::String(s) if HASH_FIELDS.contains(&key) => normalize_fixed(s, 32),
        Value::String(s) if ADDRESS_FIELDS.contains(&key) => normalize_fixed(s, 20),
        Value::String(s) if BYTES_FIELDS.contains(&key) => normalize_bytes(s),
        Value::Array(items) if HASH_LIST_FIELDS.contains(&key) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => normalize_fixed(s, 32),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => normalize(other),
    }
}

/// Hex quantity to integer. Values beyond u64 become decimal strings.
fn normalize_quantity(s: &str) -> Value {
    let Some(digits) = strip_hex_prefix(s) else {
        return Value::String(s.to_string());
    };
    if digits.is_empty() {
        return Value::from(0u64);
    }

    match U256::from_str_radix(digits, 16) {
        Ok(n) if n <= U256::from(u64::MAX) => Value::from(n.as_u64()),
        Ok(n) => Value::String(n.to_string()),
        Err(_) => Value::String(s.to_string()),
    }
}

/// Lowercase, left-padded hex of exactly `len` bytes
fn normalize_fixed(s: &str, len: usize) -> Value {
    let Some(digits) = strip_hex_prefix(s) else {
        return Value::String(s.to_string());
    };
    if digits.len() > len * 2 || hex::decode(pad_even(digits)).is_err() {
        return Value::String(s.to_string());
    }

    Value::String(format!(
        "0x{:0>width$}",
        digits.to_ascii_lowercase(),
        width = len * 2
    ))
}

fn normalize_bytes(s: &str) -> Value {
    match strip_hex_prefix(s) {
        Some(digits) if hex::decode(digits).is_ok() => {
            Value::String(format!("0x{}", digits.to_ascii_lowercase()))
        }
        _ => Value::String(s.to_string()),
    }
}

fn strip_hex_prefix(s: &str) -> Option<&str> {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
}

fn pad_even(digits: &str) -> String {
    if digits.len() % 2 == 1 {
        format!("0{}", digits)
    } else {
        digits.to_string()
    }
}

/// A log entry of a normalized receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptLog {
    pub address: Address,
    pub topics: Vec<H256>,
    #[serde(default)]
    pub data: Bytes,
    /// Fields this crate does not interpret (log index, block hash, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A normalized transaction receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: H256,
    #[serde(default)]
    pub block_hash: Option<H256>,
    pub block_number: u64,
    pub gas_used: u64,
    pub status: u64,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub logs: Vec<ReceiptLog>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Receipt {
    /// Normalize a raw node reply and read it into a typed receipt
    pub fn from_raw(raw: &Value) -> SchedulerResult<Self> {
        serde_json::from_value(normalize(raw))
            .map_err(|e| SchedulerError::Decode(format!("Invalid receipt: {}", e)))
    }

    pub fn is_success(&self) -> bool {
        self.status == 1
    }

    /// Canonical JSON form; feeding it back through `normalize` is a no-op
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_receipt() -> Value {
        json!({
            "transactionHash": "0xABCDEF0000000000000000000000000000000000000000000000000000000001",
            "blockHash": "0x1",
            "blockNumber": "0x1b4",
            "gasUsed": "0x5208",
            "cumulativeGasUsed": "0xa410",
            "effectiveGasPrice": "0x3b9aca00",
            "status": "0x1",
            "type": "0x2",
            "from": "0xF39FD6E51AAD88F6F4CE6AB8827279CFFFB92266",
            "to": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "contractAddress": null,
            "logsBloom": "0x00FF",
            "l2ExtraField": "0xdeadbeef",
            "logs": [{
                "address": "0x5FbDB2315678afecb367f032d93F642f64180aa3",
                "topics": [
                    "0xDDF252AD1BE2C89B69C2B068FC378DAA952BA7F163C4A11628F55A4DF523B3EF",
                    "0x0f39fd6e51aad88f6f4ce6ab8827279cfffb92266"
                ],
                "data": "0x00000000000000000000000000000000000000000000000000000000000003E8",
                "logIndex": "0x0",
                "removed": false
            }]
        })
    }

    #[test]
    fn test_normalize_decodes_quantities() {
        let normalized = normalize(&raw_receipt());
        assert_eq!(normalized["blockNumber"], json!(436));
        assert_eq!(normalized["gasUsed"], json!(21000));
        assert_eq!(normalized["status"], json!(1));
        assert_eq!(normalized["logs"][0]["logIndex"], json!(0));
    }

    #[test]
    fn test_normalize_pads_hashes_and_topics() {
        let normalized = normalize(&raw_receipt());
        assert_eq!(
            normalized["blockHash"],
            json!("0x0000000000000000000000000000000000000000000000000000000000000001")
        );
        assert_eq!(
            normalized["logs"][0]["topics"][1],
            json!("0x000000000000000000000000f39fd6e51aad88f6f4ce6ab8827279cfffb92266")
        );
        assert_eq!(
            normalized["from"],
            json!("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266")
        );
    }

    #[test]
    fn test_normalize_passes_unknown_fields_through() {
        let normalized = normalize(&raw_receipt());
        assert_eq!(normalized["l2ExtraField"], json!("0xdeadbeef"));
        assert_eq!(normalized["logs"][0]["removed"], json!(false));
        assert_eq!(normalized["contractAddress"], Value::Null);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize(&raw_receipt());
        let twice = normalize(&once);
        assert_eq!(once, twice);

        let receipt = Receipt::from_raw(&raw_receipt()).unwrap();
        assert_eq!(normalize(&receipt.to_value()), receipt.to_value());
        assert_eq!(Receipt::from_raw(&receipt.to_value()).unwrap(), receipt);
    }

    #[test]
    fn test_oversized_quantity_becomes_decimal_string() {
        let value = json!({ "l1Fee": "0x1ffffffffffffffffff" });
        let normalized = normalize(&value);
        assert_eq!(normalized["l1Fee"], json!("9444732965739290427391"));
        assert_eq!(normalize(&normalized), normalized);
    }

    #[test]
    fn test_typed_receipt_view() {
        let receipt = Receipt::from_raw(&raw_receipt()).unwrap();
        assert_eq!(receipt.block_number, 436);
        assert_eq!(receipt.gas_used, 21000);
        assert!(receipt.is_success());
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(receipt.logs[0].topics.len(), 2);
        assert_eq!(receipt.logs[0].data.len(), 32);
        assert_eq!(receipt.extra["l2ExtraField"], json!("0xdeadbeef"));
        assert_eq!(receipt.extra["cumulativeGasUsed"], json!(42000));
    }
}
