// src/models.rs
use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::rpc::{parse_hex_with, parse_quantity, RpcError};

// ---------- wire records (hex quantities, as the node returns them) ----------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub hash: B256,
    pub number: String,
    pub timestamp: String,
    pub gas_used: String,
    pub gas_limit: String,
    #[serde(default)]
    pub base_fee_per_gas: Option<String>,
    #[serde(default)]
    pub extra_data: Bytes,
    #[serde(default)]
    pub transactions: Vec<RawBlockTransaction>,
}

/// `transactions` holds hashes or full objects depending on `includeTx`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawBlockTransaction {
    Hash(B256),
    Full { hash: B256 },
}

impl RawBlockTransaction {
    fn hash(&self) -> B256 {
        match self {
            RawBlockTransaction::Hash(hash) | RawBlockTransaction::Full { hash } => *hash,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub hash: B256,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    pub value: String,
    pub gas: String,
    #[serde(default)]
    pub gas_price: Option<String>,
    pub nonce: String,
    #[serde(default)]
    pub input: Bytes,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub transaction_index: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    #[serde(default)]
    pub address: Option<Address>,
    pub topics: Vec<B256>,
    pub data: String,
    pub block_number: String,
    pub transaction_hash: B256,
    #[serde(default)]
    pub log_index: Option<String>,
}

// ---------- native records ----------

/// A confirmed block. Never changes once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub hash: B256,
    pub number: u64,
    pub timestamp: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub base_fee_per_gas: Option<u64>,
    pub extra_data: Bytes,
    pub transactions: Vec<B256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: B256,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: U256,
    pub gas: u64,
    pub gas_price: Option<u128>,
    pub nonce: u64,
    pub input: Bytes,
    pub block_number: Option<u64>,
    pub transaction_index: Option<u64>,
    /// Attached by whoever also holds the containing block.
    pub timestamp: Option<u64>,
}

impl TransactionRecord {
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLog {
    pub address: Option<Address>,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: Option<u64>,
    /// topics[0] is the event signature, topics[1] the product id.
    pub topics: Vec<B256>,
    /// Hex payload, decoded by `parser::decode_event`.
    pub data: String,
}

/// One decoded telemetry reading for a tracked product.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductEvent {
    pub id: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub satellites: u32,
    pub tx_hash: B256,
    pub block_number: u64,
}

// ---------- boundary conversions ----------

impl TryFrom<RawBlock> for BlockRecord {
    type Error = RpcError;

    fn try_from(raw: RawBlock) -> Result<Self, Self::Error> {
        Ok(BlockRecord {
            hash: raw.hash,
            number: parse_quantity("block number", &raw.number)?,
            timestamp: parse_quantity("timestamp", &raw.timestamp)?,
            gas_used: parse_quantity("gasUsed", &raw.gas_used)?,
            gas_limit: parse_quantity("gasLimit", &raw.gas_limit)?,
            base_fee_per_gas: raw
                .base_fee_per_gas
                .as_deref()
                .map(|fee| parse_quantity("baseFeePerGas", fee))
                .transpose()?,
            extra_data: raw.extra_data,
            transactions: raw.transactions.iter().map(RawBlockTransaction::hash).collect(),
        })
    }
}

impl TryFrom<RawTransaction> for TransactionRecord {
    type Error = RpcError;

    fn try_from(raw: RawTransaction) -> Result<Self, Self::Error> {
        Ok(TransactionRecord {
            hash: raw.hash,
            from: raw.from,
            to: raw.to,
            value: parse_hex_with("value", &raw.value, |d| U256::from_str_radix(d, 16))?,
            gas: parse_quantity("gas", &raw.gas)?,
            gas_price: raw
                .gas_price
                .as_deref()
                .map(|price| {
                    parse_hex_with("gasPrice", price, |d| u128::from_str_radix(d, 16))
                })
                .transpose()?,
            nonce: parse_quantity("nonce", &raw.nonce)?,
            input: raw.input,
            block_number: raw
                .block_number
                .as_deref()
                .map(|n| parse_quantity("block number", n))
                .transpose()?,
            transaction_index: raw
                .transaction_index
                .as_deref()
                .map(|i| parse_quantity("transactionIndex", i))
                .transpose()?,
            timestamp: None,
        })
    }
}

impl TryFrom<RawLog> for EventLog {
    type Error = RpcError;

    fn try_from(raw: RawLog) -> Result<Self, Self::Error> {
        Ok(EventLog {
            address: raw.address,
            block_number: parse_quantity("block number", &raw.block_number)?,
            transaction_hash: raw.transaction_hash,
            log_index: raw
                .log_index
                .as_deref()
                .map(|i| parse_quantity("logIndex", i))
                .transpose()?,
            topics: raw.topics,
            data: raw.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn block_quantities_become_integers() {
        let raw: RawBlock = serde_json::from_value(json!({
            "hash": format!("0x{}", "ab".repeat(32)),
            "number": "0x14",
            "timestamp": "0x65f0a1b2",
            "gasUsed": "0x5208",
            "gasLimit": "0x1c9c380",
            "baseFeePerGas": "0x7",
            "extraData": "0xd883",
            "transactions": [format!("0x{}", "01".repeat(32))],
        }))
        .unwrap();

        let block = BlockRecord::try_from(raw).unwrap();
        assert_eq!(block.number, 20);
        assert_eq!(block.timestamp, 0x65f0a1b2);
        assert_eq!(block.gas_used, 21_000);
        assert_eq!(block.gas_limit, 30_000_000);
        assert_eq!(block.base_fee_per_gas, Some(7));
        assert_eq!(block.extra_data.len(), 2);
        assert_eq!(block.transactions, vec![B256::repeat_byte(0x01)]);
    }

    #[test]
    fn full_transaction_objects_collapse_to_hashes() {
        let raw: RawBlock = serde_json::from_value(json!({
            "hash": format!("0x{}", "ab".repeat(32)),
            "number": "0x1",
            "timestamp": "0x0",
            "gasUsed": "0x0",
            "gasLimit": "0x0",
            "transactions": [{ "hash": format!("0x{}", "02".repeat(32)), "nonce": "0x0" }],
        }))
        .unwrap();

        let block = BlockRecord::try_from(raw).unwrap();
        assert_eq!(block.transactions, vec![B256::repeat_byte(0x02)]);
        assert_eq!(block.base_fee_per_gas, None);
    }

    #[test]
    fn contract_creation_has_no_recipient() {
        let raw: RawTransaction = serde_json::from_value(json!({
            "hash": format!("0x{}", "03".repeat(32)),
            "from": "0x062c4b86dca6ed53457cf75f4699651b64cd6478",
            "to": null,
            "value": "0xde0b6b3a7640000",
            "gas": "0x5208",
            "gasPrice": "0x3b9aca00",
            "nonce": "0x2",
            "input": "0x6080",
            "blockNumber": "0xa",
            "transactionIndex": "0x0",
        }))
        .unwrap();

        let tx = TransactionRecord::try_from(raw).unwrap();
        assert_eq!(tx.to, None);
        assert_eq!(tx.value, U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(tx.gas_price, Some(1_000_000_000));
        assert_eq!(tx.nonce, 2);
        assert_eq!(tx.block_number, Some(10));
        assert_eq!(tx.timestamp, None);
        assert_eq!(tx.with_timestamp(99).timestamp, Some(99));
    }

    #[test]
    fn malformed_quantity_is_rejected() {
        let raw: RawLog = serde_json::from_value(json!({
            "topics": [],
            "data": "0x",
            "blockNumber": "0xnope",
            "transactionHash": format!("0x{}", "04".repeat(32)),
        }))
        .unwrap();

        assert!(matches!(
            EventLog::try_from(raw),
            Err(RpcError::Malformed { what: "block number", .. })
        ));
    }
}
