//! In-memory node used by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::parser::product_topic;
use crate::rpc::{parse_quantity, to_quantity, RpcError, Transport};

pub const CONTRACT: Address = Address::repeat_byte(0xc0);
pub const TOPIC0: B256 = B256::repeat_byte(0xe5);

pub fn block_hash(number: u64) -> B256 {
    let mut bytes = [0xb0u8; 32];
    bytes[24..].copy_from_slice(&number.to_be_bytes());
    B256::from(bytes)
}

pub fn tx_hash(block: u64, index: u64) -> B256 {
    let mut bytes = [0x7au8; 32];
    bytes[16..24].copy_from_slice(&block.to_be_bytes());
    bytes[24..].copy_from_slice(&index.to_be_bytes());
    B256::from(bytes)
}

/// Text payload as the contract stores it: ABI offset and length words,
/// then the bytes null-padded to 32.
pub fn payload(text: &str) -> String {
    let mut bytes = vec![0u8; 64];
    bytes[31] = 0x20;
    bytes[63] = text.len() as u8;
    bytes.extend_from_slice(text.as_bytes());
    bytes.resize(64 + text.len().div_ceil(32) * 32, 0);
    format!("0x{}", hex::encode(bytes))
}

struct Log {
    id_topic: B256,
    block_number: u64,
    tx_hash: B256,
    data: String,
}

#[derive(Default)]
struct State {
    head: u64,
    txs_per_block: HashMap<u64, u64>,
    logs: Vec<Log>,
    peers: Option<u64>,
    hidden_txs: HashSet<B256>,
    calls: HashMap<String, usize>,
}

/// A chain of blocks `0..=head`, block `n` at timestamp `1_700_000_000 + n`.
#[derive(Clone, Default)]
pub struct SimNode {
    state: Arc<Mutex<State>>,
    offline: Arc<AtomicBool>,
}

impl SimNode {
    /// Blocks `0..=head`; genesis is empty, every other block has `txs` transactions.
    pub fn with_blocks(head: u64, txs: u64) -> Self {
        let node = SimNode::default();
        {
            let mut state = node.state.lock().unwrap();
            state.head = head;
            for n in 1..=head {
                state.txs_per_block.insert(n, txs);
            }
        }
        node
    }

    pub fn set_block_txs(&self, number: u64, txs: u64) {
        self.state.lock().unwrap().txs_per_block.insert(number, txs);
    }

    /// Answer `null` for this transaction while still listing it in its block.
    pub fn hide_tx(&self, hash: B256) {
        self.state.lock().unwrap().hidden_txs.insert(hash);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_peers(&self, peers: Option<u64>) {
        self.state.lock().unwrap().peers = peers;
    }

    /// Emit a product event log. Logs are served in block order.
    pub fn push_event(&self, id_topic: B256, block_number: u64, data: String) {
        let mut state = self.state.lock().unwrap();
        let index = state.logs.len() as u64;
        state.logs.push(Log {
            id_topic,
            block_number,
            tx_hash: tx_hash(block_number, 1000 + index),
            data,
        });
        state.logs.sort_by_key(|l| l.block_number);
    }

    pub fn push_reading(&self, id: u64, block_number: u64, text: &str) {
        self.push_event(product_topic(id), block_number, payload(text));
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    fn block_json(state: &State, number: u64, include_tx: bool) -> Value {
        if number > state.head {
            return Value::Null;
        }
        let count = state.txs_per_block.get(&number).copied().unwrap_or(0);
        let transactions: Vec<Value> = (0..count)
            .map(|i| {
                if include_tx {
                    Self::tx_json(number, i)
                } else {
                    json!(tx_hash(number, i))
                }
            })
            .collect();
        json!({
            "hash": block_hash(number),
            "number": to_quantity(number),
            "timestamp": to_quantity(1_700_000_000 + number),
            "gasUsed": to_quantity(21_000 * count),
            "gasLimit": "0x1c9c380",
            "baseFeePerGas": "0x7",
            "extraData": "0x",
            "transactions": transactions,
        })
    }

    fn tx_json(block: u64, index: u64) -> Value {
        json!({
            "hash": tx_hash(block, index),
            "from": Address::repeat_byte(0x0f),
            "to": Address::repeat_byte(0x1f),
            "value": "0x1",
            "gas": "0x5208",
            "gasPrice": "0x3b9aca00",
            "nonce": to_quantity(index),
            "input": "0x",
            "blockNumber": to_quantity(block),
            "transactionIndex": to_quantity(index),
        })
    }

    fn find_tx(state: &State, hash: B256) -> Value {
        if state.hidden_txs.contains(&hash) {
            return Value::Null;
        }
        for (&block, &count) in &state.txs_per_block {
            for i in 0..count {
                if tx_hash(block, i) == hash && block <= state.head {
                    return Self::tx_json(block, i);
                }
            }
        }
        Value::Null
    }

    fn logs_json(state: &State, filter: &Value) -> Result<Value, RpcError> {
        let bound = |key: &str, default: u64| -> Result<u64, RpcError> {
            match filter[key].as_str() {
                Some("latest") | None => Ok(default),
                Some(hex) => parse_quantity("block", hex),
            }
        };
        let from = bound("fromBlock", 0)?;
        let to = bound("toBlock", state.head)?;
        let address: Address = serde_json::from_value(filter["address"].clone())?;
        let topics: Vec<B256> = serde_json::from_value(filter["topics"].clone())?;

        let logs: Vec<Value> = state
            .logs
            .iter()
            .filter(|_| address == CONTRACT && topics.first() == Some(&TOPIC0))
            .filter(|l| topics.get(1).map_or(true, |t| *t == l.id_topic))
            .filter(|l| (from..=to).contains(&l.block_number))
            .map(|l| {
                json!({
                    "address": CONTRACT,
                    "topics": [TOPIC0, l.id_topic],
                    "data": l.data,
                    "blockNumber": to_quantity(l.block_number),
                    "transactionHash": l.tx_hash,
                    "logIndex": "0x0",
                })
            })
            .collect();
        Ok(Value::Array(logs))
    }
}

#[async_trait]
impl Transport for SimNode {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(method.to_string()).or_default() += 1;

        if self.offline.load(Ordering::SeqCst) {
            return Err(RpcError::MissingResult);
        }

        match method {
            "eth_blockNumber" => Ok(json!(to_quantity(state.head))),
            "eth_getBlockByNumber" => {
                let number = parse_quantity("block", params[0].as_str().unwrap_or_default())?;
                let include_tx = params[1].as_bool().unwrap_or(false);
                Ok(Self::block_json(&state, number, include_tx))
            }
            "eth_getBlockByHash" => {
                let hash: B256 = serde_json::from_value(params[0].clone())?;
                let include_tx = params[1].as_bool().unwrap_or(false);
                let found = (0..=state.head).find(|&n| block_hash(n) == hash);
                Ok(found.map_or(Value::Null, |n| Self::block_json(&state, n, include_tx)))
            }
            "eth_getTransactionByHash" => {
                let hash: B256 = serde_json::from_value(params[0].clone())?;
                Ok(Self::find_tx(&state, hash))
            }
            "eth_getLogs" => Self::logs_json(&state, &params[0]),
            "admin_peers" => match state.peers {
                Some(n) => Ok(Value::Array((0..n).map(|i| json!({ "id": i })).collect())),
                None => Err(RpcError::Rpc {
                    code: -32601,
                    message: "the method admin_peers does not exist".to_string(),
                }),
            },
            other => Err(RpcError::Rpc {
                code: -32601,
                message: format!("the method {other} does not exist"),
            }),
        }
    }
}
