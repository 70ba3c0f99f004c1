// src/chain.rs
//! Typed node reads. Each operation is one `Transport` call.
//!
//! The `try_*` methods keep the three outcomes apart (`Err` for transport
//! failures, `Ok(None)` when the node has nothing). The plain methods fold
//! both into an empty answer after logging, which is what display code wants.

use alloy::primitives::{Address, B256};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::models::{BlockRecord, EventLog, RawBlock, RawLog, RawTransaction, TransactionRecord};
use crate::rpc::{parse_quantity, to_quantity, RpcError, Transport};
use crate::search::BlockRef;

/// Block bound of a log query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Number(u64),
    Latest,
}

impl Serialize for BlockTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BlockTag::Number(n) => serializer.serialize_str(&to_quantity(*n)),
            BlockTag::Latest => serializer.serialize_str("latest"),
        }
    }
}

/// `eth_getLogs` filter object.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub from_block: BlockTag,
    pub to_block: BlockTag,
    pub address: Address,
    pub topics: Vec<B256>,
}

pub struct ChainReader<T> {
    transport: T,
}

impl<T: Transport> ChainReader<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Call `method` and deserialize a possibly-null result.
    async fn fetch<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<R>, RpcError> {
        let result = self.transport.call(method, params).await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(result)?))
    }

    pub async fn try_latest_block_number(&self) -> Result<u64, RpcError> {
        let hex: Option<String> = self.fetch("eth_blockNumber", json!([])).await?;
        let hex = hex.ok_or(RpcError::MissingResult)?;
        parse_quantity("block number", &hex)
    }

    pub async fn try_block_by_number(
        &self,
        number: u64,
        include_tx: bool,
    ) -> Result<Option<BlockRecord>, RpcError> {
        let raw: Option<RawBlock> = self
            .fetch("eth_getBlockByNumber", json!([to_quantity(number), include_tx]))
            .await?;
        raw.map(BlockRecord::try_from).transpose()
    }

    pub async fn try_block_by_hash(
        &self,
        hash: B256,
        include_tx: bool,
    ) -> Result<Option<BlockRecord>, RpcError> {
        let raw: Option<RawBlock> = self
            .fetch("eth_getBlockByHash", json!([hash, include_tx]))
            .await?;
        raw.map(BlockRecord::try_from).transpose()
    }

    pub async fn try_transaction_by_hash(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionRecord>, RpcError> {
        let raw: Option<RawTransaction> = self
            .fetch("eth_getTransactionByHash", json!([hash]))
            .await?;
        raw.map(TransactionRecord::try_from).transpose()
    }

    pub async fn try_get_logs(&self, filter: &LogFilter) -> Result<Vec<EventLog>, RpcError> {
        let raw: Option<Vec<RawLog>> = self.fetch("eth_getLogs", json!([filter])).await?;
        raw.unwrap_or_default()
            .into_iter()
            .map(EventLog::try_from)
            .collect()
    }

    /// Latest block number, `0` if the node cannot be reached.
    pub async fn latest_block_number(&self) -> u64 {
        self.try_latest_block_number().await.unwrap_or_else(|e| {
            warn!("eth_blockNumber failed: {}", e);
            0
        })
    }

    pub async fn block_by_number(&self, number: u64, include_tx: bool) -> Option<BlockRecord> {
        let res = self.try_block_by_number(number, include_tx).await;
        found_or_log(res, "block", &number)
    }

    pub async fn block_by_hash(&self, hash: B256, include_tx: bool) -> Option<BlockRecord> {
        let res = self.try_block_by_hash(hash, include_tx).await;
        found_or_log(res, "block", &hash)
    }

    /// Block by number or hash, without transaction bodies.
    pub async fn block(&self, block: BlockRef) -> Option<BlockRecord> {
        match block {
            BlockRef::Number(n) => self.block_by_number(n, false).await,
            BlockRef::Hash(hash) => self.block_by_hash(hash, false).await,
        }
    }

    pub async fn transaction_by_hash(&self, hash: B256) -> Option<TransactionRecord> {
        let res = self.try_transaction_by_hash(hash).await;
        found_or_log(res, "transaction", &hash)
    }

    /// Connected peers via `admin_peers`; `0` when the node does not expose it.
    pub async fn peer_count(&self) -> u64 {
        match self.fetch::<Vec<Value>>("admin_peers", json!([])).await {
            Ok(peers) => peers.map_or(0, |p| p.len() as u64),
            Err(e) if e.is_method_not_found() => {
                debug!("admin_peers not available on this node");
                0
            }
            Err(e) => {
                warn!("admin_peers failed: {}", e);
                0
            }
        }
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> Vec<EventLog> {
        self.try_get_logs(filter).await.unwrap_or_else(|e| {
            warn!(
                "eth_getLogs failed (address {}, {} topics): {}",
                filter.address,
                filter.topics.len(),
                e
            );
            Vec::new()
        })
    }
}

fn found_or_log<R>(
    res: Result<Option<R>, RpcError>,
    what: &str,
    key: &dyn std::fmt::Display,
) -> Option<R> {
    match res {
        Ok(Some(found)) => Some(found),
        Ok(None) => {
            debug!("{} {} not found", what, key);
            None
        }
        Err(e) => {
            warn!("fetching {} {} failed: {}", what, key, e);
            None
        }
    }
}
