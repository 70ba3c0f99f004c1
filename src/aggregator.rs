// src/aggregator.rs
use std::collections::{BTreeMap, HashSet};

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use futures_util::future;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info};

use crate::chain::{BlockTag, ChainReader, LogFilter};
use crate::models::{BlockRecord, EventLog, ProductEvent, TransactionRecord};
use crate::parser::{self, product_topic};
use crate::rpc::Transport;

/// Where product events live: one contract, one event signature, and the
/// first block worth searching.
#[derive(Debug, Clone)]
pub struct EventSource {
    pub contract: Address,
    pub event_topic: B256,
    pub from_block: u64,
}

impl EventSource {
    fn filter(&self, topics: Vec<B256>) -> LogFilter {
        LogFilter {
            from_block: BlockTag::Number(self.from_block),
            to_block: BlockTag::Latest,
            address: self.contract,
            topics,
        }
    }
}

// ---------------------------
// Block list
// ---------------------------

/// Blocks walked backward from the head, newest first, unique by hash.
///
/// A load borrows the list mutably for its whole duration and only merges
/// once every fetch is done, so dropping a load future part way leaves the
/// list as it was and issues no further calls.
#[derive(Debug)]
pub struct BlockList {
    blocks: Vec<BlockRecord>,
    seen: HashSet<B256>,
    next_block: i64,
    page_size: usize,
    concurrency: usize,
}

impl BlockList {
    pub fn starting_at(next_block: i64, page_size: usize, concurrency: usize) -> Self {
        Self {
            blocks: Vec::new(),
            seen: HashSet::new(),
            next_block,
            page_size,
            concurrency: concurrency.max(1),
        }
    }

    /// Start at the chain head and load the first page.
    pub async fn open<T: Transport>(
        reader: &ChainReader<T>,
        page_size: usize,
        concurrency: usize,
    ) -> Self {
        let head = reader.latest_block_number().await;
        let mut list = Self::starting_at(head as i64, page_size, concurrency);
        list.load_more(reader).await;
        list
    }

    /// Next page, continuing below the oldest block held.
    pub async fn load_more<T: Transport>(&mut self, reader: &ChainReader<T>) -> usize {
        let from = self.next_block;
        self.load_range(reader, from, self.page_size).await
    }

    /// Fetch `count` consecutive blocks descending from `from` and merge them.
    /// Numbers below zero are never requested. Returns how many new blocks
    /// were added.
    pub async fn load_range<T: Transport>(
        &mut self,
        reader: &ChainReader<T>,
        from: i64,
        count: usize,
    ) -> usize {
        let numbers: Vec<u64> = (0..count as i64)
            .map(|i| from - i)
            .take_while(|n| *n >= 0)
            .map(|n| n as u64)
            .collect();

        let fetched: Vec<BlockRecord> = stream::iter(numbers)
            .map(|n| reader.block_by_number(n, false))
            .buffered(self.concurrency)
            .filter_map(future::ready)
            .collect()
            .await;

        let mut added = 0;
        for block in fetched {
            if self.merge(block) {
                added += 1;
            }
        }

        // Nothing held yet: stay put so a failed first page is retried.
        self.next_block = match self.blocks.last() {
            Some(oldest) => oldest.number as i64 - 1,
            None => from,
        };
        debug!(
            "block list: +{} (total {}, next {})",
            added,
            self.blocks.len(),
            self.next_block
        );
        added
    }

    fn merge(&mut self, block: BlockRecord) -> bool {
        if !self.seen.insert(block.hash) {
            return false;
        }
        let at = self.blocks.partition_point(|b| b.number > block.number);
        self.blocks.insert(at, block);
        true
    }

    pub fn blocks(&self) -> &[BlockRecord] {
        &self.blocks
    }

    pub fn next_block(&self) -> i64 {
        self.next_block
    }

    pub fn has_more(&self) -> bool {
        self.next_block >= 0
    }
}

// ---------------------------
// Transaction list
// ---------------------------

/// Transactions gathered by walking blocks backward, unique by hash.
///
/// The cursor is a block number plus a position inside that block. Every
/// hash at or past the position is attempted once; one the node cannot
/// return is passed over rather than retried.
#[derive(Debug)]
pub struct TransactionList {
    transactions: Vec<TransactionRecord>,
    seen: HashSet<B256>,
    next_block: i64,
    next_tx_index: usize,
    has_more: bool,
    page_size: usize,
    concurrency: usize,
}

impl TransactionList {
    pub fn starting_at(next_block: i64, page_size: usize, concurrency: usize) -> Self {
        Self::resume_at(next_block, 0, page_size, concurrency)
    }

    /// Continue from `tx_index` inside block `next_block`, as returned by an
    /// earlier page.
    pub fn resume_at(
        next_block: i64,
        tx_index: usize,
        page_size: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            transactions: Vec::new(),
            seen: HashSet::new(),
            next_block,
            next_tx_index: tx_index,
            has_more: next_block > 0,
            page_size,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn open<T: Transport>(
        reader: &ChainReader<T>,
        page_size: usize,
        concurrency: usize,
    ) -> Self {
        let head = reader.latest_block_number().await;
        let mut list = Self::starting_at(head as i64, page_size, concurrency);
        list.load_more(reader).await;
        list
    }

    pub async fn load_more<T: Transport>(&mut self, reader: &ChainReader<T>) -> usize {
        self.load(reader, self.page_size).await
    }

    /// Collect up to `count` transactions not already held. A block whose
    /// transactions were only partly taken is continued by the next call.
    pub async fn load<T: Transport>(&mut self, reader: &ChainReader<T>, count: usize) -> usize {
        let mut collected: Vec<TransactionRecord> = Vec::new();
        let mut taken: HashSet<B256> = HashSet::new();
        let mut number = self.next_block;
        let mut index = self.next_tx_index;

        while collected.len() < count && number > 0 {
            let Some(block) = reader.block_by_number(number as u64, false).await else {
                number -= 1;
                index = 0;
                continue;
            };

            let start = index.min(block.transactions.len());
            let wanted = count - collected.len();
            let end = (start + wanted).min(block.transactions.len());
            let batch: Vec<B256> = block.transactions[start..end]
                .iter()
                .filter(|h| !self.seen.contains(*h) && !taken.contains(*h))
                .copied()
                .collect();

            let txs: Vec<TransactionRecord> = stream::iter(batch)
                .map(|hash| reader.transaction_by_hash(hash))
                .buffered(self.concurrency)
                .filter_map(future::ready)
                .collect()
                .await;

            for tx in txs {
                if !self.seen.contains(&tx.hash) && taken.insert(tx.hash) {
                    collected.push(tx.with_timestamp(block.timestamp));
                }
            }

            if end == block.transactions.len() {
                number -= 1;
                index = 0;
            } else {
                index = end;
            }
        }

        self.next_block = number;
        self.next_tx_index = index;
        if number <= 0 {
            self.has_more = false;
        }

        let added = collected.len();
        self.seen.extend(taken);
        self.transactions.extend(collected);
        debug!(
            "transaction list: +{} (total {}, next block {} from tx {})",
            added,
            self.transactions.len(),
            self.next_block,
            self.next_tx_index
        );
        added
    }

    pub fn transactions(&self) -> &[TransactionRecord] {
        &self.transactions
    }

    pub fn next_block(&self) -> i64 {
        self.next_block
    }

    /// Position inside `next_block` where the next load starts.
    pub fn next_tx_index(&self) -> usize {
        self.next_tx_index
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }
}

// ---------------------------
// Product events
// ---------------------------

/// Decode logs, dropping undecodable ones and the reserved id 0.
pub fn decode_logs(logs: &[EventLog]) -> Vec<ProductEvent> {
    logs.iter()
        .filter_map(|log| match parser::decode_event(log) {
            Ok(event) if event.id != 0 => Some(event),
            Ok(_) => None,
            Err(e) => {
                debug!("skipping log in tx {}: {}", log.transaction_hash, e);
                None
            }
        })
        .collect()
}

/// Keep the highest-block event per id; on equal blocks the later one wins.
pub fn latest_by_id(events: impl IntoIterator<Item = ProductEvent>) -> BTreeMap<u64, ProductEvent> {
    let mut latest: BTreeMap<u64, ProductEvent> = BTreeMap::new();
    for event in events {
        if event.id == 0 {
            continue;
        }
        match latest.get(&event.id) {
            Some(held) if held.block_number > event.block_number => {}
            _ => {
                latest.insert(event.id, event);
            }
        }
    }
    latest
}

/// Current position of every tracked product, ordered by id.
pub async fn latest_per_product<T: Transport>(
    reader: &ChainReader<T>,
    source: &EventSource,
) -> Vec<ProductEvent> {
    let logs = reader.get_logs(&source.filter(vec![source.event_topic])).await;
    let events = decode_logs(&logs);
    let latest = latest_by_id(events);
    info!("snapshot: {} logs → {} products", logs.len(), latest.len());
    latest.into_values().collect()
}

/// Full history of one product, oldest first.
pub async fn events_for_product<T: Transport>(
    reader: &ChainReader<T>,
    source: &EventSource,
    id: u64,
) -> Vec<ProductEvent> {
    if id == 0 {
        return Vec::new();
    }
    let topics = vec![source.event_topic, product_topic(id)];
    let logs = reader.get_logs(&source.filter(topics)).await;
    let mut events = decode_logs(&logs);
    events.sort_by_key(|e| e.block_number);
    events
}

/// Summary figures over a product's track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetrics {
    pub events: usize,
    pub average_speed: f64,
    pub average_satellites: f64,
}

impl TrackMetrics {
    pub fn from_events(events: &[ProductEvent]) -> Self {
        let n = events.len();
        let mean = |sum: f64| if n == 0 { 0.0 } else { sum / n as f64 };
        TrackMetrics {
            events: n,
            average_speed: mean(events.iter().map(|e| e.speed).sum()),
            average_satellites: mean(events.iter().map(|e| f64::from(e.satellites)).sum()),
        }
    }
}

// ---------------------------
// Dashboard
// ---------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub latest_block: u64,
    pub tx_count: usize,
    pub timestamp: u64,
    pub block_time: Option<DateTime<Utc>>,
    pub peers: u64,
    pub tracked_products: usize,
}

/// Head-of-chain counters. `None` when the head block cannot be read.
pub async fn dashboard_stats<T: Transport>(
    reader: &ChainReader<T>,
    source: &EventSource,
) -> Option<DashboardStats> {
    let latest = match reader.try_latest_block_number().await {
        Ok(n) => n,
        Err(e) => {
            debug!("dashboard: no head block: {}", e);
            return None;
        }
    };
    let block = reader.block_by_number(latest, true).await?;

    let all_events = source.filter(vec![source.event_topic]);
    let (peers, logs) = tokio::join!(reader.peer_count(), reader.get_logs(&all_events));

    let tracked_products = logs
        .iter()
        .filter_map(|log| parser::product_id(log).ok())
        .filter(|id| *id != 0)
        .collect::<HashSet<_>>()
        .len();

    Some(DashboardStats {
        latest_block: block.number,
        tx_count: block.transactions.len(),
        timestamp: block.timestamp,
        block_time: DateTime::from_timestamp(block.timestamp as i64, 0),
        peers,
        tracked_products,
    })
}
