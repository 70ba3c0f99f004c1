use alloy::primitives::{Address, B256};
use dotenvy::dotenv;
use eyre::{Result, WrapErr};
use std::{env, str::FromStr, time::Duration};
use tracing::info;

use crate::aggregator::EventSource;

pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";
pub const DEFAULT_CONTRACT: &str = "0x062C4B86dcA6Ed53457cf75F4699651B64CD6478";
/// keccak256("indexed_id_product_event(int256,string)")
pub const DEFAULT_EVENT_TOPIC: &str =
    "0xe5c2cc523913383a6000dbdbb392ecfc2ae01abccbf5c88cefd2eb575a3769cc";
pub const DEFAULT_FROM_BLOCK: u64 = 9;

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_http_url: String,
    pub contract_address: Address,
    pub event_topic: B256,
    pub from_block: u64,
    pub port: u16,
    pub page_size: usize,
    pub fetch_concurrency: usize,
    pub snapshot_interval: Duration,
    pub stats_interval: Duration,
    pub poll_timeout: Duration,
}

impl Config {
    pub fn event_source(&self) -> EventSource {
        EventSource {
            contract: self.contract_address,
            event_topic: self.event_topic,
            from_block: self.from_block,
        }
    }
}

pub fn load() -> Result<Config> {
    dotenv().ok(); // .env is optional

    let cfg = from_lookup(|key| env::var(key).ok())?;
    info!("Loaded config: {:?}", cfg);
    Ok(cfg)
}

/// Build a config from any key → value source.
pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Config> {
    // RPC_URL is accepted as an alias
    let rpc_http_url = get("RPC_HTTP_URL")
        .or_else(|| get("RPC_URL"))
        .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());

    let contract_address = parse_or(&get, "CONTRACT_ADDRESS", DEFAULT_CONTRACT)?;
    let event_topic = parse_or(&get, "EVENT_TOPIC", DEFAULT_EVENT_TOPIC)?;

    let number = |key: &str, default: u64| -> u64 {
        get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    };

    Ok(Config {
        rpc_http_url,
        contract_address,
        event_topic,
        from_block: number("FROM_BLOCK", DEFAULT_FROM_BLOCK),
        port: u16::try_from(number("PORT", 8080)).unwrap_or(8080),
        page_size: number("PAGE_SIZE", 10).max(1) as usize,
        fetch_concurrency: number("FETCH_CONCURRENCY", 8).max(1) as usize,
        snapshot_interval: Duration::from_secs(number("SNAPSHOT_INTERVAL_SECS", 15).max(1)),
        stats_interval: Duration::from_secs(number("STATS_INTERVAL_SECS", 60).max(1)),
        poll_timeout: Duration::from_secs(number("POLL_TIMEOUT_SECS", 10).max(1)),
    })
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = get(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .wrap_err_with(|| format!("invalid {}: {:?}", key, raw))
}
