//! Chain-data aggregation for the product traceability explorer: JSON-RPC
//! transport, typed node reads, product event decoding, backward pagination
//! and search classification.

pub mod aggregator;
pub mod api;
pub mod chain;
pub mod config;
pub mod models;
pub mod parser;
pub mod poller;
pub mod rpc;
pub mod search;

#[cfg(test)]
mod testing;
