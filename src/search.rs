// src/search.rs
use std::fmt;
use std::str::FromStr;

use alloy::primitives::B256;
use serde::Serialize;
use tracing::debug;

use crate::chain::ChainReader;
use crate::rpc::Transport;

const HASH_LEN: usize = 66;
const PRODUCT_PREFIX: &str = "prod-";
const PRODUCT_LABEL_WIDTH: usize = 3;

/// What free-text search input looks like, before any lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// 66-character `0x` string: a transaction hash, or failing that a block hash.
    Hash(String),
    Product(ProductRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRef {
    pub id: u64,
    /// Zero-padded id, e.g. `007`.
    pub label: String,
}

impl ProductRef {
    fn from_digits(digits: &str) -> Option<Self> {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let id = digits.parse().ok()?;
        Some(ProductRef {
            id,
            label: format!("{:0>width$}", digits, width = PRODUCT_LABEL_WIDTH),
        })
    }
}

impl fmt::Display for ProductRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PROD-{}", self.label)
    }
}

/// Where a search lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "lowercase")]
pub enum Route {
    Transaction { hash: B256 },
    Block { hash: B256 },
    Product(ProductRef),
}

/// Classify trimmed input. Shapes are tried in order: hash, `prod-<n>`, bare number.
pub fn classify(input: &str) -> Option<SearchQuery> {
    let term = input.trim();

    if term.starts_with("0x") && term.len() == HASH_LEN {
        return Some(SearchQuery::Hash(term.to_string()));
    }

    let lowered = term.to_ascii_lowercase();
    if lowered.starts_with(PRODUCT_PREFIX) {
        let (_, rest) = term.split_once('-')?;
        let digits = if rest.is_empty() { "0" } else { rest };
        return ProductRef::from_digits(digits).map(SearchQuery::Product);
    }

    ProductRef::from_digits(term).map(SearchQuery::Product)
}

/// Classify `input` and, for hashes, ask the node which kind it is.
pub async fn resolve<T: Transport>(reader: &ChainReader<T>, input: &str) -> Option<Route> {
    match classify(input)? {
        SearchQuery::Product(product) => Some(Route::Product(product)),
        SearchQuery::Hash(raw) => {
            let hash = match B256::from_str(&raw) {
                Ok(hash) => hash,
                Err(e) => {
                    debug!("search term {} is not a hash: {}", raw, e);
                    return None;
                }
            };
            if reader.transaction_by_hash(hash).await.is_some() {
                return Some(Route::Transaction { hash });
            }
            if reader.block_by_hash(hash, false).await.is_some() {
                return Some(Route::Block { hash });
            }
            None
        }
    }
}

/// A block addressed by number or by hash, as found in a URL path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Number(u64),
    Hash(B256),
}

impl FromStr for BlockRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("0x") {
            B256::from_str(s)
                .map(BlockRef::Hash)
                .map_err(|e| format!("invalid block hash {s:?}: {e}"))
        } else {
            s.parse()
                .map(BlockRef::Number)
                .map_err(|e| format!("invalid block number {s:?}: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{block_hash, tx_hash, SimNode};

    fn product(id: u64, label: &str) -> Option<SearchQuery> {
        Some(SearchQuery::Product(ProductRef {
            id,
            label: label.to_string(),
        }))
    }

    #[test]
    fn product_shapes() {
        assert_eq!(classify("PROD-7"), product(7, "007"));
        assert_eq!(classify("  prod-12 "), product(12, "012"));
        assert_eq!(classify("Prod-1234"), product(1234, "1234"));
        assert_eq!(classify("42"), product(42, "042"));
        assert_eq!(classify("0"), product(0, "000"));
        assert_eq!(classify("prod-"), product(0, "000"));
    }

    #[test]
    fn inert_inputs() {
        assert_eq!(classify("prod"), None);
        assert_eq!(classify(""), None);
        assert_eq!(classify("   "), None);
        assert_eq!(classify("-3"), None);
        assert_eq!(classify("4.5"), None);
        assert_eq!(classify("prod-x"), None);
        assert_eq!(classify("0x1234"), None);
    }

    #[test]
    fn hash_shape_is_length_checked() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert_eq!(classify(&hash), Some(SearchQuery::Hash(hash.clone())));
        assert_eq!(classify(&format!("{hash}0")), None);
    }

    #[test]
    fn product_label_display() {
        let Some(SearchQuery::Product(p)) = classify("9") else {
            panic!("expected product");
        };
        assert_eq!(p.to_string(), "PROD-009");
    }

    #[tokio::test]
    async fn transaction_hash_routes_to_transaction() {
        let node = SimNode::with_blocks(5, 1);
        let reader = ChainReader::new(node.clone());
        let hash = tx_hash(3, 0);

        let route = resolve(&reader, &hash.to_string()).await;
        assert_eq!(route, Some(Route::Transaction { hash }));
        assert_eq!(node.calls("eth_getBlockByHash"), 0);
    }

    #[tokio::test]
    async fn block_hash_routes_to_block_after_tx_miss() {
        let node = SimNode::with_blocks(5, 1);
        let reader = ChainReader::new(node.clone());
        let hash = block_hash(4);

        let route = resolve(&reader, &hash.to_string()).await;
        assert_eq!(route, Some(Route::Block { hash }));
        assert_eq!(node.calls("eth_getTransactionByHash"), 1);
    }

    #[tokio::test]
    async fn unknown_or_malformed_hash_matches_nothing() {
        let reader = ChainReader::new(SimNode::with_blocks(5, 1));

        let unknown = B256::repeat_byte(0x99).to_string();
        assert_eq!(resolve(&reader, &unknown).await, None);

        let not_hex = format!("0x{}", "zz".repeat(32));
        assert_eq!(resolve(&reader, &not_hex).await, None);
    }

    #[tokio::test]
    async fn product_route_needs_no_lookup() {
        let node = SimNode::with_blocks(1, 0);
        let reader = ChainReader::new(node.clone());

        let route = resolve(&reader, "PROD-7").await;
        assert_eq!(
            route,
            Some(Route::Product(ProductRef {
                id: 7,
                label: "007".to_string()
            }))
        );
        assert_eq!(node.calls("eth_getTransactionByHash"), 0);
    }

    #[test]
    fn block_refs_parse() {
        assert_eq!("15".parse::<BlockRef>(), Ok(BlockRef::Number(15)));
        let hash = block_hash(2);
        assert_eq!(hash.to_string().parse::<BlockRef>(), Ok(BlockRef::Hash(hash)));
        assert!("0x12".parse::<BlockRef>().is_err());
        assert!("latest".parse::<BlockRef>().is_err());
    }

    #[tokio::test]
    async fn block_lookup_by_ref() {
        let reader = ChainReader::new(SimNode::with_blocks(5, 0));
        let by_number = reader.block(BlockRef::Number(2)).await.unwrap();
        let by_hash = reader.block(BlockRef::Hash(block_hash(2))).await.unwrap();
        assert_eq!(by_number, by_hash);
    }
}
