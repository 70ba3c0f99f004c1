use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::aggregator::{
    self, BlockList, DashboardStats, EventSource, TrackMetrics, TransactionList,
};
use crate::chain::ChainReader;
use crate::models::{BlockRecord, ProductEvent, TransactionRecord};
use crate::parser::{input_preview, InputPreview};
use crate::poller::{Snapshot, SnapshotSlot};
use crate::rpc::Transport;
use crate::search::{self, BlockRef, Route};

pub struct AppState<T> {
    pub reader: Arc<ChainReader<T>>,
    pub source: EventSource,
    pub page_size: usize,
    pub fetch_concurrency: usize,
    pub latest_products: Arc<SnapshotSlot<Vec<ProductEvent>>>,
    pub stats: Arc<SnapshotSlot<DashboardStats>>,
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
            source: self.source.clone(),
            page_size: self.page_size,
            fetch_concurrency: self.fetch_concurrency,
            latest_products: Arc::clone(&self.latest_products),
            stats: Arc::clone(&self.stats),
        }
    }
}

#[derive(Deserialize)]
pub struct PageQuery {
    /// First block to look at; defaults to the chain head.
    pub from: Option<i64>,
    /// Transactions of `from` already seen on an earlier page.
    pub skip: Option<usize>,
    pub count: Option<usize>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPage {
    pub blocks: Vec<BlockRecord>,
    pub next_block: i64,
    pub has_more: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPage {
    pub transactions: Vec<TransactionRecord>,
    pub next_block: i64,
    pub next_tx_index: usize,
    pub has_more: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: TransactionRecord,
    pub input_text: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductTrack {
    pub id: u64,
    pub label: String,
    pub events: Vec<ProductEvent>,
    pub metrics: TrackMetrics,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotView<V> {
    pub seq: u64,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
    pub value: V,
}

impl<V> From<Snapshot<V>> for SnapshotView<V> {
    fn from(s: Snapshot<V>) -> Self {
        SnapshotView {
            seq: s.seq,
            fetched_at: s.fetched_at,
            value: s.value,
        }
    }
}

/// Not found / still loading, rendered as a JSON placeholder.
pub enum ApiError {
    NotFound(String),
    Loading,
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            ApiError::Loading => (StatusCode::SERVICE_UNAVAILABLE, "loading".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub fn router<T: Transport + 'static>(state: AppState<T>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Trace explorer API running" }))
        .route("/blocks", get(blocks::<T>))
        .route("/blocks/:block", get(block::<T>))
        .route("/transactions", get(transactions::<T>))
        .route("/tx/:hash", get(transaction::<T>))
        .route("/products/latest", get(latest_products::<T>))
        .route("/products/:id/events", get(product_events::<T>))
        .route("/search", get(search_route::<T>))
        .route("/stats", get(stats::<T>))
        .layer(cors)
        .with_state(state)
}

pub async fn serve<T: Transport + 'static>(port: u16, state: AppState<T>) -> eyre::Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

// ---------- handlers ----------

async fn blocks<T: Transport>(
    State(state): State<AppState<T>>,
    Query(q): Query<PageQuery>,
) -> Json<BlockPage> {
    let from = match q.from {
        Some(from) => from,
        None => state.reader.latest_block_number().await as i64,
    };
    let mut list = BlockList::starting_at(from, page_size(&state, q.count), state.fetch_concurrency);
    list.load_more(&state.reader).await;

    Json(BlockPage {
        next_block: list.next_block(),
        has_more: list.has_more(),
        blocks: list.blocks().to_vec(),
    })
}

async fn block<T: Transport>(
    State(state): State<AppState<T>>,
    Path(raw): Path<String>,
) -> Result<Json<BlockRecord>, ApiError> {
    let block_ref = BlockRef::from_str(&raw).map_err(ApiError::BadRequest)?;
    state
        .reader
        .block(block_ref)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("block {}", raw)))
}

async fn transactions<T: Transport>(
    State(state): State<AppState<T>>,
    Query(q): Query<PageQuery>,
) -> Json<TransactionPage> {
    let from = match q.from {
        Some(from) => from,
        None => state.reader.latest_block_number().await as i64,
    };
    let mut list = TransactionList::resume_at(
        from,
        q.skip.unwrap_or(0),
        page_size(&state, q.count),
        state.fetch_concurrency,
    );
    list.load_more(&state.reader).await;

    Json(TransactionPage {
        next_block: list.next_block(),
        next_tx_index: list.next_tx_index(),
        has_more: list.has_more(),
        transactions: list.transactions().to_vec(),
    })
}

async fn transaction<T: Transport>(
    State(state): State<AppState<T>>,
    Path(raw): Path<String>,
) -> Result<Json<TransactionView>, ApiError> {
    let hash = raw
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid transaction hash {:?}: {}", raw, e)))?;
    let tx = state
        .reader
        .transaction_by_hash(hash)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("transaction {}", raw)))?;

    let input_text = match input_preview(&tx.input) {
        InputPreview::Payload(text) => Some(text),
        InputPreview::Empty | InputPreview::Unreadable => None,
    };
    Ok(Json(TransactionView {
        transaction: tx,
        input_text,
    }))
}

async fn latest_products<T: Transport>(
    State(state): State<AppState<T>>,
) -> Result<Json<SnapshotView<Vec<ProductEvent>>>, ApiError> {
    state
        .latest_products
        .latest()
        .map(|s| Json(s.into()))
        .ok_or(ApiError::Loading)
}

async fn product_events<T: Transport>(
    State(state): State<AppState<T>>,
    Path(id): Path<u64>,
) -> Json<ProductTrack> {
    let events = aggregator::events_for_product(&state.reader, &state.source, id).await;
    Json(ProductTrack {
        id,
        label: format!("PROD-{:03}", id),
        metrics: TrackMetrics::from_events(&events),
        events,
    })
}

async fn search_route<T: Transport>(
    State(state): State<AppState<T>>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Route>, ApiError> {
    search::resolve(&state.reader, &q.q)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("match for {:?}", q.q)))
}

async fn stats<T: Transport>(
    State(state): State<AppState<T>>,
) -> Result<Json<SnapshotView<DashboardStats>>, ApiError> {
    state
        .stats
        .latest()
        .map(|s| Json(s.into()))
        .ok_or(ApiError::Loading)
}

fn page_size<T>(state: &AppState<T>, requested: Option<usize>) -> usize {
    requested.unwrap_or(state.page_size).clamp(1, 100)
}
