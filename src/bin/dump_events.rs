//! Print every product event in the configured window, including the logs
//! that fail to decode.

use trace_explorer::chain::{BlockTag, ChainReader, LogFilter};
use trace_explorer::config;
use trace_explorer::parser::decode_event;
use trace_explorer::rpc::HttpTransport;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cfg = config::load()?;
    let reader = ChainReader::new(HttpTransport::new(cfg.rpc_http_url.clone()));

    let latest = reader.try_latest_block_number().await?;
    println!("Latest block = {}", latest);

    let filter = LogFilter {
        from_block: BlockTag::Number(cfg.from_block),
        to_block: BlockTag::Latest,
        address: cfg.contract_address,
        topics: vec![cfg.event_topic],
    };
    let logs = reader.try_get_logs(&filter).await?;
    println!("Fetched {} logs since block {}", logs.len(), cfg.from_block);

    let mut failed = 0;
    for log in &logs {
        match decode_event(log) {
            Ok(e) => println!(
                "Block: {} | Tx: {} | PROD-{:03} | {:.6},{:.6} alt {} | {} km/h | {} sats",
                e.block_number, e.tx_hash, e.id, e.latitude, e.longitude, e.altitude, e.speed,
                e.satellites
            ),
            Err(err) => {
                failed += 1;
                eprintln!(
                    "Block: {} | Tx: {} | undecodable: {}",
                    log.block_number, log.transaction_hash, err
                );
            }
        }
    }

    println!("{} decoded, {} failed", logs.len() - failed, failed);
    Ok(())
}
