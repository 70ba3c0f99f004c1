// src/parser.rs
//! Product telemetry carried in event-log data.
//!
//! The payload is text, stored as bytes and null-padded to the on-chain
//! slot size:
//!
//! ```text
//! <ignored prefix>$<latitude>,<longitude>,<altitude>,<speed>,<satellites>
//! ```
//!
//! The first four fields are decimal floats, `satellites` is an unsigned
//! integer. When the data is an ABI-encoded string (offset word `0x20`,
//! length word, body) only the body is read, so a length byte of `0x24`
//! cannot pose as the delimiter. Other data is read whole. Everything before
//! the first `$` of the text is ignored. Anything else is a `DecodeError`;
//! a reading is never produced with missing fields.

use alloy::primitives::{B256, U256};
use thiserror::Error;

use crate::models::{EventLog, ProductEvent};

const DELIMITER: char = '$';
const FIELD_SEPARATOR: char = ',';
const FIELD_NAMES: [&str; 5] = ["latitude", "longitude", "altitude", "speed", "satellites"];

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("payload is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("payload has no `$` delimiter")]
    MissingDelimiter,

    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("field `{name}` is not numeric: {value:?}")]
    Field { name: &'static str, value: String },

    #[error("log has no product id topic")]
    MissingIdTopic,

    #[error("product id topic {0} does not fit in 64 bits")]
    IdOutOfRange(B256),
}

/// The five telemetry fields of one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub satellites: u32,
}

/// Decode a hex `data` payload (optionally `0x`-prefixed).
pub fn decode_payload(data: &str) -> Result<Telemetry, DecodeError> {
    let text = payload_text(data)?;
    let (_, csv) = text
        .split_once(DELIMITER)
        .ok_or(DecodeError::MissingDelimiter)?;
    parse_fields(csv)
}

/// Decode one event log into a product event.
pub fn decode_event(log: &EventLog) -> Result<ProductEvent, DecodeError> {
    let id = product_id(log)?;
    let t = decode_payload(&log.data)?;
    Ok(ProductEvent {
        id,
        latitude: t.latitude,
        longitude: t.longitude,
        altitude: t.altitude,
        speed: t.speed,
        satellites: t.satellites,
        tx_hash: log.transaction_hash,
        block_number: log.block_number,
    })
}

/// Product id carried in topics[1].
pub fn product_id(log: &EventLog) -> Result<u64, DecodeError> {
    let topic = log.topics.get(1).ok_or(DecodeError::MissingIdTopic)?;
    U256::from_be_bytes(topic.0)
        .try_into()
        .map_err(|_| DecodeError::IdOutOfRange(*topic))
}

/// Topic filter word for a product id: big-endian, left-padded to 32 bytes.
pub fn product_topic(id: u64) -> B256 {
    B256::from(U256::from(id).to_be_bytes::<32>())
}

/// What a transaction's input looks like when read as telemetry text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputPreview {
    Empty,
    Payload(String),
    Unreadable,
}

/// Best-effort preview of a transaction input: the text after the first
/// `$`, if there is one.
pub fn input_preview(input: &[u8]) -> InputPreview {
    if input.is_empty() {
        return InputPreview::Empty;
    }
    let text = strip_nulls(input);
    match text.split_once(DELIMITER) {
        Some((_, rest)) if !rest.is_empty() => InputPreview::Payload(rest.to_string()),
        _ => InputPreview::Unreadable,
    }
}

fn payload_text(data: &str) -> Result<String, DecodeError> {
    let digits = data.strip_prefix("0x").unwrap_or(data);
    let bytes = hex::decode(digits)?;
    Ok(strip_nulls(abi_string_body(&bytes).unwrap_or(&bytes)))
}

const WORD: usize = 32;

/// The body of a single ABI-encoded `string`, if `bytes` is one.
fn abi_string_body(bytes: &[u8]) -> Option<&[u8]> {
    let word = |i: usize| -> Option<usize> {
        let w = bytes.get(i * WORD..(i + 1) * WORD)?;
        usize::try_from(U256::from_be_slice(w)).ok()
    };
    if word(0)? != WORD {
        return None;
    }
    let len = word(1)?;
    bytes.get(2 * WORD..(2 * WORD).checked_add(len)?)
}

// ABI length words are not valid UTF-8 in general, so decode lossily.
fn strip_nulls(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace('\0', "")
}

fn parse_fields(csv: &str) -> Result<Telemetry, DecodeError> {
    let fields: Vec<&str> = csv.split(FIELD_SEPARATOR).map(str::trim).collect();
    if fields.len() != FIELD_NAMES.len() {
        return Err(DecodeError::FieldCount(fields.len()));
    }

    let float = |i: usize| -> Result<f64, DecodeError> {
        fields[i]
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| DecodeError::Field {
                name: FIELD_NAMES[i],
                value: fields[i].to_string(),
            })
    };

    Ok(Telemetry {
        latitude: float(0)?,
        longitude: float(1)?,
        altitude: float(2)?,
        speed: float(3)?,
        satellites: fields[4].parse().map_err(|_| DecodeError::Field {
            name: FIELD_NAMES[4],
            value: fields[4].to_string(),
        })?,
    })
}
