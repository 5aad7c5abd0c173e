//! Inbound frame decoding.
//!
//! Every frame is first read as a loose header (`type`, `id`/`instrument`,
//! `name`, `ts`). The discriminator decides how the payload is decoded:
//! under `data` when present, otherwise the frame itself.

use serde::Deserialize;
use serde_json::Value;

use crate::shared::{Channel, MarketId};
use crate::ws::StreamMessage;

#[derive(Debug, Default, Deserialize)]
struct FrameHeader {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    instrument: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    ts: Option<u64>,
    #[serde(default)]
    message: Option<String>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    Data(StreamMessage),
    Pong,
    /// `{id, name}` without a `type`: the server accepted a subscription.
    Ack { market_id: MarketId, name: String },
    /// Server-reported error.
    Error(String),
    /// Logged and dropped by the caller.
    Unknown(String),
}

pub(crate) fn decode(text: &str) -> Inbound {
    let mut value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return Inbound::Unknown(format!("invalid JSON: {}", e)),
    };
    if !value.is_object() {
        return Inbound::Unknown("frame is not an object".into());
    }

    let header = match FrameHeader::deserialize(&value) {
        Ok(h) => h,
        Err(e) => return Inbound::Unknown(format!("invalid frame header: {}", e)),
    };

    let Some(kind) = header.kind.as_deref() else {
        return match (header.id, header.name) {
            (Some(id), Some(name)) => Inbound::Ack {
                market_id: MarketId::new(id),
                name,
            },
            _ => Inbound::Unknown("frame has no type".into()),
        };
    };

    match kind {
        "pong" => return Inbound::Pong,
        "error" => {
            return Inbound::Error(header.message.unwrap_or_else(|| "unspecified".into()));
        }
        _ => {}
    }

    let Some(channel) = Channel::from_wire(kind) else {
        return Inbound::Unknown(format!("unrecognized type {:?}", kind));
    };

    let Some(market) = header.instrument.or(header.id) else {
        return Inbound::Unknown(format!("{} frame without market id", kind));
    };
    let market_id = MarketId::new(market);
    let timestamp = header.ts;

    let has_data = value.get("data").is_some_and(|d| !d.is_null());
    let payload = if has_data { value["data"].take() } else { value };

    let decoded = match channel {
        Channel::Ticker => serde_json::from_value(payload).map(|data| StreamMessage::Ticker {
            market_id,
            timestamp,
            data,
        }),
        Channel::Trades => serde_json::from_value(payload).map(|data| StreamMessage::Trade {
            market_id,
            timestamp,
            data,
        }),
        Channel::OrderBook => {
            serde_json::from_value(payload).map(|data| StreamMessage::OrderBook {
                market_id,
                timestamp,
                data,
            })
        }
    };

    match decoded {
        Ok(message) => Inbound::Data(message),
        Err(e) => Inbound::Unknown(format!("invalid {} payload: {}", kind, e)),
    }
}
