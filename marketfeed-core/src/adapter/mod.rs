use crate::{error::DataError, kind::SubscriptionKey, record::CanonicalRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketfeed_instrument::{exchange::ExchangeId, symbol::CanonicalSymbol};
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod deribit;
pub mod gateio;
pub mod kraken;
pub mod kucoin;
pub mod okx;

/// Whether an adapter instance serves spot or linear-perpetual instruments.
///
/// Selected once per process from the global `tradingType` configuration key. Venues with a
/// dedicated [`ExchangeId`] variant per class (Binance, Bybit, Gate, Kraken) bake this into
/// their adapter constructor; venues that multiplex both classes over one endpoint (OKX,
/// Deribit, Bitget, KuCoin) carry it as a field that only affects instrument-id formatting.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TradingClass {
    Spot,
    Perpetual,
}

/// A connectable session returned by [`VenueAdapter::open_session`]: the transport URL and any
/// server-mandated heartbeat interval discovered during a pre-session handshake.
#[derive(Debug, Clone)]
pub struct Session {
    pub url: Url,
    pub heartbeat_interval: Duration,
}

impl Session {
    pub fn new(url: Url, heartbeat_interval: Duration) -> Self {
        Self {
            url,
            heartbeat_interval,
        }
    }
}

/// Classification of an inbound venue frame, produced by [`VenueAdapter::dispatch`].
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// Market data for a given channel/topic tag, to be handed to the Normalizer. Some venues
    /// (OKX) carry the instrument identifier only in a frame-level `arg` envelope rather than
    /// inside every data entry, hence the separate `instrument_id` hint.
    Data {
        channel: String,
        instrument_id: Option<String>,
        payload: Value,
    },
    /// Acknowledgement of a subscribe/unsubscribe request.
    SubscriptionAck,
    /// A heartbeat/keepalive reply from the server.
    HeartbeatReply,
    /// An error frame reported by the venue.
    Error(String),
    /// Anything else (e.g. connection metadata) that carries no actionable data.
    Other,
}

/// Capability interface each supported venue implements once.
///
/// Modelled as a concrete trait-object implementer rather than a per-venue generic, so the
/// Connection/Pool/Reconnector machinery never needs a runtime `match` over [`ExchangeId`] in
/// the hot path — they hold a `dyn VenueAdapter` and drive it uniformly.
#[async_trait]
pub trait VenueAdapter: Send + Sync + std::fmt::Debug {
    /// The venue/trading-class this adapter instance serves.
    fn exchange(&self) -> ExchangeId;

    /// Translate a canonical `BASE/QUOTE` symbol into this venue's native identifier for the
    /// given [`crate::kind::DataKind`] (some venues vary the identifier form by channel).
    fn to_venue_symbol(&self, symbol: &CanonicalSymbol, kind: crate::kind::DataKind) -> String;

    /// Translate a venue-native identifier back into the canonical `BASE/QUOTE` form. Returns
    /// `None` if the identifier cannot be parsed (e.g. it belongs to an unsupported market).
    fn from_venue_symbol(&self, venue_symbol: &str) -> Option<CanonicalSymbol>;

    /// Establish (or derive) the transport URL for this adapter, performing any required
    /// pre-session handshake (e.g. KuCoin's token bullet).
    async fn open_session(&self, http: &reqwest::Client) -> Result<Session, DataError>;

    /// Build the native subscribe frame(s) for the given keys. Most venues return one frame
    /// batching every key; implementations are free to return more than one if the venue caps
    /// the number of topics per frame.
    fn build_subscribe(&self, keys: &[SubscriptionKey]) -> Vec<String>;

    /// Build the native unsubscribe frame(s), structurally mirroring `build_subscribe`.
    fn build_unsubscribe(&self, keys: &[SubscriptionKey]) -> Vec<String>;

    /// The application-level heartbeat frame to send while the socket is open, if this venue
    /// requires one beyond the transport-level WebSocket ping/pong.
    fn heartbeat_frame(&self) -> Option<String>;

    /// Classify an inbound text frame.
    fn dispatch(&self, payload: &str) -> InboundFrame;

    /// Normalize a data frame for the given channel tag into zero or more canonical records.
    /// Composite frames (e.g. a ticker that also carries a funding rate) may yield more than
    /// one record. Returns an empty vec when the frame cannot be normalized (unknown
    /// instrument, missing critical fields); this is a silent skip, not an error.
    fn normalize(
        &self,
        channel: &str,
        instrument_id: Option<&str>,
        payload: &Value,
        local_timestamp: DateTime<Utc>,
    ) -> Vec<CanonicalRecord>;

    /// Per-socket subscription cap, if the venue imposes one.
    fn max_subscriptions_per_connection(&self) -> Option<usize> {
        None
    }

    /// Whether subscriptions can be supplied at connect time via a combined-stream URL, rather
    /// than requiring a subscribe frame sent after the handshake completes.
    fn supports_combined_subscribe_at_connect(&self) -> bool {
        false
    }
}

/// Parses a venue's stringly-typed numeric field, treating empty strings as absent rather than
/// zero, per the Normalizer contract.
pub fn parse_optional_f64(value: Option<&Value>) -> Option<f64> {
    let value = value?;
    match value {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

pub fn parse_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
