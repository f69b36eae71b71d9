use crate::kind::DataKind;
use marketfeed_instrument::exchange::ExchangeId;
use marketfeed_integration::error::SocketError;
use thiserror::Error;

/// All errors generated in `marketfeed-core`.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("SocketError: {0}")]
    Socket(#[from] SocketError),

    #[error("{exchange} does not support data kind: {kind:?}")]
    Unsupported { exchange: ExchangeId, kind: DataKind },

    #[error("unknown venue: {0}")]
    UnknownExchange(String),

    #[error("invalid canonical symbol: {0}")]
    InvalidSymbol(String),

    #[error("pre-session handshake for {exchange} failed: {reason}")]
    Handshake { exchange: ExchangeId, reason: String },

    #[error("{exchange} reconnect attempts exhausted after {attempts} tries")]
    ReconnectFailed { exchange: ExchangeId, attempts: u32 },

    #[error("external store unreachable and marked mandatory")]
    StoreUnreachable,

    #[error("invalid subscription kind requested: {0:?}")]
    InvalidSubscription(DataKind),
}

/// Distinguished WebSocket close codes used so the Reconnector can tell a watchdog-triggered
/// close apart from an operator-initiated `stop()`.
pub mod close_code {
    pub const DATA_STARVATION: u16 = 4000;
    pub const ENGINE_STOPPING: u16 = 4001;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_error_message() {
        let error = DataError::Unsupported {
            exchange: ExchangeId::Okx,
            kind: DataKind::FundingRate,
        };
        assert!(error.to_string().contains("okx"));
    }
}
