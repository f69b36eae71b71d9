use marketfeed::{config, logging, redis_sink::RedisSink};
use marketfeed_core::{
    adapter::{
        VenueAdapter, binance::BinanceAdapter, bitget::BitgetAdapter, bybit::BybitAdapter,
        deribit::DeribitAdapter, gateio::GateAdapter, kraken::KrakenFuturesAdapter,
        kraken::KrakenSpotAdapter, kucoin::KucoinAdapter, okx::OkxAdapter, TradingClass,
    },
    facade::{Engine, EngineConfig},
    sink::{NullSink, Sink},
};
use marketfeed_instrument::exchange::ExchangeId;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = config::load(&config_path)?;

    let exchange_ids = config.resolve_exchange_ids()?;
    info!(?exchange_ids, "resolved configured venues");

    let trading_class = match config.trading_type {
        config::TradingType::Spot => TradingClass::Spot,
        config::TradingType::Perpetual => TradingClass::Perpetual,
    };
    let adapters: Vec<Arc<dyn VenueAdapter>> = exchange_ids
        .iter()
        .map(|&id| adapter_for(id, trading_class))
        .collect();

    let sink: Arc<dyn Sink> = if config.enable_redis {
        let redis = RedisSink::connect(
            &config.redis.connection_url(),
            &config.redis.key_prefix,
            config.stream.max_len,
            config.stream.trim_approx,
        )
        .await
        .map_err(|err| format!("failed to connect to redis: {err}"))?;
        Arc::new(redis)
    } else {
        Arc::new(NullSink)
    };

    let engine_config = EngineConfig {
        connection: config.connection_config(),
        backoff: config.reconnect.as_backoff_config(),
        event_buffer: 1024,
        kline_capacity: config.cache.max_candles,
        kline_window: config.cache.history_candles,
    };

    let http = reqwest::Client::new();
    let engine = Engine::new(http, engine_config, sink, adapters);

    engine.start().await?;
    info!("engine started, waiting for shutdown signal");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping engine");
    engine.stop().await?;

    Ok(())
}

/// Maps a resolved [`ExchangeId`] onto the concrete adapter constructor serving it. Venues with
/// a dedicated `ExchangeId` variant per class already bake the class into the id itself; venues
/// that multiplex both classes over one endpoint (OKX, Deribit, Bitget, KuCoin) take the
/// process-wide `trading_class` directly.
fn adapter_for(id: ExchangeId, trading_class: TradingClass) -> Arc<dyn VenueAdapter> {
    match id {
        ExchangeId::BinanceSpot => Arc::new(BinanceAdapter::spot()),
        ExchangeId::BinanceFuturesUsd => Arc::new(BinanceAdapter::futures_usd()),
        ExchangeId::BybitSpot => Arc::new(BybitAdapter::spot()),
        ExchangeId::BybitPerpetual => Arc::new(BybitAdapter::perpetual()),
        ExchangeId::Okx => Arc::new(OkxAdapter::new(trading_class)),
        ExchangeId::Deribit => Arc::new(DeribitAdapter::new(false)),
        ExchangeId::GateSpot => Arc::new(GateAdapter::new(TradingClass::Spot)),
        ExchangeId::GatePerpetual => Arc::new(GateAdapter::new(TradingClass::Perpetual)),
        ExchangeId::Bitget => Arc::new(BitgetAdapter::new(trading_class)),
        ExchangeId::Kucoin => Arc::new(KucoinAdapter::new(trading_class)),
        ExchangeId::KrakenSpot => Arc::new(KrakenSpotAdapter::new()),
        ExchangeId::KrakenFutures => Arc::new(KrakenFuturesAdapter::new()),
    }
}
