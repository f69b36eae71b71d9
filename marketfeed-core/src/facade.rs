use crate::{
    adapter::VenueAdapter,
    cache::Cache,
    connection::{ConnectionClosed, ConnectionConfig, ConnectionState},
    error::DataError,
    events::{EngineEvent, EventBus},
    kind::{DataKind, SubscriptionKey},
    pool::ConnectionPool,
    reconnect::{self, BackoffConfig, Reconnector},
    record::{CanonicalRecord, Depth, FundingRate, Ticker},
    registry::SubscriptionRegistry,
    sink::Sink,
    stats::{Stats, VenueStats},
};
use marketfeed_instrument::{exchange::ExchangeId, symbol::CanonicalSymbol};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub connection: ConnectionConfig,
    pub backoff: BackoffConfig,
    pub event_buffer: usize,
    pub kline_capacity: usize,
    pub kline_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            backoff: BackoffConfig::default(),
            event_buffer: 1024,
            kline_capacity: 1_000,
            kline_window: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub reconnecting: bool,
    pub attempt: u32,
}

#[derive(Debug)]
struct VenueRuntime {
    pool: Mutex<ConnectionPool>,
    registry: Mutex<SubscriptionRegistry>,
    reconnector: Mutex<Reconnector>,
    close_rx: Mutex<mpsc::UnboundedReceiver<ConnectionClosed>>,
}

/// Public entry point: wires the Pool, Registry, Reconnector and Cache/Sink fan-out for every
/// registered venue behind `start`/`stop`/`subscribe`/`unsubscribe`/queries. Everything else in
/// this crate can be used standalone; this is what a consumer embeds.
#[derive(Debug)]
pub struct Engine {
    venues: HashMap<ExchangeId, Arc<VenueRuntime>>,
    cache: Arc<Mutex<Cache>>,
    stats: Arc<Stats>,
    events: EventBus,
    sink: Arc<dyn Sink>,
    running: Arc<AtomicBool>,
    data_rx: Mutex<Option<mpsc::UnboundedReceiver<CanonicalRecord>>>,
    supervisor_tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Engine {
    pub fn new(
        http: reqwest::Client,
        config: EngineConfig,
        sink: Arc<dyn Sink>,
        adapters: Vec<Arc<dyn VenueAdapter>>,
    ) -> Self {
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        let mut venues = HashMap::with_capacity(adapters.len());

        for adapter in adapters {
            let exchange = adapter.exchange();
            let (close_tx, close_rx) = mpsc::unbounded_channel();
            let pool = ConnectionPool::new(
                adapter,
                http.clone(),
                config.connection,
                data_tx.clone(),
                close_tx,
            );
            venues.insert(
                exchange,
                Arc::new(VenueRuntime {
                    pool: Mutex::new(pool),
                    registry: Mutex::new(SubscriptionRegistry::new()),
                    reconnector: Mutex::new(Reconnector::new(config.backoff)),
                    close_rx: Mutex::new(close_rx),
                }),
            );
        }

        Self {
            venues,
            cache: Arc::new(Mutex::new(Cache::with_kline_sizing(
                config.kline_capacity,
                config.kline_window,
            ))),
            stats: Arc::new(Stats::new()),
            events: EventBus::new(config.event_buffer),
            sink,
            running: Arc::new(AtomicBool::new(false)),
            data_rx: Mutex::new(Some(data_rx)),
            supervisor_tasks: Mutex::new(Vec::new()),
        }
    }

    /// Opens one Connection per enabled venue and arms their reconnect supervisors. Idempotent:
    /// a second call while already running is a no-op.
    pub async fn start(&self) -> Result<(), DataError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(data_rx) = self.data_rx.lock().await.take() {
            tokio::spawn(Self::run_fan_out(
                data_rx,
                self.cache.clone(),
                self.stats.clone(),
                self.events.clone(),
                self.sink.clone(),
            ));
        }

        for (&exchange, runtime) in &self.venues {
            if let Err(error) = runtime.pool.lock().await.ensure_open().await {
                error!(%exchange, %error, "failed to open initial connection");
                self.running.store(false, Ordering::SeqCst);
                return Err(error);
            }
            self.events
                .publish(EngineEvent::ConnectionOpened { venue: exchange });

            let handle = self.spawn_supervisor(exchange, runtime.clone());
            self.supervisor_tasks.lock().await.push(handle);
        }

        Ok(())
    }

    /// Closes every Connection with a clean code, cancels the reconnect supervisors, and stops
    /// the fan-out task. Idempotent: stopping an already-stopped engine is a no-op.
    pub async fn stop(&self) -> Result<(), DataError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        for runtime in self.venues.values() {
            runtime.pool.lock().await.shutdown();
        }

        let mut tasks = self.supervisor_tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }

        Ok(())
    }

    pub async fn subscribe(
        &self,
        symbol: CanonicalSymbol,
        kinds: &[DataKind],
        venues: Option<&[ExchangeId]>,
    ) -> Result<(), DataError> {
        for exchange in self.resolve_venues(venues)? {
            let runtime = self.venues[&exchange].clone();
            for &kind in kinds {
                self.subscribe_one(&runtime, SubscriptionKey::new(kind, symbol.clone()))
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn unsubscribe(
        &self,
        symbol: CanonicalSymbol,
        kinds: &[DataKind],
        venues: Option<&[ExchangeId]>,
    ) -> Result<(), DataError> {
        for exchange in self.resolve_venues(venues)? {
            let runtime = self.venues[&exchange].clone();
            for &kind in kinds {
                self.unsubscribe_one(&runtime, &SubscriptionKey::new(kind, symbol.clone()))
                    .await?;
            }
        }
        Ok(())
    }

    /// Runs independently per symbol with no ordering guarantee across them, per the facade
    /// contract; one symbol's failure does not cancel the others.
    pub async fn batch_subscribe(
        &self,
        symbols: Vec<CanonicalSymbol>,
        kinds: Vec<DataKind>,
        venues: Option<Vec<ExchangeId>>,
    ) -> Vec<Result<(), DataError>> {
        let tasks = symbols.into_iter().map(|symbol| {
            let kinds = kinds.clone();
            let venues = venues.clone();
            async move { self.subscribe(symbol, &kinds, venues.as_deref()).await }
        });
        futures::future::join_all(tasks).await
    }

    pub async fn batch_unsubscribe(
        &self,
        symbols: Vec<CanonicalSymbol>,
        kinds: Vec<DataKind>,
        venues: Option<Vec<ExchangeId>>,
    ) -> Vec<Result<(), DataError>> {
        let tasks = symbols.into_iter().map(|symbol| {
            let kinds = kinds.clone();
            let venues = venues.clone();
            async move { self.unsubscribe(symbol, &kinds, venues.as_deref()).await }
        });
        futures::future::join_all(tasks).await
    }

    pub async fn get_ticker(&self, venue: ExchangeId, symbol: &CanonicalSymbol) -> Option<Ticker> {
        self.cache.lock().await.ticker(venue, symbol).cloned()
    }

    pub async fn get_depth(&self, venue: ExchangeId, symbol: &CanonicalSymbol) -> Option<Depth> {
        self.cache.lock().await.depth(venue, symbol).cloned()
    }

    pub async fn get_funding_rate(
        &self,
        venue: ExchangeId,
        symbol: &CanonicalSymbol,
    ) -> Option<FundingRate> {
        self.cache.lock().await.funding_rate(venue, symbol).cloned()
    }

    pub async fn get_connection_status(&self) -> HashMap<ExchangeId, ConnectionStatus> {
        let mut statuses = HashMap::with_capacity(self.venues.len());
        for (&exchange, runtime) in &self.venues {
            let pool = runtime.pool.lock().await;
            let connected = pool
                .connection_ids()
                .iter()
                .any(|id| pool.handle(*id).is_some_and(|h| h.state() == ConnectionState::Open));
            let reconnector = runtime.reconnector.lock().await;
            statuses.insert(
                exchange,
                ConnectionStatus {
                    connected,
                    reconnecting: reconnector.is_in_flight(),
                    attempt: reconnector.attempt(),
                },
            );
        }
        statuses
    }

    pub fn get_stats(&self) -> HashMap<ExchangeId, VenueStats> {
        self.stats.snapshot_all()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn resolve_venues(&self, filter: Option<&[ExchangeId]>) -> Result<Vec<ExchangeId>, DataError> {
        match filter {
            Some(list) => list.iter().try_fold(Vec::with_capacity(list.len()), |mut acc, exchange| {
                if !self.venues.contains_key(exchange) {
                    return Err(DataError::UnknownExchange(exchange.to_string()));
                }
                acc.push(*exchange);
                Ok(acc)
            }),
            None => Ok(self.venues.keys().copied().collect()),
        }
    }

    /// At-most-once subscribe: a key already in the desired set is a silent no-op.
    async fn subscribe_one(&self, runtime: &VenueRuntime, key: SubscriptionKey) -> Result<(), DataError> {
        {
            let mut registry = runtime.registry.lock().await;
            if !registry.desire(key.clone()) {
                return Ok(());
            }
        }

        let mut pool = runtime.pool.lock().await;
        let id = pool.acquire_for(&key).await?;
        pool.add_subscription(id, key.clone())?;
        drop(pool);

        runtime.registry.lock().await.assign(key, id);
        Ok(())
    }

    /// At-most-once unsubscribe: a key not in the desired set is a silent no-op, including one
    /// whose carrying connection has already closed.
    async fn unsubscribe_one(&self, runtime: &VenueRuntime, key: &SubscriptionKey) -> Result<(), DataError> {
        let connection_id = {
            let mut registry = runtime.registry.lock().await;
            if !registry.is_desired(key) {
                return Ok(());
            }
            let id = registry.connection_for(key);
            registry.undesire(key);
            id
        };

        if let Some(id) = connection_id {
            runtime.pool.lock().await.remove_subscription(id, key)?;
        }
        Ok(())
    }

    async fn run_fan_out(
        mut data_rx: mpsc::UnboundedReceiver<CanonicalRecord>,
        cache: Arc<Mutex<Cache>>,
        stats: Arc<Stats>,
        events: EventBus,
        sink: Arc<dyn Sink>,
    ) {
        while let Some(record) = data_rx.recv().await {
            let venue = record.meta().venue;
            let keep = cache.lock().await.apply(&record);
            if !keep {
                continue;
            }

            stats.record_normalized(venue);
            if let Err(error) = sink.write(&record).await {
                warn!(%venue, %error, "sink write failed");
                stats.sink_failed(venue);
            }
            events.publish(EngineEvent::Record(record));
        }
    }

    /// Drains one venue's close notifications for the engine's lifetime, re-homing its
    /// subscriptions through the Reconnector's backoff schedule. Runs until the close channel
    /// closes (the pool is dropped) or the task is aborted by `stop()`.
    fn spawn_supervisor(&self, exchange: ExchangeId, runtime: Arc<VenueRuntime>) -> tokio::task::JoinHandle<()> {
        let running = self.running.clone();
        let events = self.events.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            loop {
                let closed = runtime.close_rx.lock().await.recv().await;
                let Some(closed) = closed else { break };

                runtime.pool.lock().await.forget(closed.id);
                runtime.registry.lock().await.drop_connection(closed.id);
                events.publish(EngineEvent::ConnectionClosed {
                    venue: exchange,
                    reason: closed.reason,
                });

                if !running.load(Ordering::SeqCst) || !reconnect::should_reconnect(closed.reason) {
                    continue;
                }

                let delay = {
                    let mut reconnector = runtime.reconnector.lock().await;
                    reconnector.try_begin()
                };
                let Some(delay) = delay else { continue };

                let runtime = runtime.clone();
                let events = events.clone();
                let stats = stats.clone();
                let running = running.clone();
                tokio::spawn(Self::run_reconnect_attempt(
                    exchange, runtime, events, stats, running, delay,
                ));
            }
        })
    }

    async fn run_reconnect_attempt(
        exchange: ExchangeId,
        runtime: Arc<VenueRuntime>,
        events: EventBus,
        stats: Arc<Stats>,
        running: Arc<AtomicBool>,
        delay: std::time::Duration,
    ) {
        tokio::time::sleep(delay).await;
        if !running.load(Ordering::SeqCst) {
            runtime.reconnector.lock().await.finish_attempt();
            return;
        }

        let desired = runtime.registry.lock().await.snapshot_desired();
        let mut all_ok = true;
        for key in desired {
            let mut pool = runtime.pool.lock().await;
            let outcome = match pool.acquire_for(&key).await {
                Ok(id) => pool.add_subscription(id, key.clone()).map(|()| id),
                Err(error) => Err(error),
            };
            drop(pool);

            match outcome {
                Ok(id) => runtime.registry.lock().await.assign(key, id),
                Err(error) => {
                    warn!(%exchange, %error, "reconnect re-subscription failed");
                    all_ok = false;
                }
            }
        }

        let mut reconnector = runtime.reconnector.lock().await;
        if all_ok {
            reconnector.on_reconnected();
            stats.reconnected(exchange);
        } else if reconnector.exhausted() {
            events.publish(EngineEvent::ReconnectFailed {
                venue: exchange,
                attempts: reconnector.attempt(),
            });
            stats.reconnect_failed(exchange);
            reconnector.finish_attempt();
        } else {
            reconnector.finish_attempt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{adapter::binance::BinanceAdapter, sink::NullSink};

    fn engine() -> Engine {
        Engine::new(
            reqwest::Client::new(),
            EngineConfig::default(),
            Arc::new(NullSink),
            vec![Arc::new(BinanceAdapter::spot())],
        )
    }

    #[test]
    fn test_new_engine_is_not_running() {
        let engine = engine();
        assert!(!engine.running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_a_noop() {
        let engine = engine();
        assert!(engine.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_to_unknown_venue_errors() {
        let engine = engine();
        let result = engine
            .subscribe(
                CanonicalSymbol::new("BTC", "USDT"),
                &[DataKind::Ticker],
                Some(&[ExchangeId::Deribit]),
            )
            .await;
        assert!(matches!(result, Err(DataError::UnknownExchange(_))));
    }

    #[tokio::test]
    async fn test_unsubscribe_without_subscribe_is_a_noop() {
        let engine = engine();
        let result = engine
            .unsubscribe(
                CanonicalSymbol::new("BTC", "USDT"),
                &[DataKind::Ticker],
                Some(&[ExchangeId::BinanceSpot]),
            )
            .await;
        assert!(result.is_ok());
    }
}
