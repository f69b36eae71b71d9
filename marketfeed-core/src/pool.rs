use crate::{
    adapter::VenueAdapter,
    connection::{self, ConnectionClosed, ConnectionConfig, ConnectionHandle, ConnectionId, ConnectionState},
    error::DataError,
    kind::SubscriptionKey,
    record::CanonicalRecord,
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;
use tracing::debug;

/// The live [`ConnectionHandle`]s serving a single venue, opened lazily and capacity-routed
/// according to [`VenueAdapter::max_subscriptions_per_connection`]. Venues with no declared cap
/// degenerate to a single connection, since `acquire_for` always finds the one open handle with
/// "room" (an unbounded connection always has room).
#[derive(Debug)]
pub struct ConnectionPool {
    adapter: Arc<dyn VenueAdapter>,
    http: reqwest::Client,
    config: ConnectionConfig,
    handles: HashMap<ConnectionId, ConnectionHandle>,
    on_data: mpsc::UnboundedSender<CanonicalRecord>,
    on_close: mpsc::UnboundedSender<ConnectionClosed>,
}

impl ConnectionPool {
    pub fn new(
        adapter: Arc<dyn VenueAdapter>,
        http: reqwest::Client,
        config: ConnectionConfig,
        on_data: mpsc::UnboundedSender<CanonicalRecord>,
        on_close: mpsc::UnboundedSender<ConnectionClosed>,
    ) -> Self {
        Self {
            adapter,
            http,
            config,
            handles: HashMap::new(),
            on_data,
            on_close,
        }
    }

    pub fn handle(&self, id: ConnectionId) -> Option<&ConnectionHandle> {
        self.handles.get(&id)
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.handles.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Drops the pool's record of a connection. Called once its [`ConnectionClosed`] event has
    /// been consumed by the Reconnector; the pool itself never reacts to a close directly.
    pub fn forget(&mut self, id: ConnectionId) {
        self.handles.remove(&id);
    }

    /// Finds an open connection with spare capacity for one more key, opening a fresh one only
    /// when every existing connection is full (or none exist yet).
    pub async fn acquire_for(&mut self, key: &SubscriptionKey) -> Result<ConnectionId, DataError> {
        let cap = self.adapter.max_subscriptions_per_connection();
        let existing = self.handles.iter().find_map(|(id, handle)| {
            let has_room = cap.map(|cap| handle.carried_len() < cap).unwrap_or(true);
            (has_room && handle.state() == ConnectionState::Open).then_some(*id)
        });
        if let Some(id) = existing {
            return Ok(id);
        }

        debug!(exchange = %self.adapter.exchange(), %key, "opening a new connection");
        self.open_new(Vec::new()).await
    }

    /// Guarantees at least one open connection exists, without attaching any subscription key.
    /// Used by `start()` so a venue with no subscriptions yet still has a live socket.
    pub async fn ensure_open(&mut self) -> Result<ConnectionId, DataError> {
        if let Some(id) = self
            .handles
            .iter()
            .find(|(_, handle)| handle.state() == ConnectionState::Open)
            .map(|(id, _)| *id)
        {
            return Ok(id);
        }
        self.open_new(Vec::new()).await
    }

    async fn open_new(&mut self, initial_keys: Vec<SubscriptionKey>) -> Result<ConnectionId, DataError> {
        let handle = connection::open(
            self.adapter.clone(),
            self.http.clone(),
            self.config,
            initial_keys,
            self.on_data.clone(),
            self.on_close.clone(),
        )
        .await?;
        let id = handle.id;
        self.handles.insert(id, handle);
        Ok(id)
    }

    fn handle_or_unknown(&self, id: ConnectionId) -> Result<&ConnectionHandle, DataError> {
        self.handles
            .get(&id)
            .ok_or_else(|| DataError::UnknownExchange(format!("{} connection {id}", self.adapter.exchange())))
    }

    /// Sends a subscribe frame for `key` over `id` and records it as carried. A no-op send
    /// failure (connection already closing) is surfaced to the caller rather than retried here;
    /// the Registry/Reconnector own re-homing.
    pub fn add_subscription(&mut self, id: ConnectionId, key: SubscriptionKey) -> Result<(), DataError> {
        let handle = self.handle_or_unknown(id)?;
        for frame in self.adapter.build_subscribe(std::slice::from_ref(&key)) {
            handle.send(frame)?;
        }
        handle.insert_key(key);
        Ok(())
    }

    pub fn remove_subscription(&mut self, id: ConnectionId, key: &SubscriptionKey) -> Result<(), DataError> {
        let handle = self.handle_or_unknown(id)?;
        match self.adapter.build_unsubscribe(std::slice::from_ref(key)) {
            frames if handle.state() == ConnectionState::Open => {
                for frame in frames {
                    handle.send(frame)?;
                }
            }
            // Unsubscribing from a connection that's already closing is a silent no-op: there's
            // nothing left to tell the venue, and the key is about to be dropped with the socket.
            _ => {}
        }
        handle.remove_key(key);
        Ok(())
    }

    /// Requests every connection close; each reports back through `on_close` as usual.
    pub fn shutdown(&mut self) {
        for handle in self.handles.values() {
            handle.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connection::ConnectionId, kind::DataKind};
    use marketfeed_instrument::symbol::CanonicalSymbol;

    fn pool() -> ConnectionPool {
        let (data_tx, _data_rx) = mpsc::unbounded_channel();
        let (close_tx, _close_rx) = mpsc::unbounded_channel();
        ConnectionPool::new(
            Arc::new(crate::adapter::binance::BinanceAdapter::spot()),
            reqwest::Client::new(),
            ConnectionConfig::default(),
            data_tx,
            close_tx,
        )
    }

    #[test]
    fn test_empty_pool_reports_no_connections() {
        let pool = pool();
        assert!(pool.is_empty());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_add_subscription_to_unknown_connection_errors() {
        let mut pool = pool();
        let key = SubscriptionKey::new(DataKind::Ticker, CanonicalSymbol::new("BTC", "USDT"));
        let bogus = ConnectionId::next();
        assert!(pool.add_subscription(bogus, key).is_err());
    }
}
