use crate::{
    adapter::{InboundFrame, VenueAdapter},
    error::DataError,
    kind::SubscriptionKey,
    record::CanonicalRecord,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use marketfeed_integration::{
    error::SocketError,
    protocol::websocket::{WsMessage, connect},
};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{sync::mpsc, time::Instant};
use tracing::{error, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique within the process, generated on [`Connection::open`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Why a Connection's receive loop exited, distinguishing a watchdog-forced reconnect from an
/// operator-requested shutdown so the Reconnector doesn't chase a stopping engine.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CloseReason {
    DataStarvation,
    EngineStopping,
    TransportError,
}

#[derive(Debug)]
pub struct ConnectionClosed {
    pub id: ConnectionId,
    pub reason: CloseReason,
    pub carried_keys: Vec<SubscriptionKey>,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    pub heartbeat_enabled: bool,
    pub heartbeat_interval: Duration,
    pub data_timeout_enabled: bool,
    pub data_timeout: Duration,
    pub data_timeout_check_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_enabled: true,
            heartbeat_interval: Duration::from_secs(20),
            data_timeout_enabled: true,
            data_timeout: Duration::from_secs(30),
            data_timeout_check_interval: Duration::from_secs(5),
        }
    }
}

/// A cloneable reference to a live Connection. The receive loop runs in a spawned task; this
/// handle only exposes what the Pool, Registry and Facade need: send a frame, inspect carried
/// keys, request a close.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    send_tx: mpsc::UnboundedSender<WsMessage>,
    state: Arc<Mutex<ConnectionState>>,
    carried: Arc<Mutex<HashSet<SubscriptionKey>>>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn carried_len(&self) -> usize {
        self.carried.lock().len()
    }

    pub fn carries(&self, key: &SubscriptionKey) -> bool {
        self.carried.lock().contains(key)
    }

    pub fn carried_keys(&self) -> Vec<SubscriptionKey> {
        self.carried.lock().iter().cloned().collect()
    }

    pub fn insert_key(&self, key: SubscriptionKey) {
        self.carried.lock().insert(key);
    }

    pub fn remove_key(&self, key: &SubscriptionKey) {
        self.carried.lock().remove(key);
    }

    /// Enqueues a frame onto the send path; returns once handed to the transport task rather
    /// than once it reaches the network, so callers never block on socket I/O.
    pub fn send(&self, frame: String) -> Result<(), DataError> {
        if self.state() != ConnectionState::Open {
            return Err(DataError::Socket(SocketError::Sink));
        }
        self.send_tx
            .send(WsMessage::text(frame))
            .map_err(|_| DataError::Socket(SocketError::Sink))
    }

    /// Requests a clean close; the receive loop observes this on its next `select!` iteration
    /// and reports [`CloseReason::EngineStopping`] rather than treating it as a transport error.
    pub fn close(&self) {
        *self.state.lock() = ConnectionState::Closing;
        let _ = self.send_tx.send(WsMessage::Close(None));
    }
}

/// Opens a transport session for `adapter`, pre-loading it with `initial_keys`, and spawns the
/// coroutine that drives its lifetime: receive, heartbeat, watchdog and close all wait together
/// on one `select!` rather than on separate timer callbacks mutating shared state.
pub async fn open(
    adapter: Arc<dyn VenueAdapter>,
    http: reqwest::Client,
    config: ConnectionConfig,
    initial_keys: Vec<SubscriptionKey>,
    on_data: mpsc::UnboundedSender<CanonicalRecord>,
    on_close: mpsc::UnboundedSender<ConnectionClosed>,
) -> Result<ConnectionHandle, DataError> {
    let id = ConnectionId::next();
    let session = adapter.open_session(&http).await?;
    let heartbeat_interval = if session.heartbeat_interval.is_zero() {
        config.heartbeat_interval
    } else {
        session.heartbeat_interval
    };

    let ws = connect(session.url.clone())
        .await
        .map_err(DataError::Socket)?;
    let (mut ws_sink, mut ws_stream) = ws.split();

    let (send_tx, mut send_rx) = mpsc::unbounded_channel::<WsMessage>();
    let state = Arc::new(Mutex::new(ConnectionState::Open));
    let carried = Arc::new(Mutex::new(initial_keys.into_iter().collect::<HashSet<_>>()));

    let handle = ConnectionHandle {
        id,
        send_tx,
        state: state.clone(),
        carried: carried.clone(),
    };

    tokio::spawn(async move {
        let mut last_data_at = Instant::now();
        let mut heartbeat = tokio::time::interval(heartbeat_interval.max(Duration::from_millis(1)));
        heartbeat.tick().await;
        let mut watchdog =
            tokio::time::interval(config.data_timeout_check_interval.max(Duration::from_millis(1)));
        watchdog.tick().await;

        let close_reason = 'select_loop: loop {
            tokio::select! {
                maybe_message = ws_stream.next() => {
                    match maybe_message {
                        Some(Ok(message)) => {
                            if let WsMessage::Text(text) = &message {
                                last_data_at = Instant::now();
                                match adapter.dispatch(text.as_str()) {
                                    InboundFrame::Data { channel, instrument_id, payload } => {
                                        let records = adapter.normalize(
                                            &channel,
                                            instrument_id.as_deref(),
                                            &payload,
                                            Utc::now(),
                                        );
                                        for record in records {
                                            let _ = on_data.send(record);
                                        }
                                    }
                                    InboundFrame::Error(reason) => {
                                        warn!(%id, exchange = %adapter.exchange(), %reason, "venue reported an error frame");
                                    }
                                    InboundFrame::HeartbeatReply
                                    | InboundFrame::SubscriptionAck
                                    | InboundFrame::Other => {}
                                }
                            }
                        }
                        Some(Err(error)) => {
                            error!(%id, exchange = %adapter.exchange(), %error, "websocket transport error");
                            break 'select_loop CloseReason::TransportError;
                        }
                        None => break 'select_loop CloseReason::TransportError,
                    }
                }
                frame = send_rx.recv() => {
                    match frame {
                        Some(WsMessage::Close(_)) => break 'select_loop CloseReason::EngineStopping,
                        Some(frame) => {
                            if ws_sink.send(frame).await.is_err() {
                                break 'select_loop CloseReason::TransportError;
                            }
                        }
                        None => break 'select_loop CloseReason::EngineStopping,
                    }
                }
                _ = heartbeat.tick(), if config.heartbeat_enabled => {
                    if let Some(frame) = adapter.heartbeat_frame() {
                        if ws_sink.send(WsMessage::text(frame)).await.is_err() {
                            break 'select_loop CloseReason::TransportError;
                        }
                    }
                }
                _ = watchdog.tick(), if config.data_timeout_enabled => {
                    if last_data_at.elapsed() > config.data_timeout {
                        warn!(%id, exchange = %adapter.exchange(), "data-starvation watchdog firing, forcing reconnect");
                        break 'select_loop CloseReason::DataStarvation;
                    }
                }
            }
        };

        *state.lock() = ConnectionState::Closed;
        let _ = ws_sink.close().await;
        let carried_keys = carried.lock().iter().cloned().collect();
        let _ = on_close.send(ConnectionClosed {
            id,
            reason: close_reason,
            carried_keys,
        });
    });

    Ok(handle)
}
