use crate::{connection::CloseReason, record::CanonicalRecord};
use marketfeed_instrument::exchange::ExchangeId;
use tokio::sync::broadcast;
use tracing::warn;

/// Engine-wide activity the Facade exposes for observers beyond the cache/sink pair — a
/// dashboard, a health-check task, or a downstream consumer that wants connection lifecycle
/// notifications without polling `getConnectionStatus`.
///
/// Mirrors the broadcast-channel pattern the ecosystem uses for its own market-event server:
/// one `broadcast::Sender`, cloned receivers per consumer, lag handled by skipping forward
/// rather than blocking the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Record(CanonicalRecord),
    ConnectionOpened { venue: ExchangeId },
    ConnectionClosed { venue: ExchangeId, reason: CloseReason },
    ReconnectFailed { venue: ExchangeId, attempts: u32 },
}

/// Wraps a [`broadcast::Sender`] with the engine's lag-handling policy so every consumer of
/// `subscribe()` applies it the same way instead of re-deriving it at each call site.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Returns the number of live receivers, or `0` if none are attached —
    /// publishing with zero subscribers is a normal, silent no-op, not an error.
    pub fn publish(&self, event: EngineEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

/// Drains a receiver, logging and continuing past `Lagged` rather than treating it as fatal —
/// a slow consumer should miss events, not take down the engine or the other subscribers.
pub async fn recv_lossy(receiver: &mut broadcast::Receiver<EngineEvent>) -> Option<EngineEvent> {
    loop {
        match receiver.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event bus consumer lagged, skipping forward");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_delivers_to_subscriber() {
        let bus = EventBus::new(8);
        let mut receiver = bus.subscribe();

        let delivered = bus.publish(EngineEvent::ConnectionOpened {
            venue: ExchangeId::BinanceSpot,
        });
        assert_eq!(delivered, 1);

        match recv_lossy(&mut receiver).await {
            Some(EngineEvent::ConnectionOpened { venue }) => {
                assert_eq!(venue, ExchangeId::BinanceSpot);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_publish_with_no_subscribers_returns_zero() {
        let bus = EventBus::new(8);
        assert_eq!(
            bus.publish(EngineEvent::ReconnectFailed {
                venue: ExchangeId::Okx,
                attempts: 5
            }),
            0
        );
    }
}
