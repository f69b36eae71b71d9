use marketfeed_instrument::exchange::ExchangeId;
use parking_lot::{RwLock, RwLockReadGuard};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

/// Per-venue counters, read by the Facade's `getStats()` and otherwise untouched by consumers.
/// Plain atomics rather than a mutex-guarded struct: every counter is independent and only ever
/// incremented, so there's no invariant across fields that locking would protect.
#[derive(Debug, Default)]
struct VenueCounters {
    records_normalized: AtomicU64,
    records_dropped: AtomicU64,
    reconnects: AtomicU64,
    reconnect_failures: AtomicU64,
    sink_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VenueStats {
    pub records_normalized: u64,
    pub records_dropped: u64,
    pub reconnects: u64,
    pub reconnect_failures: u64,
    pub sink_failures: u64,
}

/// Engine-wide statistics, keyed by venue. Created once and shared behind an `Arc` by every
/// Connection/Pool/Reconnector/Sink caller that needs to record an event.
#[derive(Debug, Default)]
pub struct Stats {
    venues: RwLock<HashMap<ExchangeId, VenueCounters>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, venue: ExchangeId) -> RwLockReadGuard<'_, HashMap<ExchangeId, VenueCounters>> {
        if !self.venues.read().contains_key(&venue) {
            self.venues.write().entry(venue).or_default();
        }
        self.venues.read()
    }

    pub fn record_normalized(&self, venue: ExchangeId) {
        self.counters(venue)[&venue]
            .records_normalized
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, venue: ExchangeId) {
        self.counters(venue)[&venue]
            .records_dropped
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnected(&self, venue: ExchangeId) {
        self.counters(venue)[&venue]
            .reconnects
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_failed(&self, venue: ExchangeId) {
        self.counters(venue)[&venue]
            .reconnect_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn sink_failed(&self, venue: ExchangeId) {
        self.counters(venue)[&venue]
            .sink_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, venue: ExchangeId) -> VenueStats {
        match self.venues.read().get(&venue) {
            Some(counters) => VenueStats {
                records_normalized: counters.records_normalized.load(Ordering::Relaxed),
                records_dropped: counters.records_dropped.load(Ordering::Relaxed),
                reconnects: counters.reconnects.load(Ordering::Relaxed),
                reconnect_failures: counters.reconnect_failures.load(Ordering::Relaxed),
                sink_failures: counters.sink_failures.load(Ordering::Relaxed),
            },
            None => VenueStats::default(),
        }
    }

    pub fn snapshot_all(&self) -> HashMap<ExchangeId, VenueStats> {
        let venues: Vec<ExchangeId> = self.venues.read().keys().copied().collect();
        venues
            .into_iter()
            .map(|venue| (venue, self.snapshot(venue)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unseen_venue_snapshots_to_zero() {
        let stats = Stats::new();
        let snapshot = stats.snapshot(ExchangeId::Okx);
        assert_eq!(snapshot.records_normalized, 0);
    }

    #[test]
    fn test_counters_accumulate_per_venue_independently() {
        let stats = Stats::new();
        stats.record_normalized(ExchangeId::BinanceSpot);
        stats.record_normalized(ExchangeId::BinanceSpot);
        stats.reconnect_failed(ExchangeId::Okx);

        assert_eq!(stats.snapshot(ExchangeId::BinanceSpot).records_normalized, 2);
        assert_eq!(stats.snapshot(ExchangeId::BinanceSpot).reconnect_failures, 0);
        assert_eq!(stats.snapshot(ExchangeId::Okx).reconnect_failures, 1);
    }
}
