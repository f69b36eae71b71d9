use crate::record::{CanonicalRecord, Depth, FundingRate, Kline, Ticker};
use marketfeed_instrument::{exchange::ExchangeId, symbol::CanonicalSymbol};
use std::collections::{HashMap, VecDeque};

type CacheKey = (ExchangeId, CanonicalSymbol);

const DEFAULT_KLINE_CAPACITY: usize = 1_000;
const DEFAULT_KLINE_WINDOW: usize = 200;

/// Bounded ring buffer of the most recent candles for one `(venue, symbol, interval)`. Push
/// drops the oldest entry once `capacity` is reached rather than growing unbounded, since a
/// long-running engine otherwise accumulates months of 1-minute candles in memory.
#[derive(Debug)]
struct KlineRing {
    capacity: usize,
    buffer: VecDeque<Kline>,
}

impl KlineRing {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: VecDeque::with_capacity(capacity.min(64)),
        }
    }

    fn push(&mut self, kline: Kline) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(kline);
    }

    fn tail(&self, window: usize) -> Vec<Kline> {
        let skip = self.buffer.len().saturating_sub(window);
        self.buffer.iter().skip(skip).cloned().collect()
    }
}

/// In-memory most-recent-record cache fed by every venue's normalized output. Holds the latest
/// [`Ticker`]/[`Depth`]/[`FundingRate`] per `(venue, symbol)` and a bounded tail of recent
/// [`Kline`]s per `(venue, symbol, interval)`; trades are fan-out-only and never cached here,
/// matching the spec's "trade stream has no last-value concept" design note.
#[derive(Debug, Default)]
pub struct Cache {
    tickers: HashMap<CacheKey, Ticker>,
    depths: HashMap<CacheKey, Depth>,
    funding_rates: HashMap<CacheKey, FundingRate>,
    klines: HashMap<(ExchangeId, CanonicalSymbol, String), KlineRing>,
    kline_capacity: usize,
    kline_window: usize,
}

impl Cache {
    pub fn new() -> Self {
        Self::with_kline_sizing(DEFAULT_KLINE_CAPACITY, DEFAULT_KLINE_WINDOW)
    }

    pub fn with_kline_sizing(capacity: usize, window: usize) -> Self {
        Self {
            tickers: HashMap::new(),
            depths: HashMap::new(),
            funding_rates: HashMap::new(),
            klines: HashMap::new(),
            kline_capacity: capacity,
            kline_window: window,
        }
    }

    /// Applies a normalized record to the cache. Returns `true` if the record should continue
    /// on to the sink/broadcast fan-out, `false` if it was suppressed (an unchanged funding-rate
    /// duplicate, per the dedup gate).
    pub fn apply(&mut self, record: &CanonicalRecord) -> bool {
        match record {
            CanonicalRecord::Ticker(ticker) => {
                self.tickers
                    .insert(self.key_of(&ticker.meta), ticker.clone());
                true
            }
            CanonicalRecord::Depth(depth) => {
                self.depths.insert(self.key_of(&depth.meta), depth.clone());
                true
            }
            CanonicalRecord::FundingRate(funding) => {
                let key = self.key_of(&funding.meta);
                let is_duplicate = self
                    .funding_rates
                    .get(&key)
                    .is_some_and(|last| last.dedup_key() == funding.dedup_key());
                self.funding_rates.insert(key, funding.clone());
                !is_duplicate
            }
            CanonicalRecord::Kline(kline) => {
                let key = (
                    kline.meta.venue,
                    kline.meta.symbol.clone(),
                    kline.interval.clone(),
                );
                self.klines
                    .entry(key)
                    .or_insert_with(|| KlineRing::new(self.kline_capacity))
                    .push(kline.clone());
                true
            }
            CanonicalRecord::Trade(_) => true,
        }
    }

    fn key_of(&self, meta: &crate::record::RecordMeta) -> CacheKey {
        (meta.venue, meta.symbol.clone())
    }

    pub fn ticker(&self, venue: ExchangeId, symbol: &CanonicalSymbol) -> Option<&Ticker> {
        self.tickers.get(&(venue, symbol.clone()))
    }

    pub fn depth(&self, venue: ExchangeId, symbol: &CanonicalSymbol) -> Option<&Depth> {
        self.depths.get(&(venue, symbol.clone()))
    }

    pub fn funding_rate(&self, venue: ExchangeId, symbol: &CanonicalSymbol) -> Option<&FundingRate> {
        self.funding_rates.get(&(venue, symbol.clone()))
    }

    /// The most recent `window` (or fewer) candles cached for `(venue, symbol, interval)`,
    /// oldest first.
    pub fn klines(&self, venue: ExchangeId, symbol: &CanonicalSymbol, interval: &str) -> Vec<Kline> {
        self.klines
            .get(&(venue, symbol.clone(), interval.to_string()))
            .map(|ring| ring.tail(self.kline_window))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordMeta;
    use chrono::{DateTime, Utc};

    fn meta(venue: ExchangeId, symbol: &str) -> RecordMeta {
        let now: DateTime<Utc> = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        RecordMeta {
            venue,
            symbol: CanonicalSymbol::new(symbol, "USDT"),
            exchange_timestamp: Some(now),
            local_timestamp: now,
            unified_timestamp: now,
        }
    }

    fn funding(rate: f64, next: Option<i64>) -> FundingRate {
        FundingRate {
            meta: meta(ExchangeId::BinanceFuturesUsd, "BTC"),
            funding_rate: rate,
            mark_price: None,
            index_price: None,
            next_funding_time: next.map(|ms| DateTime::from_timestamp_millis(ms).unwrap()),
            predicted_next_funding_rate: None,
        }
    }

    #[test]
    fn test_ticker_apply_and_query_round_trips() {
        let mut cache = Cache::new();
        let ticker = Ticker {
            meta: meta(ExchangeId::BinanceSpot, "BTC"),
            last: 50_000.0,
            bid: 49_999.0,
            bid_size: 1.0,
            ask: 50_001.0,
            ask_size: 1.0,
            open: 49_000.0,
            high: 51_000.0,
            low: 48_000.0,
            volume: 100.0,
            quote_volume: 5_000_000.0,
            change: 1_000.0,
            change_percent: 2.0,
            mark_price: None,
            index_price: None,
            funding_rate: None,
            next_funding_time: None,
        };
        cache.apply(&CanonicalRecord::Ticker(ticker.clone()));

        let symbol = CanonicalSymbol::new("BTC", "USDT");
        assert_eq!(cache.ticker(ExchangeId::BinanceSpot, &symbol), Some(&ticker));
    }

    #[test]
    fn test_funding_rate_dedup_gate_suppresses_unchanged_repeat() {
        let mut cache = Cache::new();
        let first = funding(0.0001, Some(1_700_100_000_000));
        let repeat = first.clone();
        let changed = funding(0.0002, Some(1_700_100_000_000));

        assert!(cache.apply(&CanonicalRecord::FundingRate(first)));
        assert!(!cache.apply(&CanonicalRecord::FundingRate(repeat)));
        assert!(cache.apply(&CanonicalRecord::FundingRate(changed)));
    }

    #[test]
    fn test_kline_ring_evicts_oldest_beyond_capacity() {
        let mut cache = Cache::with_kline_sizing(3, 3);
        let symbol = CanonicalSymbol::new("BTC", "USDT");
        for i in 0..5u32 {
            let m = meta(ExchangeId::BinanceSpot, "BTC");
            let kline = Kline {
                meta: m,
                interval: "1m".to_string(),
                open_time: DateTime::from_timestamp_millis(i as i64 * 60_000).unwrap(),
                close_time: DateTime::from_timestamp_millis((i as i64 + 1) * 60_000).unwrap(),
                open: i as f64,
                high: i as f64,
                low: i as f64,
                close: i as f64,
                volume: 1.0,
                quote_volume: 1.0,
                trades: 1,
                is_closed: true,
            };
            cache.apply(&CanonicalRecord::Kline(kline));
        }

        let tail = cache.klines(ExchangeId::BinanceSpot, &symbol, "1m");
        assert_eq!(tail.len(), 3);
        assert_eq!(tail.first().unwrap().open, 2.0);
        assert_eq!(tail.last().unwrap().open, 4.0);
    }
}
