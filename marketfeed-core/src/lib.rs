#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms,
    rust_2024_compatibility
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # Marketfeed-Core
//! The streaming connection and normalization engine behind Marketfeed: per-venue WebSocket
//! sessions, subscription routing, reconnect-with-backoff, canonical normalization, and fan-out
//! to an in-memory cache, an external store, and a broadcast channel.
//!
//! The [`facade::Engine`] is the intended entry point for consumers; everything else is exposed
//! for venue-adapter authors and for embedding the engine's pieces individually.

/// [`VenueAdapter`](adapter::VenueAdapter) capability interface and one implementation per
/// supported venue.
pub mod adapter;

/// In-memory most-recent-record cache, keyed `(venue, symbol)`.
pub mod cache;

/// [`unified_timestamp`](clock::unified_timestamp) — the engine's compromise clock.
pub mod clock;

/// A single live transport session: send queue, receive loop, heartbeat, watchdog.
pub mod connection;

/// All [`Error`](std::error::Error)s generated in Marketfeed-Core.
pub mod error;

/// In-process [`EngineEvent`](events::EngineEvent) broadcast.
pub mod events;

/// Public API: start, stop, subscribe, unsubscribe, queries, status, statistics.
pub mod facade;

/// [`DataKind`](kind::DataKind) and [`SubscriptionKey`](kind::SubscriptionKey).
pub mod kind;

/// Per-venue collection of [`Connection`](connection::Connection)s with capacity-aware routing.
pub mod pool;

/// Per-venue exponential-backoff scheduler.
pub mod reconnect;

/// Canonical record types: [`Ticker`](record::Ticker), [`Depth`](record::Depth),
/// [`Trade`](record::Trade), [`FundingRate`](record::FundingRate), [`Kline`](record::Kline).
pub mod record;

/// Authoritative per-venue desired subscription set and its reverse connection map.
pub mod registry;

/// External-store write interface, implemented outside this crate (e.g. Redis).
pub mod sink;

/// Engine-wide error and activity counters.
pub mod stats;
