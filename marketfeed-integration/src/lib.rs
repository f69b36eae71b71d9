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
#![allow(clippy::type_complexity, clippy::too_many_arguments, type_alias_bounds)]

//! # Marketfeed-Integration
//! Low-level framework for composing WebSocket & HTTP integrations with cryptocurrency
//! exchanges.
//!
//! Utilised by `marketfeed-core` to build venue adapters for real-time public market data
//! collection: a configurable WebSocket connect helper and the [`error::SocketError`] taxonomy
//! every adapter's transport errors funnel through.

/// All [`Error`](std::error::Error)s generated in `marketfeed-integration`.
pub mod error;

/// Contains WebSocket protocol helpers for connecting & translating frames.
pub mod protocol;
