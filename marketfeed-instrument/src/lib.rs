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

//! # Marketfeed-Instrument
//! Contains the core [`ExchangeId`](exchange::ExchangeId) and [`CanonicalSymbol`](symbol::CanonicalSymbol)
//! data structures shared by every `marketfeed` crate.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Defines the [`ExchangeId`](exchange::ExchangeId) enum covering every supported venue.
pub mod exchange;

/// Defines [`CanonicalSymbol`](symbol::CanonicalSymbol), the engine's `BASE/QUOTE` registry key.
pub mod symbol;

/// [`Side`] of a trade - Buy or Sell.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
pub enum Side {
    #[serde(alias = "buy", alias = "BUY", alias = "b")]
    Buy,
    #[serde(alias = "sell", alias = "SELL", alias = "s")]
    Sell,
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Side::Buy => "buy",
                Side::Sell => "sell",
            }
        )
    }
}
