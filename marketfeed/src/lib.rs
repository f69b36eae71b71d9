//! Binary-only support modules for the `marketfeed` process: configuration loading, logging
//! initialization, and the Redis [`marketfeed_core::sink::Sink`] implementation. Everything
//! that is reusable beyond this one process lives in `marketfeed-core`.

pub mod config;
pub mod logging;
pub mod redis_sink;
