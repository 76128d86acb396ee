#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]

pub mod access;
pub mod config;
pub mod http_server;
pub mod metrics;
pub mod quote_api;
pub mod rate_limit;
