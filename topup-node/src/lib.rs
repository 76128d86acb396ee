#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]

pub mod bridge;
pub mod bridge_store;
pub mod checker;
pub mod config;
pub mod confirm;
pub mod metrics;
pub mod monitor;
pub mod ops_server;
pub mod readiness;
pub mod reconcile;
