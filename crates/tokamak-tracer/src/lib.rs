//! Tokamak Tracer
//!
//! JSON-RPC proxy for Ethereum nodes that turns failed transactions into
//! Solidity-level stack traces. Mined transactions can be replayed against a
//! lazily fetched copy of the chain state to check the node's execution.

pub mod client;
pub mod config;
pub mod error;
pub mod opcodes;
pub mod proxy;
pub mod replay;
pub mod schema;
pub mod serde_utils;
pub mod stacktrace;
pub mod state;
pub mod transport;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(test)]
mod tests;
