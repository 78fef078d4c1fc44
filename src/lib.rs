//! DexTrader: multi-wallet balance sync and trade allocation.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod rpc;
pub mod storage;
pub mod engine;
