//! HTTP surface of the bookbag service.
//!
//! The binary in `main.rs` wires the core components together and serves
//! [`api::create_router`]; integration tests build the same router around
//! mock providers and clients.

pub mod api;
pub mod metrics;
pub mod state;
