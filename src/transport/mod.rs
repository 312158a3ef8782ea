//! The `transport` module provides concrete `Endpoint` implementations.
//!
//! - `memory`: linked endpoint pairs over tokio channels, for tests and for
//!   embedding broker and clients in one process
//! - `websocket`: the network transport, a broker-side server and a
//!   client-side connector

pub mod memory;
pub mod websocket;
