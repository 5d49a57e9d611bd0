//! Application Layer - Request handling and port definitions.
//!
//! This layer decodes JSON-RPC traffic, routes it to the domain and
//! fans aggregate changes back out to sessions.

/// Port interfaces for external systems (price store).
pub mod ports;

/// JSON-RPC message types and codec.
pub mod rpc;

/// Application services for sessions, dispatch and persistence.
pub mod services;
