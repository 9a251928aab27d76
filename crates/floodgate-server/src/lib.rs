//! Floodgate HTTP server library.
//!
//! Exposes the configuration loader, shared state, error mapping, HTTP
//! routes, and the scheduler plugin so integration tests can assemble the
//! same router the binary serves.

pub mod config;
pub mod error;
pub mod plugin;
pub mod routes;
pub mod state;
