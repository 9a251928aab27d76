//! Core library for Floodgate.
//!
//! Contains the distributed lock service, the schedule abstraction, the task
//! registry and runner, the upload lifecycle engine with its validation
//! rules, and the typed adapters for the external scan service and the
//! object store. This crate depends on `floodgate-store` for the persistence
//! traits and knows nothing about HTTP routing or configuration loading.

pub mod cancel;
pub mod error;
pub mod lock;
pub mod object_store;
pub mod runner;
pub mod scan;
pub mod schedule;
pub mod task;
pub mod upload_engine;
pub mod validation;
