//! Timbel Core
//!
//! Domain types, the pipeline/stage status machine, and the port traits
//! shared by the monitor service, its storage adapters and the HTTP API.
//! This crate has minimal dependencies and no I/O of its own.

pub mod error;
pub mod events;
pub mod ids;
pub mod logs;
pub mod pipeline;
pub mod ports;
pub mod query;
pub mod stage;

pub use error::{Error, Result};
pub use ids::*;
