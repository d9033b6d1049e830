//! Database module for SignalTrail.
//!
//! Provides the SQLite-backed outbox tables and settings storage with
//! automatic migrations.

mod models;
mod store;

pub use models::*;
pub use store::*;
