//! Ledger store for the billing reconciliation engine.
//!
//! The crate exposes:
//! - [`LedgerStore`]: typed accessors over subscription, user-subscription
//!   and transaction records; every mutation commits individually.
//! - [`PgLedgerStore`]: the Postgres implementation.
//! - [`MemoryLedgerStore`]: in-memory implementation for tests and local
//!   runs.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{LedgerError, Result};
pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;
pub use store::LedgerStore;
