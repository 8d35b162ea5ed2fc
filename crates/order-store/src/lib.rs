//! Persistence for orders, provisioned profiles, usage alerts, referral
//! rewards, account credit and the webhook audit log.
//!
//! Every mutating operation on [`OrderStore`] is atomic. Races between the
//! polling and webhook paths are settled by guarded status updates and the
//! unique profile transaction number, never by application locks.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use store::{Completion, OrderStore, UpsertOutcome, UsageUpdate};
