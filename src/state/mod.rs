//! Partition state store.
//!
//! - [`key`] - Order-preserving key encoding
//! - [`db`] - Ordered store, write batches and transactions
//! - [`column_family`] - Typed column families over the store
//!
//! All state mutations of one processed record go through a single
//! [`Transaction`] and become visible together when its batch is applied.

pub mod column_family;
pub mod db;
pub mod key;

pub use column_family::ColumnFamily;
pub use db::{ColumnFamilyId, KeyValueStore, MemoryStore, ReadContext, StateDb, Transaction, WriteBatch};
pub use key::{DbKey, TenantKey};
