//! # souk-store
//!
//! Persistence collaborators for the Souk review stores.
//!
//! Two capability sets live here: [`KeyValueStorage`], the durable
//! string key-value store used for offline data and the session, and
//! [`ReviewBackend`], the document collection review records are written
//! to. [`LocalReviewBackend`] keeps the collection as a JSON blob inside a
//! key-value store; [`FirestoreBackend`] talks to Cloud Firestore.

pub mod backend;
pub mod database;
pub mod firestore;
pub mod kv;
pub mod local;
pub mod migrations;

mod error;

pub use backend::{Direction, ReviewBackend, SortOrder};
pub use database::SqliteStorage;
pub use error::{Result, StoreError};
pub use firestore::{FirestoreBackend, FirestoreConfig};
pub use kv::{KeyValueStorage, MemoryStorage};
pub use local::LocalReviewBackend;
