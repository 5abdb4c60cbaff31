//! Durable keyword storage.
//!
//! The durable tier is a single SQLite table, the source of truth for which
//! keywords have been dispensed.
//!
//! - **KeywordStore**: pooled client with insert / unread scan / mark / truncate
//! - **Migrations**: idempotent schema application
//!
//! # Usage
//!
//! ```rust,ignore
//! use keyword_relay::storage::{KeywordStore, StoreOptions};
//!
//! let store = KeywordStore::connect("sqlite://keywords.db", &StoreOptions::default()).await?;
//! store.run_migrations().await?;
//!
//! let batch = store.select_unread(1000, None).await?;
//! let ids: Vec<i64> = batch.iter().map(|k| k.id).collect();
//! let claimed = store.mark_read(&ids).await?;
//! ```

pub mod database;
pub mod migrations;
pub mod schema;

pub use database::{
    KeywordRecord, KeywordStore, StoreError, StoreOptions, StoreStats, UnreadKeyword,
    DEFAULT_MARK_CHUNK_SIZE,
};
pub use migrations::{MigrationError, MigrationRunner};
