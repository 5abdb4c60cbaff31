//! Refill of the fast tier from the durable store.
//!
//! - **RefillScheduler**: one refill run (`clear`, then fetch, push and mark
//!   per batch)
//! - **PeriodicRefill**: optional in-process timer for deployments without
//!   an external trigger
//!
//! ```text
//!   trigger (cron / PeriodicRefill)
//!          │
//!          ▼
//!   clear fast tier
//!          │
//!          ▼            ┌──────────────┐
//!   select_unread ◄─────┤ durable store│
//!          │            └──────▲───────┘
//!          ▼                   │
//!   push_many ──► fast tier    │
//!          │                   │
//!          └──── mark_read ────┘     (repeat per batch)
//! ```

pub mod periodic;
pub mod refill;

pub use periodic::{PeriodicError, PeriodicRefill};
pub use refill::{RefillReport, RefillScheduler, DEFAULT_REFILL_BATCHES, DEFAULT_REFILL_BATCH_SIZE};
