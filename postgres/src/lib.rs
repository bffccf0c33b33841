//! `PostgreSQL` storage for the Chairbook booking engine.
//!
//! This crate implements the `BookingStore` and `BookingTransaction` traits
//! from `chairbook-core` on top of sqlx, plus read-only provider and service
//! directories over the catalog tables:
//!
//! - Provider-scoped advisory locks bounded by `lock_timeout`
//! - Row-level `FOR UPDATE` conflict probes
//! - A GiST exclusion constraint as a schema-level overlap guard
//! - JSONB audit deltas
//! - Embedded migrations
//!
//! # Example
//!
//! ```no_run
//! use chairbook_postgres::{PoolConfig, PostgresBookingStore, PostgresDirectory};
//!
//! # async fn example() -> chairbook_core::Result<()> {
//! let url = "postgres://localhost/chairbook";
//! let store = PostgresBookingStore::connect(url, PoolConfig::default()).await?;
//! store.migrate().await?;
//! let directory = PostgresDirectory::new(store.pool().clone());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod directory;
mod error;
mod rows;
mod store;

pub use directory::PostgresDirectory;
pub use store::{PoolConfig, PostgresBookingStore, PostgresTransaction};
