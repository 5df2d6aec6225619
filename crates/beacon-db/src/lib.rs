//! Database layer for the Beacon platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, and runtime tunables. Every table Beacon persists
//! to is created through versioned migrations managed by this crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: the incident store is the single source of
//!   truth for one logical broadcast domain; no external database process
//!   required. WAL mode allows concurrent readers with a single writer, which
//!   matches the read-heavy query path alongside a serialized ingest path.
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management; the busy timeout absorbs short write contention.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, ensuring migrations ship with the server and cannot
//!   drift from the code that depends on them.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
