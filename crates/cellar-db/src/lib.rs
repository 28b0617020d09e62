//! Database layer for the Cellar service.
//!
//! SQLite storage plumbing for the cellar service: an `r2d2` pool that
//! configures every connection it opens, and the schema migrations that
//! create the `wines` table.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError, MEMORY_PATH};
