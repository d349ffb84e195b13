//! Database module for pingwatch.
//!
//! Provides SQLite storage with embedded migrations: the site registry (read
//! by the monitor), the append-only ping history and the derived stats rows.

mod models;
mod stats;
mod store;

pub use models::*;
pub use stats::*;
pub use store::*;
