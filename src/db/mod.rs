//! Database module for upwatch.
//!
//! Provides SQLite storage with automatic migrations behind the
//! [`Persistence`] trait.

mod models;
mod store;

pub use models::*;
pub use store::*;
