//! Configuration module
//!
//! Application settings are stored as JSON in SQLite and cached in memory.

mod schema;
mod store;

pub use schema::*;
pub use store::{ConfigChange, ConfigStore};
