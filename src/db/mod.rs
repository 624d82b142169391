//! Durable SQLite storage for alarm events.

mod store;

pub use store::*;
