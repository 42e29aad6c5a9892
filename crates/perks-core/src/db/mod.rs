//! Database layer for Perks

mod connection;
mod migrations;
mod registry;
mod store;

pub use connection::Database;
pub use migrations::Schema;
pub use registry::SessionRegistry;
pub use store::{DataStore, StagedWrite};
