//! Live session state and per-account storage switching.

mod actor;
mod switcher;

pub use actor::SessionActor;
pub use switcher::{StorageLocation, StoreSwitcher};
