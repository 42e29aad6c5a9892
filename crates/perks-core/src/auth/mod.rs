//! Authentication layer: secure token storage and refresh coordination.

mod refresh;
mod token_store;

pub use refresh::RefreshCoordinator;
pub use token_store::{KeyringTokenStore, MemoryTokenStore, TokenStore};
