pub mod config_loader;
pub mod constants;
pub mod state_store;

pub use config_loader::*;
pub use constants::*;
pub use state_store::{JsonFileStore, PersistedState, StateStore, unix_millis};
