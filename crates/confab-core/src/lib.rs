pub mod config;
pub mod error;
pub mod events;
pub mod store;
pub mod types;

pub use config::ConfabConfig;
pub use error::{ConfabError, Result};
pub use events::ChatEvent;
pub use store::{MessageStore, PreferenceStore, ProfileProvider, SessionStore};
pub use types::*;
