pub mod config;
pub mod events;
pub mod types;

pub use config::{load_config, parse_config, ConfigError, CopyStrategy, WtConfig};
pub use events::OperationEvent;
pub use types::{WorktreeName, WorktreeRecord};
