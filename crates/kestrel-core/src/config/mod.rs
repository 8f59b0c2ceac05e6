mod dirs;
mod settings;
mod validation;

pub use dirs::Directories;
pub use settings::{Config, HistoryConfig, PluginSettings, SearchConfig};
pub use validation::warn_unknown_fields;
