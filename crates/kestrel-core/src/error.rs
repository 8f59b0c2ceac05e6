use kestrel_types::PluginState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("History error: {0}")]
    History(String),

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    #[error("Invalid transition for plugin {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },
}

impl Error {
    pub(crate) fn invalid_transition(id: &str, from: &PluginState, to: &PluginState) -> Self {
        Self::InvalidTransition {
            id: id.to_string(),
            from: from.name(),
            to: to.name(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("IO error"));
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn test_error_display_unknown_plugin() {
        let err = Error::UnknownPlugin("calculator".to_string());
        assert_eq!(err.to_string(), "Unknown plugin: calculator");
    }

    #[test]
    fn test_error_display_invalid_transition() {
        let err =
            Error::invalid_transition("files", &PluginState::Ready, &PluginState::Initializing);
        assert_eq!(
            err.to_string(),
            "Invalid transition for plugin files: ready -> initializing"
        );
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Config error: missing field");
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<i32>("\"not a number\"").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_error() -> Result<()> {
            Err(Error::DuplicatePlugin("files".to_string()))
        }
        assert!(returns_error().is_err());
    }
}
