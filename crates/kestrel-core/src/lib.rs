pub mod config;
pub mod dispatch;
pub mod generation;
pub mod history;
pub mod plugin;
pub mod query;
pub mod rank;
pub mod registry;

mod engine;
mod error;
mod utils;

#[cfg(test)]
mod tests;

pub use async_trait::async_trait;
pub use engine::{Kestrel, QueryOutcome};
pub use error::{Error, Result};
pub use plugin::Plugin;
pub use registry::PluginRegistry;
pub use tokio_util::sync::CancellationToken;

pub use kestrel_types::*;
