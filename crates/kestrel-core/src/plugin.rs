//! The contract every search provider implements.
//!
//! Discovery and loading are handled elsewhere; the engine only ever sees
//! instances of this trait, keyed by plugin id in the registry.

use async_trait::async_trait;
use kestrel_types::{Query, ResultItem};
use tokio_util::sync::CancellationToken;

/// A search provider.
///
/// The engine may call different plugins concurrently but never calls the same
/// plugin concurrently with itself.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// One-time setup before the first query.
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Produce results for a query, in the plugin's preferred order.
    ///
    /// `cancel` fires when a newer query supersedes this one. Observing it is
    /// optional: anything returned after cancellation is discarded.
    async fn query(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<ResultItem>>;

    /// Called when the user accepts one of this plugin's results.
    async fn on_result_selected(&self, _context_data: &serde_json::Value) -> anyhow::Result<()> {
        Ok(())
    }

    /// Refresh in-memory data after settings or content changed.
    async fn reload(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
