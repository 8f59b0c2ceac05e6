//! Plugin start-up and reload for `Kestrel`.
//!
//! Both walk a plugin through `Initializing` and end in `Ready` or `Failed`,
//! emitting a state update at every step.

use super::Kestrel;
use crate::Result;
use crate::registry::RegisteredPlugin;
use futures_util::FutureExt;
use futures_util::future::join_all;
use kestrel_types::{EngineUpdate, PluginState};
use std::panic::AssertUnwindSafe;
use tracing::info;

#[derive(Debug, Clone, Copy)]
enum Step {
    Init,
    Reload,
}

impl Kestrel {
    /// Initialize every `Unloaded` plugin concurrently.
    ///
    /// Returns each plugin's resulting state. A plugin whose `init` fails or
    /// panics ends up `Failed`; the others are unaffected.
    pub async fn initialize_all(&self) -> Vec<(String, PluginState)> {
        let ids = self.registry().ids_in_state(&PluginState::Unloaded);
        info!("Initializing {} plugins", ids.len());

        join_all(ids.into_iter().map(|id| async move {
            let state = match self.bring_up(&id, Step::Init).await {
                Ok(state) => state,
                Err(e) => PluginState::Failed {
                    error: e.to_string(),
                },
            };
            (id, state)
        }))
        .await
    }

    /// Reload one plugin: `Ready | Failed -> Unloaded -> Initializing -> Ready | Failed`.
    ///
    /// While reloading the plugin is not dispatched to.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPlugin`, or `InvalidTransition` if the plugin is not
    /// `Ready` or `Failed`.
    pub async fn reload_plugin(&self, id: &str) -> Result<PluginState> {
        self.registry().reset(id)?;
        self.notify_state(id, PluginState::Unloaded);
        self.bring_up(id, Step::Reload).await
    }

    async fn bring_up(&self, id: &str, step: Step) -> Result<PluginState> {
        let registry = self.registry();
        registry.begin_initialize(id)?;
        self.notify_state(id, PluginState::Initializing);

        let target = registry
            .handle(id)
            .ok_or_else(|| crate::Error::UnknownPlugin(id.to_string()))?;

        let outcome = AssertUnwindSafe(run_step(&target, step)).catch_unwind().await;
        let state = match outcome {
            Ok(Ok(())) => {
                registry.mark_ready(id)?;
                PluginState::Ready
            }
            Ok(Err(e)) => {
                let error = format!("{e:#}");
                registry.mark_failed(id, error.clone())?;
                PluginState::Failed { error }
            }
            Err(_) => {
                let error = "plugin panicked".to_string();
                registry.mark_failed(id, error.clone())?;
                PluginState::Failed { error }
            }
        };

        self.notify_state(id, state.clone());
        Ok(state)
    }

    fn notify_state(&self, id: &str, state: PluginState) {
        self.send_update(EngineUpdate::PluginStateChanged {
            plugin_id: id.to_string(),
            state,
        });
    }
}

async fn run_step(target: &RegisteredPlugin, step: Step) -> anyhow::Result<()> {
    let _gate = target.gate.lock().await;
    match step {
        Step::Init => target.plugin.init().await,
        Step::Reload => target.plugin.reload().await,
    }
}
