//! Dispatch generations and cooperative cancellation.
//!
//! Every submitted query gets a fresh generation. Issuing a new one cancels
//! the previous generation's token; plugin tasks still running under it may
//! finish, but their output is rejected by [`CancellationCoordinator::is_current`].

use kestrel_types::Generation;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle for one query's lifetime.
#[derive(Debug, Clone)]
pub struct GenerationToken {
    generation: Generation,
    cancel: CancellationToken,
}

impl GenerationToken {
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Fires once a newer query has been issued.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Single writer of the current generation.
#[derive(Debug)]
pub struct CancellationCoordinator {
    current: AtomicU64,
    live: Mutex<CancellationToken>,
}

impl Default for CancellationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(0),
            live: Mutex::new(CancellationToken::new()),
        }
    }

    /// Issue the next generation and cancel the one before it.
    pub fn begin_query(&self) -> GenerationToken {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);

        let generation = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = CancellationToken::new();
        let previous = std::mem::replace(&mut *live, cancel.clone());
        previous.cancel();

        debug!("Generation {} begins", generation);
        GenerationToken { generation, cancel }
    }

    #[must_use]
    pub fn is_current(&self, token: &GenerationToken) -> bool {
        self.is_current_generation(token.generation)
    }

    #[must_use]
    pub fn is_current_generation(&self, generation: Generation) -> bool {
        generation != 0 && self.current.load(Ordering::Acquire) == generation
    }
}
