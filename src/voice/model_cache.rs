//! Process-wide speech model cache
//!
//! Models are large and slow to load, so each [`ModelRef`] is loaded at most
//! once and then shared read-only by every listener holding the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::OnceCell;

use super::{DecoderHandle, LoadError, ModelRef, SpeechBackend};

/// Load status of one model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

#[derive(Default)]
struct Slot {
    cell: OnceCell<DecoderHandle>,
    loading: AtomicBool,
    completed: AtomicU64,
    last_error: Mutex<Option<LoadError>>,
}

impl Slot {
    fn last_error(&self) -> Option<LoadError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_error(&self, error: Option<LoadError>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }
}

/// Memoizing loader shared across listeners
pub struct ModelCache {
    backend: Arc<dyn SpeechBackend>,
    slots: Mutex<HashMap<ModelRef, Arc<Slot>>>,
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl ModelCache {
    #[must_use]
    pub fn new(backend: Arc<dyn SpeechBackend>) -> Self {
        Self {
            backend,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Load `model`, or return the already-loaded handle
    ///
    /// Concurrent calls for the same reference share one load. After a
    /// failure, callers that were waiting on it get the same error; the next
    /// fresh call retries.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`LoadError`]
    pub async fn load(&self, model: &ModelRef) -> Result<DecoderHandle, LoadError> {
        let slot = self.slot(model);
        let seen = slot.completed.load(Ordering::SeqCst);

        let handle = slot
            .cell
            .get_or_try_init(|| async {
                // A load we were queued behind has just failed
                if slot.completed.load(Ordering::SeqCst) != seen {
                    if let Some(e) = slot.last_error() {
                        return Err(e);
                    }
                }

                slot.loading.store(true, Ordering::SeqCst);
                tracing::info!(model = %model, backend = self.backend.name(), "loading speech model");

                let backend = Arc::clone(&self.backend);
                let target = model.clone();
                let result = tokio::task::spawn_blocking(move || backend.load_model(&target))
                    .await
                    .map_err(|e| LoadError::Backend(format!("model loader panicked: {e}")))
                    .and_then(|r| r);

                slot.loading.store(false, Ordering::SeqCst);
                slot.completed.fetch_add(1, Ordering::SeqCst);

                match result {
                    Ok(loaded) => {
                        tracing::info!(model = %model, sample_rate = loaded.sample_rate(), "speech model ready");
                        slot.set_last_error(None);
                        Ok(DecoderHandle::new(model.clone(), loaded))
                    }
                    Err(e) => {
                        tracing::error!(model = %model, error = %e, "speech model failed to load");
                        slot.set_last_error(Some(e.clone()));
                        Err(e)
                    }
                }
            })
            .await?;

        Ok(handle.clone())
    }

    /// The loaded handle, if `model` is ready
    #[must_use]
    pub fn get(&self, model: &ModelRef) -> Option<DecoderHandle> {
        self.existing_slot(model)
            .and_then(|slot| slot.cell.get().cloned())
    }

    #[must_use]
    pub fn status(&self, model: &ModelRef) -> ModelStatus {
        let Some(slot) = self.existing_slot(model) else {
            return ModelStatus::Unloaded;
        };

        if slot.cell.initialized() {
            ModelStatus::Ready
        } else if slot.loading.load(Ordering::SeqCst) {
            ModelStatus::Loading
        } else if slot.last_error().is_some() {
            ModelStatus::Failed
        } else {
            ModelStatus::Unloaded
        }
    }

    fn slot(&self, model: &ModelRef) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(model.clone()).or_default())
    }

    fn existing_slot(&self, model: &ModelRef) -> Option<Arc<Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
            .cloned()
    }
}
