//! Wake-word listener
//!
//! A [`Listener`] is a handle to a controller task that owns the capture
//! session, the recognizer and the listener state. Requests are queued and
//! handled one at a time; every state change is published as a
//! [`ListenerSnapshot`] through a `watch` channel.
//!
//! ```text
//!   Idle ──start──▶ ModelLoading ──loaded──▶ Listening
//!    ▲                  │                        │
//!    └──────stop────────┴────────stop────────────┘
//!   any ──failure (after teardown)──▶ Error ──start──▶ ...
//! ```

mod controller;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::voice::{AudioSource, CaptureSpec, ModelCache, ModelRef};
use crate::{Error, Result};

use self::controller::Controller;

/// Invoked once per accepted wake-word match, on the controller task
pub type ActivationCallback = Arc<dyn Fn() + Send + Sync>;

/// Phrase and callback for one listening configuration
#[derive(Clone)]
pub struct WakeWordConfig {
    pub phrase: String,
    pub on_activated: ActivationCallback,
    pub enabled: bool,
}

impl WakeWordConfig {
    /// Enabled configuration for `phrase`
    pub fn new(phrase: impl Into<String>, on_activated: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            phrase: phrase.into(),
            on_activated: Arc::new(on_activated),
            enabled: true,
        }
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl fmt::Debug for WakeWordConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeWordConfig")
            .field("phrase", &self.phrase)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Lifecycle state of a listener
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum ListenerState {
    #[default]
    Idle,
    ModelLoading,
    Listening,
    /// Holds the user-facing message; left only by a new start request
    Error(String),
}

/// Observable listener state, republished on every transition and event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerSnapshot {
    pub state: ListenerState,
    pub is_listening: bool,
    pub is_model_loaded: bool,
    pub error: Option<String>,
    /// Latest raw decoder text for the current utterance
    pub transcript: String,
}

/// What happens around an activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationPolicy {
    /// Fire at most once per utterance
    pub once_per_utterance: bool,

    /// Clear the transcript when the wake word fires
    pub clear_transcript: bool,
}

impl Default for ActivationPolicy {
    fn default() -> Self {
        Self {
            once_per_utterance: true,
            clear_transcript: true,
        }
    }
}

/// Fixed settings for one listener
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    pub model: ModelRef,
    pub capture: CaptureSpec,
    pub activation: ActivationPolicy,
}

impl ListenerOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model_ref(),
            capture: config.capture_spec(),
            activation: ActivationPolicy {
                once_per_utterance: config.activation.once_per_utterance,
                clear_transcript: config.activation.clear_transcript,
            },
        }
    }
}

enum Command {
    Configure(WakeWordConfig, oneshot::Sender<()>),
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    Dispose(oneshot::Sender<()>),
}

/// Handle to a running listener controller
///
/// Dropping the handle disposes the listener.
#[derive(Debug)]
pub struct Listener {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ListenerSnapshot>,
    task: JoinHandle<()>,
}

impl Listener {
    /// Spawn a controller task on the current Tokio runtime
    ///
    /// The listener starts `Idle`; nothing is loaded or opened until
    /// [`Listener::start_listening`].
    #[must_use]
    pub fn spawn(
        options: ListenerOptions,
        wake: WakeWordConfig,
        cache: Arc<ModelCache>,
        source: Arc<dyn AudioSource>,
    ) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(ListenerSnapshot::default());

        tracing::debug!(
            phrase = %wake.phrase,
            source = source.name(),
            model = %options.model,
            "listener created"
        );

        let controller = Controller::new(options, wake, cache, source, snapshot_tx);
        let task = tokio::spawn(controller.run(commands_rx));

        Self {
            commands,
            snapshot,
            task,
        }
    }

    /// Replace the phrase, callback and enabled flag
    ///
    /// An active listener restarts when the phrase changes and stops when
    /// disabled. The model is never reloaded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListenerClosed`] if the listener was disposed
    pub async fn configure(&self, wake: WakeWordConfig) -> Result<()> {
        self.request(|ack| Command::Configure(wake, ack)).await
    }

    /// Begin listening, loading the model first if needed
    ///
    /// Returns once the request was handled; a model load continues in the
    /// background. No-op while loading or listening.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListenerClosed`] if the listener was disposed
    pub async fn start_listening(&self) -> Result<()> {
        self.request(Command::Start).await
    }

    /// Release the microphone and recognizer and return to `Idle`
    ///
    /// No-op while idle or in error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListenerClosed`] if the listener was disposed
    pub async fn stop_listening(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// Latest published snapshot
    #[must_use]
    pub fn snapshot(&self) -> ListenerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ListenerSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until a snapshot satisfies `predicate`
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListenerClosed`] if the controller exits first
    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&ListenerSnapshot) -> bool,
    ) -> Result<ListenerSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| Error::ListenerClosed)?;
        Ok(snapshot.clone())
    }

    /// Tear everything down and stop the controller
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListenerClosed`] if the controller task panicked
    pub async fn dispose(self) -> Result<()> {
        let Self {
            commands, task, ..
        } = self;

        let (ack, done) = oneshot::channel();
        if commands.send(Command::Dispose(ack)).is_ok() {
            let _ = done.await;
        }
        drop(commands);

        task.await.map_err(|e| {
            tracing::error!(error = %e, "listener task failed");
            Error::ListenerClosed
        })
    }

    async fn request(&self, command: impl FnOnce(oneshot::Sender<()>) -> Command) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(command(ack))
            .map_err(|_| Error::ListenerClosed)?;
        done.await.map_err(|_| Error::ListenerClosed)
    }
}
