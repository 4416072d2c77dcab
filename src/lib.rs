//! Wake-word listener - continuous on-device wake phrase spotting
//!
//! This library provides:
//! - Microphone and WAV-file capture producing fixed 16kHz mono frames
//! - Streaming speech decoding with a shared, cached model
//! - Accent- and case-insensitive wake phrase matching
//! - A listener state machine that owns every resource it opens
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌──────────────┐  partial/final  ┌──────────────┐
//! │ AudioSource  │──────────▶│ Recognizer   │────────────────▶│ Listener     │
//! │ (cpal / wav) │  bounded  │ (worker)     │     events      │ controller   │
//! └──────────────┘   queue   └──────▲───────┘                 └──────┬───────┘
//!                                   │ per session                    │ on match
//!                            ┌──────┴───────┐                        ▼
//!                            │ ModelCache   │                 activation callback
//!                            └──────────────┘
//! ```

pub mod config;
pub mod error;
pub mod listener;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use listener::{
    ActivationCallback, ActivationPolicy, Listener, ListenerOptions, ListenerSnapshot,
    ListenerState, WakeWordConfig,
};
