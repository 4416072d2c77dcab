//! Vosk speech backend

use std::sync::Arc;

use super::{DecoderError, LoadError, ModelRef, Recognizer, SpeechBackend, SpeechModel, TranscriptEvent};

/// Loads Vosk model directories
#[derive(Debug, Default, Clone, Copy)]
pub struct VoskBackend;

impl SpeechBackend for VoskBackend {
    fn name(&self) -> &str {
        "vosk"
    }

    fn load_model(&self, model: &ModelRef) -> Result<Arc<dyn SpeechModel>, LoadError> {
        let path = model.path();
        if !path.is_dir() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        let inner = vosk::Model::new(path.to_string_lossy()).ok_or_else(|| LoadError::Corrupt {
            path: path.to_path_buf(),
            reason: "vosk rejected the model directory".to_string(),
        })?;

        Ok(Arc::new(VoskModel {
            inner: Arc::new(inner),
            sample_rate: model.sample_rate(),
        }))
    }
}

struct VoskModel {
    inner: Arc<vosk::Model>,
    sample_rate: u32,
}

impl SpeechModel for VoskModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[allow(clippy::cast_precision_loss)]
    fn create_recognizer(&self) -> Result<Box<dyn Recognizer>, DecoderError> {
        let mut inner = vosk::Recognizer::new(&self.inner, self.sample_rate as f32)
            .ok_or_else(|| DecoderError::Create("vosk recognizer allocation failed".to_string()))?;
        inner.set_words(false);
        inner.set_partial_words(false);

        Ok(Box::new(VoskRecognizer {
            inner,
            _model: Arc::clone(&self.inner),
            last_partial: String::new(),
            pcm: Vec::new(),
        }))
    }
}

struct VoskRecognizer {
    inner: vosk::Recognizer,
    // Keeps the model alive for as long as the recognizer
    _model: Arc<vosk::Model>,
    last_partial: String,
    pcm: Vec<i16>,
}

impl Recognizer for VoskRecognizer {
    #[allow(clippy::cast_possible_truncation)]
    fn accept(&mut self, samples: &[f32]) -> Result<Vec<TranscriptEvent>, DecoderError> {
        self.pcm.clear();
        self.pcm
            .extend(samples.iter().map(|s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16));

        let state = self
            .inner
            .accept_waveform(&self.pcm)
            .map_err(|e| DecoderError::Decode(format!("{e:?}")))?;

        let mut events = Vec::new();
        match state {
            vosk::DecodingState::Finalized => {
                let text = self
                    .inner
                    .result()
                    .single()
                    .map(|r| r.text.to_string())
                    .unwrap_or_default();
                self.last_partial.clear();
                events.push(TranscriptEvent::Final(text));
            }
            vosk::DecodingState::Running => {
                let partial = self.inner.partial_result().partial;
                if !partial.is_empty() && partial != self.last_partial {
                    self.last_partial = partial.to_string();
                    events.push(TranscriptEvent::Partial(self.last_partial.clone()));
                }
            }
            vosk::DecodingState::Failed => {
                return Err(DecoderError::Decode("vosk failed to decode the frame".to_string()));
            }
        }
        Ok(events)
    }
}
