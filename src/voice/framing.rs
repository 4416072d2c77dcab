//! Turns arbitrary-sized device buffers into fixed-size 16kHz mono frames

use rubato::{FftFixedIn, Resampler};

use super::CaptureError;

/// Input chunk fed to the resampler per pass
const RESAMPLER_CHUNK_IN: usize = 1024;

/// Average interleaved channels down to mono
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Accumulates mono samples, resamples when needed, and emits fixed frames
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
    resampler: Option<Resampling>,
}

struct Resampling {
    inner: FftFixedIn<f32>,
    input: Vec<f32>,
}

impl FrameAssembler {
    /// Create an assembler converting `input_rate` to `output_rate`
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Unsupported`] if no resampler can bridge the rates
    pub fn new(input_rate: u32, output_rate: u32, frame_size: usize) -> Result<Self, CaptureError> {
        if frame_size == 0 {
            return Err(CaptureError::Unsupported("frame size must be positive".to_string()));
        }

        let resampler = if input_rate == output_rate {
            None
        } else {
            tracing::info!(input_rate, output_rate, "resampling capture audio");
            let inner = FftFixedIn::<f32>::new(
                input_rate as usize,
                output_rate as usize,
                RESAMPLER_CHUNK_IN,
                2,
                1,
            )
            .map_err(|e| CaptureError::Unsupported(format!("resampler: {e}")))?;
            Some(Resampling {
                inner,
                input: Vec::with_capacity(RESAMPLER_CHUNK_IN * 2),
            })
        };

        Ok(Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
            resampler,
        })
    }

    /// Feed mono samples at the input rate, emitting every completed frame
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Device`] if resampling fails
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(Vec<f32>)) -> Result<(), CaptureError> {
        match &mut self.resampler {
            None => self.pending.extend_from_slice(samples),
            Some(resampling) => {
                resampling.input.extend_from_slice(samples);
                loop {
                    let needed = resampling.inner.input_frames_next();
                    if resampling.input.len() < needed {
                        break;
                    }
                    let chunk: Vec<f32> = resampling.input.drain(..needed).collect();
                    let out = resampling
                        .inner
                        .process(&[chunk], None)
                        .map_err(|e| CaptureError::Device(format!("resampler: {e}")))?;
                    if let Some(channel) = out.first() {
                        self.pending.extend_from_slice(channel);
                    }
                }
            }
        }

        self.drain_frames(&mut emit);
        Ok(())
    }

    /// Emit whatever is left as a final zero-padded frame
    pub fn flush(&mut self, mut emit: impl FnMut(Vec<f32>)) {
        if self.pending.is_empty() {
            return;
        }
        let mut last = std::mem::take(&mut self.pending);
        last.resize(self.frame_size, 0.0);
        emit(last);
    }

    /// Samples waiting for a full frame
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn drain_frames(&mut self, emit: &mut impl FnMut(Vec<f32>)) {
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            let frame = std::mem::replace(&mut self.pending, rest);
            emit(frame);
        }
    }
}
