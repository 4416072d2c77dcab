//! WAV file playback as a capture source

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use super::framing::{FrameAssembler, downmix};
use super::{AudioSource, CaptureError, CaptureSession, CaptureSpec, FrameSink};

/// Replays a WAV file as if it were a microphone
#[derive(Debug, Clone)]
pub struct WavFileSource {
    path: PathBuf,
    realtime: bool,
    name: String,
}

impl WavFileSource {
    /// Replay `path` in real time
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self {
            path,
            realtime: true,
            name,
        }
    }

    /// Pace frames at their natural duration (`true`) or as fast as possible
    #[must_use]
    pub const fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioSource for WavFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(
        &self,
        spec: &CaptureSpec,
        sink: FrameSink,
    ) -> Result<Box<dyn CaptureSession>, CaptureError> {
        let frames = read_frames(&self.path, spec)?;
        let stop = Arc::new(AtomicBool::new(false));
        let pace = self.realtime.then(|| spec.frame_duration());

        tracing::info!(
            path = %self.path.display(),
            frames = frames.len(),
            realtime = self.realtime,
            "replaying wav file"
        );

        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("wakeword-wav".to_string())
            .spawn(move || {
                for frame in frames {
                    if thread_stop.load(Ordering::SeqCst) || !sink.push(frame) {
                        break;
                    }
                    if let Some(pace) = pace {
                        thread::sleep(pace);
                    }
                }
                tracing::debug!("wav replay finished");
            })
            .map_err(|e| CaptureError::DeviceUnavailable(format!("playback thread: {e}")))?;

        Ok(Box::new(WavSession {
            stop,
            handle: Some(handle),
            sample_rate: spec.sample_rate,
        }))
    }
}

struct WavSession {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl CaptureSession for WavSession {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("wav playback thread panicked");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for WavSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Decode the whole file into frames matching `spec`
fn read_frames(path: &Path, spec: &CaptureSpec) -> Result<Vec<Vec<f32>>, CaptureError> {
    let mut reader = hound::WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(io) => {
            CaptureError::DeviceUnavailable(format!("{}: {io}", path.display()))
        }
        other => CaptureError::Unsupported(format!("{}: {other}", path.display())),
    })?;

    let wav = reader.spec();
    let samples = read_samples(&mut reader, wav)
        .map_err(|e| CaptureError::Unsupported(format!("{}: {e}", path.display())))?;

    let mono = downmix(&samples, usize::from(wav.channels));
    let mut assembler = FrameAssembler::new(wav.sample_rate, spec.sample_rate, spec.frame_size)?;
    let mut frames = Vec::new();
    assembler.push(&mono, |frame| frames.push(frame))?;
    assembler.flush(|frame| frames.push(frame));
    Ok(frames)
}

/// Read interleaved samples as `f32` in `[-1.0, 1.0]`
#[allow(clippy::cast_precision_loss)]
fn read_samples<R: std::io::Read>(
    reader: &mut hound::WavReader<R>,
    wav: hound::WavSpec,
) -> Result<Vec<f32>, hound::Error> {
    match wav.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect(),
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (wav.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::frame_queue;

    fn write_wav(path: &Path, rate: u32, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn spec(frame_size: usize) -> CaptureSpec {
        CaptureSpec {
            frame_size,
            queue_frames: 64,
            ..CaptureSpec::default()
        }
    }

    #[tokio::test]
    async fn test_replays_every_frame_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speech.wav");
        write_wav(&path, 16_000, 1, &[16_384; 10]);

        let (sink, mut rx) = frame_queue(64);
        let source = WavFileSource::new(&path).realtime(false);
        let mut session = source.open(&spec(4), sink).unwrap();

        let mut frames = Vec::new();
        for _ in 0..3 {
            frames.push(rx.next().await.unwrap());
        }
        session.close();
        session.close();
        assert!(!session.is_open());

        assert_eq!(frames.iter().map(|f| f.sequence()).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!((frames[0].samples()[0] - 0.5).abs() < 1e-4);
        // Last frame is zero-padded
        assert_eq!(frames[2].samples(), &[0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_stereo_is_downmixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 16_000, 2, &[16_384, 0, 16_384, 0]);

        let frames = read_frames(&path, &spec(2)).unwrap();
        assert_eq!(frames.len(), 1);
        assert!((frames[0][0] - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_missing_file_is_device_unavailable() {
        let (sink, _rx) = frame_queue(4);
        let result = WavFileSource::new("/nonexistent/audio.wav").open(&spec(4), sink);
        assert!(matches!(result, Err(CaptureError::DeviceUnavailable(_))));
    }
}
