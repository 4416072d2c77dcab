//! Microphone capture using cpal
//!
//! The cpal stream is not `Send` on every platform, so it lives on a
//! dedicated audio thread for its whole life. The thread reports whether the
//! device started, then parks until the session is closed and drops the
//! stream itself.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleRate, SizedSample, Stream, StreamConfig};

use super::framing::{FrameAssembler, downmix};
use super::{AudioSource, CaptureError, CaptureSession, CaptureSpec, FrameSink};

/// How long to wait for the audio thread to bring the device up, including
/// any microphone permission prompt
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

enum AudioCmd {
    Stop,
}

/// Captures audio from a host input device
#[derive(Debug, Clone, Default)]
pub struct MicrophoneSource {
    device: Option<String>,
}

impl MicrophoneSource {
    /// Capture from the named device, or the host default when `None`
    #[must_use]
    pub const fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

impl AudioSource for MicrophoneSource {
    fn name(&self) -> &str {
        self.device.as_deref().unwrap_or("default microphone")
    }

    fn open(
        &self,
        spec: &CaptureSpec,
        sink: FrameSink,
    ) -> Result<Box<dyn CaptureSession>, CaptureError> {
        if spec.echo_cancellation || spec.noise_suppression {
            tracing::debug!(
                echo_cancellation = spec.echo_cancellation,
                noise_suppression = spec.noise_suppression,
                "host audio processing is not exposed by cpal, capturing raw input"
            );
        }

        let device = spec.device.clone().or_else(|| self.device.clone());
        let thread_spec = spec.clone();
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (init_tx, init_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("wakeword-mic".to_string())
            .spawn(move || run_audio_thread(device.as_deref(), &thread_spec, sink, &cmd_rx, &init_tx))
            .map_err(|e| CaptureError::DeviceUnavailable(format!("audio thread: {e}")))?;

        match wait_for_start(&init_rx, INIT_TIMEOUT) {
            Ok(()) => {
                tracing::debug!(sample_rate = spec.sample_rate, "microphone session opened");
                Ok(Box::new(MicrophoneSession {
                    cmd_tx: Some(cmd_tx),
                    handle: Some(handle),
                    sample_rate: spec.sample_rate,
                }))
            }
            Err(e @ CaptureError::StartTimeout(_)) => {
                // The thread exits on its own once it sees the dropped sender
                drop(cmd_tx);
                Err(e)
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }
}

/// Wait for the audio thread to report that the stream is running
///
/// A host permission prompt keeps the thread blocked until the user answers,
/// so running out of time is reported separately from a missing device.
fn wait_for_start(
    init_rx: &Receiver<Result<(), CaptureError>>,
    timeout: Duration,
) -> Result<(), CaptureError> {
    match init_rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "audio device did not start, a permission prompt may still be open"
            );
            Err(CaptureError::StartTimeout(format!(
                "no response from the audio device after {}s",
                timeout.as_secs()
            )))
        }
        Err(RecvTimeoutError::Disconnected) => Err(CaptureError::DeviceUnavailable(
            "audio thread exited during start-up".to_string(),
        )),
    }
}

/// An open microphone stream owned by its audio thread
struct MicrophoneSession {
    cmd_tx: Option<Sender<AudioCmd>>,
    handle: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl CaptureSession for MicrophoneSession {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(AudioCmd::Stop);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("audio thread panicked during shutdown");
            }
            tracing::debug!("microphone session closed");
        }
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for MicrophoneSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_audio_thread(
    device_name: Option<&str>,
    spec: &CaptureSpec,
    sink: FrameSink,
    cmd_rx: &Receiver<AudioCmd>,
    init_tx: &Sender<Result<(), CaptureError>>,
) {
    let stream = match build_stream(device_name, spec, sink) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = init_tx.send(Err(classify_backend_error(&e.to_string())));
        return;
    }

    if init_tx.send(Ok(())).is_err() {
        // Opener gave up waiting
        return;
    }

    // Park until told to stop or the session handle is gone
    let _ = cmd_rx.recv();
    drop(stream);
    tracing::debug!("microphone stream released");
}

fn build_stream(
    device_name: Option<&str>,
    spec: &CaptureSpec,
    sink: FrameSink,
) -> Result<Stream, CaptureError> {
    let host = cpal::default_host();
    let device = select_device(&host, device_name)?;

    let (config, sample_format) = select_config(&device, spec)?;
    let channels = usize::from(config.channels);
    let assembler = FrameAssembler::new(config.sample_rate.0, spec.sample_rate, spec.frame_size)?;

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        device_rate = config.sample_rate.0,
        channels,
        format = ?sample_format,
        "audio capture initialized"
    );

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, channels, assembler, sink),
        cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, channels, assembler, sink),
        cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, channels, assembler, sink),
        cpal::SampleFormat::I32 => build_input::<i32>(&device, &config, channels, assembler, sink),
        cpal::SampleFormat::I8 => build_input::<i8>(&device, &config, channels, assembler, sink),
        other => {
            return Err(CaptureError::Unsupported(format!(
                "sample format {other:?}"
            )));
        }
    };

    stream.map_err(|e| match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable("input device is not available".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => CaptureError::Unsupported(e.to_string()),
        other => classify_backend_error(&other.to_string()),
    })
}

fn select_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let Some(name) = name else {
        return host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no input device available".to_string()));
    };

    host.input_devices()
        .map_err(|e| classify_backend_error(&e.to_string()))?
        .find(|d| d.name().is_ok_and(|n| n == name))
        .ok_or_else(|| CaptureError::DeviceUnavailable(format!("input device '{name}' not found")))
}

/// Prefer a native mono config at the target rate, then any config at the
/// target rate, then the device default (resampled)
fn select_config(
    device: &cpal::Device,
    spec: &CaptureSpec,
) -> Result<(StreamConfig, cpal::SampleFormat), CaptureError> {
    let target = SampleRate(spec.sample_rate);
    let ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| classify_backend_error(&e.to_string()))?
        .collect();

    let at_target = |mono_only: bool| {
        ranges.iter().find(|c| {
            (!mono_only || c.channels() == spec.channels)
                && c.min_sample_rate() <= target
                && c.max_sample_rate() >= target
        })
    };

    if let Some(range) = at_target(true).or_else(|| at_target(false)) {
        let supported = range.clone().with_sample_rate(target);
        return Ok((supported.config(), supported.sample_format()));
    }

    let fallback = device
        .default_input_config()
        .map_err(|e| CaptureError::Unsupported(e.to_string()))?;
    Ok((fallback.config(), fallback.sample_format()))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    mut assembler: FrameAssembler,
    sink: FrameSink,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: Sample + SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let fault_sink = sink.clone();
    let mut converted = Vec::new();

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            converted.clear();
            converted.extend(data.iter().map(|s| s.to_sample::<f32>()));
            let mono = downmix(&converted, channels);
            if let Err(e) = assembler.push(&mono, |frame| {
                sink.push(frame);
            }) {
                sink.fault(e);
            }
        },
        move |err| {
            tracing::error!(error = %err, "audio capture error");
            let error = match err {
                cpal::StreamError::DeviceNotAvailable => {
                    CaptureError::Device("input device disconnected".to_string())
                }
                other => CaptureError::Device(other.to_string()),
            };
            fault_sink.fault(error);
        },
        None,
    )
}

/// Map a backend message to the capture taxonomy
fn classify_backend_error(message: &str) -> CaptureError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        CaptureError::PermissionDenied(message.to_string())
    } else {
        CaptureError::DeviceUnavailable(message.to_string())
    }
}
