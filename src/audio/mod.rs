//! Audio pipeline: microphone capture → ring buffer → detection loop.
//! Capture runs on cpal's callback thread and only writes samples; feature
//! extraction and classification run on a dedicated detection thread that
//! drains the ring buffer as fast as full frames arrive.

pub mod analyzer;
pub mod ring_buffer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use self::analyzer::FrameAnalyzer;
use self::ring_buffer::RingBuffer;

use crate::config::DetectorConfig;
use crate::error::{DetectorError, Result};
use crate::events::{DetectorEvent, EventBus};
use crate::metrics::DetectorMetrics;
use crate::state::{DetectorState, StateMachine};
use crate::wake::{ClapClassifier, Tick};

/// Ring capacity in seconds; enough slack that a stalled tick never drops
/// the frame containing a clap transient.
const RING_BUFFER_SECS: f32 = 2.0;

/// Shared between the capture callback and the detection thread.
struct SharedAudioState {
    ring: Mutex<RingBuffer>,
    device_lost: AtomicBool,
}

/// Runtime knobs adjustable while a session is live.
pub(crate) struct Controls {
    sensitivity: RwLock<f32>,
}

impl Controls {
    pub(crate) fn new(sensitivity: f32) -> Self {
        Self {
            sensitivity: RwLock::new(sensitivity),
        }
    }

    pub(crate) fn sensitivity(&self) -> f32 {
        *self.sensitivity.read()
    }

    pub(crate) fn set_sensitivity(&self, value: f32) {
        *self.sensitivity.write() = value;
    }
}

/// A live microphone session: the cpal stream (not `Send`, so it stays with
/// the handle on the starting thread), the detection thread, and the token
/// that cancels it. Dropping the session tears everything down.
pub struct AudioSession {
    id: Uuid,
    stream: cpal::Stream,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl AudioSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancel the detection loop, wait for it to exit, and pause capture.
    /// Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        if let Err(e) = self.stream.pause() {
            warn!(session = %self.id, error = %e, "pause on stop failed");
        }
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the detection thread needs, bundled so the spawn site stays
/// readable.
pub(crate) struct SessionContext {
    pub config: DetectorConfig,
    pub controls: Arc<Controls>,
    pub state: Arc<StateMachine>,
    pub events: EventBus,
    pub metrics: Arc<DetectorMetrics>,
    /// Last wake instant, kept across sessions on the detector instance.
    pub wake_clock: Arc<RwLock<Option<Instant>>>,
    pub last_error: Arc<RwLock<Option<DetectorError>>>,
    pub on_wake: Box<dyn Fn() + Send + 'static>,
}

/// Acquire the default input device, start capture, and spawn the detection
/// thread. The caller has already transitioned to `RequestingPermission` and
/// installed `cancel`; a cancellation observed after the stream is granted
/// releases it without ever entering `Calibrating`.
pub(crate) fn start_session(ctx: SessionContext, cancel: CancellationToken) -> Result<AudioSession> {
    let id = Uuid::new_v4();
    let acquire_started = Instant::now();

    let shared = Arc::new(SharedAudioState {
        ring: Mutex::new(RingBuffer::new(ctx.config.sample_rate, RING_BUFFER_SECS)),
        device_lost: AtomicBool::new(false),
    });

    let stream = build_capture_stream(&ctx.config, &id, Arc::clone(&shared))?;
    stream.play().map_err(DetectorError::from_play_stream)?;
    ctx.metrics.session_start.record(acquire_started.elapsed());
    info!(session = %id, "capture stream started");

    // stop() may have raced the permission grant; release the stream now.
    if cancel.is_cancelled() {
        info!(session = %id, "cancelled during permission grant, releasing stream");
        return Err(DetectorError::Cancelled);
    }

    if ctx.state.transition(DetectorState::Calibrating).is_err() {
        return Err(DetectorError::Cancelled);
    }

    let classifier = ClapClassifier::new(&ctx.config, *ctx.wake_clock.read());
    let loop_cancel = cancel.clone();
    let loop_shared = Arc::clone(&shared);
    let thread = std::thread::Builder::new()
        .name("clapwake-detect".into())
        .spawn(move || run_detection_loop(id, loop_shared, loop_cancel, classifier, ctx))
        .map_err(|e| DetectorError::Backend(format!("failed to spawn detection thread: {e}")))?;

    Ok(AudioSession {
        id,
        stream,
        cancel,
        thread: Some(thread),
    })
}

/// Build the cpal input stream. The callback only downmixes to mono and
/// writes the ring buffer; all analysis happens on the detection thread.
fn build_capture_stream(
    config: &DetectorConfig,
    id: &Uuid,
    shared: Arc<SharedAudioState>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| DetectorError::DeviceUnavailable("no default input device".into()))?;

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let channels = config.channels as usize;
    let data_shared = Arc::clone(&shared);
    let err_shared = shared;
    let err_id = *id;

    device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mut ring = data_shared.ring.lock();
                if channels == 1 {
                    ring.write(data);
                } else {
                    for frame in data.chunks_exact(channels) {
                        let mono = frame.iter().sum::<f32>() / channels as f32;
                        ring.write(&[mono]);
                    }
                }
            },
            move |err| {
                error!(session = %err_id, error = %err, "capture stream error");
                err_shared.device_lost.store(true, Ordering::SeqCst);
            },
            None,
        )
        .map_err(DetectorError::from_build_stream)
}

/// Detection loop. Frames are consumed back-to-back while the ring holds a
/// full frame; the loop sleeps only when starved. Capture produces frames
/// faster than a fixed-cadence loop would drain them, so an unconditional
/// sleep would let a backlog build until the ring laps and every cooldown
/// comparison runs against seconds-old audio.
/// Calibration strictly precedes classification; device loss and cancellation
/// both land in `Stopped` with a `Stopped` event, never a silent spin.
fn run_detection_loop(
    id: Uuid,
    shared: Arc<SharedAudioState>,
    cancel: CancellationToken,
    mut classifier: ClapClassifier,
    ctx: SessionContext,
) {
    let fft_size = ctx.config.fft_size;
    let tick_interval = ctx.config.tick_interval();
    let mut frame = vec![0f32; fft_size];
    let mut analyzer = FrameAnalyzer::new(fft_size, ctx.config.hf_split);
    let mut calibration_started: Option<Instant> = Some(Instant::now());

    info!(session = %id, "detection loop started");

    loop {
        if cancel.is_cancelled() {
            info!(session = %id, "detection loop cancelled");
            break;
        }
        if shared.device_lost.load(Ordering::SeqCst) {
            error!(session = %id, "capture device lost, stopping session");
            *ctx.last_error.write() =
                Some(DetectorError::DeviceLost("capture stream ended".into()));
            ctx.events.emit(DetectorEvent::DeviceLost);
            break;
        }

        let available = shared.ring.lock().available();
        if available < fft_size {
            std::thread::sleep(tick_interval);
            continue;
        }
        let read = shared.ring.lock().read(&mut frame);
        if read < fft_size {
            continue;
        }

        // Single clock read per frame; the tick cost sample and every
        // cooldown/window check below see the same `now`.
        let now = Instant::now();
        let features = analyzer.analyze(&frame);
        let tuning = ctx.config.tuning(ctx.controls.sensitivity());

        match classifier.observe(now, &features, &tuning) {
            Tick::Calibrating { .. } => {}
            Tick::Calibrated { baseline } => {
                if let Some(started) = calibration_started.take() {
                    ctx.metrics.calibration.record(started.elapsed());
                }
                let _ = ctx.state.transition(DetectorState::Listening);
                ctx.events.emit(DetectorEvent::CalibrationComplete { baseline });
            }
            Tick::Quiet => {}
            Tick::Clap { volume, hf_ratio } => {
                ctx.events.emit(DetectorEvent::ClapDetected { volume, hf_ratio });
            }
            Tick::Wake { volume, hf_ratio } => {
                ctx.events.emit(DetectorEvent::ClapDetected { volume, hf_ratio });
                ctx.events.emit(DetectorEvent::WakeFired);
                *ctx.wake_clock.write() = Some(now);
                // Expected to be cheap; the host hands off to async work.
                (ctx.on_wake)();
            }
        }
        ctx.metrics.detect_tick.record(now.elapsed());
    }

    ctx.state.force_stop();
    ctx.events.emit(DetectorEvent::Stopped);
    info!(session = %id, "detection loop exited");
}
