//! Gapless playback scheduling for decoded model audio
//!
//! The provider delivers audio in short chunks with network jitter; the
//! scheduler lines them up back-to-back on the output clock so playback is
//! gapless and in arrival order. An interruption signal flushes everything
//! that has not played yet.
//!
//! The scheduling bookkeeping is separated from the device behind the
//! [`AudioSink`] trait so it can be tested without opening a speaker.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tracing::{debug, info, warn};

use super::AudioError;

/// Destination for scheduled audio. `now()` is the output clock in seconds;
/// it keeps advancing for the life of the sink (playback of silence counts).
pub trait AudioSink: Send {
    /// Current position of the output clock, in seconds.
    fn now(&self) -> f64;

    /// Enqueue frames to begin playing exactly at `start` seconds.
    fn play_at(&mut self, start: f64, frames: Vec<f32>) -> Result<(), AudioError>;

    /// Immediately silence and discard everything enqueued.
    fn stop_all(&mut self);

    /// Release the output device. Default is a no-op.
    fn close(&mut self) {}
}

/// A chunk that has been handed to the sink and not yet finished playing.
#[derive(Debug, Clone, Copy)]
struct ScheduledSource {
    start: f64,
    duration: f64,
}

/// Schedules decoded chunks back-to-back on the sink's clock.
///
/// Invariant: the cursor never moves backward and is never behind the output
/// clock when a chunk is scheduled, which guarantees gapless, non-overlapping
/// playback in arrival order.
pub struct PlaybackScheduler<S: AudioSink> {
    sink: S,
    /// Sample rate the incoming frames are encoded at
    sample_rate: u32,
    /// Next start time on the output clock, in seconds
    next_start_time: f64,
    /// Sources that have been scheduled and not yet completed
    active_sources: Vec<ScheduledSource>,
}

impl<S: AudioSink> PlaybackScheduler<S> {
    pub fn new(sink: S, sample_rate: u32) -> Self {
        Self {
            sink,
            sample_rate,
            next_start_time: 0.0,
            active_sources: Vec::new(),
        }
    }

    /// Schedule a decoded chunk to play immediately after everything already
    /// scheduled. Returns the start time assigned to the chunk.
    pub fn schedule_chunk(&mut self, frames: Vec<f32>) -> Result<f64, AudioError> {
        let now = self.sink.now();

        // Sources whose end time has passed have completed naturally.
        self.active_sources.retain(|s| s.start + s.duration > now);

        if self.next_start_time < now {
            self.next_start_time = now;
        }

        let start = self.next_start_time;
        let duration = frames.len() as f64 / self.sample_rate as f64;

        self.sink.play_at(start, frames)?;

        self.active_sources.push(ScheduledSource { start, duration });
        self.next_start_time += duration;

        Ok(start)
    }

    /// Stop every in-flight source immediately, clear the set, and reset the
    /// cursor to zero. Used when the model is interrupted mid-utterance.
    pub fn flush_all(&mut self) {
        self.sink.stop_all();
        self.active_sources.clear();
        self.next_start_time = 0.0;
    }

    /// Flush and release the output device.
    pub fn teardown(&mut self) {
        self.flush_all();
        self.sink.close();
    }

    /// Current cursor position in seconds.
    pub fn cursor(&self) -> f64 {
        self.next_start_time
    }

    /// Number of sources scheduled and not yet completed.
    pub fn active_len(&self) -> usize {
        self.active_sources.len()
    }
}

// ============================================================================
// cpal-backed sink
// ============================================================================

struct QueuedChunk {
    start_frame: u64,
    frames: Vec<f32>,
}

struct SinkShared {
    queued: Vec<QueuedChunk>,
    frames_elapsed: u64,
}

/// Speaker output running on a dedicated thread (cpal streams are not
/// `Send`). The stream callback mixes queued chunks at their start offsets
/// and fills the rest with silence, so the clock advances continuously.
pub struct SpeakerSink {
    shared: Arc<Mutex<SinkShared>>,
    /// Device output rate
    device_rate: u32,
    /// Integer upsampling ratio from the provider rate to the device rate
    upsample: usize,
    stop_tx: Option<std_mpsc::Sender<()>>,
}

impl SpeakerSink {
    /// Open the default output device and start the output stream.
    ///
    /// `source_rate` is the rate the provider's audio arrives at; if the
    /// device rate is an integer multiple, frames are repeated to match.
    /// A zero rate (possible via a hand-edited settings file) is rejected
    /// before any device is touched.
    pub fn open(source_rate: u32) -> Result<Self, AudioError> {
        if source_rate == 0 {
            return Err(AudioError::NoSupportedConfig);
        }

        let shared = Arc::new(Mutex::new(SinkShared {
            queued: Vec::new(),
            frames_elapsed: 0,
        }));

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, AudioError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let shared_for_thread = Arc::clone(&shared);

        // The stream lives on this thread; dropping it releases the device.
        std::thread::spawn(move || {
            let stream = match build_output_stream(source_rate, shared_for_thread) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // Park until close; a disconnected channel also stops playback.
            let _ = stop_rx.recv();
            drop(stream);
            debug!("Speaker sink thread exiting");
        });

        let device_rate = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamCreationFailed("output thread died".to_string()))??;

        let upsample = if device_rate % source_rate == 0 {
            (device_rate / source_rate) as usize
        } else {
            warn!(
                "Output device rate {} is not a multiple of {}, playback pitch may shift",
                device_rate, source_rate
            );
            1
        };

        info!(
            "Speaker sink open: device {} Hz, source {} Hz",
            device_rate, source_rate
        );

        Ok(Self {
            shared,
            device_rate,
            upsample,
            stop_tx: Some(stop_tx),
        })
    }
}

impl AudioSink for SpeakerSink {
    fn now(&self) -> f64 {
        let shared = self.shared.lock().unwrap();
        shared.frames_elapsed as f64 / self.device_rate as f64
    }

    fn play_at(&mut self, start: f64, frames: Vec<f32>) -> Result<(), AudioError> {
        let frames = if self.upsample > 1 {
            let mut out = Vec::with_capacity(frames.len() * self.upsample);
            for f in frames {
                for _ in 0..self.upsample {
                    out.push(f);
                }
            }
            out
        } else {
            frames
        };

        let start_frame = (start * self.device_rate as f64).round() as u64;

        let mut shared = self.shared.lock().unwrap();
        shared.queued.push(QueuedChunk {
            start_frame,
            frames,
        });
        Ok(())
    }

    fn stop_all(&mut self) {
        let mut shared = self.shared.lock().unwrap();
        shared.queued.clear();
    }

    fn close(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for SpeakerSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_output_stream(
    source_rate: u32,
    shared: Arc<Mutex<SinkShared>>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;

    info!("Using audio output device: {:?}", device.name());

    let default_config = device
        .default_output_config()
        .map_err(|_| AudioError::NoSupportedConfig)?;

    let channels = default_config.channels();
    let default_rate = default_config.sample_rate().0;

    // Prefer the device default rate; if the source rate divides it we can
    // upsample by repetition, otherwise try the source rate directly.
    let rate = if default_rate % source_rate == 0 {
        default_rate
    } else {
        source_rate
    };

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |err| tracing::error!("Audio output stream error: {}", err);
    let channel_count = channels as usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut shared = shared.lock().unwrap();
                let frames_needed = data.len() / channel_count;
                let base = shared.frames_elapsed;

                for i in 0..frames_needed {
                    let position = base + i as u64;
                    let mut sample = 0.0f32;
                    for chunk in &shared.queued {
                        if position >= chunk.start_frame
                            && position < chunk.start_frame + chunk.frames.len() as u64
                        {
                            sample = chunk.frames[(position - chunk.start_frame) as usize];
                            break;
                        }
                    }
                    for c in 0..channel_count {
                        data[i * channel_count + c] = sample;
                    }
                }

                shared.frames_elapsed += frames_needed as u64;
                let elapsed = shared.frames_elapsed;
                shared
                    .queued
                    .retain(|c| c.start_frame + c.frames.len() as u64 > elapsed);
            },
            err_fn,
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::PermissionDenied("output device not available".to_string())
            }
            other => AudioError::StreamCreationFailed(other.to_string()),
        })?;

    stream
        .play()
        .map_err(|e| AudioError::StreamCreationFailed(format!("Failed to start stream: {}", e)))?;

    Ok((stream, rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink with a hand-cranked clock that records every play_at call.
    struct MockSink {
        clock: Arc<Mutex<f64>>,
        played: Vec<(f64, usize)>,
        stopped: usize,
        closed: bool,
    }

    impl MockSink {
        fn new() -> (Self, Arc<Mutex<f64>>) {
            let clock = Arc::new(Mutex::new(0.0));
            (
                Self {
                    clock: Arc::clone(&clock),
                    played: Vec::new(),
                    stopped: 0,
                    closed: false,
                },
                clock,
            )
        }
    }

    impl AudioSink for MockSink {
        fn now(&self) -> f64 {
            *self.clock.lock().unwrap()
        }

        fn play_at(&mut self, start: f64, frames: Vec<f32>) -> Result<(), AudioError> {
            self.played.push((start, frames.len()));
            Ok(())
        }

        fn stop_all(&mut self) {
            self.stopped += 1;
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    const RATE: u32 = 24000;

    fn chunk_of(seconds: f64) -> Vec<f32> {
        vec![0.0; (seconds * RATE as f64) as usize]
    }

    #[test]
    fn test_speaker_sink_rejects_zero_source_rate() {
        // Must fail before reaching the device (and before any modulo on
        // the rate), so this runs fine on machines with no audio output.
        assert!(matches!(
            SpeakerSink::open(0),
            Err(AudioError::NoSupportedConfig)
        ));
    }

    #[test]
    fn test_chunks_schedule_back_to_back() {
        let (sink, _clock) = MockSink::new();
        let mut scheduler = PlaybackScheduler::new(sink, RATE);

        let s1 = scheduler.schedule_chunk(chunk_of(0.1)).unwrap();
        let s2 = scheduler.schedule_chunk(chunk_of(0.25)).unwrap();
        let s3 = scheduler.schedule_chunk(chunk_of(0.05)).unwrap();

        // No gaps when the clock never runs ahead of the cursor
        assert_eq!(s1, 0.0);
        assert!((s2 - 0.1).abs() < 1e-9);
        assert!((s3 - 0.35).abs() < 1e-9);
        assert_eq!(scheduler.active_len(), 3);
    }

    #[test]
    fn test_cursor_never_behind_output_clock() {
        let (sink, clock) = MockSink::new();
        let mut scheduler = PlaybackScheduler::new(sink, RATE);

        scheduler.schedule_chunk(chunk_of(0.1)).unwrap();

        // Arrival jitter: clock overtakes the cursor before the next chunk
        *clock.lock().unwrap() = 5.0;
        let start = scheduler.schedule_chunk(chunk_of(0.1)).unwrap();

        assert_eq!(start, 5.0);
        assert!((scheduler.cursor() - 5.1).abs() < 1e-9);
    }

    #[test]
    fn test_start_times_are_ordered_under_jitter() {
        let (sink, clock) = MockSink::new();
        let mut scheduler = PlaybackScheduler::new(sink, RATE);

        let durations = [0.1, 0.3, 0.05, 0.2];
        let mut starts = Vec::new();
        for (i, &d) in durations.iter().enumerate() {
            // Clock creeps forward irregularly between arrivals
            *clock.lock().unwrap() = i as f64 * 0.04;
            starts.push(scheduler.schedule_chunk(chunk_of(d)).unwrap());
        }

        for i in 1..starts.len() {
            assert!(
                starts[i] >= starts[i - 1] + durations[i - 1] - 1e-9,
                "start({}) = {} overlaps previous chunk",
                i,
                starts[i]
            );
        }
    }

    #[test]
    fn test_completed_sources_prune_themselves() {
        let (sink, clock) = MockSink::new();
        let mut scheduler = PlaybackScheduler::new(sink, RATE);

        scheduler.schedule_chunk(chunk_of(0.1)).unwrap();
        scheduler.schedule_chunk(chunk_of(0.1)).unwrap();
        assert_eq!(scheduler.active_len(), 2);

        // Both chunks have finished by t = 1.0
        *clock.lock().unwrap() = 1.0;
        scheduler.schedule_chunk(chunk_of(0.1)).unwrap();
        assert_eq!(scheduler.active_len(), 1);
    }

    #[test]
    fn test_flush_all_clears_sources_and_resets_cursor() {
        let (sink, _clock) = MockSink::new();
        let mut scheduler = PlaybackScheduler::new(sink, RATE);

        scheduler.schedule_chunk(chunk_of(0.1)).unwrap();
        scheduler.schedule_chunk(chunk_of(0.1)).unwrap();

        scheduler.flush_all();

        assert_eq!(scheduler.active_len(), 0);
        assert_eq!(scheduler.cursor(), 0.0);
        assert_eq!(scheduler.sink.stopped, 1);
    }

    #[test]
    fn test_schedule_after_flush_starts_at_clock() {
        let (sink, clock) = MockSink::new();
        let mut scheduler = PlaybackScheduler::new(sink, RATE);

        scheduler.schedule_chunk(chunk_of(0.5)).unwrap();
        *clock.lock().unwrap() = 0.2;
        scheduler.flush_all();

        // Cursor was reset to zero; the clock pulls it forward again
        let start = scheduler.schedule_chunk(chunk_of(0.1)).unwrap();
        assert_eq!(start, 0.2);
    }

    #[test]
    fn test_teardown_closes_sink() {
        let (sink, _clock) = MockSink::new();
        let mut scheduler = PlaybackScheduler::new(sink, RATE);
        scheduler.schedule_chunk(chunk_of(0.1)).unwrap();

        scheduler.teardown();

        assert_eq!(scheduler.active_len(), 0);
        assert!(scheduler.sink.closed);
    }
}
