//! Microphone capture pipeline for the live session
//!
//! Opens the default input device, mixes the callback samples down to mono
//! PCM16, downsamples to the wire rate, frames the result into fixed-size
//! blocks, and emits each block as a base64 media chunk on a channel.
//!
//! The cpal stream lives on a dedicated thread (streams are not `Send`);
//! `stop()` signals that thread to drop the stream, which releases the
//! microphone.

use std::sync::mpsc as std_mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Sample, SampleFormat, Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::codec;
use super::AudioError;

/// One encoded block of microphone audio, ready for the session send path.
#[derive(Debug, Clone)]
pub struct MediaChunk {
    /// Base64-encoded little-endian PCM16 samples
    pub data: String,
    /// e.g. "audio/pcm;rate=16000"
    pub mime_type: String,
}

/// Handle to a running capture pipeline.
///
/// Dropping the handle stops capture; `stop()` is explicit and idempotent.
pub struct CapturePipeline {
    stop_tx: Option<std_mpsc::Sender<()>>,
}

impl CapturePipeline {
    /// Start capturing from the default input device.
    ///
    /// Every `frame_size` samples (at `wire_rate`) produce one [`MediaChunk`]
    /// on `chunk_tx`. Fails without leaving any device open if the microphone
    /// cannot be acquired.
    pub fn start(
        chunk_tx: mpsc::Sender<MediaChunk>,
        wire_rate: u32,
        frame_size: usize,
    ) -> Result<Self, AudioError> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), AudioError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        std::thread::spawn(move || {
            let stream = match build_capture_stream(chunk_tx, wire_rate, frame_size) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // Park until stop; dropping the stream releases the microphone.
            let _ = stop_rx.recv();
            drop(stream);
            debug!("Capture thread exiting");
        });

        ready_rx
            .recv()
            .map_err(|_| AudioError::StreamCreationFailed("capture thread died".to_string()))??;

        info!("Capture pipeline started ({} samples per frame)", frame_size);

        Ok(Self {
            stop_tx: Some(stop_tx),
        })
    }

    /// Detach the tap and release the microphone. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
            info!("Capture pipeline stopped");
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_capture_stream(
    chunk_tx: mpsc::Sender<MediaChunk>,
    wire_rate: u32,
    frame_size: usize,
) -> Result<Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;

    info!("Using audio input device: {:?}", device.name());

    let supported_config = device
        .default_input_config()
        .map_err(|_| AudioError::NoSupportedConfig)?;

    info!(
        "Capture config: {} Hz, {} channels, {:?}",
        supported_config.sample_rate().0,
        supported_config.channels(),
        supported_config.sample_format()
    );

    let sample_format = supported_config.sample_format();
    let config: StreamConfig = supported_config.into();

    let framer = Framer::new(
        chunk_tx,
        config.channels,
        config.sample_rate.0,
        wire_rate,
        frame_size,
    );

    let stream = match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, framer),
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, framer),
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, framer),
        _ => Err(AudioError::NoSupportedConfig),
    }?;

    stream
        .play()
        .map_err(|e| AudioError::StreamCreationFailed(format!("Failed to start stream: {}", e)))?;

    Ok(stream)
}

fn build_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    mut framer: Framer,
) -> Result<Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let err_fn = |err| tracing::error!("Audio input stream error: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                framer.push(data);
            },
            err_fn,
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::PermissionDenied("input device not available".to_string())
            }
            other => AudioError::StreamCreationFailed(other.to_string()),
        })
}

/// Accumulates callback batches into fixed-size wire frames.
struct Framer {
    chunk_tx: mpsc::Sender<MediaChunk>,
    channels: usize,
    device_rate: u32,
    wire_rate: u32,
    frame_size: usize,
    mime_type: String,
    buffer: Vec<i16>,
    dropped: u64,
}

impl Framer {
    fn new(
        chunk_tx: mpsc::Sender<MediaChunk>,
        channels: u16,
        device_rate: u32,
        wire_rate: u32,
        frame_size: usize,
    ) -> Self {
        Self {
            chunk_tx,
            channels: channels.max(1) as usize,
            device_rate,
            wire_rate,
            frame_size,
            mime_type: format!("audio/pcm;rate={}", wire_rate),
            buffer: Vec::with_capacity(frame_size * 2),
            dropped: 0,
        }
    }

    fn push<T>(&mut self, data: &[T])
    where
        T: cpal::Sample,
        f32: cpal::FromSample<T>,
    {
        // Mix interleaved channels down to mono PCM16
        let mono: Vec<i16> = data
            .chunks(self.channels)
            .map(|frame| {
                let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
                let avg = (sum / frame.len() as f32).clamp(-1.0, 1.0);
                (avg * i16::MAX as f32) as i16
            })
            .collect();

        let resampled = codec::downsample(&mono, self.device_rate, self.wire_rate);
        self.buffer.extend(resampled);

        while self.buffer.len() >= self.frame_size {
            let frame: Vec<i16> = self.buffer.drain(..self.frame_size).collect();
            let chunk = MediaChunk {
                data: codec::encode(&codec::samples_to_bytes(&frame)),
                mime_type: self.mime_type.clone(),
            };

            // The callback must never block; drop the frame if the session
            // send path has fallen behind.
            if self.chunk_tx.try_send(chunk).is_err() {
                self.dropped += 1;
                if self.dropped % 50 == 1 {
                    warn!("Capture channel full, {} frames dropped", self.dropped);
                }
            }
        }
    }
}
