//! Real playback device backed by cpal.
//!
//! cpal has no device-resident buffers, so `upload` copies the PCM bytes
//! into host memory and `play` builds a fresh output stream over the bound
//! buffer at its native sample rate and channel count. A shared flag set by
//! the output callback when the samples run out backs `source_state`, and
//! the stream's asynchronous error callback feeds the drainable
//! pending-error slot.
//!
//! `cpal::Stream` is not `Send`, so neither is this backend; the session is
//! single-threaded by design and never needs it to be.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chime_core::{Error, Result, SampleFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{BufferId, Device, SourceId, SourceState};

/// Playback context state captured from the device at creation time.
struct Context {
    sample_format: cpal::SampleFormat,
    current: bool,
}

/// Host-memory copy of an uploaded buffer, shared with the output callback.
struct UploadedBuffer {
    payload: Option<Payload>,
}

#[derive(Clone)]
struct Payload {
    format: SampleFormat,
    sample_rate: u32,
    data: Arc<Vec<u8>>,
}

/// The single hardware voice.
struct Voice {
    id: SourceId,
    gain: f32,
    bound: Option<BufferId>,
    /// Keep the stream alive while the voice plays.
    stream: Option<Stream>,
    /// Set by the output callback once the bound samples are exhausted.
    finished: Option<Arc<AtomicBool>>,
    /// Whether `play` has ever been issued; distinguishes Initial from
    /// Stopped.
    started: bool,
}

/// Playback device over the default cpal output device.
pub struct CpalDevice {
    device: cpal::Device,
    device_name: String,
    context: Option<Context>,
    source: Option<Voice>,
    buffers: HashMap<BufferId, UploadedBuffer>,
    next_handle: u64,
    pending_error: Arc<Mutex<Option<String>>>,
}

impl CpalDevice {
    /// Open the default output device.
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device found".to_string()))?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        info!("opened audio output device: {device_name}");

        Ok(Self {
            device,
            device_name,
            context: None,
            source: None,
            buffers: HashMap::new(),
            next_handle: 1,
            pending_error: Arc::new(Mutex::new(None)),
        })
    }

    /// Name of the underlying output device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn build_stream(
        device: &cpal::Device,
        sample_format: cpal::SampleFormat,
        payload: &Payload,
        gain: f32,
        finished: Arc<AtomicBool>,
        pending_error: Arc<Mutex<Option<String>>>,
    ) -> Result<Stream> {
        match sample_format {
            cpal::SampleFormat::F32 => {
                Self::build_stream_typed::<f32>(device, payload, gain, finished, pending_error)
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream_typed::<i16>(device, payload, gain, finished, pending_error)
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream_typed::<u16>(device, payload, gain, finished, pending_error)
            }
            other => Err(Error::Device(format!(
                "unsupported output sample format: {other:?}"
            ))),
        }
    }

    fn build_stream_typed<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        payload: &Payload,
        gain: f32,
        finished: Arc<AtomicBool>,
        pending_error: Arc<Mutex<Option<String>>>,
    ) -> Result<Stream> {
        let config = StreamConfig {
            channels: payload.format.channels(),
            sample_rate: SampleRate(payload.sample_rate),
            buffer_size: BufferSize::Default,
        };

        let data = Arc::clone(&payload.data);
        let format = payload.format;
        let mut cursor = 0usize;

        let err_fn = move |err: cpal::StreamError| {
            *pending_error.lock() = Some(err.to_string());
        };

        device
            .build_output_stream(
                &config,
                move |out: &mut [T], _: &cpal::OutputCallbackInfo| {
                    for sample in out.iter_mut() {
                        *sample = match next_sample(&data, format, &mut cursor) {
                            Some(s) => T::from_sample(s * gain),
                            None => {
                                finished.store(true, Ordering::Release);
                                T::from_sample(0.0f32)
                            }
                        };
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| Error::Device(format!("failed to build output stream: {e}")))
    }
}

/// Decode the next interleaved PCM sample to f32, advancing the cursor.
fn next_sample(data: &[u8], format: SampleFormat, cursor: &mut usize) -> Option<f32> {
    if format.bits_per_sample() == 8 {
        // 8-bit PCM is unsigned offset-binary
        let byte = *data.get(*cursor)?;
        *cursor += 1;
        Some((f32::from(byte) - 128.0) / 128.0)
    } else {
        let lo = *data.get(*cursor)?;
        let hi = *data.get(*cursor + 1)?;
        *cursor += 2;
        Some(f32::from(i16::from_le_bytes([lo, hi])) / 32768.0)
    }
}

impl Device for CpalDevice {
    fn create_context(&mut self) -> Result<()> {
        let supported = self
            .device
            .default_output_config()
            .map_err(|e| Error::Device(format!("failed to get output config: {e}")))?;
        debug!("output config: {supported:?}");

        self.context = Some(Context {
            sample_format: supported.sample_format(),
            current: false,
        });
        Ok(())
    }

    fn make_context_current(&mut self) -> Result<()> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| Error::Device("no context created".to_string()))?;
        context.current = true;
        Ok(())
    }

    fn set_listener_position(&mut self, _position: [f32; 3]) -> Result<()> {
        // cpal has no listener model; spatialization is fixed at defaults.
        Ok(())
    }

    fn set_listener_velocity(&mut self, _velocity: [f32; 3]) -> Result<()> {
        Ok(())
    }

    fn set_listener_orientation(&mut self, _orientation: [f32; 6]) -> Result<()> {
        Ok(())
    }

    fn create_source(&mut self) -> Result<SourceId> {
        if self.source.is_some() {
            return Err(Error::Device("the single voice is already allocated".to_string()));
        }
        let id = SourceId(self.next_handle());
        self.source = Some(Voice {
            id,
            gain: 1.0,
            bound: None,
            stream: None,
            finished: None,
            started: false,
        });
        debug!("created voice {id:?}");
        Ok(id)
    }

    fn set_source_position(&mut self, source: SourceId, _position: [f32; 3]) -> Result<()> {
        self.voice_mut(source).map(|_| ())
    }

    fn set_source_velocity(&mut self, source: SourceId, _velocity: [f32; 3]) -> Result<()> {
        self.voice_mut(source).map(|_| ())
    }

    fn set_source_pitch(&mut self, source: SourceId, pitch: f32) -> Result<()> {
        if (pitch - 1.0).abs() > f32::EPSILON {
            return Err(Error::Device("pitch adjustment is not supported".to_string()));
        }
        self.voice_mut(source).map(|_| ())
    }

    fn set_source_gain(&mut self, source: SourceId, gain: f32) -> Result<()> {
        self.voice_mut(source)?.gain = gain;
        Ok(())
    }

    fn set_source_looping(&mut self, source: SourceId, looping: bool) -> Result<()> {
        if looping {
            return Err(Error::Device("looping playback is not supported".to_string()));
        }
        self.voice_mut(source).map(|_| ())
    }

    fn create_buffer(&mut self) -> Result<BufferId> {
        let id = BufferId(self.next_handle());
        self.buffers.insert(id, UploadedBuffer { payload: None });
        Ok(id)
    }

    fn upload(
        &mut self,
        buffer: BufferId,
        format: SampleFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<()> {
        let slot = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| Error::Device(format!("unknown buffer {buffer:?}")))?;
        slot.payload = Some(Payload {
            format,
            sample_rate,
            data: Arc::new(data.to_vec()),
        });
        debug!("uploaded {} bytes into {buffer:?} ({format:?}, {sample_rate} Hz)", data.len());
        Ok(())
    }

    fn bind_buffer(&mut self, source: SourceId, buffer: BufferId) -> Result<()> {
        if !self.buffers.contains_key(&buffer) {
            return Err(Error::Device(format!("unknown buffer {buffer:?}")));
        }
        let voice = self.voice_mut(source)?;
        // Rebinding stops any in-flight playback.
        voice.stream = None;
        voice.finished = None;
        voice.bound = Some(buffer);
        Ok(())
    }

    fn play(&mut self, source: SourceId) -> Result<()> {
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| Error::Device("no context created".to_string()))?;
        let sample_format = context.sample_format;

        let voice = self
            .source
            .as_mut()
            .filter(|v| v.id == source)
            .ok_or_else(|| Error::Device(format!("unknown source {source:?}")))?;
        let buffer = voice
            .bound
            .ok_or_else(|| Error::Device("no buffer bound to voice".to_string()))?;
        let gain = voice.gain;

        let payload = self
            .buffers
            .get(&buffer)
            .and_then(|b| b.payload.clone())
            .ok_or_else(|| Error::Device(format!("buffer {buffer:?} has no sample data")))?;

        // Restarting always begins from the first sample.
        voice.stream = None;
        let finished = Arc::new(AtomicBool::new(false));
        let stream = Self::build_stream(
            &self.device,
            sample_format,
            &payload,
            gain,
            Arc::clone(&finished),
            Arc::clone(&self.pending_error),
        )?;
        stream
            .play()
            .map_err(|e| Error::Device(format!("failed to start output stream: {e}")))?;

        voice.stream = Some(stream);
        voice.finished = Some(finished);
        voice.started = true;
        Ok(())
    }

    fn source_state(&mut self, source: SourceId) -> Result<SourceState> {
        if let Some(msg) = self.pending_error.lock().take() {
            return Err(Error::Device(format!("output stream error: {msg}")));
        }

        let voice = self.voice_mut(source)?;
        if !voice.started {
            return Ok(SourceState::Initial);
        }
        let playing = voice
            .finished
            .as_ref()
            .is_some_and(|f| !f.load(Ordering::Acquire));
        Ok(if playing {
            SourceState::Playing
        } else {
            SourceState::Stopped
        })
    }

    fn drain_errors(&mut self) {
        let _ = self.pending_error.lock().take();
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
        if let Some(voice) = self.source.as_mut() {
            if voice.bound == Some(buffer) {
                voice.stream = None;
                voice.finished = None;
                voice.bound = None;
            }
        }
    }

    fn delete_source(&mut self, source: SourceId) {
        if self.source.as_ref().is_some_and(|v| v.id == source) {
            // Dropping the voice drops its stream and stops playback.
            self.source = None;
        }
    }

    fn destroy_context(&mut self) {
        self.context = None;
    }

    fn close(&mut self) {
        self.buffers.clear();
        self.source = None;
        self.context = None;
        debug!("closed audio output device: {}", self.device_name);
    }
}

impl CpalDevice {
    fn voice_mut(&mut self, source: SourceId) -> Result<&mut Voice> {
        self.source
            .as_mut()
            .filter(|v| v.id == source)
            .ok_or_else(|| Error::Device(format!("unknown source {source:?}")))
    }
}
