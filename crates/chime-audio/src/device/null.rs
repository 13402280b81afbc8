//! Null playback device (no sound output).
//!
//! [`NullHost`] models the single physical device of the platform audio
//! service: opening a second [`NullDevice`] while one is open fails the way
//! the real service would. The device itself records every configuration
//! call and derives playback progress from a manually advanced clock, which
//! makes voice state transitions observable without hardware.
//!
//! Handles share their state, so tests can keep a clone as a probe while
//! the session owns the original.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chime_core::{Error, Result, SampleFormat};
use parking_lot::Mutex;

use super::{BufferId, Device, SourceId, SourceState};

/// Device operations that can have a failure injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullOp {
    CreateContext,
    MakeContextCurrent,
    ListenerPosition,
    ListenerVelocity,
    ListenerOrientation,
    CreateSource,
    SourcePosition,
    SourceVelocity,
    SourcePitch,
    SourceGain,
    SourceLooping,
    CreateBuffer,
    Upload,
    BindBuffer,
    Play,
    SourceState,
}

/// The single physical device behind any number of open attempts.
#[derive(Debug, Clone, Default)]
pub struct NullHost {
    open: Arc<Mutex<bool>>,
}

impl NullHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the device. Fails while a previous handle is still open.
    pub fn open_device(&self) -> Result<NullDevice> {
        let mut open = self.open.lock();
        if *open {
            return Err(Error::Device("device already open".to_string()));
        }
        *open = true;
        Ok(NullDevice {
            host: self.clone(),
            state: Arc::new(Mutex::new(NullState::default())),
        })
    }
}

#[derive(Debug)]
struct NullBuffer {
    payload: Option<UploadRecord>,
}

#[derive(Debug, Clone, Copy)]
struct UploadRecord {
    format: SampleFormat,
    sample_rate: u32,
    len: usize,
}

#[derive(Debug)]
struct NullVoice {
    id: SourceId,
    pitch: f32,
    gain: f32,
    looping: bool,
    bound: Option<BufferId>,
    playback: Option<PlaybackWindow>,
    started: bool,
}

#[derive(Debug, Clone, Copy)]
struct PlaybackWindow {
    started_at: Duration,
    duration: Duration,
}

#[derive(Debug, Default)]
struct NullState {
    now: Duration,
    context_created: bool,
    context_current: bool,
    listener_position: Option<[f32; 3]>,
    listener_velocity: Option<[f32; 3]>,
    listener_orientation: Option<[f32; 6]>,
    next_handle: u64,
    source: Option<NullVoice>,
    buffers: HashMap<BufferId, NullBuffer>,
    bind_count: usize,
    play_count: usize,
    failures: HashSet<NullOp>,
    pending_error: Option<String>,
}

impl NullState {
    fn check(&mut self, op: NullOp) -> Result<()> {
        if self.failures.remove(&op) {
            return Err(Error::Device(format!("injected failure: {op:?}")));
        }
        Ok(())
    }

    fn voice_mut(&mut self, source: SourceId) -> Result<&mut NullVoice> {
        self.source
            .as_mut()
            .filter(|v| v.id == source)
            .ok_or_else(|| Error::Device(format!("unknown source {source:?}")))
    }
}

/// Null playback device with a fake clock.
#[derive(Debug, Clone)]
pub struct NullDevice {
    host: NullHost,
    state: Arc<Mutex<NullState>>,
}

impl NullDevice {
    /// Inject a single failure into the next call of the given operation.
    pub fn fail_once(&self, op: NullOp) {
        self.state.lock().failures.insert(op);
    }

    /// Advance the fake clock. Playback progress is derived from it.
    pub fn advance(&self, elapsed: Duration) {
        self.state.lock().now += elapsed;
    }

    /// Record an asynchronous device error, as the real service would
    /// between calls. Drained by `drain_errors`.
    pub fn raise_error(&self, message: impl Into<String>) {
        self.state.lock().pending_error = Some(message.into());
    }

    /// Number of bind operations issued so far.
    pub fn bind_count(&self) -> usize {
        self.state.lock().bind_count
    }

    /// Number of play commands issued so far.
    pub fn play_count(&self) -> usize {
        self.state.lock().play_count
    }

    /// Number of buffers currently allocated on the device.
    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// The buffer currently bound to the voice, if any.
    pub fn bound_buffer(&self) -> Option<BufferId> {
        self.state.lock().source.as_ref().and_then(|v| v.bound)
    }

    /// Whether the context still exists and is current.
    pub fn context_current(&self) -> bool {
        let state = self.state.lock();
        state.context_created && state.context_current
    }

    /// Listener configuration recorded at session construction.
    pub fn listener(&self) -> (Option<[f32; 3]>, Option<[f32; 3]>, Option<[f32; 6]>) {
        let state = self.state.lock();
        (
            state.listener_position,
            state.listener_velocity,
            state.listener_orientation,
        )
    }

    /// Voice configuration `(pitch, gain, looping)` recorded at construction.
    pub fn voice_config(&self) -> Option<(f32, f32, bool)> {
        let state = self.state.lock();
        state.source.as_ref().map(|v| (v.pitch, v.gain, v.looping))
    }

    fn playback_duration(state: &NullState, buffer: BufferId) -> Duration {
        let Some(record) = state.buffers.get(&buffer).and_then(|b| b.payload) else {
            return Duration::ZERO;
        };
        let frames = record.len / record.format.frame_size();
        Duration::from_secs_f64(frames as f64 / f64::from(record.sample_rate))
    }
}

impl Device for NullDevice {
    fn create_context(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.check(NullOp::CreateContext)?;
        state.context_created = true;
        Ok(())
    }

    fn make_context_current(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.check(NullOp::MakeContextCurrent)?;
        if !state.context_created {
            return Err(Error::Device("no context created".to_string()));
        }
        state.context_current = true;
        Ok(())
    }

    fn set_listener_position(&mut self, position: [f32; 3]) -> Result<()> {
        let mut state = self.state.lock();
        state.check(NullOp::ListenerPosition)?;
        state.listener_position = Some(position);
        Ok(())
    }

    fn set_listener_velocity(&mut self, velocity: [f32; 3]) -> Result<()> {
        let mut state = self.state.lock();
        state.check(NullOp::ListenerVelocity)?;
        state.listener_velocity = Some(velocity);
        Ok(())
    }

    fn set_listener_orientation(&mut self, orientation: [f32; 6]) -> Result<()> {
        let mut state = self.state.lock();
        state.check(NullOp::ListenerOrientation)?;
        state.listener_orientation = Some(orientation);
        Ok(())
    }

    fn create_source(&mut self) -> Result<SourceId> {
        let mut state = self.state.lock();
        state.check(NullOp::CreateSource)?;
        if state.source.is_some() {
            return Err(Error::Device("the single voice is already allocated".to_string()));
        }
        state.next_handle += 1;
        let id = SourceId(state.next_handle);
        state.source = Some(NullVoice {
            id,
            pitch: 1.0,
            gain: 1.0,
            looping: false,
            bound: None,
            playback: None,
            started: false,
        });
        Ok(id)
    }

    fn set_source_position(&mut self, source: SourceId, _position: [f32; 3]) -> Result<()> {
        let mut state = self.state.lock();
        state.check(NullOp::SourcePosition)?;
        state.voice_mut(source).map(|_| ())
    }

    fn set_source_velocity(&mut self, source: SourceId, _velocity: [f32; 3]) -> Result<()> {
        let mut state = self.state.lock();
        state.check(NullOp::SourceVelocity)?;
        state.voice_mut(source).map(|_| ())
    }

    fn set_source_pitch(&mut self, source: SourceId, pitch: f32) -> Result<()> {
        let mut state = self.state.lock();
        state.check(NullOp::SourcePitch)?;
        state.voice_mut(source)?.pitch = pitch;
        Ok(())
    }

    fn set_source_gain(&mut self, source: SourceId, gain: f32) -> Result<()> {
        let mut state = self.state.lock();
        state.check(NullOp::SourceGain)?;
        state.voice_mut(source)?.gain = gain;
        Ok(())
    }

    fn set_source_looping(&mut self, source: SourceId, looping: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.check(NullOp::SourceLooping)?;
        state.voice_mut(source)?.looping = looping;
        Ok(())
    }

    fn create_buffer(&mut self) -> Result<BufferId> {
        let mut state = self.state.lock();
        state.check(NullOp::CreateBuffer)?;
        state.next_handle += 1;
        let id = BufferId(state.next_handle);
        state.buffers.insert(id, NullBuffer { payload: None });
        Ok(id)
    }

    fn upload(
        &mut self,
        buffer: BufferId,
        format: SampleFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.check(NullOp::Upload)?;
        let slot = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| Error::Device(format!("unknown buffer {buffer:?}")))?;
        slot.payload = Some(UploadRecord {
            format,
            sample_rate,
            len: data.len(),
        });
        Ok(())
    }

    fn bind_buffer(&mut self, source: SourceId, buffer: BufferId) -> Result<()> {
        let mut state = self.state.lock();
        state.check(NullOp::BindBuffer)?;
        if !state.buffers.contains_key(&buffer) {
            return Err(Error::Device(format!("unknown buffer {buffer:?}")));
        }
        state.bind_count += 1;
        let voice = state.voice_mut(source)?;
        voice.playback = None;
        voice.bound = Some(buffer);
        Ok(())
    }

    fn play(&mut self, source: SourceId) -> Result<()> {
        let mut state = self.state.lock();
        state.check(NullOp::Play)?;
        let buffer = state
            .voice_mut(source)?
            .bound
            .ok_or_else(|| Error::Device("no buffer bound to voice".to_string()))?;
        let window = PlaybackWindow {
            started_at: state.now,
            duration: Self::playback_duration(&state, buffer),
        };
        state.play_count += 1;
        let voice = state.voice_mut(source)?;
        voice.playback = Some(window);
        voice.started = true;
        Ok(())
    }

    fn source_state(&mut self, source: SourceId) -> Result<SourceState> {
        let mut state = self.state.lock();
        state.check(NullOp::SourceState)?;
        if let Some(msg) = state.pending_error.take() {
            return Err(Error::Device(format!("pending device error: {msg}")));
        }
        let now = state.now;
        let voice = state.voice_mut(source)?;
        if !voice.started {
            return Ok(SourceState::Initial);
        }
        let playing = voice
            .playback
            .is_some_and(|w| now < w.started_at + w.duration);
        Ok(if playing {
            SourceState::Playing
        } else {
            SourceState::Stopped
        })
    }

    fn drain_errors(&mut self) {
        self.state.lock().pending_error = None;
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        let mut state = self.state.lock();
        state.buffers.remove(&buffer);
        if let Some(voice) = state.source.as_mut() {
            if voice.bound == Some(buffer) {
                voice.playback = None;
                voice.bound = None;
            }
        }
    }

    fn delete_source(&mut self, source: SourceId) {
        let mut state = self.state.lock();
        if state.source.as_ref().is_some_and(|v| v.id == source) {
            state.source = None;
        }
    }

    fn destroy_context(&mut self) {
        let mut state = self.state.lock();
        state.context_current = false;
        state.context_created = false;
    }

    fn close(&mut self) {
        {
            let mut state = self.state.lock();
            state.buffers.clear();
            state.source = None;
        }
        *self.host.open.lock() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_enforces_single_open() {
        let host = NullHost::new();
        let mut first = host.open_device().unwrap();
        let err = host.open_device().unwrap_err();
        assert!(matches!(err, Error::Device(_)));

        first.close();
        assert!(host.open_device().is_ok());
    }

    #[test]
    fn test_fake_clock_drives_voice_state() {
        let host = NullHost::new();
        let mut device = host.open_device().unwrap();
        device.create_context().unwrap();
        device.make_context_current().unwrap();
        let source = device.create_source().unwrap();
        let buffer = device.create_buffer().unwrap();
        // One second of 16-bit mono at 8 kHz.
        device
            .upload(buffer, SampleFormat::Mono16, &[0u8; 16000], 8000)
            .unwrap();
        device.bind_buffer(source, buffer).unwrap();

        assert_eq!(device.source_state(source).unwrap(), SourceState::Initial);

        device.play(source).unwrap();
        assert_eq!(device.source_state(source).unwrap(), SourceState::Playing);

        device.advance(Duration::from_millis(999));
        assert_eq!(device.source_state(source).unwrap(), SourceState::Playing);

        device.advance(Duration::from_millis(2));
        assert_eq!(device.source_state(source).unwrap(), SourceState::Stopped);
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let host = NullHost::new();
        let mut device = host.open_device().unwrap();
        device.fail_once(NullOp::CreateBuffer);
        assert!(device.create_buffer().is_err());
        assert!(device.create_buffer().is_ok());
    }

    #[test]
    fn test_pending_error_surfaces_in_state_query_until_drained() {
        let host = NullHost::new();
        let mut device = host.open_device().unwrap();
        device.create_context().unwrap();
        device.make_context_current().unwrap();
        let source = device.create_source().unwrap();

        device.raise_error("underrun");
        device.drain_errors();
        assert_eq!(device.source_state(source).unwrap(), SourceState::Initial);

        device.raise_error("underrun");
        assert!(device.source_state(source).is_err());
    }
}
