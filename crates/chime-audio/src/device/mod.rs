//! Playback device backends.
//!
//! The [`Device`] trait models the native audio service the session drives:
//! a context over an output device, device-resident sample buffers, and a
//! hardware voice (source) that plays one bound buffer at a time. The
//! session runs against [`CpalDevice`] in production and [`NullDevice`] in
//! tests.

use chime_core::{Result, SampleFormat};

pub mod cpal_backend;
pub mod null;

pub use cpal_backend::CpalDevice;
pub use null::{NullDevice, NullHost, NullOp};

/// Handle to a device-resident sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// Handle to a hardware voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u64);

/// Playback state of a voice, as reported by the device.
///
/// `Initial` is the state of a voice that has never been played; a voice
/// whose bound sound ran out of samples reports `Stopped` without any
/// caller intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceState {
    #[default]
    Initial,
    Playing,
    Stopped,
}

/// Interface to the native audio service.
///
/// Construction-path operations return `Result` and are checked step by
/// step by the session; teardown operations are infallible by design, so a
/// failing destructor has nothing to report. Implementations are not
/// expected to be thread-safe: callers serialize access externally.
pub trait Device {
    /// Create the playback context over the opened device.
    fn create_context(&mut self) -> Result<()>;
    /// Make the context current. The session keeps it current for its
    /// entire lifetime.
    fn make_context_current(&mut self) -> Result<()>;

    fn set_listener_position(&mut self, position: [f32; 3]) -> Result<()>;
    fn set_listener_velocity(&mut self, velocity: [f32; 3]) -> Result<()>;
    /// Orientation is an "at" vector followed by an "up" vector.
    fn set_listener_orientation(&mut self, orientation: [f32; 6]) -> Result<()>;

    fn create_source(&mut self) -> Result<SourceId>;
    fn set_source_position(&mut self, source: SourceId, position: [f32; 3]) -> Result<()>;
    fn set_source_velocity(&mut self, source: SourceId, velocity: [f32; 3]) -> Result<()>;
    fn set_source_pitch(&mut self, source: SourceId, pitch: f32) -> Result<()>;
    fn set_source_gain(&mut self, source: SourceId, gain: f32) -> Result<()>;
    fn set_source_looping(&mut self, source: SourceId, looping: bool) -> Result<()>;

    /// Allocate an empty device buffer.
    fn create_buffer(&mut self) -> Result<BufferId>;
    /// Upload interleaved PCM into a buffer. Whether the device copies the
    /// bytes or aliases them is backend-defined; callers that need the
    /// payload afterwards keep their own copy.
    fn upload(
        &mut self,
        buffer: BufferId,
        format: SampleFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<()>;

    /// Bind a buffer to a voice so that playing the voice produces that
    /// buffer's audio. Binding while playing stops the voice.
    fn bind_buffer(&mut self, source: SourceId, buffer: BufferId) -> Result<()>;
    /// Start (or restart, from the beginning) playback of the bound buffer.
    /// Returns immediately; rendering happens on the platform audio thread.
    fn play(&mut self, source: SourceId) -> Result<()>;
    /// Query the voice's playback state.
    fn source_state(&mut self, source: SourceId) -> Result<SourceState>;

    /// Discard any accumulated error state. The device flags errors
    /// asynchronously, so a query is only trustworthy after a drain.
    fn drain_errors(&mut self);

    fn delete_buffer(&mut self, buffer: BufferId);
    fn delete_source(&mut self, source: SourceId);
    fn destroy_context(&mut self);
    /// Close the device. Called last during teardown.
    fn close(&mut self);
}
