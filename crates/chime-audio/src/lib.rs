//! # chime-audio
//!
//! Single-voice audio playback session for chime.
//!
//! Features:
//! - One output device, one context, one hardware voice
//! - Named sound registry with decoded PCM retained for the session's life
//! - cpal output backend plus a clocked null backend for tests
//!
//! The session is deliberately single-threaded: audio rendering happens on
//! a thread owned by the platform audio service, and polling
//! [`Session::is_playing`] is the only way to observe progress.

pub mod decode;
pub mod device;
pub mod registry;
pub mod session;

pub use decode::{SoundDecoder, WavDecoder};
pub use device::{BufferId, Device, SourceId, SourceState};
pub use session::Session;
