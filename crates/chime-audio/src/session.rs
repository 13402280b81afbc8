//! Audio playback session.
//!
//! A [`Session`] owns the playback device, its context, the sound registry,
//! and the single hardware voice, and tears them down in reverse order of
//! acquisition. Hold exactly one session per process: the backend owns
//! process-wide audio service state, and a second open fails at the device.
//!
//! The session is not thread-safe. Callers using it from more than one
//! thread must serialize access themselves; there is no locking inside.

use std::path::Path;
use std::time::Duration;

use chime_core::Result;
use tracing::{debug, info};

use crate::decode::{SoundDecoder, WavDecoder};
use crate::device::{CpalDevice, Device, SourceId, SourceState};
use crate::registry::{SoundEntry, SoundRegistry};

const LISTENER_POSITION: [f32; 3] = [0.0, 0.0, 1.0];
const LISTENER_VELOCITY: [f32; 3] = [0.0, 0.0, 1.0];
// "At" vector, then "up" vector.
const LISTENER_ORIENTATION: [f32; 6] = [0.0, 0.0, 1.0, 0.0, 1.0, 0.0];

const VOICE_POSITION: [f32; 3] = [0.0, 0.0, 0.0];
const VOICE_VELOCITY: [f32; 3] = [0.0, 0.0, 0.0];
const VOICE_PITCH: f32 = 1.0;
const VOICE_GAIN: f32 = 1.0;

/// Single-voice playback session over a [`Device`] backend.
pub struct Session<D: Device> {
    device: D,
    decoder: Box<dyn SoundDecoder>,
    registry: SoundRegistry,
    voice: SourceId,
    /// Name of the sound currently bound to the voice. Tracked so that
    /// replaying the bound sound skips the rebind; correctness never
    /// depends on it.
    bound: Option<String>,
    closed: bool,
}

impl<D: Device + std::fmt::Debug> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device)
            .field("registry", &self.registry)
            .field("voice", &self.voice)
            .field("bound", &self.bound)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Session<CpalDevice> {
    /// Open a session over the default output device with the WAV decoder.
    pub fn open_default() -> Result<Self> {
        Self::open(CpalDevice::open()?, WavDecoder::new())
    }
}

impl<D: Device> Session<D> {
    /// Open a session over an already-opened device.
    ///
    /// Runs the full construction sequence, each step checked individually:
    /// context creation, making it current, the three listener defaults,
    /// voice allocation, and the five voice defaults. Any failure names the
    /// step and releases the device before returning.
    pub fn open(mut device: D, decoder: impl SoundDecoder + 'static) -> Result<Self> {
        let voice = match Self::configure(&mut device) {
            Ok(voice) => voice,
            Err(err) => {
                device.close();
                return Err(err);
            }
        };
        info!("audio session opened");

        Ok(Self {
            device,
            decoder: Box::new(decoder),
            registry: SoundRegistry::new(),
            voice,
            bound: None,
            closed: false,
        })
    }

    fn configure(device: &mut D) -> Result<SourceId> {
        device
            .create_context()
            .map_err(|e| e.at_stage("create context"))?;
        device
            .make_context_current()
            .map_err(|e| e.at_stage("make context current"))?;

        device
            .set_listener_position(LISTENER_POSITION)
            .map_err(|e| e.at_stage("set listener position"))?;
        device
            .set_listener_velocity(LISTENER_VELOCITY)
            .map_err(|e| e.at_stage("set listener velocity"))?;
        device
            .set_listener_orientation(LISTENER_ORIENTATION)
            .map_err(|e| e.at_stage("set listener orientation"))?;

        let voice = device
            .create_source()
            .map_err(|e| e.at_stage("create voice"))?;
        device
            .set_source_position(voice, VOICE_POSITION)
            .map_err(|e| e.at_stage("set voice position"))?;
        device
            .set_source_velocity(voice, VOICE_VELOCITY)
            .map_err(|e| e.at_stage("set voice velocity"))?;
        device
            .set_source_pitch(voice, VOICE_PITCH)
            .map_err(|e| e.at_stage("set voice pitch"))?;
        device
            .set_source_gain(voice, VOICE_GAIN)
            .map_err(|e| e.at_stage("set voice gain"))?;
        device
            .set_source_looping(voice, false)
            .map_err(|e| e.at_stage("set voice looping"))?;

        Ok(voice)
    }

    /// Decode a sound file and register it under `name`.
    ///
    /// An empty name registers the sound under the file path itself.
    /// Duplicate names fail fast with `DuplicateName` before anything is
    /// allocated; accidental re-registration should be noticed, not
    /// silently absorbed. The device buffer is released again if any later
    /// step of the load fails.
    pub fn load(&mut self, path: impl AsRef<Path>, name: &str) -> Result<()> {
        let path = path.as_ref();
        let name = if name.is_empty() {
            path.to_string_lossy().into_owned()
        } else {
            name.to_string()
        };
        self.registry.ensure_vacant(&name)?;

        let buffer = self
            .device
            .create_buffer()
            .map_err(|e| e.at_stage("create buffer"))?;

        match self.fill_buffer(buffer, path) {
            Ok(entry) => {
                debug!(
                    "loaded {} as \"{name}\" ({:?}, {} Hz, {} bytes)",
                    path.display(),
                    entry.format,
                    entry.sample_rate,
                    entry.data.len()
                );
                self.registry.insert(name, entry)
            }
            Err(err) => {
                self.device.delete_buffer(buffer);
                Err(err)
            }
        }
    }

    fn fill_buffer(&mut self, buffer: crate::device::BufferId, path: &Path) -> Result<SoundEntry> {
        let sound = self.decoder.decode(path)?;
        let format = sound.format()?;
        self.device
            .upload(buffer, format, &sound.data, sound.sample_rate)
            .map_err(|e| e.at_stage("upload samples"))?;

        // The device may or may not have copied the payload; the entry
        // keeps the bytes alive either way.
        Ok(SoundEntry {
            buffer,
            sample_rate: sound.sample_rate,
            format,
            data: sound.data,
        })
    }

    /// Start playback of a registered sound from its beginning.
    ///
    /// Rebinds the voice only when `name` differs from the currently bound
    /// sound; the play command is issued unconditionally, so replaying a
    /// bound sound restarts it. Does not block; poll [`Self::is_playing`]
    /// to observe completion.
    pub fn play(&mut self, name: &str) -> Result<()> {
        let buffer = self.registry.get(name)?.buffer;

        if self.bound.as_deref() != Some(name) {
            self.device
                .bind_buffer(self.voice, buffer)
                .map_err(|e| e.at_stage("bind buffer to voice"))?;
            self.bound = Some(name.to_string());
        }

        self.device
            .play(self.voice)
            .map_err(|e| e.at_stage("play voice"))?;
        debug!("playing \"{name}\"");
        Ok(())
    }

    /// Whether the voice is currently producing audio.
    ///
    /// Drains any error state the device accumulated since the last call
    /// before querying; without the drain the query result cannot be
    /// trusted. Stale errors are deliberately discarded rather than
    /// surfaced, since they belong to an operation that already reported
    /// its own failure.
    ///
    /// Rendering happens on the platform audio thread and there is no
    /// completion callback, so polling this is the only way to observe a
    /// sound finishing.
    pub fn is_playing(&mut self) -> Result<bool> {
        self.device.drain_errors();
        let state = self
            .device
            .source_state(self.voice)
            .map_err(|e| e.at_stage("query voice state"))?;
        Ok(state == SourceState::Playing)
    }

    /// Block until the voice goes idle, polling at `poll_interval`.
    ///
    /// Explicit blocking alternative to busy-polling [`Self::is_playing`];
    /// the voice state is only sampled once per interval.
    pub fn wait_until_finished(&mut self, poll_interval: Duration) -> Result<()> {
        while self.is_playing()? {
            std::thread::sleep(poll_interval);
        }
        Ok(())
    }

    /// Name of the sound currently bound to the voice.
    pub fn bound_sound(&self) -> Option<&str> {
        self.bound.as_deref()
    }

    /// The registered sounds.
    pub fn registry(&self) -> &SoundRegistry {
        &self.registry
    }

    /// Best-effort teardown, in reverse order of acquisition: every
    /// entry's device buffer (the retained bytes drop with the entries),
    /// then the voice, the context, and the device. Never fails; a failing
    /// destructor has nothing useful to report. Idempotent, and run by
    /// `Drop` if not called explicitly.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for entry in self.registry.drain() {
            self.device.delete_buffer(entry.buffer);
        }
        self.bound = None;
        self.device.delete_source(self.voice);
        self.device.destroy_context();
        self.device.close();
        info!("audio session closed");
    }
}

impl<D: Device> Drop for Session<D> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{NullDevice, NullHost, NullOp};
    use chime_core::{DecodedSound, Error};
    use std::collections::HashMap;

    /// Decoder stub with canned payloads keyed by path.
    #[derive(Default)]
    struct StubDecoder {
        sounds: HashMap<String, DecodedSound>,
    }

    impl StubDecoder {
        fn with(mut self, path: &str, sound: DecodedSound) -> Self {
            self.sounds.insert(path.to_string(), sound);
            self
        }
    }

    impl SoundDecoder for StubDecoder {
        fn decode(&self, path: &Path) -> Result<DecodedSound> {
            self.sounds
                .get(path.to_string_lossy().as_ref())
                .cloned()
                .ok_or_else(|| Error::Decode(format!("failed to open {}", path.display())))
        }
    }

    /// PCM payload of the given shape, `secs` long.
    fn tone(bits: u16, channels: u16, sample_rate: u32, secs: f64) -> DecodedSound {
        let frame_size = usize::from(bits / 8) * usize::from(channels);
        let frames = (f64::from(sample_rate) * secs) as usize;
        DecodedSound {
            sample_rate,
            channels,
            bits_per_sample: bits,
            data: vec![0x40; frames * frame_size],
        }
    }

    fn open_session(decoder: StubDecoder) -> (Session<NullDevice>, NullDevice) {
        let host = NullHost::new();
        let device = host.open_device().unwrap();
        let probe = device.clone();
        (Session::open(device, decoder).unwrap(), probe)
    }

    #[test]
    fn test_all_supported_formats_load_and_play() {
        for (bits, channels) in [(8, 1), (8, 2), (16, 1), (16, 2)] {
            let decoder = StubDecoder::default().with("tone.wav", tone(bits, channels, 44100, 0.5));
            let (mut session, _probe) = open_session(decoder);

            session.load("tone.wav", "tone").unwrap();
            session.play("tone").unwrap();
            assert!(
                session.is_playing().unwrap(),
                "{bits}-bit {channels}-channel sound should be playing"
            );
        }
    }

    #[test]
    fn test_construction_configures_listener_and_voice() {
        let (_session, probe) = open_session(StubDecoder::default());

        let (position, velocity, orientation) = probe.listener();
        assert_eq!(position, Some(LISTENER_POSITION));
        assert_eq!(velocity, Some(LISTENER_VELOCITY));
        assert_eq!(orientation, Some(LISTENER_ORIENTATION));
        assert_eq!(probe.voice_config(), Some((1.0, 1.0, false)));
        assert!(probe.context_current());
    }

    #[test]
    fn test_construction_failure_names_the_step() {
        let host = NullHost::new();
        let device = host.open_device().unwrap();
        device.fail_once(NullOp::ListenerVelocity);

        let err = Session::open(device, StubDecoder::default()).unwrap_err();
        assert!(matches!(err, Error::Device(_)));
        assert!(err.to_string().contains("set listener velocity"));

        // The failed construction released the device.
        assert!(host.open_device().is_ok());
    }

    #[test]
    fn test_second_session_fails_while_first_is_open() {
        let host = NullHost::new();
        let (session, _probe) = {
            let device = host.open_device().unwrap();
            let probe = device.clone();
            (Session::open(device, StubDecoder::default()).unwrap(), probe)
        };

        let err = host.open_device().unwrap_err();
        assert!(matches!(err, Error::Device(msg) if msg.contains("already open")));

        drop(session);
        assert!(host.open_device().is_ok());
    }

    #[test]
    fn test_empty_name_defaults_to_path() {
        let decoder = StubDecoder::default().with("beep.wav", tone(16, 1, 8000, 0.1));
        let (mut session, _probe) = open_session(decoder);

        session.load("beep.wav", "").unwrap();
        assert!(session.registry().contains("beep.wav"));

        let err = session.load("beep.wav", "").unwrap_err();
        assert!(matches!(err, Error::DuplicateName(name) if name == "beep.wav"));

        let err = session.play("missing").unwrap_err();
        assert!(matches!(err, Error::NotFound(name) if name == "missing"));
    }

    #[test]
    fn test_duplicate_name_rejected_even_for_different_content() {
        let decoder = StubDecoder::default()
            .with("a.wav", tone(16, 1, 8000, 0.1))
            .with("b.wav", tone(8, 2, 44100, 2.0));
        let (mut session, probe) = open_session(decoder);

        session.load("a.wav", "beep").unwrap();
        let buffers_after_first = probe.live_buffers();

        let err = session.load("b.wav", "beep").unwrap_err();
        assert!(matches!(err, Error::DuplicateName(_)));
        // Fail-fast: nothing was allocated for the rejected load.
        assert_eq!(probe.live_buffers(), buffers_after_first);
    }

    #[test]
    fn test_play_unknown_name_leaves_voice_untouched() {
        let decoder = StubDecoder::default().with("a.wav", tone(16, 1, 8000, 0.1));
        let (mut session, probe) = open_session(decoder);
        session.load("a.wav", "a").unwrap();

        let err = session.play("nope").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(probe.bind_count(), 0);
        assert_eq!(probe.play_count(), 0);
        assert_eq!(session.bound_sound(), None);
    }

    #[test]
    fn test_playback_stops_when_samples_run_out() {
        let decoder = StubDecoder::default().with("a.wav", tone(16, 1, 8000, 1.0));
        let (mut session, probe) = open_session(decoder);
        session.load("a.wav", "a").unwrap();
        session.play("a").unwrap();

        assert!(session.is_playing().unwrap());
        probe.advance(Duration::from_millis(990));
        assert!(session.is_playing().unwrap());
        probe.advance(Duration::from_millis(20));
        // No stop call exists; the voice goes idle on its own.
        assert!(!session.is_playing().unwrap());
    }

    #[test]
    fn test_rebind_only_on_sound_change() {
        let decoder = StubDecoder::default()
            .with("a.wav", tone(16, 1, 8000, 1.0))
            .with("b.wav", tone(16, 2, 8000, 1.0));
        let (mut session, probe) = open_session(decoder);
        session.load("a.wav", "a").unwrap();
        session.load("b.wav", "b").unwrap();

        session.play("a").unwrap();
        let bound_to_a = probe.bound_buffer();
        session.play("b").unwrap();
        session.play("a").unwrap();

        // One bind per switch: a, b, then back to a.
        assert_eq!(probe.bind_count(), 3);
        assert_eq!(probe.play_count(), 3);
        assert_eq!(probe.bound_buffer(), bound_to_a);
        assert_eq!(session.bound_sound(), Some("a"));
    }

    #[test]
    fn test_replay_restarts_without_rebinding() {
        let decoder = StubDecoder::default().with("a.wav", tone(16, 1, 8000, 1.0));
        let (mut session, probe) = open_session(decoder);
        session.load("a.wav", "a").unwrap();

        session.play("a").unwrap();
        probe.advance(Duration::from_millis(800));
        session.play("a").unwrap();
        probe.advance(Duration::from_millis(800));

        assert_eq!(probe.bind_count(), 1);
        assert_eq!(probe.play_count(), 2);
        // The restart began from the first sample, so the voice is still
        // within the second run.
        assert!(session.is_playing().unwrap());
    }

    #[test]
    fn test_failed_decode_releases_device_buffer() {
        let (mut session, probe) = open_session(StubDecoder::default());

        let err = session.load("absent.wav", "x").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(probe.live_buffers(), 0);
        assert!(session.registry().is_empty());
    }

    #[test]
    fn test_unsupported_format_releases_device_buffer() {
        let decoder = StubDecoder::default().with("deep.wav", tone(24, 1, 8000, 0.1));
        let (mut session, probe) = open_session(decoder);

        let err = session.load("deep.wav", "deep").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
        assert!(err.to_string().contains("bit depth"));
        assert_eq!(probe.live_buffers(), 0);
    }

    #[test]
    fn test_failed_upload_releases_device_buffer() {
        let decoder = StubDecoder::default().with("a.wav", tone(16, 1, 8000, 0.1));
        let (mut session, probe) = open_session(decoder);
        probe.fail_once(NullOp::Upload);

        let err = session.load("a.wav", "a").unwrap_err();
        assert!(err.to_string().contains("upload samples"));
        assert_eq!(probe.live_buffers(), 0);

        // A retry with the same name is possible; nothing was registered.
        session.load("a.wav", "a").unwrap();
    }

    #[test]
    fn test_is_playing_drains_stale_device_errors() {
        let decoder = StubDecoder::default().with("a.wav", tone(16, 1, 8000, 1.0));
        let (mut session, probe) = open_session(decoder);
        session.load("a.wav", "a").unwrap();
        session.play("a").unwrap();

        probe.raise_error("buffer underrun");
        // The stale error is drained, not surfaced.
        assert!(session.is_playing().unwrap());
    }

    #[test]
    fn test_play_failure_keeps_previous_binding() {
        let decoder = StubDecoder::default()
            .with("a.wav", tone(16, 1, 8000, 1.0))
            .with("b.wav", tone(16, 1, 8000, 1.0));
        let (mut session, probe) = open_session(decoder);
        session.load("a.wav", "a").unwrap();
        session.load("b.wav", "b").unwrap();
        session.play("a").unwrap();

        probe.fail_once(NullOp::BindBuffer);
        let err = session.play("b").unwrap_err();
        assert!(err.to_string().contains("bind buffer"));
        // Bound name only advances after a successful rebind.
        assert_eq!(session.bound_sound(), Some("a"));

        // The next attempt rebinds and succeeds.
        session.play("b").unwrap();
        assert_eq!(session.bound_sound(), Some("b"));
    }

    #[test]
    fn test_wait_until_finished_returns_after_completion() {
        let decoder = StubDecoder::default().with("a.wav", tone(16, 1, 8000, 0.0));
        let (mut session, _probe) = open_session(decoder);
        session.load("a.wav", "a").unwrap();
        session.play("a").unwrap();

        // Zero-length sound: the voice is already idle.
        session
            .wait_until_finished(Duration::from_millis(1))
            .unwrap();
        assert!(!session.is_playing().unwrap());
    }

    #[test]
    fn test_close_releases_everything_and_is_idempotent() {
        let decoder = StubDecoder::default()
            .with("a.wav", tone(16, 1, 8000, 0.1))
            .with("b.wav", tone(8, 2, 8000, 0.1));
        let (mut session, probe) = open_session(decoder);
        session.load("a.wav", "a").unwrap();
        session.load("b.wav", "b").unwrap();
        assert_eq!(probe.live_buffers(), 2);

        session.close();
        assert_eq!(probe.live_buffers(), 0);
        assert!(!probe.context_current());
        session.close();

        // Drop after close must not tear down twice.
        drop(session);
    }
}
