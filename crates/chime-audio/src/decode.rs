//! Sound file decoding using symphonia.
//!
//! Decoding is a collaborator of the playback session, not part of it: the
//! session only needs a function that turns a file path into raw PCM plus
//! format metadata, or fails. [`SoundDecoder`] is that seam; [`WavDecoder`]
//! is the production implementation.

use std::fs::File;
use std::path::Path;

use chime_core::{DecodedSound, Error, Result};
use symphonia::core::audio::RawSampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Turns a sound file into an owned PCM payload.
pub trait SoundDecoder {
    /// Open the file, read its entire PCM payload from the start, and
    /// return it with the metadata needed to pick a device format. The
    /// file handle is released before returning, success or failure.
    fn decode(&self, path: &Path) -> Result<DecodedSound>;
}

/// WAV decoder backed by symphonia.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl WavDecoder {
    pub const fn new() -> Self {
        Self
    }
}

impl SoundDecoder for WavDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedSound> {
        let file = File::open(path)
            .map_err(|e| Error::Decode(format!("failed to open {}: {e}", path.display())))?;
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        hint.with_extension("wav");

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::Decode(format!("failed to probe {}: {e}", path.display())))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode(format!("no audio track in {}", path.display())))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| Error::Decode("missing sample rate".to_string()))?;
        let channels = params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| Error::Decode("missing channel layout".to_string()))?;
        let bits_per_sample = params
            .bits_per_sample
            .ok_or_else(|| Error::Decode("missing bit depth".to_string()))?
            as u16;

        debug!(
            "decoding {}: {sample_rate} Hz, {channels} ch, {bits_per_sample}-bit",
            path.display()
        );

        let mut decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("failed to create decoder: {e}")))?;

        let mut data = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break; // End of stream
                }
                Err(e) => {
                    return Err(Error::Decode(format!("failed to read packet: {e}")));
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let capacity = decoded.capacity() as u64;
                    // Re-interleave at the source bit depth so the payload
                    // bytes match what a device upload expects.
                    match bits_per_sample {
                        8 => {
                            let mut raw = RawSampleBuffer::<u8>::new(capacity, spec);
                            raw.copy_interleaved_ref(decoded);
                            data.extend_from_slice(raw.as_bytes());
                        }
                        16 => {
                            let mut raw = RawSampleBuffer::<i16>::new(capacity, spec);
                            raw.copy_interleaved_ref(decoded);
                            data.extend_from_slice(raw.as_bytes());
                        }
                        _ => {
                            // Unsupported depths are rejected at load time;
                            // widen so the metadata still reaches the caller.
                            let mut raw = RawSampleBuffer::<i32>::new(capacity, spec);
                            raw.copy_interleaved_ref(decoded);
                            data.extend_from_slice(raw.as_bytes());
                        }
                    }
                }
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    // Skip corrupt frames, keep the rest of the payload.
                    warn!("decode error in {} (skipping frame): {e}", path.display());
                }
                Err(e) => {
                    return Err(Error::Decode(format!("failed to decode packet: {e}")));
                }
            }
        }

        debug!("decoded {} bytes from {}", data.len(), path.display());

        Ok(DecodedSound {
            sample_rate,
            channels,
            bits_per_sample,
            data,
        })
    }
}
