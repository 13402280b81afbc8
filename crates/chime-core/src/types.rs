//! Shared audio types.

use crate::error::{Error, Result};

/// Device-native PCM layouts.
///
/// These four combinations are the only ones the playback device accepts;
/// this is a capability boundary of the native audio service, not an
/// oversight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    Mono8,
    Stereo8,
    Mono16,
    Stereo16,
}

impl SampleFormat {
    /// Map decoded `(bits_per_sample, channels)` metadata to a device format.
    ///
    /// Bit depth is checked first: an unsupported depth is reported as such
    /// even when the channel count is also out of range.
    pub fn from_decoded(bits_per_sample: u16, channels: u16) -> Result<Self> {
        match (bits_per_sample, channels) {
            (8, 1) => Ok(Self::Mono8),
            (8, 2) => Ok(Self::Stereo8),
            (16, 1) => Ok(Self::Mono16),
            (16, 2) => Ok(Self::Stereo16),
            (8 | 16, n) => Err(Error::UnsupportedFormat(format!(
                "unsupported channel count: {n}"
            ))),
            (b, _) => Err(Error::UnsupportedFormat(format!(
                "unsupported bit depth: {b}"
            ))),
        }
    }

    /// Channel count of this layout.
    pub const fn channels(self) -> u16 {
        match self {
            Self::Mono8 | Self::Mono16 => 1,
            Self::Stereo8 | Self::Stereo16 => 2,
        }
    }

    /// Bits per sample of this layout.
    pub const fn bits_per_sample(self) -> u16 {
        match self {
            Self::Mono8 | Self::Stereo8 => 8,
            Self::Mono16 | Self::Stereo16 => 16,
        }
    }

    /// Size in bytes of one interleaved frame (one sample per channel).
    pub const fn frame_size(self) -> usize {
        (self.bits_per_sample() / 8) as usize * self.channels() as usize
    }
}

/// Fully decoded PCM payload plus the metadata needed to upload it.
///
/// `data` holds interleaved samples: unsigned offset-binary for 8-bit,
/// signed little-endian for 16-bit.
#[derive(Debug, Clone)]
pub struct DecodedSound {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub data: Vec<u8>,
}

impl DecodedSound {
    /// Resolve this payload's device format from its metadata.
    pub fn format(&self) -> Result<SampleFormat> {
        SampleFormat::from_decoded(self.bits_per_sample, self.channels)
    }

    /// Playback duration in seconds, assuming a whole number of frames.
    pub fn duration_secs(&self) -> f64 {
        let Ok(format) = self.format() else {
            return 0.0;
        };
        let frames = self.data.len() / format.frame_size();
        frames as f64 / f64::from(self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_format_table() {
        assert_eq!(SampleFormat::from_decoded(8, 1).ok(), Some(SampleFormat::Mono8));
        assert_eq!(SampleFormat::from_decoded(8, 2).ok(), Some(SampleFormat::Stereo8));
        assert_eq!(SampleFormat::from_decoded(16, 1).ok(), Some(SampleFormat::Mono16));
        assert_eq!(SampleFormat::from_decoded(16, 2).ok(), Some(SampleFormat::Stereo16));
    }

    #[test]
    fn test_bad_channel_count_at_supported_depth() {
        let err = SampleFormat::from_decoded(16, 6).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
        assert!(err.to_string().contains("channel count"));
    }

    #[test]
    fn test_bad_depth_reported_before_channels() {
        let err = SampleFormat::from_decoded(24, 6).unwrap_err();
        assert!(err.to_string().contains("bit depth"));
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(SampleFormat::Mono8.frame_size(), 1);
        assert_eq!(SampleFormat::Stereo16.frame_size(), 4);
    }

    #[test]
    fn test_duration() {
        let sound = DecodedSound {
            sample_rate: 8000,
            channels: 1,
            bits_per_sample: 16,
            data: vec![0; 16000],
        };
        assert!((sound.duration_secs() - 1.0).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn prop_unsupported_depth_always_rejected(
            bits in any::<u16>().prop_filter("supported depths excluded", |b| *b != 8 && *b != 16),
            channels in any::<u16>(),
        ) {
            let err = SampleFormat::from_decoded(bits, channels).unwrap_err();
            prop_assert!(matches!(err, Error::UnsupportedFormat(_)));
        }

        #[test]
        fn prop_only_mono_and_stereo_accepted(channels in 3u16..=512) {
            prop_assert!(SampleFormat::from_decoded(8, channels).is_err());
            prop_assert!(SampleFormat::from_decoded(16, channels).is_err());
        }
    }
}
