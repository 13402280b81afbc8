//! # chime-core
//!
//! Core types and error handling for the chime playback library.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{DecodedSound, SampleFormat};
