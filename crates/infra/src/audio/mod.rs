//! Software mixing and platform audio output
//!
//! - [`SoftMixer`]: the in-process implementation of the core mixer primitive
//! - [`OutputStream`]: a CPAL output stream pulling from a [`SoftMixer`]
//! - [`decode`]: WAV decoding into asset data

pub mod decode;
pub mod soft_mixer;
pub mod stream;

pub use decode::{decode_wav, read_wav};
pub use soft_mixer::SoftMixer;
pub use stream::OutputStream;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AudioError>;

/// Errors raised by decoding and the output device
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("No output device available")]
    NoOutputDevice,

    #[error("Stream error: {0}")]
    StreamError(String),
}
