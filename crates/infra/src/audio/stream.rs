//! Real-time output through the default device
//!
//! The CPAL callback pulls every block straight from [`SoftMixer::render`];
//! the mixer's sample rate and channel count define the stream format.

use super::{AudioError, Result, SoftMixer};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Stream, StreamConfig as CpalStreamConfig};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Playing output stream; audio stops when dropped
pub struct OutputStream {
    _stream: Stream,
    config: CpalStreamConfig,
}

impl OutputStream {
    /// Open the default output device and start pulling from `mixer`
    ///
    /// A fixed `buffer_size` is requested first; devices that refuse it get
    /// their default buffer size instead.
    pub fn open_default(mixer: Arc<SoftMixer>, buffer_size: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoOutputDevice)?;

        #[allow(deprecated)]
        let device_name = device.name().unwrap_or_else(|_| "<unknown>".to_string());

        let mut config = CpalStreamConfig {
            channels: mixer.channels(),
            sample_rate: mixer.sample_rate(),
            buffer_size: BufferSize::Fixed(buffer_size),
        };
        info!(
            device = %device_name,
            channels = config.channels,
            sample_rate = mixer.sample_rate(),
            buffer_size,
            "Opening output stream"
        );

        let stream = match Self::build(&device, &config, mixer.clone()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Fixed buffer size rejected, using device default");
                config.buffer_size = BufferSize::Default;
                Self::build(&device, &config, mixer)?
            }
        };

        stream
            .play()
            .map_err(|e| AudioError::StreamError(format!("Failed to start stream: {}", e)))?;

        Ok(Self {
            _stream: stream,
            config,
        })
    }

    fn build(device: &cpal::Device, config: &CpalStreamConfig, mixer: Arc<SoftMixer>) -> Result<Stream> {
        device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| mixer.render(data),
                |err| error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamError(format!("Failed to build stream: {}", e)))
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    pub fn is_fixed_buffer(&self) -> bool {
        matches!(self.config.buffer_size, BufferSize::Fixed(_))
    }
}
