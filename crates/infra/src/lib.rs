pub mod audio;
pub mod service;

pub use audio::{OutputStream, SoftMixer};
pub use service::{AudioService, ServiceHandle};
