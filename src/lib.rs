//! `linksprite-camera` - Driver for LinkSprite serial JPEG cameras
//!
//! The camera stores one compressed frame in its buffer and hands it out in
//! fixed-size chunks, each wrapped in an acknowledgment header and trailer.
//! This crate speaks that protocol over any byte [`Transport`], retries chunks
//! whose trailer arrives damaged, and streams the image to a [`ChunkSink`] as
//! it arrives.
//!
//! # Example
//!
//! ```rust,ignore
//! use linksprite_camera::{CameraConfig, LinkspriteCamera, SerialTransport, WriterSink};
//!
//! linksprite_camera::init_logging();
//!
//! let config = CameraConfig::from_env();
//! let port = SerialTransport::from_config("/dev/ttyUSB0", &config);
//! let mut camera = LinkspriteCamera::new(port, config)?;
//! camera.initialize()?;
//! camera.reset()?;
//!
//! let mut sink = WriterSink::new(std::fs::File::create("image.jpg")?);
//! let summary = camera.capture_image(&mut sink)?;
//! log::info!("Captured {} bytes", summary.image_len);
//! ```

pub mod camera;
pub mod commands;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod test_utils;
pub mod transcript;
pub mod transport;

pub use camera::LinkspriteCamera;
pub use commands::{BaudRate, Command, CommandFrame, ImageSize};
pub use config::CameraConfig;
pub use error::{CameraError, Result};
pub use session::{CaptureSession, CaptureSummary, SessionState};
pub use sink::{ChunkSink, JpegCollector, WriterSink};
pub use transport::Transport;

#[cfg(feature = "serial")]
pub use transport::SerialTransport;

/// Install `env_logger` as the `log` backend
///
/// Honors `RUST_LOG` and defaults to `info`. Calling it again, or after the
/// host installed its own logger, has no effect.
pub fn init_logging() {
    let initialized =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init()
            .is_ok();

    if initialized {
        log::info!("linksprite-camera {} logging initialized", env!("CARGO_PKG_VERSION"));
    }
}
