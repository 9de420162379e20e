//! LinkSprite serial JPEG camera driver
//!
//! Owns a [`Transport`] and exposes the device operations: reset, resolution
//! and baud-rate changes, stop, and chunked image capture.
//!
//! # Usage
//!
//! ```rust,ignore
//! use linksprite_camera::{CameraConfig, JpegCollector, LinkspriteCamera};
//!
//! let mut camera = LinkspriteCamera::new(transport, CameraConfig::from_env())?;
//! camera.initialize()?;
//!
//! let mut image = JpegCollector::new();
//! match camera.capture_image(&mut image) {
//!     Ok(summary) => save(image.into_image()),
//!     Err(e) => {
//!         log::warn!("Capture failed: {}", e);
//!         camera.reset()?;
//!     }
//! }
//! ```

use std::thread;
use std::time::{Duration, Instant};

use crate::commands::{BaudRate, Command, ImageSize};
use crate::config::CameraConfig;
use crate::error::Result;
use crate::protocol::{expect_ack, RetryPolicy};
use crate::session::{CaptureSession, CaptureSummary};
use crate::sink::ChunkSink;
use crate::transport::Transport;

/// Scratch space used while draining input
const FLUSH_BUFFER_LEN: usize = 64;

/// Reads attempted by [`LinkspriteCamera::flush_input`] before it gives up
const MAX_FLUSH_READS: usize = 256;

/// Driver for one camera on an exclusively owned transport
#[derive(Debug)]
pub struct LinkspriteCamera<T: Transport> {
    transport: T,
    config: CameraConfig,
    /// Earliest time the next command may be sent after a reset
    quiet_until: Option<Instant>,
}

impl<T: Transport> LinkspriteCamera<T> {
    /// Wrap `transport` with the given settings
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails [`CameraConfig::validate`].
    pub fn new(transport: T, config: CameraConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            quiet_until: None,
        })
    }

    /// Active settings
    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give the transport back
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Open the transport if needed and drop anything already received
    ///
    /// # Errors
    ///
    /// Returns `CameraError::Transport` if the transport cannot be opened.
    pub fn initialize(&mut self) -> Result<()> {
        if !self.transport.is_open() {
            self.transport.open()?;
        }
        self.flush_input()?;
        log::info!(
            "Camera initialized at {} baud",
            self.transport.baud_rate()
        );
        Ok(())
    }

    /// Reset the camera
    ///
    /// The device must not receive another command for a few seconds after
    /// a reset; the driver waits out `reset_quiet_period_ms` before it next
    /// writes to the transport.
    ///
    /// # Errors
    ///
    /// Returns `CameraError::AckMismatch` or `CameraError::ReadTimeout` if the
    /// camera does not acknowledge the reset.
    pub fn reset(&mut self) -> Result<()> {
        self.send(Command::Reset)?;
        pause(self.config.settle_delay());
        let policy = self.policy();
        expect_ack(&mut self.transport, Command::Reset, policy)?;
        self.flush_input()?;
        self.quiet_until = Some(Instant::now() + self.config.reset_quiet_period());
        log::info!("Camera reset");
        Ok(())
    }

    /// Release a frozen frame and resume live capture
    ///
    /// # Errors
    ///
    /// Returns an error if the camera does not acknowledge the command.
    pub fn stop(&mut self) -> Result<()> {
        self.send(Command::Stop)?;
        pause(self.config.command_delay());
        let policy = self.policy();
        expect_ack(&mut self.transport, Command::Stop, policy)?;
        self.flush_input()?;
        log::debug!("Frame capture stopped");
        Ok(())
    }

    /// Select the capture resolution (applies after the next reset)
    ///
    /// # Errors
    ///
    /// Returns an error if the camera does not acknowledge the command.
    pub fn set_image_size(&mut self, size: ImageSize) -> Result<()> {
        let command = Command::SetImageSize(size);
        self.send(command)?;
        pause(self.config.settle_delay());
        let policy = self.policy();
        expect_ack(&mut self.transport, command, policy)?;
        self.flush_input()?;
        let (width, height) = size.dimensions();
        log::info!("Image size set to {}x{}", width, height);
        Ok(())
    }

    /// Select the capture resolution by device code
    ///
    /// # Errors
    ///
    /// Returns `CameraError::UnsupportedImageSize` without sending anything
    /// if `code` is not one of 0x00, 0x11 or 0x22.
    pub fn set_image_size_code(&mut self, code: u8) -> Result<()> {
        let size = ImageSize::try_from(code)?;
        self.set_image_size(size)
    }

    /// Switch the camera and the transport to `bps`
    ///
    /// The transport is only reopened at the new rate once the camera has
    /// acknowledged the change; on any failure it is left as it was.
    ///
    /// # Errors
    ///
    /// Returns `CameraError::UnsupportedBaudRate` without sending anything for
    /// an unknown rate, or an acknowledgment error if the camera refuses.
    pub fn set_baud_rate(&mut self, bps: u32) -> Result<()> {
        let rate = BaudRate::try_from(bps)?;
        let command = Command::SetBaudRate(rate);

        self.send(command)?;
        pause(self.config.settle_delay());
        let policy = self.policy();
        expect_ack(&mut self.transport, command, policy)?;

        let previous = self.transport.baud_rate();
        self.transport.close()?;
        self.transport.reconfigure_baud_rate(rate.bps())?;
        self.transport.open()?;
        self.flush_input()?;
        self.config.baud_rate = rate.bps();

        log::info!("Baud rate changed from {} to {}", previous, rate.bps());
        Ok(())
    }

    /// Snap an image and stream it to `sink` chunk by chunk
    ///
    /// On failure the camera may still hold a frozen frame; call
    /// [`reset`](Self::reset) or [`stop`](Self::stop) before capturing again.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable protocol, transport or sink error.
    pub fn capture_image<S>(&mut self, sink: &mut S) -> Result<CaptureSummary>
    where
        S: ChunkSink + ?Sized,
    {
        self.wait_for_quiet_period();
        let mut session = CaptureSession::new(&self.config)?;
        session.run(&mut self.transport, sink)
    }

    /// Drop any bytes the camera has sent but nobody read
    ///
    /// Clears the transport's input buffer, then keeps reading until a read
    /// times out so output still arriving (the boot banner after a reset) is
    /// drained too.
    ///
    /// # Errors
    ///
    /// Returns `CameraError::Transport` if the transport cannot clear or read
    /// its input.
    pub fn flush_input(&mut self) -> Result<()> {
        self.transport.discard_pending_input()?;

        let mut scratch = [0u8; FLUSH_BUFFER_LEN];
        let mut drained = 0;
        for _ in 0..MAX_FLUSH_READS {
            let n = self.transport.read(&mut scratch)?;
            if n == 0 {
                if drained > 0 {
                    log::debug!("Drained {} stray bytes", drained);
                }
                return Ok(());
            }
            drained += n;
        }

        log::warn!(
            "Camera still sending after {} stray bytes, giving up on flush",
            drained
        );
        Ok(())
    }

    fn send(&mut self, command: Command) -> Result<()> {
        self.wait_for_quiet_period();
        self.transport.write(command.frame().as_bytes())?;
        self.transport.flush_output()?;
        Ok(())
    }

    fn wait_for_quiet_period(&mut self) {
        if let Some(until) = self.quiet_until.take() {
            let remaining = until.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                log::debug!("Waiting {:?} for camera to settle after reset", remaining);
                thread::sleep(remaining);
            }
        }
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config)
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}
