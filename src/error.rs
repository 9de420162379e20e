//! Error taxonomy for camera operations.

use thiserror::Error;

use crate::commands::Command;

/// Errors that can occur while talking to the camera.
#[derive(Error, Debug)]
pub enum CameraError {
    /// The device stopped sending before the requested byte count arrived.
    #[error("read timed out: expected {expected} bytes, received {received}")]
    ReadTimeout {
        /// Number of bytes requested.
        expected: usize,
        /// Number of bytes accumulated before the retry budget ran out.
        received: usize,
    },

    /// The device answered a command with something other than its acknowledgment.
    #[error("{command:?} not acknowledged: expected {expected:02X?}, got {actual:02X?}")]
    AckMismatch {
        /// Command that was sent.
        command: Command,
        /// Acknowledgment prefix the device should have returned.
        expected: Vec<u8>,
        /// Leading bytes actually received.
        actual: Vec<u8>,
    },

    /// The chunk at `address` kept arriving with a corrupt trailer.
    #[error("chunk at address {address:#06X} failed after {retries} retries")]
    ChunkRetriesExhausted {
        /// Start address of the chunk that could not be transferred.
        address: usize,
        /// Number of retries performed before giving up.
        retries: u32,
    },

    /// The advisory image size was reached but the final chunk holds no 0xFFD9.
    #[error("JPEG end marker not found in final chunk at address {address:#06X}")]
    MissingEndMarker {
        /// Start address of the chunk that was scanned.
        address: usize,
    },

    /// Resolution code outside the set the device supports.
    #[error("unsupported image size code {0:#04X}")]
    UnsupportedImageSize(u8),

    /// Baud rate outside the set the device supports.
    #[error("unsupported baud rate {0}")]
    UnsupportedBaudRate(u32),

    /// Chunk address no longer fits in the command's address field.
    #[error("chunk address {0} exceeds the device address range")]
    AddressOverflow(usize),

    /// Configuration values that cannot drive the protocol.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The capture session already reached a terminal state.
    #[error("capture session already finished")]
    SessionFinished,

    /// I/O error from the underlying byte stream.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The chunk sink refused a chunk.
    #[error("chunk sink error: {0}")]
    Sink(std::io::Error),
}

/// Result type alias for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;
