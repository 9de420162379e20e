//! Command frame catalog for the LinkSprite (VC0706) serial protocol.
//!
//! Every command is `[0x56, 0x00, <opcode>, <param count>, <params...>]` and
//! every acknowledgment begins `[0x76, 0x00, <opcode>, 0x00, ...]`. Frames are
//! built fresh for each send; nothing here holds mutable state.
//!
//! # Example
//!
//! ```rust,ignore
//! use linksprite_camera::commands::{Command, ImageSize};
//!
//! let cmd = Command::SetImageSize(ImageSize::Qvga320x240);
//! assert_eq!(cmd.frame().as_bytes(), &[0x56, 0x00, 0x54, 0x01, 0x11]);
//! assert_eq!(cmd.expected_ack(), &[0x76, 0x00, 0x54, 0x00, 0x00]);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CameraError, Result};

/// First byte of every host-to-device command
pub const COMMAND_PREFIX: u8 = 0x56;

/// First byte of every device acknowledgment
pub const ACK_PREFIX: u8 = 0x76;

/// Device serial number byte (always 0 for a single camera on the line)
pub const SERIAL_NUMBER: u8 = 0x00;

/// Protocol opcodes
pub mod opcode {
    /// System reset
    pub const RESET: u8 = 0x26;
    /// Change UART baud rate
    pub const SET_BAUD_RATE: u8 = 0x24;
    /// Select capture resolution
    pub const SET_IMAGE_SIZE: u8 = 0x54;
    /// Frame buffer control (freeze / resume)
    pub const FRAME_CONTROL: u8 = 0x36;
    /// Query frame buffer length
    pub const IMAGE_LENGTH: u8 = 0x34;
    /// Read frame buffer
    pub const READ_FRAME: u8 = 0x32;
}

/// Frame control parameter that freezes the current frame
const FRAME_CONTROL_SNAP: u8 = 0x00;

/// Frame control parameter that resumes live capture
const FRAME_CONTROL_RESUME: u8 = 0x03;

/// Read-frame control mode byte (MCU transfer)
pub const READ_FRAME_MODE: u8 = 0x0A;

/// Byte offset of the 32-bit start address in a fetch-chunk frame
pub const CHUNK_ADDRESS_OFFSET: usize = 6;

/// Byte offset of the 32-bit length in a fetch-chunk frame
pub const CHUNK_LENGTH_OFFSET: usize = 10;

/// Byte offset of the 16-bit inter-chunk delay in a fetch-chunk frame
pub const CHUNK_DELAY_OFFSET: usize = 14;

/// Length of a fetch-chunk frame
pub const CHUNK_FRAME_LEN: usize = 16;

/// Default inter-chunk delay written into fetch-chunk frames (device units)
pub const DEFAULT_CHUNK_DELAY: u16 = 0x000A;

/// JPEG end-of-image marker
pub const END_OF_IMAGE: [u8; 2] = [0xFF, 0xD9];

/// Acknowledgment for [`Command::Reset`]
pub const RESET_ACK: &[u8] = &[0x76, 0x00, 0x26, 0x00];
/// Acknowledgment for [`Command::SetBaudRate`]
pub const SET_BAUD_RATE_ACK: &[u8] = &[0x76, 0x00, 0x24, 0x00, 0x00];
/// Acknowledgment for [`Command::SetImageSize`]
pub const SET_IMAGE_SIZE_ACK: &[u8] = &[0x76, 0x00, 0x54, 0x00, 0x00];
/// Acknowledgment for [`Command::Snap`] and [`Command::Stop`]
pub const FRAME_CONTROL_ACK: &[u8] = &[0x76, 0x00, 0x36, 0x00, 0x00];
/// Acknowledgment for [`Command::QuerySize`], followed by two size bytes
pub const IMAGE_LENGTH_ACK: &[u8] = &[0x76, 0x00, 0x34, 0x00, 0x04, 0x00, 0x00];
/// Acknowledgment and trailer for [`Command::FetchChunk`]
pub const READ_FRAME_ACK: &[u8] = &[0x76, 0x00, 0x32, 0x00, 0x00];

/// Capture resolutions supported by the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSize {
    /// 640x480
    Vga640x480,
    /// 320x240
    Qvga320x240,
    /// 160x120
    Qqvga160x120,
}

impl ImageSize {
    /// Device code written into the set-size frame
    pub fn code(self) -> u8 {
        match self {
            Self::Vga640x480 => 0x00,
            Self::Qvga320x240 => 0x11,
            Self::Qqvga160x120 => 0x22,
        }
    }

    /// Dimensions in pixels
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Vga640x480 => (640, 480),
            Self::Qvga320x240 => (320, 240),
            Self::Qqvga160x120 => (160, 120),
        }
    }
}

impl TryFrom<u8> for ImageSize {
    type Error = CameraError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0x00 => Ok(Self::Vga640x480),
            0x11 => Ok(Self::Qvga320x240),
            0x22 => Ok(Self::Qqvga160x120),
            other => Err(CameraError::UnsupportedImageSize(other)),
        }
    }
}

/// UART baud rates the camera can switch to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaudRate {
    /// 9600 baud
    B9600,
    /// 19200 baud
    B19200,
    /// 38400 baud (power-on default)
    B38400,
    /// 57600 baud
    B57600,
    /// 115200 baud
    B115200,
}

impl BaudRate {
    /// All supported rates, slowest first
    pub const ALL: [BaudRate; 5] = [
        Self::B9600,
        Self::B19200,
        Self::B38400,
        Self::B57600,
        Self::B115200,
    ];

    /// Rate in bits per second
    pub fn bps(self) -> u32 {
        match self {
            Self::B9600 => 9600,
            Self::B19200 => 19200,
            Self::B38400 => 38400,
            Self::B57600 => 57600,
            Self::B115200 => 115200,
        }
    }

    /// Divisor bytes the device expects in the set-baud frame
    pub fn selector(self) -> [u8; 2] {
        match self {
            Self::B9600 => [0xAE, 0xC8],
            Self::B19200 => [0x56, 0xE4],
            Self::B38400 => [0x2A, 0xF2],
            Self::B57600 => [0x1C, 0x4C],
            Self::B115200 => [0x0D, 0xA6],
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = CameraError;

    fn try_from(bps: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|rate| rate.bps() == bps)
            .ok_or(CameraError::UnsupportedBaudRate(bps))
    }
}

/// A device instruction together with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Reset the camera
    Reset,
    /// Switch the UART to a new rate
    SetBaudRate(BaudRate),
    /// Select capture resolution (takes effect after reset)
    SetImageSize(ImageSize),
    /// Freeze the current frame into the frame buffer
    Snap,
    /// Resume live capture, releasing the frozen frame
    Stop,
    /// Ask for the frozen image length
    QuerySize,
    /// Read `length` bytes of the frozen image starting at `address`
    FetchChunk {
        /// Start address within the frame buffer
        address: u32,
        /// Number of bytes to transfer
        length: u32,
        /// Inter-chunk delay, device units
        delay: u16,
    },
}

impl Command {
    /// Protocol opcode for this command
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Reset => opcode::RESET,
            Self::SetBaudRate(_) => opcode::SET_BAUD_RATE,
            Self::SetImageSize(_) => opcode::SET_IMAGE_SIZE,
            Self::Snap | Self::Stop => opcode::FRAME_CONTROL,
            Self::QuerySize => opcode::IMAGE_LENGTH,
            Self::FetchChunk { .. } => opcode::READ_FRAME,
        }
    }

    /// Build the exact bytes to put on the wire
    pub fn frame(&self) -> CommandFrame {
        match *self {
            Self::Reset => CommandFrame::new(opcode::RESET, &[]),
            Self::SetBaudRate(rate) => {
                let [hi, lo] = rate.selector();
                CommandFrame::new(opcode::SET_BAUD_RATE, &[0x01, hi, lo])
            }
            Self::SetImageSize(size) => CommandFrame::new(opcode::SET_IMAGE_SIZE, &[size.code()]),
            Self::Snap => CommandFrame::new(opcode::FRAME_CONTROL, &[FRAME_CONTROL_SNAP]),
            Self::Stop => CommandFrame::new(opcode::FRAME_CONTROL, &[FRAME_CONTROL_RESUME]),
            Self::QuerySize => CommandFrame::new(opcode::IMAGE_LENGTH, &[0x00]),
            Self::FetchChunk {
                address,
                length,
                delay,
            } => {
                let mut params = [0u8; 12];
                params[1] = READ_FRAME_MODE;
                params[2..6].copy_from_slice(&address.to_be_bytes());
                params[6..10].copy_from_slice(&length.to_be_bytes());
                params[10..12].copy_from_slice(&delay.to_be_bytes());
                CommandFrame::new(opcode::READ_FRAME, &params)
            }
        }
    }

    /// Acknowledgment prefix the device returns when it accepts this command
    pub fn expected_ack(&self) -> &'static [u8] {
        match self {
            Self::Reset => RESET_ACK,
            Self::SetBaudRate(_) => SET_BAUD_RATE_ACK,
            Self::SetImageSize(_) => SET_IMAGE_SIZE_ACK,
            Self::Snap | Self::Stop => FRAME_CONTROL_ACK,
            Self::QuerySize => IMAGE_LENGTH_ACK,
            Self::FetchChunk { .. } => READ_FRAME_ACK,
        }
    }
}

/// Bytes of one command, ready to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    bytes: Vec<u8>,
}

impl CommandFrame {
    fn new(opcode: u8, params: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(4 + params.len());
        bytes.extend_from_slice(&[COMMAND_PREFIX, SERIAL_NUMBER, opcode, params.len() as u8]);
        bytes.extend_from_slice(params);
        Self { bytes }
    }

    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Frame length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the frame holds no bytes (never true for a built command)
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Opcode byte of this frame
    pub fn opcode(&self) -> u8 {
        self.bytes[2]
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}
