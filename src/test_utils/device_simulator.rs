//! In-memory LinkSprite camera for testing
//!
//! Answers command frames the way the real device does, with optional faults
//! injected per chunk address or opcode.
//!
//! # Example
//!
//! ```rust,ignore
//! use linksprite_camera::test_utils::{synthetic_jpeg, SimulatedCamera};
//!
//! // 300 byte image, second chunk arrives with a bad trailer once
//! let device = SimulatedCamera::new(synthetic_jpeg(300))
//!     .with_corrupt_trailers(128, 1)
//!     .with_max_read(16);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;

use crate::commands::{
    opcode, BaudRate, Command, COMMAND_PREFIX, IMAGE_LENGTH_ACK, READ_FRAME_ACK,
};
use crate::transport::Transport;

/// Build a JPEG-shaped buffer of exactly `len` bytes
///
/// Starts with the SOI marker, ends with the EOI marker and contains no other
/// 0xFF byte, so the end marker occurs exactly once.
///
/// # Panics
///
/// Panics if `len` is smaller than 4.
pub fn synthetic_jpeg(len: usize) -> Vec<u8> {
    assert!(len >= 4, "a JPEG needs at least SOI and EOI markers");
    let mut data = Vec::with_capacity(len);
    data.extend_from_slice(&[0xFF, 0xD8]);
    data.extend((0..len - 4).map(|i| (i % 0xFF) as u8));
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

/// Simulated camera implementing [`Transport`]
#[derive(Debug)]
pub struct SimulatedCamera {
    image: Vec<u8>,
    advisory_size: u16,
    pending: VecDeque<u8>,
    /// Output the device has not put on the wire yet
    arriving: VecDeque<u8>,
    reset_banner: Vec<u8>,
    open: bool,
    baud_rate: u32,
    max_read: Option<usize>,
    corrupt_trailers: HashMap<u32, usize>,
    dropped_trailers: HashMap<u32, usize>,
    truncated_chunks: HashSet<u32>,
    rejected_opcodes: HashSet<u8>,
    commands: Vec<Vec<u8>>,
    read_calls: usize,
    discards: usize,
    reopen_count: usize,
    image_size_code: Option<u8>,
    device_baud: Option<BaudRate>,
    frozen: bool,
}

impl SimulatedCamera {
    /// Device holding `image`, reporting its exact length as the advisory size
    pub fn new(image: Vec<u8>) -> Self {
        let advisory_size = u16::try_from(image.len()).unwrap_or(u16::MAX);
        Self {
            image,
            advisory_size,
            pending: VecDeque::new(),
            arriving: VecDeque::new(),
            reset_banner: Vec::new(),
            open: true,
            baud_rate: BaudRate::B38400.bps(),
            max_read: None,
            corrupt_trailers: HashMap::new(),
            dropped_trailers: HashMap::new(),
            truncated_chunks: HashSet::new(),
            rejected_opcodes: HashSet::new(),
            commands: Vec::new(),
            read_calls: 0,
            discards: 0,
            reopen_count: 0,
            image_size_code: None,
            device_baud: None,
            frozen: false,
        }
    }

    /// Report `size` instead of the true image length
    pub fn with_advisory_size(mut self, size: u16) -> Self {
        self.advisory_size = size;
        self
    }

    /// Return at most `max` bytes per read call
    pub fn with_max_read(mut self, max: usize) -> Self {
        self.max_read = Some(max.max(1));
        self
    }

    /// Corrupt the trailer of the next `count` transfers of the chunk at `address`
    pub fn with_corrupt_trailers(mut self, address: u32, count: usize) -> Self {
        self.corrupt_trailers.insert(address, count);
        self
    }

    /// Omit the trailer of the next `count` transfers of the chunk at `address`
    pub fn with_dropped_trailers(mut self, address: u32, count: usize) -> Self {
        self.dropped_trailers.insert(address, count);
        self
    }

    /// Send only half of the chunk at `address`, and no trailer, on its first transfer
    pub fn with_truncated_chunk(mut self, address: u32) -> Self {
        self.truncated_chunks.insert(address);
        self
    }

    /// Answer every command with `op` with an error status
    pub fn with_rejected_opcode(mut self, op: u8) -> Self {
        self.rejected_opcodes.insert(op);
        self
    }

    /// Stream `banner` after every reset acknowledgment
    ///
    /// The banner arrives late: it shows up only once the host has cleared its
    /// input or read everything else, like the boot text the module prints
    /// while it restarts.
    pub fn with_reset_banner(mut self, banner: &[u8]) -> Self {
        self.reset_banner = banner.to_vec();
        self
    }

    /// Start with the host side closed
    pub fn closed(mut self) -> Self {
        self.open = false;
        self
    }

    /// Every command frame received, in order
    pub fn commands(&self) -> &[Vec<u8>] {
        &self.commands
    }

    /// Start addresses of every fetch-chunk command received, in order
    pub fn chunk_addresses(&self) -> Vec<u32> {
        self.commands
            .iter()
            .filter(|c| c.len() >= 14 && c[2] == opcode::READ_FRAME)
            .map(|c| u32::from_be_bytes([c[6], c[7], c[8], c[9]]))
            .collect()
    }

    /// Number of read calls made by the host
    pub fn read_calls(&self) -> usize {
        self.read_calls
    }

    /// Number of times pending input was discarded
    pub fn discard_count(&self) -> usize {
        self.discards
    }

    /// Number of times the host reopened the transport
    pub fn reopen_count(&self) -> usize {
        self.reopen_count
    }

    /// Resolution code last accepted by the device
    pub fn image_size_code(&self) -> Option<u8> {
        self.image_size_code
    }

    /// Baud rate the device last agreed to switch to
    pub fn device_baud(&self) -> Option<BaudRate> {
        self.device_baud
    }

    /// Whether a frame is currently frozen in the frame buffer
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Queue unsolicited bytes, as if the device sent them spontaneously
    pub fn inject_noise(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes);
    }

    fn respond(&mut self, frame: &[u8]) {
        if frame.len() < 4 || frame[0] != COMMAND_PREFIX {
            log::debug!("Simulated camera ignoring {:02X?}", frame);
            return;
        }

        let op = frame[2];
        let params = &frame[4..];

        if self.rejected_opcodes.contains(&op) {
            let mut ack = ack_for(op).to_vec();
            ack[3] = 0x01;
            self.pending.extend(ack);
            return;
        }

        match op {
            opcode::RESET => {
                self.frozen = false;
                self.pending.extend(ack_for(op));
                self.arriving.extend(&self.reset_banner);
            }
            opcode::SET_BAUD_RATE => {
                self.device_baud = params.get(1..3).and_then(|sel| {
                    BaudRate::ALL
                        .into_iter()
                        .find(|rate| rate.selector() == [sel[0], sel[1]])
                });
                self.pending.extend(ack_for(op));
            }
            opcode::SET_IMAGE_SIZE => {
                self.image_size_code = params.first().copied();
                self.pending.extend(ack_for(op));
            }
            opcode::FRAME_CONTROL => {
                self.frozen = params.first() == Some(&0x00);
                self.pending.extend(ack_for(op));
            }
            opcode::IMAGE_LENGTH => {
                self.pending.extend(IMAGE_LENGTH_ACK);
                self.pending.extend(self.advisory_size.to_be_bytes());
            }
            opcode::READ_FRAME if params.len() >= 10 => {
                let address = u32::from_be_bytes([params[2], params[3], params[4], params[5]]);
                let length = u32::from_be_bytes([params[6], params[7], params[8], params[9]]);
                self.send_chunk(address, length as usize);
            }
            _ => log::debug!("Simulated camera ignoring opcode {:#04X}", op),
        }
    }

    fn send_chunk(&mut self, address: u32, length: usize) {
        let start = address as usize;
        let data: Vec<u8> = (start..start + length)
            .map(|i| self.image.get(i).copied().unwrap_or(0x00))
            .collect();

        self.pending.extend(READ_FRAME_ACK);

        if self.truncated_chunks.remove(&address) {
            self.pending.extend(&data[..length / 2]);
            return;
        }

        self.pending.extend(&data);

        if take_fault(&mut self.dropped_trailers, address) {
            return;
        }
        if take_fault(&mut self.corrupt_trailers, address) {
            let mut trailer = READ_FRAME_ACK.to_vec();
            trailer[4] = 0xEE;
            self.pending.extend(trailer);
            return;
        }
        self.pending.extend(READ_FRAME_ACK);
    }
}

fn ack_for(op: u8) -> &'static [u8] {
    let command = match op {
        opcode::RESET => Command::Reset,
        opcode::SET_BAUD_RATE => Command::SetBaudRate(BaudRate::B38400),
        opcode::SET_IMAGE_SIZE => Command::SetImageSize(crate::commands::ImageSize::Vga640x480),
        opcode::FRAME_CONTROL => Command::Snap,
        opcode::IMAGE_LENGTH => Command::QuerySize,
        _ => Command::FetchChunk {
            address: 0,
            length: 0,
            delay: 0,
        },
    };
    command.expected_ack()
}

fn take_fault(faults: &mut HashMap<u32, usize>, address: u32) -> bool {
    match faults.get_mut(&address) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

impl Transport for SimulatedCamera {
    fn open(&mut self) -> io::Result<()> {
        if !self.open {
            self.open = true;
            self.reopen_count += 1;
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        self.commands.push(bytes.to_vec());
        self.respond(bytes);
        Ok(())
    }

    fn flush_output(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_calls += 1;
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if self.pending.is_empty() {
            self.pending.extend(self.arriving.drain(..));
        }
        let n = buf
            .len()
            .min(self.pending.len())
            .min(self.max_read.unwrap_or(usize::MAX));
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn discard_pending_input(&mut self) -> io::Result<()> {
        self.discards += 1;
        self.pending.clear();
        self.pending.extend(self.arriving.drain(..));
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn reconfigure_baud_rate(&mut self, rate: u32) -> io::Result<()> {
        self.baud_rate = rate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::find_end_marker;

    #[test]
    fn test_synthetic_jpeg_shape() {
        let jpeg = synthetic_jpeg(600);
        assert_eq!(jpeg.len(), 600);
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(find_end_marker(&jpeg), Some(600));
        assert_eq!(jpeg.iter().filter(|&&b| b == 0xFF).count(), 2);
    }

    #[test]
    fn test_chunk_response_layout() {
        let mut device = SimulatedCamera::new(synthetic_jpeg(10));
        let cmd = Command::FetchChunk {
            address: 0,
            length: 16,
            delay: 10,
        };
        device.write(cmd.frame().as_bytes()).unwrap();

        let mut buf = [0u8; 64];
        let n = device.read(&mut buf).unwrap();
        assert_eq!(n, 5 + 16 + 5);
        assert_eq!(&buf[..5], READ_FRAME_ACK);
        assert_eq!(&buf[5..15], synthetic_jpeg(10).as_slice());
        assert_eq!(&buf[15..21], &[0u8; 6]);
        assert_eq!(&buf[21..26], READ_FRAME_ACK);
    }

    #[test]
    fn test_max_read_splits_output() {
        let mut device = SimulatedCamera::new(synthetic_jpeg(10)).with_max_read(3);
        device.write(Command::QuerySize.frame().as_bytes()).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(device.read(&mut buf).unwrap(), 3);
        assert_eq!(device.read(&mut buf).unwrap(), 3);
        assert_eq!(device.read(&mut buf).unwrap(), 3);
        assert_eq!(device.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_closed_port_rejects_io() {
        let mut device = SimulatedCamera::new(synthetic_jpeg(10)).closed();
        assert!(device.write(&[0x56, 0x00, 0x26, 0x00]).is_err());
        device.open().unwrap();
        assert_eq!(device.reopen_count(), 1);
        assert!(device.write(&[0x56, 0x00, 0x26, 0x00]).is_ok());
    }
}
