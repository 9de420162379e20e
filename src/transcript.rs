//! Serial transcript recording and replay for offline debugging
//!
//! [`RecordingTransport`] sits between the driver and a real port and logs
//! every host write and every device byte the host actually read. The log can
//! be saved and later fed back through [`ReplayTransport`], which plays the
//! device side so a failed capture can be re-run without hardware.
//!
//! # File Format
//!
//! - `transcript_<ts>.bin`: `[u64 LE: timestamp_us][u8: direction][u32 LE: length][data]...`
//! - `transcript_<ts>.json`: [`TranscriptMetadata`]
//!
//! # Example
//!
//! ```rust,ignore
//! let port = SerialTransport::from_config("/dev/ttyUSB0", &config);
//! let mut camera = LinkspriteCamera::new(RecordingTransport::new(port), config)?;
//! let result = camera.capture_image(&mut collector);
//!
//! let recorder = camera.into_inner();
//! recorder.save(Path::new("/tmp"), TranscriptMetadata::default())?;
//!
//! // Later, without the camera attached:
//! let replay = ReplayTransport::load(Path::new("/tmp/transcript_1712345678901.bin"))?;
//! ```

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commands::BaudRate;
use crate::transport::Transport;

/// Upper bound on a single record, guards against reading garbage lengths
const MAX_RECORD_LEN: usize = 1024 * 1024;

/// Size of the fixed record header
const RECORD_HEADER_LEN: u64 = 8 + 1 + 4;

/// Errors from saving or loading transcripts.
#[derive(Error, Debug)]
pub enum TranscriptError {
    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Corrupted record in a transcript file.
    #[error("invalid record at offset {offset}: {message}")]
    InvalidRecord {
        /// Byte offset of the record header.
        offset: u64,
        /// Description of the problem.
        message: String,
    },

    /// Output directory does not exist.
    #[error("output directory does not exist: {0}")]
    DirectoryNotFound(String),
}

/// Result type alias for transcript operations.
pub type Result<T> = std::result::Result<T, TranscriptError>;

/// Which side put the bytes on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Command frame written by the host
    HostToDevice,
    /// Bytes read back from the camera
    DeviceToHost,
}

impl Direction {
    fn as_byte(self) -> u8 {
        match self {
            Self::HostToDevice => 0,
            Self::DeviceToHost => 1,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::HostToDevice),
            1 => Some(Self::DeviceToHost),
            _ => None,
        }
    }
}

/// One recorded transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// Time since recording started, in microseconds
    pub timestamp_us: u64,
    /// Who sent the bytes
    pub direction: Direction,
    /// The bytes
    pub data: Vec<u8>,
}

/// Information saved next to a transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMetadata {
    /// Baud rate the port was running at when recording stopped.
    pub baud_rate: u32,
    /// Chunk size the driver was configured with.
    #[serde(default)]
    pub chunk_size: u16,
    /// Number of host writes recorded.
    #[serde(default)]
    pub host_writes: u64,
    /// Number of non-empty device reads recorded.
    #[serde(default)]
    pub device_reads: u64,
    /// Total bytes recorded in both directions.
    #[serde(default)]
    pub total_bytes: u64,
    /// Recording duration in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
    /// Free-form notes about the session.
    #[serde(default)]
    pub description: String,
}

impl Default for TranscriptMetadata {
    fn default() -> Self {
        Self {
            baud_rate: BaudRate::B38400.bps(),
            chunk_size: 0,
            host_writes: 0,
            device_reads: 0,
            total_bytes: 0,
            duration_ms: 0,
            description: String::new(),
        }
    }
}

/// Paths written by [`RecordingTransport::save`].
#[derive(Debug, Clone)]
pub struct SavedTranscript {
    /// The binary transcript.
    pub transcript_path: PathBuf,
    /// The JSON metadata sidecar.
    pub metadata_path: PathBuf,
    /// Metadata as written, totals filled in.
    pub metadata: TranscriptMetadata,
}

/// Transport wrapper that records all traffic
#[derive(Debug)]
pub struct RecordingTransport<T: Transport> {
    inner: T,
    entries: Vec<TranscriptEntry>,
    started: Instant,
}

impl<T: Transport> RecordingTransport<T> {
    /// Start recording traffic through `inner`
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            entries: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Everything recorded so far
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Stop recording and hand back the wrapped transport
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Borrow the wrapped transport
    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn record(&mut self, direction: Direction, data: &[u8]) {
        let timestamp_us = u64::try_from(self.started.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.entries.push(TranscriptEntry {
            timestamp_us,
            direction,
            data: data.to_vec(),
        });
    }

    /// Write the transcript and its metadata into `output_dir`
    ///
    /// Totals and duration in `metadata` are overwritten from the recording;
    /// the baud rate is taken from the wrapped transport.
    ///
    /// # Errors
    ///
    /// Returns `TranscriptError::DirectoryNotFound` if `output_dir` is missing,
    /// `TranscriptError::Io` or `TranscriptError::Json` if writing fails.
    pub fn save(&self, output_dir: &Path, mut metadata: TranscriptMetadata) -> Result<SavedTranscript> {
        if !output_dir.is_dir() {
            return Err(TranscriptError::DirectoryNotFound(
                output_dir.display().to_string(),
            ));
        }

        metadata.baud_rate = self.inner.baud_rate();
        metadata.host_writes = self.count(Direction::HostToDevice);
        metadata.device_reads = self.count(Direction::DeviceToHost);
        metadata.total_bytes = self.entries.iter().map(|e| e.data.len() as u64).sum();
        metadata.duration_ms = self
            .entries
            .last()
            .map(|e| e.timestamp_us / 1000)
            .unwrap_or(0);

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);

        let transcript_path = output_dir.join(format!("transcript_{}.bin", timestamp));
        let metadata_path = transcript_path.with_extension("json");

        write_transcript(&transcript_path, &self.entries)?;
        std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;

        log::info!(
            "Saved transcript: {} writes, {} reads, {} bytes to {}",
            metadata.host_writes,
            metadata.device_reads,
            metadata.total_bytes,
            transcript_path.display()
        );

        Ok(SavedTranscript {
            transcript_path,
            metadata_path,
            metadata,
        })
    }

    fn count(&self, direction: Direction) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.direction == direction)
            .count() as u64
    }
}

impl<T: Transport> Transport for RecordingTransport<T> {
    fn open(&mut self) -> io::Result<()> {
        self.inner.open()
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write(bytes)?;
        self.record(Direction::HostToDevice, bytes);
        Ok(())
    }

    fn flush_output(&mut self) -> io::Result<()> {
        self.inner.flush_output()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.record(Direction::DeviceToHost, &buf[..n]);
        }
        Ok(n)
    }

    fn discard_pending_input(&mut self) -> io::Result<()> {
        self.inner.discard_pending_input()
    }

    fn baud_rate(&self) -> u32 {
        self.inner.baud_rate()
    }

    fn reconfigure_baud_rate(&mut self, rate: u32) -> io::Result<()> {
        self.inner.reconfigure_baud_rate(rate)
    }
}

/// Write `entries` to `path` in the binary transcript format
///
/// # Errors
///
/// Returns `TranscriptError::Io` if the file cannot be written.
pub fn write_transcript(path: &Path, entries: &[TranscriptEntry]) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);

    for entry in entries {
        let len = u32::try_from(entry.data.len()).map_err(|_| TranscriptError::InvalidRecord {
            offset: 0,
            message: format!("record of {} bytes is too large", entry.data.len()),
        })?;
        file.write_all(&entry.timestamp_us.to_le_bytes())?;
        file.write_all(&[entry.direction.as_byte()])?;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(&entry.data)?;
    }

    file.flush()?;
    log::debug!("Wrote {} transcript records to {}", entries.len(), path.display());
    Ok(())
}

/// Load every record from a binary transcript
///
/// # Errors
///
/// Returns `TranscriptError::Io` if the file cannot be opened and
/// `TranscriptError::InvalidRecord` if it is truncated or corrupted.
pub fn read_transcript(path: &Path) -> Result<Vec<TranscriptEntry>> {
    let mut file = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    let mut offset = 0u64;

    loop {
        let mut timestamp_bytes = [0u8; 8];
        match file.read_exact(&mut timestamp_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let mut header = [0u8; 5];
        file.read_exact(&mut header)
            .map_err(|_| invalid(offset, "unexpected EOF reading record header"))?;

        let direction = Direction::from_byte(header[0])
            .ok_or_else(|| invalid(offset, &format!("unknown direction {:#04X}", header[0])))?;

        let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if len > MAX_RECORD_LEN {
            return Err(invalid(
                offset,
                &format!("record length {} exceeds 1MB limit", len),
            ));
        }

        let mut data = vec![0u8; len];
        file.read_exact(&mut data)
            .map_err(|_| invalid(offset, &format!("unexpected EOF reading {} bytes of data", len)))?;

        entries.push(TranscriptEntry {
            timestamp_us: u64::from_le_bytes(timestamp_bytes),
            direction,
            data,
        });

        offset += RECORD_HEADER_LEN + len as u64;
    }

    log::debug!("Read {} transcript records from {}", entries.len(), path.display());
    Ok(entries)
}

/// Load a metadata sidecar
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn read_metadata(path: &Path) -> Result<TranscriptMetadata> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

fn invalid(offset: u64, message: &str) -> TranscriptError {
    TranscriptError::InvalidRecord {
        offset,
        message: message.to_string(),
    }
}

/// Plays back the device side of a recorded transcript
///
/// Each host write consumes the next recorded write and queues the device
/// bytes that followed it. Reads drain that queue and report a timeout once
/// it is empty. Writes that differ from the recording are counted and logged,
/// and playback continues.
#[derive(Debug)]
pub struct ReplayTransport {
    entries: VecDeque<TranscriptEntry>,
    pending: VecDeque<u8>,
    metadata: Option<TranscriptMetadata>,
    baud_rate: u32,
    open: bool,
    mismatches: usize,
}

impl ReplayTransport {
    /// Load a transcript, picking up the `.json` sidecar if present
    ///
    /// # Errors
    ///
    /// Returns an error if the transcript cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = read_transcript(path)?;

        let json_path = path.with_extension("json");
        let metadata = if json_path.exists() {
            match read_metadata(&json_path) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    log::warn!("Ignoring metadata {}: {}", json_path.display(), e);
                    None
                }
            }
        } else {
            None
        };

        log::info!("Loaded {} transcript records from {}", entries.len(), path.display());

        let mut replay = Self::from_entries(entries);
        if let Some(meta) = metadata {
            replay.baud_rate = meta.baud_rate;
            replay.metadata = Some(meta);
        }
        Ok(replay)
    }

    /// Replay in-memory records
    pub fn from_entries(entries: Vec<TranscriptEntry>) -> Self {
        let mut replay = Self {
            entries: entries.into(),
            pending: VecDeque::new(),
            metadata: None,
            baud_rate: BaudRate::B38400.bps(),
            open: true,
            mismatches: 0,
        };
        // Device bytes read before the first command
        replay.queue_device_bytes();
        replay
    }

    /// Metadata loaded alongside the transcript
    pub fn metadata(&self) -> Option<&TranscriptMetadata> {
        self.metadata.as_ref()
    }

    /// Host writes that did not match the recording
    pub fn mismatches(&self) -> usize {
        self.mismatches
    }

    /// Records not yet played back
    pub fn remaining(&self) -> usize {
        self.entries.len()
    }

    fn queue_device_bytes(&mut self) {
        while let Some(entry) = self.entries.front() {
            if entry.direction != Direction::DeviceToHost {
                break;
            }
            if let Some(entry) = self.entries.pop_front() {
                self.pending.extend(entry.data);
            }
        }
    }
}

impl Transport for ReplayTransport {
    fn open(&mut self) -> io::Result<()> {
        self.open = true;
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
            return Err(io::Error::new(io::ErrorKind::NotConnected, "replay closed"));
        }

        match self.entries.pop_front() {
            Some(entry) if entry.data == bytes => {}
            Some(entry) => {
                self.mismatches += 1;
                log::warn!(
                    "Replay diverged: host wrote {:02X?}, recording has {:02X?}",
                    bytes,
                    entry.data
                );
            }
            None => {
                self.mismatches += 1;
                log::warn!("Replay exhausted: host wrote {:02X?}", bytes);
            }
        }

        self.queue_device_bytes();
        Ok(())
    }

    fn flush_output(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "replay closed"));
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    // Only bytes the host actually read were recorded, so there is nothing
    // stale to drop here.
    fn discard_pending_input(&mut self) -> io::Result<()> {
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
