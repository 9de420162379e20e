//! Capture session state machine
//!
//! One [`CaptureSession`] drives one image capture: snap, query the advisory
//! size, then fetch fixed-size chunks until the JPEG end marker shows up.
//!
//! ```text
//! Idle → Snapping → AwaitingSnapAck → QueryingSize → AwaitingSizeAck → ReadingSize
//!      → FetchingChunk → AwaitingChunkAck → ReadingChunkData → AwaitingChunkTrailer
//!      → (FetchingChunk | Complete | Failed)
//! ```
//!
//! The size the device reports is only a hint. Once the bytes fetched reach
//! it, the chunk just received is scanned for 0xFF 0xD9 and the image ends
//! there. A corrupt chunk trailer is retried a bounded number of times at the
//! same address; every other failure ends the session.

use std::thread;
use std::time::Duration;

use crate::commands::Command;
use crate::config::CameraConfig;
use crate::error::{CameraError, Result};
use crate::protocol::{expect_ack, find_end_marker, read_exact, RetryPolicy};
use crate::sink::ChunkSink;
use crate::transport::Transport;

/// Where a capture session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing sent yet
    Idle,
    /// Sending the snap command
    Snapping,
    /// Waiting for the snap acknowledgment
    AwaitingSnapAck,
    /// Sending the size query
    QueryingSize,
    /// Waiting for the size acknowledgment
    AwaitingSizeAck,
    /// Reading the two advisory size bytes
    ReadingSize,
    /// Sending a fetch-chunk command for the current cursor
    FetchingChunk,
    /// Waiting for the fetch-chunk acknowledgment
    AwaitingChunkAck,
    /// Reading the chunk payload
    ReadingChunkData,
    /// Checking the trailer that follows the payload
    AwaitingChunkTrailer,
    /// Final chunk delivered
    Complete,
    /// Aborted; no further chunks will be delivered
    Failed,
}

impl SessionState {
    /// Whether the session can make no further progress
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Outcome of a successful capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Size the device reported before the transfer
    pub advisory_size: u16,
    /// Bytes delivered to the sink, end marker included
    pub image_len: usize,
    /// Number of sink invocations
    pub chunks: usize,
    /// Trailer retries across the whole capture
    pub retries: u32,
}

/// State for a single image capture
///
/// Created fresh for every capture and driven to completion by [`run`];
/// a finished session refuses to run again.
///
/// [`run`]: CaptureSession::run
#[derive(Debug)]
pub struct CaptureSession {
    state: SessionState,
    chunk_size: usize,
    chunk_delay: u16,
    max_chunk_retries: u32,
    command_delay: Duration,
    policy: RetryPolicy,
    file_size: u16,
    cursor: usize,
    bytes_read: usize,
    chunk_retry_count: u32,
    total_retries: u32,
    chunks_delivered: usize,
    image_len: usize,
    finished: bool,
    buffer: Vec<u8>,
}

impl CaptureSession {
    /// New idle session using the chunk size and retry budgets in `config`
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails [`CameraConfig::validate`].
    pub fn new(config: &CameraConfig) -> Result<Self> {
        config.validate()?;
        let chunk_size = usize::from(config.chunk_size);
        Ok(Self {
            state: SessionState::Idle,
            chunk_size,
            chunk_delay: config.chunk_delay,
            max_chunk_retries: config.max_chunk_retries,
            command_delay: config.command_delay(),
            policy: RetryPolicy::from_config(config),
            file_size: 0,
            cursor: 0,
            bytes_read: 0,
            chunk_retry_count: 0,
            total_retries: 0,
            chunks_delivered: 0,
            image_len: 0,
            finished: false,
            buffer: vec![0; chunk_size],
        })
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Address of the next chunk to request
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Size reported by the device (0 until read)
    pub fn advisory_size(&self) -> u16 {
        self.file_size
    }

    /// Trailer retries spent on the current chunk
    pub fn chunk_retry_count(&self) -> u32 {
        self.chunk_retry_count
    }

    /// Whether the end marker has been delivered
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Run the capture to completion, delivering chunks to `sink`
    ///
    /// # Errors
    ///
    /// Returns `CameraError::SessionFinished` if the session already ran.
    /// Any protocol or transport failure is returned as-is after moving the
    /// session to [`SessionState::Failed`].
    pub fn run<T, S>(&mut self, transport: &mut T, sink: &mut S) -> Result<CaptureSummary>
    where
        T: Transport + ?Sized,
        S: ChunkSink + ?Sized,
    {
        if self.state != SessionState::Idle {
            return Err(CameraError::SessionFinished);
        }

        log::info!("Starting image capture ({} byte chunks)", self.chunk_size);

        loop {
            match self.step(transport, sink) {
                Ok(SessionState::Complete) => {
                    self.state = SessionState::Complete;
                    let summary = self.summary();
                    log::info!(
                        "Image complete: {} bytes in {} chunks ({} retries, advisory size {})",
                        summary.image_len,
                        summary.chunks,
                        summary.retries,
                        summary.advisory_size
                    );
                    return Ok(summary);
                }
                Ok(next) => self.state = next,
                Err(e) => {
                    log::warn!(
                        "Capture failed in {:?} at address {:#06X}: {}",
                        self.state,
                        self.cursor,
                        e
                    );
                    self.state = SessionState::Failed;
                    return Err(e);
                }
            }
        }
    }

    fn step<T, S>(&mut self, transport: &mut T, sink: &mut S) -> Result<SessionState>
    where
        T: Transport + ?Sized,
        S: ChunkSink + ?Sized,
    {
        match self.state {
            SessionState::Idle => Ok(SessionState::Snapping),
            SessionState::Snapping => {
                self.send(transport, Command::Snap)?;
                Ok(SessionState::AwaitingSnapAck)
            }
            SessionState::AwaitingSnapAck => {
                expect_ack(transport, Command::Snap, self.policy)?;
                Ok(SessionState::QueryingSize)
            }
            SessionState::QueryingSize => {
                self.send(transport, Command::QuerySize)?;
                Ok(SessionState::AwaitingSizeAck)
            }
            SessionState::AwaitingSizeAck => {
                expect_ack(transport, Command::QuerySize, self.policy)?;
                Ok(SessionState::ReadingSize)
            }
            SessionState::ReadingSize => {
                let mut size = [0u8; 2];
                read_exact(transport, &mut size, self.policy)?;
                self.file_size = u16::from_be_bytes(size);
                log::debug!("Device reports {} byte image", self.file_size);
                Ok(SessionState::FetchingChunk)
            }
            SessionState::FetchingChunk => {
                let command = self.fetch_command()?;
                self.send(transport, command)?;
                Ok(SessionState::AwaitingChunkAck)
            }
            SessionState::AwaitingChunkAck => {
                expect_ack(transport, self.fetch_command()?, self.policy)?;
                Ok(SessionState::ReadingChunkData)
            }
            SessionState::ReadingChunkData => {
                read_exact(transport, &mut self.buffer, self.policy)?;
                Ok(SessionState::AwaitingChunkTrailer)
            }
            SessionState::AwaitingChunkTrailer => self.check_trailer(transport, sink),
            SessionState::Complete | SessionState::Failed => Err(CameraError::SessionFinished),
        }
    }

    fn check_trailer<T, S>(&mut self, transport: &mut T, sink: &mut S) -> Result<SessionState>
    where
        T: Transport + ?Sized,
        S: ChunkSink + ?Sized,
    {
        match expect_ack(transport, self.fetch_command()?, self.policy) {
            Ok(()) => {
                self.chunk_retry_count = 0;
                self.accept_chunk(sink)
            }
            Err(CameraError::Transport(e)) => Err(CameraError::Transport(e)),
            Err(e) => {
                transport.discard_pending_input()?;
                self.chunk_retry_count += 1;
                if self.chunk_retry_count > self.max_chunk_retries {
                    return Err(CameraError::ChunkRetriesExhausted {
                        address: self.cursor,
                        retries: self.chunk_retry_count - 1,
                    });
                }
                self.total_retries += 1;
                log::warn!(
                    "Bad trailer for chunk at {:#06X} ({}), retry {}/{}",
                    self.cursor,
                    e,
                    self.chunk_retry_count,
                    self.max_chunk_retries
                );
                pause(self.command_delay);
                Ok(SessionState::FetchingChunk)
            }
        }
    }

    fn accept_chunk<S>(&mut self, sink: &mut S) -> Result<SessionState>
    where
        S: ChunkSink + ?Sized,
    {
        self.bytes_read += self.chunk_size;
        let advisory = usize::from(self.file_size);
        let mut delivered = self.chunk_size;

        if self.bytes_read >= advisory {
            match find_end_marker(&self.buffer) {
                Some(len) => {
                    delivered = len;
                    self.finished = true;
                }
                // Advisory size ends exactly on a chunk boundary: the marker may
                // still be in the next chunk.
                None if self.bytes_read == advisory => {
                    log::debug!(
                        "No end marker at advisory boundary {}, fetching one more chunk",
                        advisory
                    );
                }
                None => {
                    return Err(CameraError::MissingEndMarker {
                        address: self.cursor,
                    })
                }
            }
        }

        sink.on_chunk(&self.buffer[..delivered], self.finished)
            .map_err(CameraError::Sink)?;
        self.chunks_delivered += 1;
        self.image_len += delivered;
        log::debug!(
            "Chunk at {:#06X}: {} bytes{}",
            self.cursor,
            delivered,
            if self.finished { " (final)" } else { "" }
        );

        if self.finished {
            return Ok(SessionState::Complete);
        }

        self.cursor += self.chunk_size;
        Ok(SessionState::FetchingChunk)
    }

    fn fetch_command(&self) -> Result<Command> {
        let address =
            u32::try_from(self.cursor).map_err(|_| CameraError::AddressOverflow(self.cursor))?;
        Ok(Command::FetchChunk {
            address,
            length: self.chunk_size as u32,
            delay: self.chunk_delay,
        })
    }

    fn send<T>(&self, transport: &mut T, command: Command) -> Result<()>
    where
        T: Transport + ?Sized,
    {
        transport.write(command.frame().as_bytes())?;
        transport.flush_output()?;
        pause(self.command_delay);
        Ok(())
    }

    fn summary(&self) -> CaptureSummary {
        CaptureSummary {
            advisory_size: self.file_size,
            image_len: self.image_len,
            chunks: self.chunks_delivered,
            retries: self.total_retries,
        }
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{opcode, END_OF_IMAGE};
    use crate::test_utils::{synthetic_jpeg, SimulatedCamera};

    fn config(chunk_size: u16) -> CameraConfig {
        CameraConfig {
            chunk_size,
            ..CameraConfig::without_delays()
        }
    }

    /// Run a session, returning its result, the session and every sink call
    fn capture(
        device: &mut SimulatedCamera,
        chunk_size: u16,
    ) -> (Result<CaptureSummary>, CaptureSession, Vec<(Vec<u8>, bool)>) {
        let mut session = CaptureSession::new(&config(chunk_size)).unwrap();
        let mut calls = Vec::new();
        let mut sink = |chunk: &[u8], is_final: bool| calls.push((chunk.to_vec(), is_final));
        let result = session.run(device, &mut sink);
        (result, session, calls)
    }

    #[test]
    fn test_three_chunk_capture_truncates_final_chunk() {
        // 302 bytes: marker sits at offset 44 of the chunk starting at 256
        let image = synthetic_jpeg(302);
        let mut device = SimulatedCamera::new(image.clone()).with_advisory_size(300);

        let (result, session, calls) = capture(&mut device, 128);

        let summary = result.unwrap();
        assert_eq!(session.state(), SessionState::Complete);
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].0.len(), 128);
        assert_eq!(calls[1].0.len(), 128);
        assert_eq!(calls[2].0.len(), 46);
        assert_eq!(
            calls.iter().map(|c| c.1).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        assert_eq!(&calls[2].0[44..], &END_OF_IMAGE);
        assert_eq!(summary.image_len, 302);
        assert_eq!(summary.advisory_size, 300);
        assert_eq!(device.chunk_addresses(), vec![0, 128, 256]);

        let assembled: Vec<u8> = calls.into_iter().flat_map(|(c, _)| c).collect();
        assert_eq!(assembled, image);
    }

    #[test]
    fn test_command_sequence() {
        let mut device = SimulatedCamera::new(synthetic_jpeg(100));
        let (result, _, _) = capture(&mut device, 128);
        result.unwrap();

        let opcodes: Vec<u8> = device.commands().iter().map(|c| c[2]).collect();
        assert_eq!(
            opcodes,
            vec![
                opcode::FRAME_CONTROL,
                opcode::IMAGE_LENGTH,
                opcode::READ_FRAME
            ]
        );
        assert!(device.is_frozen());
    }

    #[test]
    fn test_cursor_advances_by_chunk_size() {
        let size = 1000u16;
        let chunk = 128u16;
        let mut device = SimulatedCamera::new(synthetic_jpeg(usize::from(size)));

        let (result, _, calls) = capture(&mut device, chunk);
        result.unwrap();

        let expected: Vec<u32> = (0..8).map(|i| i * u32::from(chunk)).collect();
        assert_eq!(device.chunk_addresses(), expected);
        let non_final = calls.iter().filter(|c| !c.1).count();
        assert_eq!(non_final, usize::from(size / chunk));
        assert_eq!(calls.last().unwrap().0.len(), 1000 - 7 * 128);
    }

    #[test]
    fn test_boundary_advisory_size_fetches_one_more_chunk() {
        // Device under-reports: 256 advertised, marker actually ends at 258
        let mut device = SimulatedCamera::new(synthetic_jpeg(258)).with_advisory_size(256);

        let (result, _, calls) = capture(&mut device, 128);

        result.unwrap();
        assert_eq!(device.chunk_addresses(), vec![0, 128, 256]);
        assert_eq!(calls.iter().filter(|c| !c.1).count(), 2);
        assert_eq!(calls[2].0.len(), 2);
        assert!(calls[2].1);
    }

    #[test]
    fn test_boundary_advisory_size_marker_in_last_chunk() {
        let mut device = SimulatedCamera::new(synthetic_jpeg(256));

        let (result, _, calls) = capture(&mut device, 128);

        result.unwrap();
        assert_eq!(device.chunk_addresses(), vec![0, 128]);
        assert_eq!(calls.len(), 2);
        assert!(calls[1].1);
        assert_eq!(calls[1].0.len(), 128);
    }

    #[test]
    fn test_trailer_retries_within_budget() {
        for mismatches in 1..=2 {
            let mut device = SimulatedCamera::new(synthetic_jpeg(300))
                .with_corrupt_trailers(128, mismatches);

            let (result, session, calls) = capture(&mut device, 128);

            let summary = result.unwrap();
            assert_eq!(summary.retries, mismatches as u32);
            assert_eq!(session.chunk_retry_count(), 0);
            assert_eq!(calls.len(), 3, "each chunk delivered exactly once");

            let mut expected = vec![0];
            expected.extend(std::iter::repeat(128).take(mismatches + 1));
            expected.push(256);
            assert_eq!(device.chunk_addresses(), expected);
        }
    }

    #[test]
    fn test_trailer_retries_exhausted() {
        let mut device = SimulatedCamera::new(synthetic_jpeg(300)).with_corrupt_trailers(128, 3);

        let (result, session, calls) = capture(&mut device, 128);

        assert!(matches!(
            result,
            Err(CameraError::ChunkRetriesExhausted {
                address: 128,
                retries: 2
            })
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.cursor(), 128);
        assert_eq!(device.chunk_addresses(), vec![0, 128, 128, 128]);
        assert_eq!(calls.len(), 1);
        assert!(calls.iter().all(|c| !c.1));
        assert_eq!(device.discard_count(), 3);
    }

    #[test]
    fn test_retry_counter_resets_per_chunk() {
        // Two bad trailers on each of two chunks stays within a budget of 2
        let mut device = SimulatedCamera::new(synthetic_jpeg(300))
            .with_corrupt_trailers(0, 2)
            .with_corrupt_trailers(256, 2);

        let (result, _, calls) = capture(&mut device, 128);

        assert_eq!(result.unwrap().retries, 4);
        assert_eq!(calls.len(), 3);
    }

    #[test]
    fn test_missing_trailer_is_retried() {
        let mut device = SimulatedCamera::new(synthetic_jpeg(200)).with_dropped_trailers(0, 1);

        let (result, _, calls) = capture(&mut device, 128);

        assert_eq!(result.unwrap().retries, 1);
        assert_eq!(device.chunk_addresses(), vec![0, 0, 128]);
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn test_missing_end_marker_fails() {
        let mut image = synthetic_jpeg(302);
        let len = image.len();
        image[len - 1] = 0x00;
        let mut device = SimulatedCamera::new(image).with_advisory_size(300);

        let (result, session, calls) = capture(&mut device, 128);

        assert!(matches!(
            result,
            Err(CameraError::MissingEndMarker { address: 256 })
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!session.is_finished());
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| !c.1));
    }

    #[test]
    fn test_snap_rejected_sends_nothing_else() {
        let mut device =
            SimulatedCamera::new(synthetic_jpeg(100)).with_rejected_opcode(opcode::FRAME_CONTROL);

        let (result, session, calls) = capture(&mut device, 128);

        assert!(matches!(
            result,
            Err(CameraError::AckMismatch {
                command: Command::Snap,
                ..
            })
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(device.commands().len(), 1);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_size_query_rejected() {
        let mut device =
            SimulatedCamera::new(synthetic_jpeg(100)).with_rejected_opcode(opcode::IMAGE_LENGTH);

        let (result, _, _) = capture(&mut device, 128);

        assert!(matches!(
            result,
            Err(CameraError::AckMismatch {
                command: Command::QuerySize,
                ..
            })
        ));
        assert!(device.chunk_addresses().is_empty());
    }

    #[test]
    fn test_chunk_ack_rejected_aborts_without_retry() {
        let mut device =
            SimulatedCamera::new(synthetic_jpeg(300)).with_rejected_opcode(opcode::READ_FRAME);

        let (result, session, calls) = capture(&mut device, 128);

        assert!(matches!(
            result,
            Err(CameraError::AckMismatch {
                command: Command::FetchChunk { .. },
                ..
            })
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(device.chunk_addresses(), vec![0]);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_truncated_chunk_data_aborts() {
        let mut device = SimulatedCamera::new(synthetic_jpeg(300)).with_truncated_chunk(128);

        let (result, session, calls) = capture(&mut device, 128);

        assert!(matches!(result, Err(CameraError::ReadTimeout { .. })));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(device.chunk_addresses(), vec![0, 128]);
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn test_fragmented_reads() {
        let image = synthetic_jpeg(700);
        let mut device = SimulatedCamera::new(image.clone()).with_max_read(7);

        let (result, _, calls) = capture(&mut device, 256);

        result.unwrap();
        let assembled: Vec<u8> = calls.into_iter().flat_map(|(c, _)| c).collect();
        assert_eq!(assembled, image);
    }

    #[test]
    fn test_session_cannot_run_twice() {
        let mut device = SimulatedCamera::new(synthetic_jpeg(100));
        let mut session = CaptureSession::new(&config(128)).unwrap();
        let mut sink = |_: &[u8], _: bool| {};

        session.run(&mut device, &mut sink).unwrap();
        assert!(session.state().is_terminal());

        let commands_before = device.commands().len();
        assert!(matches!(
            session.run(&mut device, &mut sink),
            Err(CameraError::SessionFinished)
        ));
        assert_eq!(device.commands().len(), commands_before);
    }

    #[test]
    fn test_sink_error_aborts_capture() {
        struct FailingSink;
        impl ChunkSink for FailingSink {
            fn on_chunk(&mut self, _: &[u8], _: bool) -> std::io::Result<()> {
                Err(std::io::Error::other("disk full"))
            }
        }

        let mut device = SimulatedCamera::new(synthetic_jpeg(300));
        let mut session = CaptureSession::new(&config(128)).unwrap();

        let result = session.run(&mut device, &mut FailingSink);

        assert!(matches!(result, Err(CameraError::Sink(_))));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(device.chunk_addresses(), vec![0]);
    }

    #[test]
    fn test_new_rejects_zero_chunk_size() {
        let result = CaptureSession::new(&config(0));
        assert!(matches!(result, Err(CameraError::InvalidConfig(_))));
    }

    #[test]
    fn test_boundary_without_marker_fails_on_extra_chunk() {
        let mut device = SimulatedCamera::new(vec![0x11; 400]).with_advisory_size(256);

        let (result, session, calls) = capture(&mut device, 128);

        assert!(matches!(
            result,
            Err(CameraError::MissingEndMarker { address: 256 })
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(device.chunk_addresses(), vec![0, 128, 256]);
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(chunk, is_final)| chunk.len() == 128 && !is_final));
    }

    #[test]
    fn test_retries_exhausted_reports_retries_performed() {
        let mut device = SimulatedCamera::new(synthetic_jpeg(300)).with_corrupt_trailers(0, 1);
        let no_retries = CameraConfig {
            max_chunk_retries: 0,
            ..config(128)
        };
        let mut session = CaptureSession::new(&no_retries).unwrap();
        let mut sink = |_: &[u8], _: bool| {};

        let result = session.run(&mut device, &mut sink);

        assert!(matches!(
            result,
            Err(CameraError::ChunkRetriesExhausted {
                address: 0,
                retries: 0
            })
        ));
        assert_eq!(device.chunk_addresses(), vec![0]);
    }
}
