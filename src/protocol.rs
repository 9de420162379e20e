//! Response matching and retrying reads over an unreliable transport
//!
//! A single transport read may return nothing (timeout) or only part of what
//! was asked for. [`read_exact`] accumulates across calls and only fails once
//! the device has stalled for the whole retry budget.

use std::thread;
use std::time::Duration;

use crate::commands::{Command, END_OF_IMAGE};
use crate::config::CameraConfig;
use crate::error::{CameraError, Result};
use crate::transport::Transport;

/// Longest acknowledgment prefix in the catalog
const MAX_ACK_LEN: usize = 8;

/// Bounds on how long a read may keep waiting for data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Reads returning no data tolerated before giving up
    pub attempts: u32,
    /// Pause after every read that leaves the request incomplete
    pub delay: Duration,
}

impl RetryPolicy {
    /// Policy described by `config`
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            attempts: config.read_attempts,
            delay: config.read_retry_delay(),
        }
    }
}

/// Check whether `buffer` starts with exactly `expected`
#[inline]
pub fn matches_ack(buffer: &[u8], expected: &[u8]) -> bool {
    buffer.len() >= expected.len() && buffer[..expected.len()] == *expected
}

/// Find the JPEG end-of-image marker (0xFF 0xD9) in `chunk`
///
/// Returns the length of the image data in this chunk, i.e. the offset just
/// past the marker.
#[inline]
pub fn find_end_marker(chunk: &[u8]) -> Option<usize> {
    chunk
        .windows(END_OF_IMAGE.len())
        .position(|window| window == END_OF_IMAGE)
        .map(|offset| offset + END_OF_IMAGE.len())
}

/// Fill `buf` completely from `transport`
///
/// Partial reads are accumulated. Reads that return nothing count against
/// `policy.attempts`; once that many have been seen the read fails. The
/// contents of `buf` are unspecified on failure.
///
/// # Errors
///
/// Returns `CameraError::ReadTimeout` when the retry budget is exhausted and
/// `CameraError::Transport` if the transport itself fails.
pub fn read_exact<T>(transport: &mut T, buf: &mut [u8], policy: RetryPolicy) -> Result<()>
where
    T: Transport + ?Sized,
{
    let expected = buf.len();
    let mut received = 0;
    let mut stalled = 0;

    while received < expected {
        let n = transport.read(&mut buf[received..])?;
        received += n.min(expected - received);
        if received == expected {
            break;
        }

        if n == 0 {
            stalled += 1;
            if stalled >= policy.attempts {
                log::debug!(
                    "Read stalled after {} attempts: {}/{} bytes",
                    stalled,
                    received,
                    expected
                );
                return Err(CameraError::ReadTimeout { expected, received });
            }
        }

        if !policy.delay.is_zero() {
            thread::sleep(policy.delay);
        }
    }

    Ok(())
}

/// Read the acknowledgment for `command` and check it byte for byte
///
/// # Errors
///
/// Returns `CameraError::ReadTimeout` if the acknowledgment never arrives and
/// `CameraError::AckMismatch` if different bytes arrive instead.
pub fn expect_ack<T>(transport: &mut T, command: Command, policy: RetryPolicy) -> Result<()>
where
    T: Transport + ?Sized,
{
    let expected = command.expected_ack();
    let mut buf = [0u8; MAX_ACK_LEN];
    let buf = &mut buf[..expected.len()];

    read_exact(transport, buf, policy)?;

    if matches_ack(buf, expected) {
        Ok(())
    } else {
        log::warn!(
            "Unexpected response to {:?}: {:02X?} (expected {:02X?})",
            command,
            buf,
            expected
        );
        Err(CameraError::AckMismatch {
            command,
            expected: expected.to_vec(),
            actual: buf.to_vec(),
        })
    }
}
