//! Transport that plays back a fixed script of read results

use std::collections::VecDeque;
use std::io;

use crate::transport::Transport;

/// Returns one scripted byte run per read call, then times out forever
///
/// A run longer than the caller's buffer is split across calls. An empty run
/// simulates a read timeout.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    read_calls: usize,
    baud_rate: u32,
    open: bool,
}

impl ScriptedTransport {
    /// Transport that will return each entry of `script` in turn
    pub fn new(script: Vec<Vec<u8>>) -> Self {
        Self {
            script: script.into(),
            written: Vec::new(),
            read_calls: 0,
            baud_rate: 38400,
            open: true,
        }
    }

    /// Transport whose every read times out
    pub fn silent() -> Self {
        Self::new(Vec::new())
    }

    /// Number of read calls made
    pub fn read_calls(&self) -> usize {
        self.read_calls
    }

    /// Every buffer written, in order
    pub fn written(&self) -> &[Vec<u8>] {
        &self.written
    }
}

impl Transport for ScriptedTransport {
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
        self.written.push(bytes.to_vec());
        Ok(())
    }

    fn flush_output(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_calls += 1;
        let Some(mut run) = self.script.pop_front() else {
            return Ok(0);
        };
        let n = run.len().min(buf.len());
        buf[..n].copy_from_slice(&run[..n]);
        if n < run.len() {
            self.script.push_front(run.split_off(n));
        }
        Ok(n)
    }

    fn discard_pending_input(&mut self) -> io::Result<()> {
        self.script.clear();
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
