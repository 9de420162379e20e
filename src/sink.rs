//! Consumers for image chunks as they arrive
//!
//! A capture calls [`ChunkSink::on_chunk`] once per accepted chunk, in order,
//! on the caller's thread. The last call has `is_final = true` and its slice
//! ends with the JPEG end-of-image marker. A failed capture never makes a
//! final call, so sinks that persist data must treat anything without a final
//! chunk as incomplete.

use std::io::{self, Write};

/// Receives image chunks from a capture
pub trait ChunkSink {
    /// Handle one chunk; `chunk.len()` is the delivered length
    ///
    /// # Errors
    ///
    /// Returning an error aborts the capture.
    fn on_chunk(&mut self, chunk: &[u8], is_final: bool) -> io::Result<()>;
}

impl<F> ChunkSink for F
where
    F: FnMut(&[u8], bool),
{
    fn on_chunk(&mut self, chunk: &[u8], is_final: bool) -> io::Result<()> {
        self(chunk, is_final);
        Ok(())
    }
}

/// Writes chunks straight to any [`Write`] (typically a file)
#[derive(Debug)]
pub struct WriterSink<W: Write> {
    writer: W,
    bytes_written: usize,
    complete: bool,
}

impl<W: Write> WriterSink<W> {
    /// Wrap `writer`
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            bytes_written: 0,
            complete: false,
        }
    }

    /// Bytes written so far
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Whether the final chunk has been written
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ChunkSink for WriterSink<W> {
    fn on_chunk(&mut self, chunk: &[u8], is_final: bool) -> io::Result<()> {
        self.writer.write_all(chunk)?;
        self.bytes_written += chunk.len();
        if is_final {
            self.writer.flush()?;
            self.complete = true;
            log::debug!("Image complete: {} bytes written", self.bytes_written);
        }
        Ok(())
    }
}

/// Collects the image in memory
#[derive(Debug, Default, Clone)]
pub struct JpegCollector {
    data: Vec<u8>,
    chunks: usize,
    complete: bool,
}

impl JpegCollector {
    /// Empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes collected so far
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of chunks received
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Whether the final chunk has arrived
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Take the finished image, or `None` if the final chunk never arrived
    pub fn into_image(self) -> Option<Vec<u8>> {
        self.complete.then_some(self.data)
    }
}

impl ChunkSink for JpegCollector {
    fn on_chunk(&mut self, chunk: &[u8], is_final: bool) -> io::Result<()> {
        self.data.extend_from_slice(chunk);
        self.chunks += 1;
        self.complete = is_final;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        let mut sink = |chunk: &[u8], is_final: bool| seen.push((chunk.len(), is_final));
        sink.on_chunk(&[1, 2, 3], false).unwrap();
        sink.on_chunk(&[4], true).unwrap();
        assert_eq!(seen, vec![(3, false), (1, true)]);
    }

    #[test]
    fn test_writer_sink_tracks_completion() {
        let mut sink = WriterSink::new(Vec::new());
        sink.on_chunk(&[0xFF, 0xD8, 0x00], false).unwrap();
        assert!(!sink.is_complete());
        sink.on_chunk(&[0xFF, 0xD9], true).unwrap();
        assert!(sink.is_complete());
        assert_eq!(sink.bytes_written(), 5);
        assert_eq!(sink.into_inner(), vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9]);
    }

    #[test]
    fn test_writer_sink_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.jpg");
        let file = std::fs::File::create(&path).unwrap();

        let mut sink = WriterSink::new(file);
        sink.on_chunk(&[0xFF, 0xD8], false).unwrap();
        sink.on_chunk(&[0x42, 0xFF, 0xD9], true).unwrap();
        drop(sink);

        assert_eq!(
            std::fs::read(&path).unwrap(),
            vec![0xFF, 0xD8, 0x42, 0xFF, 0xD9]
        );
    }

    #[test]
    fn test_collector_incomplete_yields_nothing() {
        let mut collector = JpegCollector::new();
        collector.on_chunk(&[0xFF, 0xD8], false).unwrap();
        assert_eq!(collector.chunk_count(), 1);
        assert!(collector.into_image().is_none());
    }

    #[test]
    fn test_collector_complete() {
        let mut collector = JpegCollector::new();
        collector.on_chunk(&[0xFF, 0xD8], false).unwrap();
        collector.on_chunk(&[0xFF, 0xD9], true).unwrap();
        assert_eq!(collector.into_image(), Some(vec![0xFF, 0xD8, 0xFF, 0xD9]));
    }
}
