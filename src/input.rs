use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use oggframe::process::demux::Demuxer;

/// Bytes requested from the demuxer's buffer per read.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Unified input reader for files and stdin that reads straight into the
/// demuxer's sync buffer.
pub struct InputReader {
    reader: Box<dyn Read>,
    is_pipe: bool,
    total_bytes: u64,
}

impl InputReader {
    /// Opens a path; "-" reads stdin.
    pub fn new<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        let path = input_path.as_ref();
        let is_pipe = path.as_os_str() == "-";

        let reader: Box<dyn Read> = if is_pipe {
            Box::new(io::stdin().lock())
        } else {
            let file = File::open(path)
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            Box::new(BufReader::new(file))
        };

        Ok(Self {
            reader,
            is_pipe,
            total_bytes: 0,
        })
    }

    #[cfg(test)]
    pub fn from_reader(reader: impl Read + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            is_pipe: false,
            total_bytes: 0,
        }
    }

    pub fn is_pipe(&self) -> bool {
        self.is_pipe
    }

    /// Bytes handed to the demuxer so far.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Reads one chunk into the demuxer. Returns 0 at end of input.
    pub fn fill(&mut self, demuxer: &mut Demuxer) -> Result<usize> {
        let buffer = demuxer.buffer(READ_CHUNK_SIZE);
        let bytes_read = loop {
            match self.reader.read(buffer) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("Failed to read input"),
            }
        };

        demuxer.wrote(bytes_read)?;
        self.total_bytes += bytes_read as u64;
        Ok(bytes_read)
    }

    /// Feeds the whole input through the demuxer, calling back after each
    /// chunk. The callback returns Ok(false) to stop early.
    pub fn process_chunks<F>(&mut self, demuxer: &mut Demuxer, mut callback: F) -> Result<()>
    where
        F: FnMut(&mut Demuxer) -> Result<bool>,
    {
        loop {
            if self.fill(demuxer)? == 0 {
                break;
            }

            if !callback(demuxer)? {
                break;
            }
        }

        Ok(())
    }
}
