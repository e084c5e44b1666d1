//! Streaming gzip reader for archive extraction.
//!
//! # Invariants
//! - The stream is read strictly forward; no seeking. Padding and skipped
//!   payloads are discarded through a bounded scratch buffer.
//! - `MultiGzDecoder` treats concatenated members as a single stream.

use std::io::{self, Read};

use flate2::read::MultiGzDecoder;

/// Decompressing reader with EINTR-retrying reads and forward skip.
pub struct GzipStream<R: Read> {
    dec: MultiGzDecoder<R>,
    discard: [u8; 8192],
}

impl<R: Read> GzipStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            dec: MultiGzDecoder::new(reader),
            discard: [0; 8192],
        }
    }

    /// Reads some decompressed bytes, retrying on EINTR.
    pub fn read_some(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.dec.read(dst) {
                Ok(n) => return Ok(n),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Fills `dst` exactly, or reports a clean EOF (`Ok(false)`) when the
    /// stream ends before the first byte. EOF mid-buffer is an
    /// `UnexpectedEof` error.
    pub fn read_exact_or_eof(&mut self, dst: &mut [u8]) -> io::Result<bool> {
        let mut off = 0;
        while off < dst.len() {
            let n = self.read_some(&mut dst[off..])?;
            if n == 0 {
                if off == 0 {
                    return Ok(false);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated block",
                ));
            }
            off += n;
        }
        Ok(true)
    }

    /// Fills `dst` exactly; EOF at any point is an `UnexpectedEof` error.
    pub fn read_exact(&mut self, dst: &mut [u8]) -> io::Result<()> {
        let mut off = 0;
        while off < dst.len() {
            let n = self.read_some(&mut dst[off..])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated stream",
                ));
            }
            off += n;
        }
        Ok(())
    }

    /// Discards exactly `n` decompressed bytes.
    pub fn skip(&mut self, mut n: u64) -> io::Result<()> {
        while n > 0 {
            let step = (self.discard.len() as u64).min(n) as usize;
            let dec = &mut self.dec;
            let buf = &mut self.discard[..step];
            let got = loop {
                match dec.read(buf) {
                    Ok(n) => break Ok(n),
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => break Err(e),
                }
            }?;
            if got == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated stream while skipping",
                ));
            }
            n -= got as u64;
        }
        Ok(())
    }
}
