//! Article framing
//!
//! Pulls one article's bytes off the current stream, either an exact byte
//! count announced by `#! rnews <N>` or everything up to end of stream.

use std::io::{self, BufRead, BufReader, Read};
use tracing::warn;

/// Most that is reserved up front for a byte-counted article larger than any
/// seen so far; the rest is grown as bytes actually arrive
const RESERVE_CHUNK: usize = 64 * 1024;

/// Reusable article buffer
///
/// Capacity only grows: after framing an article of `n` bytes the buffer can
/// hold at least `n + 1` bytes (the article plus an appended newline) without
/// reallocating, so a run of same-sized articles allocates once.
#[derive(Debug, Default)]
pub struct ArticleBuffer {
    bytes: Vec<u8>,
    high_water: usize,
}

impl ArticleBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// The framed article
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Largest article (including the appended newline) framed so far
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Current allocation
    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// Whether the article is empty or a lone line terminator
    pub fn is_empty_article(&self) -> bool {
        self.bytes.is_empty() || self.bytes == b"\n"
    }

    fn reset(&mut self, needed: usize) {
        self.bytes.clear();
        if self.bytes.capacity() < needed {
            self.bytes.reserve_exact(needed);
        }
    }

    fn finish(&mut self) {
        if self.bytes.last().is_some_and(|&b| b != b'\n') {
            self.bytes.push(b'\n');
        }
        self.high_water = self.high_water.max(self.bytes.len());
    }
}

/// How a byte-counted read ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// All declared bytes were read
    Complete,
    /// The stream ended early; the partial article is kept
    Truncated {
        /// Bytes declared by the batch
        wanted: usize,
        /// Bytes actually read
        got: usize,
    },
}

/// Read exactly `size` bytes into `buffer`, appending a newline if the last
/// byte is not one
///
/// Short reads are retried. End of stream before `size` bytes is reported as
/// [`Framing::Truncated`] with whatever arrived; the caller forwards it
/// rather than losing the rest of the batch.
pub fn read_bytecount<R: Read>(
    reader: &mut R,
    size: usize,
    buffer: &mut ArticleBuffer,
) -> io::Result<Framing> {
    let declared = size.saturating_add(1);
    buffer.reset(declared.min(buffer.high_water.max(RESERVE_CHUNK)));
    let got = reader.by_ref().take(size as u64).read_to_end(&mut buffer.bytes)?;
    buffer.finish();

    if got < size {
        warn!(wanted = size, got, "cannot read, wanted {} got {}", size, got);
        return Ok(Framing::Truncated { wanted: size, got });
    }
    Ok(Framing::Complete)
}

/// Read the rest of the stream as one article
///
/// `prefix` holds bytes already consumed while classifying the stream. Each
/// line ending in `\r\n` is normalized to `\n`, and the article is made to
/// end in a newline.
pub fn read_remainder<R: Read>(
    reader: R,
    prefix: &[u8],
    buffer: &mut ArticleBuffer,
) -> io::Result<()> {
    buffer.reset(prefix.len().max(buffer.high_water));
    buffer.bytes.extend_from_slice(prefix);

    let mut reader = BufReader::new(reader);
    loop {
        let read = reader.read_until(b'\n', &mut buffer.bytes)?;
        if read == 0 {
            break;
        }
        normalize_crlf(&mut buffer.bytes);
    }
    buffer.finish();
    Ok(())
}

/// Turn a trailing `\r\n` at the end of `bytes` into `\n`
fn normalize_crlf(bytes: &mut Vec<u8>) {
    let len = bytes.len();
    if bytes.ends_with(b"\r\n") {
        bytes.truncate(len - 2);
        bytes.push(b'\n');
    }
}
