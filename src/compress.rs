//! LZMA streaming codecs for archive content.
//!
//! Three adapters cover the builder and reader sides:
//!
//! - [`Compressor`] — wraps any [`Read`] and yields the xz-encoded form, so
//!   the builder can stream file contents into the body without buffering
//!   whole files.
//! - [`Decompressor`] — the inverse, decoding from any [`Read`].
//! - [`MemDecoder`] — a seekable decoder over a compressed byte slice
//!   (a sub-range of the archive mapping) with a known uncompressed length.
//!   Backward seeks reset the decoder; forward seeks decode and discard.
//!
//! Encoding uses preset 6 with CRC64 integrity; decoding allows 1 GiB of
//! decoder memory and tolerates concatenated streams. Any decoder status
//! other than clean progress or stream end is surfaced as an error, as is
//! unprocessed input left after the end of a stream.

use std::io::{self, Read, Seek, SeekFrom, Write};

use xz2::stream::{Action, Check, Status, Stream};

use crate::error::{Error, Result};

/// Encoder preset applied to all file content.
pub const PRESET: u32 = 6;

/// Decoder memory limit in bytes.
pub const MEMLIMIT: u64 = 1 << 30;

/// Chunk size for internal staging buffers.
const CHUNK_SIZE: usize = 32 * 1024;

fn new_encoder() -> Result<Stream> {
    Stream::new_easy_encoder(PRESET, Check::Crc64).map_err(Error::from)
}

fn new_decoder() -> Result<Stream> {
    Stream::new_stream_decoder(MEMLIMIT, xz2::stream::CONCATENATED).map_err(Error::from)
}

fn coder_io_error(e: xz2::stream::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

// ── Compressor ───────────────────────────────────────────────────────────────

/// Streaming xz encoder exposed as a byte source.
///
/// Reading from a `Compressor` pulls plain bytes from the inner reader and
/// returns encoded bytes, ending with a complete xz stream once the inner
/// reader is exhausted.
pub struct Compressor<R: Read> {
    inner: R,
    stream: Stream,
    inbuf: Vec<u8>,
    in_len: usize,
    in_pos: usize,
    eof: bool,
    finished: bool,
}

impl<R: Read> Compressor<R> {
    pub fn new(inner: R) -> Result<Self> {
        Ok(Compressor {
            inner,
            stream: new_encoder()?,
            inbuf: vec![0u8; CHUNK_SIZE],
            in_len: 0,
            in_pos: 0,
            eof: false,
            finished: false,
        })
    }

    /// Total plain bytes consumed from the inner reader so far.
    pub fn total_in(&self) -> u64 {
        self.stream.total_in()
    }
}

impl<R: Read> Read for Compressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished || buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.in_pos == self.in_len && !self.eof {
                self.in_len = self.inner.read(&mut self.inbuf)?;
                self.in_pos = 0;
                if self.in_len == 0 {
                    self.eof = true;
                }
            }
            let action = if self.eof { Action::Finish } else { Action::Run };
            let before_in = self.stream.total_in();
            let before_out = self.stream.total_out();
            let status = self
                .stream
                .process(&self.inbuf[self.in_pos..self.in_len], buf, action)
                .map_err(coder_io_error)?;
            self.in_pos += (self.stream.total_in() - before_in) as usize;
            let produced = (self.stream.total_out() - before_out) as usize;
            if matches!(status, Status::StreamEnd) {
                self.finished = true;
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
        }
    }
}

// ── Decompressor ─────────────────────────────────────────────────────────────

/// Streaming xz decoder over any byte source.
pub struct Decompressor<R: Read> {
    inner: R,
    stream: Stream,
    inbuf: Vec<u8>,
    in_len: usize,
    in_pos: usize,
    eof: bool,
    finished: bool,
}

impl<R: Read> Decompressor<R> {
    pub fn new(inner: R) -> Result<Self> {
        Ok(Decompressor {
            inner,
            stream: new_decoder()?,
            inbuf: vec![0u8; CHUNK_SIZE],
            in_len: 0,
            in_pos: 0,
            eof: false,
            finished: false,
        })
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished || buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.in_pos == self.in_len && !self.eof {
                self.in_len = self.inner.read(&mut self.inbuf)?;
                self.in_pos = 0;
                if self.in_len == 0 {
                    self.eof = true;
                }
            }
            let action = if self.eof { Action::Finish } else { Action::Run };
            let before_in = self.stream.total_in();
            let before_out = self.stream.total_out();
            let status = self
                .stream
                .process(&self.inbuf[self.in_pos..self.in_len], buf, action)
                .map_err(coder_io_error)?;
            self.in_pos += (self.stream.total_in() - before_in) as usize;
            let produced = (self.stream.total_out() - before_out) as usize;
            if matches!(status, Status::StreamEnd) {
                self.finished = true;
                if self.in_pos < self.in_len {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "unprocessed input remaining after end of compressed stream",
                    ));
                }
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
            if self.eof && self.in_pos == self.in_len {
                // Finish with no input left and no output produced: the
                // stream ended without a proper end marker.
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "compressed stream ended prematurely",
                ));
            }
        }
    }
}

// ── MemDecoder ───────────────────────────────────────────────────────────────

/// Seekable decoder over a compressed in-memory region.
///
/// `full_size` is the authoritative uncompressed length from the node
/// record; seeks clamp to it and reads past it return zero bytes. Multiple
/// `MemDecoder`s over the same region are independent, so concurrent readers
/// never share decoder state.
pub struct MemDecoder<'a> {
    src: &'a [u8],
    full_size: u64,
    stream: Stream,
    in_pos: usize,
    out_pos: u64,
    finished: bool,
}

impl<'a> MemDecoder<'a> {
    pub fn new(src: &'a [u8], full_size: u64) -> Result<Self> {
        Ok(MemDecoder {
            src,
            full_size,
            stream: new_decoder()?,
            in_pos: 0,
            out_pos: 0,
            finished: false,
        })
    }

    /// The uncompressed length of the region.
    pub fn full_size(&self) -> u64 {
        self.full_size
    }

    /// Current position in the uncompressed byte stream.
    pub fn position(&self) -> u64 {
        self.out_pos
    }

    fn rewind_decoder(&mut self) -> io::Result<()> {
        self.stream = new_decoder().map_err(|e| io::Error::other(e.to_string()))?;
        self.in_pos = 0;
        self.out_pos = 0;
        self.finished = false;
        Ok(())
    }
}

impl Read for MemDecoder<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.finished || self.out_pos >= self.full_size {
            return Ok(0);
        }
        let limit = buf.len().min((self.full_size - self.out_pos) as usize);
        let buf = &mut buf[..limit];
        loop {
            let action = if self.in_pos == self.src.len() {
                Action::Finish
            } else {
                Action::Run
            };
            let before_in = self.stream.total_in();
            let before_out = self.stream.total_out();
            let status = self
                .stream
                .process(&self.src[self.in_pos..], buf, action)
                .map_err(coder_io_error)?;
            self.in_pos += (self.stream.total_in() - before_in) as usize;
            let produced = (self.stream.total_out() - before_out) as usize;
            self.out_pos += produced as u64;
            if matches!(status, Status::StreamEnd) {
                self.finished = true;
                if self.in_pos < self.src.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "unprocessed input remaining after end of compressed stream",
                    ));
                }
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
        }
    }
}

impl Seek for MemDecoder<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(d) => self.out_pos as i128 + d as i128,
            SeekFrom::End(d) => self.full_size as i128 + d as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of decoded stream",
            ));
        }
        let target = (target as u64).min(self.full_size);
        if target < self.out_pos {
            self.rewind_decoder()?;
        }
        let mut scratch = [0u8; CHUNK_SIZE];
        while self.out_pos < target {
            let want = scratch.len().min((target - self.out_pos) as usize);
            let n = self.read(&mut scratch[..want])?;
            if n == 0 {
                break;
            }
        }
        Ok(self.out_pos)
    }
}

// ── One-shot helpers ─────────────────────────────────────────────────────────

/// Compresses everything from `input` into `out`, returning the number of
/// compressed bytes written.
pub fn compress<R: Read, W: Write>(input: R, out: &mut W) -> Result<u64> {
    let mut enc = Compressor::new(input)?;
    Ok(io::copy(&mut enc, out)?)
}

/// Decompresses everything from `input` into `out`, returning the number of
/// plain bytes written.
pub fn decompress<R: Read, W: Write>(input: R, out: &mut W) -> Result<u64> {
    let mut dec = Decompressor::new(input)?;
    Ok(io::copy(&mut dec, out)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8]) -> Vec<u8> {
        let mut packed = Vec::new();
        compress(data, &mut packed).unwrap();
        let mut plain = Vec::new();
        decompress(packed.as_slice(), &mut plain).unwrap();
        plain
    }

    #[test]
    fn round_trip_small() {
        let data = b"the quick brown fox jumps over the lazy dog";
        assert_eq!(roundtrip(data), data);
    }

    #[test]
    fn round_trip_multi_chunk() {
        let data: Vec<u8> = (0u8..=255).cycle().take(5 * CHUNK_SIZE + 17).collect();
        assert_eq!(roundtrip(&data), data);
    }

    #[test]
    fn round_trip_empty() {
        let mut packed = Vec::new();
        let n = compress(&b""[..], &mut packed).unwrap();
        assert!(n > 0, "an empty input still yields stream framing");
        let mut plain = Vec::new();
        decompress(packed.as_slice(), &mut plain).unwrap();
        assert!(plain.is_empty());
    }

    #[test]
    fn mem_decoder_sequential() {
        let data: Vec<u8> = (0u8..=255).collect();
        let mut packed = Vec::new();
        compress(data.as_slice(), &mut packed).unwrap();

        let mut dec = MemDecoder::new(&packed, data.len() as u64).unwrap();
        let mut out = Vec::new();
        dec.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        // Reads after end return zero bytes, not failure.
        let mut one = [0u8; 1];
        assert_eq!(dec.read(&mut one).unwrap(), 0);
    }

    #[test]
    fn mem_decoder_forward_and_backward_seek() {
        let data: Vec<u8> = (0u8..=255).cycle().take(3 * CHUNK_SIZE).collect();
        let mut packed = Vec::new();
        compress(data.as_slice(), &mut packed).unwrap();

        let mut dec = MemDecoder::new(&packed, data.len() as u64).unwrap();
        let mut buf = [0u8; 16];

        assert_eq!(dec.seek(SeekFrom::Start(CHUNK_SIZE as u64)).unwrap(), CHUNK_SIZE as u64);
        dec.read_exact(&mut buf).unwrap();
        assert_eq!(buf[..], data[CHUNK_SIZE..CHUNK_SIZE + 16]);

        // Backward seek resets the decoder.
        assert_eq!(dec.seek(SeekFrom::Start(4)).unwrap(), 4);
        dec.read_exact(&mut buf).unwrap();
        assert_eq!(buf[..], data[4..20]);

        // Relative and end-based seeks.
        assert_eq!(dec.seek(SeekFrom::Current(-8)).unwrap(), 12);
        let end = dec.seek(SeekFrom::End(-1)).unwrap();
        assert_eq!(end, data.len() as u64 - 1);
        assert_eq!(dec.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], data[data.len() - 1]);
    }

    #[test]
    fn mem_decoder_seek_past_end_clamps() {
        let data = b"0123456789";
        let mut packed = Vec::new();
        compress(&data[..], &mut packed).unwrap();

        let mut dec = MemDecoder::new(&packed, data.len() as u64).unwrap();
        assert_eq!(dec.seek(SeekFrom::Start(1_000)).unwrap(), data.len() as u64);
        let mut buf = [0u8; 4];
        assert_eq!(dec.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn mem_decoder_zero_length() {
        let mut packed = Vec::new();
        compress(&b""[..], &mut packed).unwrap();
        let mut dec = MemDecoder::new(&packed, 0).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(dec.read(&mut buf).unwrap(), 0);
        assert_eq!(dec.seek(SeekFrom::Start(5)).unwrap(), 0);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let data: Vec<u8> = (0u8..=255).cycle().take(CHUNK_SIZE).collect();
        let mut packed = Vec::new();
        compress(data.as_slice(), &mut packed).unwrap();
        packed.truncate(packed.len() / 2);
        let mut out = Vec::new();
        assert!(decompress(packed.as_slice(), &mut out).is_err());
    }
}
