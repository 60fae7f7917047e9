use std::io::{self, Read, Write};
use std::sync::Arc;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use rpcz_core::{DecodeEngine, EncodeEngine, PooledCompressor, Registry};

/// Identifier the deflate (zlib-wrapped) compressor is registered under.
pub const NAME: &str = "deflate";

/// Size of the intermediate output / input buffers kept by each engine.
const BUF_SIZE: usize = 32 * 1024;

fn invalid(err: impl std::error::Error + Send + Sync + 'static) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// zlib stream encoder reusing one `flate2::Compress` state across sessions.
pub struct DeflateEncoder {
    raw: Compress,
    out: Box<[u8]>,
}

impl DeflateEncoder {
    pub fn new(level: u32) -> Self {
        Self {
            raw: Compress::new(Compression::new(level), true),
            out: vec![0; BUF_SIZE].into_boxed_slice(),
        }
    }

    /// Run the compressor once and forward whatever it produced.
    ///
    /// Returns the number of input bytes consumed, the number of output bytes
    /// produced, and the status.
    fn step<W: Write + ?Sized>(
        &mut self,
        sink: &mut W,
        input: &[u8],
        flush: FlushCompress,
    ) -> io::Result<(usize, usize, Status)> {
        let (in_before, out_before) = (self.raw.total_in(), self.raw.total_out());
        let status = self
            .raw
            .compress(input, &mut self.out, flush)
            .map_err(invalid)?;
        let consumed = (self.raw.total_in() - in_before) as usize;
        let produced = (self.raw.total_out() - out_before) as usize;
        sink.write_all(&self.out[..produced])?;
        Ok((consumed, produced, status))
    }
}

impl Default for DeflateEncoder {
    fn default() -> Self {
        Self::new(Compression::default().level())
    }
}

impl EncodeEngine for DeflateEncoder {
    fn reset(&mut self) {
        self.raw.reset();
    }

    fn write<W: Write + ?Sized>(&mut self, sink: &mut W, buf: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            let (consumed, produced, _) = self.step(sink, &buf[written..], FlushCompress::None)?;
            if consumed == 0 && produced == 0 {
                break;
            }
            written += consumed;
        }
        if written == 0 && !buf.is_empty() {
            return Err(io::ErrorKind::WriteZero.into());
        }
        Ok(written)
    }

    fn flush<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        loop {
            let (_, produced, _) = self.step(sink, &[], FlushCompress::Sync)?;
            if produced < self.out.len() {
                break;
            }
        }
        sink.flush()
    }

    fn finish<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        loop {
            let (_, produced, status) = self.step(sink, &[], FlushCompress::Finish)?;
            if status == Status::StreamEnd {
                break;
            }
            if produced == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
        }
        sink.flush()
    }
}

/// zlib stream decoder reusing one `flate2::Decompress` state across sessions.
pub struct DeflateDecoder {
    raw: Decompress,
    input: Box<[u8]>,
    pos: usize,
    cap: usize,
    source_eof: bool,
    done: bool,
    /// Set by the first decode error; the session can never produce data again.
    failed: Option<io::ErrorKind>,
}

impl Default for DeflateDecoder {
    fn default() -> Self {
        Self {
            raw: Decompress::new(true),
            input: vec![0; BUF_SIZE].into_boxed_slice(),
            pos: 0,
            cap: 0,
            source_eof: false,
            done: false,
            failed: None,
        }
    }
}

impl DecodeEngine for DeflateDecoder {
    fn reset(&mut self) {
        self.raw.reset(true);
        self.pos = 0;
        self.cap = 0;
        self.source_eof = false;
        self.done = false;
        self.failed = None;
    }

    fn read<R: Read + ?Sized>(&mut self, source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(kind) = self.failed {
            return Err(io::Error::new(kind, "deflate: stream already failed"));
        }
        if buf.is_empty() || self.done {
            return Ok(0);
        }
        let result = self.decode(source, buf);
        if let Err(e) = &result {
            self.failed = Some(e.kind());
        }
        result
    }

    fn is_finished(&self) -> bool {
        self.failed.is_none() && self.done
    }
}

impl DeflateDecoder {
    fn decode<R: Read + ?Sized>(&mut self, source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos == self.cap && !self.source_eof {
                self.cap = source.read(&mut self.input)?;
                self.pos = 0;
                self.source_eof = self.cap == 0;
            }

            let flush = if self.source_eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };
            let (in_before, out_before) = (self.raw.total_in(), self.raw.total_out());
            let status = self
                .raw
                .decompress(&self.input[self.pos..self.cap], buf, flush)
                .map_err(invalid)?;
            let consumed = (self.raw.total_in() - in_before) as usize;
            let produced = (self.raw.total_out() - out_before) as usize;
            self.pos += consumed;

            if status == Status::StreamEnd {
                self.done = true;
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
            if self.source_eof && consumed == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "deflate: stream ended before its trailer",
                ));
            }
        }
    }
}

pub type DeflateCompressor = PooledCompressor<DeflateEncoder, DeflateDecoder>;

/// Pooled deflate compressor at `level` (0 = store, 9 = smallest).
pub fn compressor(level: u32) -> DeflateCompressor {
    PooledCompressor::new(NAME, move || DeflateEncoder::new(level), DeflateDecoder::default)
}

/// Register a deflate compressor at the default level.
pub fn register(registry: &Registry) -> Arc<DeflateCompressor> {
    let codec = Arc::new(compressor(Compression::default().level()));
    if registry.register(codec.clone()).is_some() {
        log::trace!("deflate compressor replaced an earlier registration");
    }
    codec
}
