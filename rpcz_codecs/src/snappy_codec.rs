use std::io::{self, Read, Write};
use std::sync::Arc;

use rpcz_core::{DecodeEngine, EncodeEngine, PooledCompressor, Registry};
use snap::raw::{decompress_len, max_compress_len, Decoder, Encoder};

/// Identifier the snappy compressor is registered under.
pub const NAME: &str = "snappy";

/// Largest uncompressed payload a single frame chunk may carry: 64 KiB.
pub const MAX_BLOCK_SIZE: usize = 1 << 16;

/// Read-ahead allocation hint for freshly constructed decoders.
pub const DEFAULT_READ_BLOCK: usize = 64 << 10;

// ── Framing ────────────────────────────────────────────────────────────────

const STREAM_IDENTIFIER: &[u8; 10] = b"\xff\x06\x00\x00sNaPpY";
const STREAM_BODY: &[u8; 6] = b"sNaPpY";

const CHUNK_STREAM_IDENTIFIER: u8 = 0xff;
const CHUNK_COMPRESSED: u8 = 0x00;
const CHUNK_UNCOMPRESSED: u8 = 0x01;
const CHUNK_PADDING: u8 = 0xfe;

const CHUNK_HEADER_SIZE: usize = 4;
const CHECKSUM_SIZE: usize = 4;

fn masked_crc32c(data: &[u8]) -> u32 {
    let sum = crc32c::crc32c(data);
    (sum.wrapping_shr(15) | sum.wrapping_shl(17)).wrapping_add(0xa282_ead8)
}

fn chunk_header(kind: u8, len: usize) -> [u8; CHUNK_HEADER_SIZE] {
    let len = len as u32;
    [kind, len as u8, (len >> 8) as u8, (len >> 16) as u8]
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("snappy: {msg}"))
}

// ── Encoder ────────────────────────────────────────────────────────────────

/// Snappy framing-format encoder whose buffers survive `reset`.
///
/// Output uses only the stream identifier, compressed and uncompressed chunk
/// types, so any standard framing decoder accepts it. A block is stored
/// uncompressed when compression saves less than 12.5%.
pub struct SnappyEncoder {
    raw: Encoder,
    /// Pending uncompressed input, at most `MAX_BLOCK_SIZE` bytes.
    src: Vec<u8>,
    dst: Vec<u8>,
    wrote_identifier: bool,
}

impl Default for SnappyEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnappyEncoder {
    pub fn new() -> Self {
        Self {
            raw: Encoder::new(),
            src: Vec::with_capacity(MAX_BLOCK_SIZE),
            dst: vec![0; max_compress_len(MAX_BLOCK_SIZE)],
            wrote_identifier: false,
        }
    }

    fn write_identifier<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        if !self.wrote_identifier {
            sink.write_all(STREAM_IDENTIFIER)?;
            self.wrote_identifier = true;
        }
        Ok(())
    }

    /// Emit the pending input as one chunk.
    fn emit_block<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        if self.src.is_empty() {
            return Ok(());
        }
        self.write_identifier(sink)?;

        let checksum = masked_crc32c(&self.src);
        let n = self.raw.compress(&self.src, &mut self.dst)?;
        let (kind, payload) = if n >= self.src.len() - self.src.len() / 8 {
            (CHUNK_UNCOMPRESSED, &self.src[..])
        } else {
            (CHUNK_COMPRESSED, &self.dst[..n])
        };

        sink.write_all(&chunk_header(kind, CHECKSUM_SIZE + payload.len()))?;
        sink.write_all(&checksum.to_le_bytes())?;
        sink.write_all(payload)?;
        self.src.clear();
        Ok(())
    }
}

impl EncodeEngine for SnappyEncoder {
    fn reset(&mut self) {
        self.src.clear();
        self.wrote_identifier = false;
    }

    fn write<W: Write + ?Sized>(&mut self, sink: &mut W, mut buf: &[u8]) -> io::Result<usize> {
        let total = buf.len();
        while !buf.is_empty() {
            let room = MAX_BLOCK_SIZE - self.src.len();
            let take = room.min(buf.len());
            self.src.extend_from_slice(&buf[..take]);
            buf = &buf[take..];
            if self.src.len() == MAX_BLOCK_SIZE {
                self.emit_block(sink)?;
            }
        }
        Ok(total)
    }

    fn flush<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        self.emit_block(sink)?;
        sink.flush()
    }

    fn finish<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        // An empty session still produces a well-formed (identifier only) stream.
        self.write_identifier(sink)?;
        self.emit_block(sink)?;
        sink.flush()
    }
}

// ── Decoder ────────────────────────────────────────────────────────────────

/// Snappy framing-format decoder whose buffers survive `reset`.
pub struct SnappyDecoder {
    raw: Decoder,
    /// Raw bytes of the chunk being decoded (checksum + payload).
    chunk: Vec<u8>,
    /// Decoded bytes of the current chunk; `pos` marks how many were handed out.
    out: Vec<u8>,
    pos: usize,
    read_identifier: bool,
    eof: bool,
    /// Set by the first decode error; the session can never produce data again.
    failed: Option<io::ErrorKind>,
}

impl Default for SnappyDecoder {
    fn default() -> Self {
        Self::with_block_hint(DEFAULT_READ_BLOCK)
    }
}

impl SnappyDecoder {
    /// Create a decoder with `hint` bytes of read-ahead preallocated.
    pub fn with_block_hint(hint: usize) -> Self {
        let hint = hint.min(MAX_BLOCK_SIZE);
        Self {
            raw: Decoder::new(),
            chunk: Vec::with_capacity(CHECKSUM_SIZE + max_compress_len(hint)),
            out: Vec::with_capacity(hint),
            pos: 0,
            read_identifier: false,
            eof: false,
            failed: None,
        }
    }

    /// Load the next data chunk into `out`.
    ///
    /// Returns `false` when the source ended cleanly on a chunk boundary.
    fn fill<R: Read + ?Sized>(&mut self, source: &mut R) -> io::Result<bool> {
        loop {
            let mut header = [0u8; CHUNK_HEADER_SIZE];
            if !read_header(source, &mut header)? {
                return Ok(false);
            }
            let kind = header[0];
            let len = header[1] as usize | (header[2] as usize) << 8 | (header[3] as usize) << 16;

            if !self.read_identifier && kind != CHUNK_STREAM_IDENTIFIER {
                return Err(invalid("stream does not start with the stream identifier"));
            }

            match kind {
                CHUNK_STREAM_IDENTIFIER => {
                    if len != STREAM_BODY.len() {
                        return Err(invalid("malformed stream identifier chunk"));
                    }
                    let mut body = [0u8; 6];
                    source.read_exact(&mut body)?;
                    if &body != STREAM_BODY {
                        return Err(invalid("bad stream identifier"));
                    }
                    self.read_identifier = true;
                }
                CHUNK_COMPRESSED => {
                    if len < CHECKSUM_SIZE {
                        return Err(invalid("compressed chunk too short"));
                    }
                    self.read_chunk(source, len)?;
                    let payload = &self.chunk[CHECKSUM_SIZE..];
                    let n = decompress_len(payload)?;
                    if n > MAX_BLOCK_SIZE {
                        return Err(invalid("decoded block exceeds 64 KiB"));
                    }
                    self.out.resize(n, 0);
                    self.raw.decompress(payload, &mut self.out)?;
                    self.verify()?;
                    return Ok(true);
                }
                CHUNK_UNCOMPRESSED => {
                    if len < CHECKSUM_SIZE || len - CHECKSUM_SIZE > MAX_BLOCK_SIZE {
                        return Err(invalid("uncompressed chunk has invalid length"));
                    }
                    self.read_chunk(source, len)?;
                    self.out.clear();
                    self.out.extend_from_slice(&self.chunk[CHECKSUM_SIZE..]);
                    self.verify()?;
                    return Ok(true);
                }
                0x02..=0x7f => return Err(invalid("unsupported unskippable chunk")),
                // Padding and reserved skippable chunks.
                0x80..=CHUNK_PADDING => {
                    let skipped = io::copy(&mut (&mut *source).take(len as u64), &mut io::sink())?;
                    if skipped != len as u64 {
                        return Err(io::ErrorKind::UnexpectedEof.into());
                    }
                }
            }
        }
    }

    fn read_chunk<R: Read + ?Sized>(&mut self, source: &mut R, len: usize) -> io::Result<()> {
        self.chunk.resize(len, 0);
        source.read_exact(&mut self.chunk)
    }

    fn verify(&mut self) -> io::Result<()> {
        let expected = u32::from_le_bytes([self.chunk[0], self.chunk[1], self.chunk[2], self.chunk[3]]);
        if masked_crc32c(&self.out) != expected {
            return Err(invalid("checksum mismatch"));
        }
        self.pos = 0;
        Ok(())
    }
}

/// Read a chunk header, distinguishing a clean end of stream from truncation.
fn read_header<R: Read + ?Sized>(source: &mut R, header: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < header.len() {
        match source.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

impl DecodeEngine for SnappyDecoder {
    fn reset(&mut self) {
        self.out.clear();
        self.pos = 0;
        self.read_identifier = false;
        self.eof = false;
        self.failed = None;
    }

    fn read<R: Read + ?Sized>(&mut self, source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(kind) = self.failed {
            return Err(io::Error::new(kind, "snappy: stream already failed"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.out.len() {
            if self.eof {
                return Ok(0);
            }
            match self.fill(source) {
                Ok(true) => {}
                Ok(false) => {
                    self.out.clear();
                    self.pos = 0;
                    self.eof = true;
                }
                Err(e) => {
                    self.out.clear();
                    self.pos = 0;
                    self.failed = Some(e.kind());
                    return Err(e);
                }
            }
        }
        let n = buf.len().min(self.out.len() - self.pos);
        buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn is_finished(&self) -> bool {
        self.failed.is_none() && self.eof && self.pos == self.out.len()
    }
}

// ── Codec ──────────────────────────────────────────────────────────────────

pub type SnappyCompressor = PooledCompressor<SnappyEncoder, SnappyDecoder>;

/// Pooled snappy compressor, registered as [`NAME`].
pub fn compressor() -> SnappyCompressor {
    PooledCompressor::new(NAME, SnappyEncoder::new, SnappyDecoder::default)
}

/// Register a fresh snappy compressor, shadowing any earlier "snappy" entry.
pub fn register(registry: &Registry) -> Arc<SnappyCompressor> {
    let codec = Arc::new(compressor());
    if registry.register(codec.clone()).is_some() {
        log::trace!("snappy compressor replaced an earlier registration");
    }
    codec
}
