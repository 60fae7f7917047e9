use std::io::{self, Read, Write};

/// Resettable compression state for one stream at a time.
///
/// An engine never owns the sink it writes to. The sink is lent to it on every
/// call by the [`PooledWriter`](crate::PooledWriter) that currently holds it,
/// which is what lets one engine serve many sessions without reallocating:
/// - `reset` must discard every byte buffered by a previous session, including
///   state from a session that was never finished.
/// - After `finish` returns (successfully or not) the engine is only used again
///   after another `reset`.
pub trait EncodeEngine: Send + 'static {
    /// Forget all state from the previous session.
    fn reset(&mut self);

    /// Accept `buf` for compression, writing complete output to `sink`.
    ///
    /// Engines may buffer internally; the returned count is the number of input
    /// bytes accepted, not the number written to `sink`.
    fn write<W: Write + ?Sized>(&mut self, sink: &mut W, buf: &[u8]) -> io::Result<usize>;

    /// Emit everything buffered so far as self-contained output and flush `sink`.
    fn flush<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()>;

    /// Finalize the stream: flush buffered input and write any trailer.
    fn finish<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()>;
}

/// Resettable decompression state for one stream at a time.
pub trait DecodeEngine: Send + 'static {
    /// Forget all state from the previous session so the next read starts at the
    /// beginning of a new compressed stream.
    fn reset(&mut self);

    /// Decompress into `buf`, pulling compressed bytes from `source` as needed.
    ///
    /// Returns `Ok(0)` only for an empty `buf` or once the stream has ended.
    fn read<R: Read + ?Sized>(&mut self, source: &mut R, buf: &mut [u8]) -> io::Result<usize>;

    /// Whether the stream has reached its terminal state: the compressed input
    /// ended cleanly and every decoded byte has been handed out.
    fn is_finished(&self) -> bool;
}
