use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::engine::{DecodeEngine, EncodeEngine};
use crate::pool::Pool;
use crate::stream::{PooledReader, PooledWriter};

/// Compressed output stream handed to a transport: write, then close.
pub trait StreamWriter: Write + Send {
    /// Finalize the compressed stream. The writer is consumed either way.
    fn close(self: Box<Self>) -> io::Result<()>;
}

impl<E: EncodeEngine, W: Write + Send> StreamWriter for PooledWriter<E, W> {
    fn close(self: Box<Self>) -> io::Result<()> {
        PooledWriter::close(*self)
    }
}

/// A named stream compressor that a transport looks up by its identifier.
///
/// The identifier travels on the wire (e.g. as a message-encoding header), so it
/// must be stable across releases and processes.
pub trait Compressor: Send + Sync {
    /// Stable identifier used for lookups in a [`Registry`](crate::Registry).
    fn name(&self) -> &'static str;

    /// Wrap `sink` so everything written is compressed into it.
    fn compress<'a>(
        &self,
        sink: Box<dyn Write + Send + 'a>,
    ) -> anyhow::Result<Box<dyn StreamWriter + 'a>>;

    /// Wrap `source` so reads yield its decompressed contents.
    fn decompress<'a>(
        &self,
        source: Box<dyn Read + Send + 'a>,
    ) -> anyhow::Result<Box<dyn Read + Send + 'a>>;
}

/// [`Compressor`] backed by one engine pool per role.
///
/// Every `compress`/`decompress` call takes an engine out of the matching pool
/// and binds it to the given stream; the wrappers hand it back when the session
/// ends.
pub struct PooledCompressor<E: EncodeEngine, D: DecodeEngine> {
    name: &'static str,
    writers: Arc<Pool<E>>,
    readers: Arc<Pool<D>>,
}

impl<E: EncodeEngine, D: DecodeEngine> PooledCompressor<E, D> {
    pub fn new(
        name: &'static str,
        make_writer: impl Fn() -> E + Send + Sync + 'static,
        make_reader: impl Fn() -> D + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            writers: Arc::new(Pool::new(make_writer)),
            readers: Arc::new(Pool::new(make_reader)),
        }
    }

    /// Typed counterpart of [`Compressor::compress`].
    pub fn writer<W: Write>(&self, sink: W) -> PooledWriter<E, W> {
        PooledWriter::bind(Arc::clone(&self.writers), sink)
    }

    /// Typed counterpart of [`Compressor::decompress`].
    pub fn reader<R: Read>(&self, source: R) -> PooledReader<D, R> {
        PooledReader::bind(Arc::clone(&self.readers), source)
    }

    pub fn writer_pool(&self) -> &Pool<E> {
        &self.writers
    }

    pub fn reader_pool(&self) -> &Pool<D> {
        &self.readers
    }
}

impl<E: EncodeEngine, D: DecodeEngine> Compressor for PooledCompressor<E, D> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn compress<'a>(
        &self,
        sink: Box<dyn Write + Send + 'a>,
    ) -> anyhow::Result<Box<dyn StreamWriter + 'a>> {
        Ok(Box::new(self.writer(sink)))
    }

    fn decompress<'a>(
        &self,
        source: Box<dyn Read + Send + 'a>,
    ) -> anyhow::Result<Box<dyn Read + Send + 'a>> {
        Ok(Box::new(self.reader(source)))
    }
}
