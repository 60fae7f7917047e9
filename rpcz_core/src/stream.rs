use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::engine::{DecodeEngine, EncodeEngine};
use crate::pool::Pool;

/// Compressing writer bound to one sink for one session.
///
/// # Session contract
/// - [`bind`](Self::bind) takes an engine from the pool and resets it, so nothing
///   buffered by an earlier session can reach this sink.
/// - [`close`](Self::close) writes the trailer and returns the engine to the pool,
///   whether or not finalizing succeeded.
/// - Dropping the writer without closing returns the engine unfinalized, unless a
///   write failed, in which case the engine is discarded.
pub struct PooledWriter<E: EncodeEngine, W: Write> {
    engine: Option<E>,
    sink: W,
    pool: Arc<Pool<E>>,
    failed: bool,
}

impl<E: EncodeEngine, W: Write> PooledWriter<E, W> {
    pub fn bind(pool: Arc<Pool<E>>, sink: W) -> Self {
        let (mut engine, _) = pool.acquire();
        engine.reset();
        Self {
            engine: Some(engine),
            sink,
            pool,
            failed: false,
        }
    }

    /// Finalize the compressed stream and recycle the engine.
    pub fn close(mut self) -> io::Result<()> {
        self.finish_session()
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    fn finish_session(&mut self) -> io::Result<()> {
        let Some(mut engine) = self.engine.take() else {
            return Ok(());
        };
        let result = engine.finish(&mut self.sink);
        self.pool.release(engine);
        result
    }
}

impl<E: EncodeEngine, W: Write> Write for PooledWriter<E, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(engine) = self.engine.as_mut() else {
            return Err(closed());
        };
        let result = engine.write(&mut self.sink, buf);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        let Some(engine) = self.engine.as_mut() else {
            return Err(closed());
        };
        let result = engine.flush(&mut self.sink);
        if result.is_err() {
            self.failed = true;
        }
        result
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "writer already closed")
}

impl<E: EncodeEngine, W: Write> Drop for PooledWriter<E, W> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            if self.failed {
                log::trace!("discarding compressor after failed write");
            } else {
                log::trace!("compressor dropped without close, recycling unfinalized");
                self.pool.release(engine);
            }
        }
    }
}

/// Decompressing reader bound to one source for one session.
///
/// The engine goes back to the pool as soon as it reports the terminal
/// end-of-stream state, on the same `read` call that produced the last bytes or
/// the end-of-stream signal. Errors and abandonment never recycle. A read error
/// is terminal: the engine is dropped and every later read fails with the same
/// kind of error.
pub struct PooledReader<D: DecodeEngine, R: Read> {
    state: ReadState<D>,
    source: R,
    pool: Arc<Pool<D>>,
}

enum ReadState<D> {
    Active(D),
    Finished,
    Failed(io::ErrorKind),
}

impl<D: DecodeEngine, R: Read> PooledReader<D, R> {
    pub fn bind(pool: Arc<Pool<D>>, source: R) -> Self {
        let (mut engine, _) = pool.acquire();
        engine.reset();
        Self {
            state: ReadState::Active(engine),
            source,
            pool,
        }
    }

    /// Whether the stream reached its end and the engine has been recycled.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, ReadState::Finished)
    }

    /// Whether a read failed and the engine was discarded.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, ReadState::Failed(_))
    }

    pub fn get_ref(&self) -> &R {
        &self.source
    }
}

impl<D: DecodeEngine, R: Read> Read for PooledReader<D, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let engine = match &mut self.state {
            ReadState::Active(engine) => engine,
            ReadState::Finished => return Ok(0),
            ReadState::Failed(kind) => {
                return Err(io::Error::new(*kind, "decompression stream already failed"))
            }
        };
        match engine.read(&mut self.source, buf) {
            Ok(n) => {
                if engine.is_finished() {
                    if let ReadState::Active(engine) =
                        std::mem::replace(&mut self.state, ReadState::Finished)
                    {
                        log::trace!("decompressor reached end of stream, recycling");
                        self.pool.release(engine);
                    }
                }
                Ok(n)
            }
            Err(e) => {
                log::trace!("decompressor failed ({}), discarding", e.kind());
                self.state = ReadState::Failed(e.kind());
                Err(e)
            }
        }
    }
}

impl<D: DecodeEngine, R: Read> Drop for PooledReader<D, R> {
    fn drop(&mut self) {
        if let ReadState::Active(_) = self.state {
            log::trace!("decompressor abandoned before end of stream, discarding");
        }
    }
}
