pub mod compressor;
pub mod engine;
pub mod pool;
pub mod registry;
pub mod stream;

pub use compressor::{Compressor, PooledCompressor, StreamWriter};
pub use engine::{DecodeEngine, EncodeEngine};
pub use pool::Pool;
pub use registry::Registry;
pub use stream::{PooledReader, PooledWriter};
