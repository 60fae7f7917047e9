pub mod deflate_codec;
pub mod snappy_codec;

pub use deflate_codec::{DeflateCompressor, DeflateDecoder, DeflateEncoder};
pub use snappy_codec::{SnappyCompressor, SnappyDecoder, SnappyEncoder};

use rpcz_core::Registry;

/// Register every bundled compressor into `registry`.
///
/// Called once at startup by the host; later registrations under the same
/// names shadow these.
pub fn register_all(registry: &Registry) {
    snappy_codec::register(registry);
    deflate_codec::register(registry);
}

/// A fresh registry holding every bundled compressor.
pub fn default_registry() -> Registry {
    let registry = Registry::new();
    register_all(&registry);
    registry
}
