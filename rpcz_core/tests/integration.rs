/// Integration tests: pooled compressor sessions end to end.
///
/// Covers the session lifecycle the transport relies on:
///  1. Every payload (including empty) survives compress → decompress
///  2. Sequential sessions reuse one engine per role, with no residue
///  3. Concurrent sessions never mix payloads
///  4. Readers recycle at end of stream, and only there
///  5. Decode and sink failures surface as errors, never panics
use std::io::{self, Read, Write};
use std::sync::Arc;

use rpcz_codecs::{deflate_codec, snappy_codec, SnappyCompressor};
use rpcz_core::{Compressor, Registry};

/// Generate `len` deterministic bytes using a simple LCG.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// Generate `len` highly compressible bytes (repeating pattern).
fn compressible_bytes(len: usize) -> Vec<u8> {
    let pattern = b"the quick brown fox jumps over the lazy dog. ";
    (0..len).map(|i| pattern[i % pattern.len()]).collect()
}

// ── helpers ───────────────────────────────────────────────────────────────

fn compress_with(codec: &dyn Compressor, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut w = codec.compress(Box::new(&mut out)).unwrap();
    w.write_all(data).unwrap();
    w.close().unwrap();
    out
}

fn decompress_with(codec: &dyn Compressor, compressed: &[u8]) -> io::Result<Vec<u8>> {
    let mut r = codec.decompress(Box::new(compressed)).unwrap();
    let mut out = Vec::new();
    r.read_to_end(&mut out)?;
    Ok(out)
}

fn payloads() -> Vec<Vec<u8>> {
    vec![
        Vec::new(),
        b"x".to_vec(),
        compressible_bytes(1000),
        pseudo_random_bytes(4096, 7),
        compressible_bytes(3 * 65536 + 17),
        pseudo_random_bytes(65536, 99),
    ]
}

/// Sink that accepts `budget` bytes and then fails every write.
struct FailingSink {
    budget: usize,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.budget == 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"));
        }
        let n = buf.len().min(self.budget);
        self.budget -= n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ── tests ──────────────────────────────────────────────────────────────────

#[test]
fn test_roundtrip_snappy() {
    let codec = snappy_codec::compressor();
    for data in payloads() {
        let compressed = compress_with(&codec, &data);
        let restored = decompress_with(&codec, &compressed).unwrap();
        assert_eq!(restored, data, "snappy round-trip of {} bytes", data.len());
    }
}

#[test]
fn test_roundtrip_deflate() {
    let codec = deflate_codec::compressor(6);
    for data in payloads() {
        let compressed = compress_with(&codec, &data);
        let restored = decompress_with(&codec, &compressed).unwrap();
        assert_eq!(restored, data, "deflate round-trip of {} bytes", data.len());
    }
}

#[test]
fn test_compressible_input_shrinks() {
    let codec = snappy_codec::compressor();
    let data = compressible_bytes(200_000);
    let compressed = compress_with(&codec, &data);
    assert!(
        compressed.len() < data.len() / 4,
        "compressed={} raw={}",
        compressed.len(),
        data.len()
    );
}

#[test]
fn test_sequential_sessions_share_one_engine_per_role() {
    let codec = snappy_codec::compressor();
    for seed in 0..20 {
        let data = pseudo_random_bytes(5000, seed);
        let compressed = compress_with(&codec, &data);
        assert_eq!(decompress_with(&codec, &compressed).unwrap(), data);
    }
    assert_eq!(codec.writer_pool().created(), 1);
    assert_eq!(codec.writer_pool().idle(), 1);
    assert_eq!(codec.reader_pool().created(), 1);
    assert_eq!(codec.reader_pool().idle(), 1);
}

#[test]
fn test_reused_engine_output_matches_fresh_engine() {
    let b1 = compressible_bytes(70_000);
    let b2 = pseudo_random_bytes(3000, 42);

    let reused = snappy_codec::compressor();
    let r1 = compress_with(&reused, &b1);
    let r2 = compress_with(&reused, &b2);
    assert_eq!(reused.writer_pool().created(), 1);

    let f1 = compress_with(&snappy_codec::compressor(), &b1);
    let f2 = compress_with(&snappy_codec::compressor(), &b2);

    assert_eq!(r1, f1);
    assert_eq!(r2, f2);
}

#[test]
fn test_unclosed_writer_leaves_no_residue() {
    let codec = snappy_codec::compressor();

    let mut abandoned = Vec::new();
    {
        let mut w = codec.writer(&mut abandoned);
        w.write_all(b"this session is never closed").unwrap();
    }
    // Dropped without close: recycled, but never finalized into the sink.
    assert!(abandoned.is_empty());
    assert_eq!(codec.writer_pool().idle(), 1);

    let next = compress_with(&codec, b"clean");
    assert_eq!(codec.writer_pool().created(), 1);
    assert_eq!(next, compress_with(&snappy_codec::compressor(), b"clean"));
    assert_eq!(decompress_with(&codec, &next).unwrap(), b"clean");
}

#[test]
fn test_close_recycles_even_when_finalize_fails() {
    let codec = snappy_codec::compressor();

    let mut w = codec.writer(FailingSink { budget: 0 });
    // Buffered in the engine, nothing reaches the sink yet.
    w.write_all(b"pending").unwrap();
    let err = w.close().unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

    assert_eq!(codec.writer_pool().idle(), 1);
    let out = compress_with(&codec, b"after failure");
    assert_eq!(codec.writer_pool().created(), 1);
    assert_eq!(decompress_with(&codec, &out).unwrap(), b"after failure");
}

#[test]
fn test_failed_write_discards_engine() {
    let codec = snappy_codec::compressor();
    {
        let mut w = codec.writer(FailingSink { budget: 16 });
        // A full block forces a chunk out to the sink, which fails.
        let err = w.write_all(&pseudo_random_bytes(2 * 65536, 3)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
    assert_eq!(codec.writer_pool().idle(), 0);

    compress_with(&codec, b"next session");
    assert_eq!(codec.writer_pool().created(), 2);
}

#[test]
fn test_concurrent_sessions_do_not_cross_contaminate() {
    const THREADS: u64 = 16;
    const SESSIONS: u64 = 25;

    let codec = Arc::new(snappy_codec::compressor());

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let codec = Arc::clone(&codec);
            s.spawn(move || {
                for i in 0..SESSIONS {
                    let seed = t * 1000 + i;
                    let len = 1 + (seed as usize * 7919) % 150_000;
                    let data = if i % 2 == 0 {
                        pseudo_random_bytes(len, seed)
                    } else {
                        compressible_bytes(len)
                    };
                    let compressed = compress_with(codec.as_ref(), &data);
                    let restored = decompress_with(codec.as_ref(), &compressed).unwrap();
                    assert_eq!(restored, data, "thread {t} session {i}");
                }
            });
        }
    });

    let writers = codec.writer_pool();
    let readers = codec.reader_pool();
    assert!(writers.created() <= THREADS as usize);
    assert!(readers.created() <= THREADS as usize);
    assert_eq!(writers.idle(), writers.created());
    assert_eq!(readers.idle(), readers.created());
}

#[test]
fn test_reader_recycles_at_end_of_stream() {
    let codec = snappy_codec::compressor();
    let data = compressible_bytes(100_000);
    let compressed = compress_with(&codec, &data);

    for _ in 0..5 {
        let mut r = codec.reader(&compressed[..]);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert!(r.is_finished());
        assert_eq!(out, data);
        // Reads after the end keep reporting end of stream.
        assert_eq!(r.read(&mut [0u8; 8]).unwrap(), 0);
    }
    assert_eq!(codec.reader_pool().created(), 1);
    assert_eq!(codec.reader_pool().idle(), 1);
}

#[test]
fn test_abandoned_reader_is_not_recycled() {
    let codec: SnappyCompressor = snappy_codec::compressor();
    let compressed = compress_with(&codec, &compressible_bytes(100_000));

    let mut r = codec.reader(&compressed[..]);
    let mut partial = [0u8; 1024];
    r.read_exact(&mut partial).unwrap();
    assert!(!r.is_finished());
    drop(r);

    assert_eq!(codec.reader_pool().idle(), 0);
    let mut r = codec.reader(&compressed[..]);
    io::copy(&mut r, &mut io::sink()).unwrap();
    assert_eq!(codec.reader_pool().created(), 2);
    assert_eq!(codec.reader_pool().idle(), 1);
}

#[test]
fn test_truncated_input_is_an_error() {
    let codec = snappy_codec::compressor();
    let compressed = compress_with(&codec, &compressible_bytes(50_000));

    for cut in [1, 5, compressed.len() / 2, compressed.len() - 1] {
        let result = decompress_with(&codec, &compressed[..cut]);
        assert!(result.is_err(), "cut at {cut} should fail");
    }
    // Failed sessions never recycle.
    assert_eq!(codec.reader_pool().idle(), 0);
}

#[test]
fn test_corrupted_input_is_an_error() {
    let codec = snappy_codec::compressor();
    let mut compressed = compress_with(&codec, &compressible_bytes(50_000));
    let mid = compressed.len() / 2;
    compressed[mid] ^= 0x5a;

    assert!(decompress_with(&codec, &compressed).is_err());
}

#[test]
fn test_corrupted_deflate_input_is_an_error() {
    let codec = deflate_codec::compressor(6);
    let mut compressed = compress_with(&codec, &compressible_bytes(50_000));
    let last = compressed.len() - 1;
    compressed[last] ^= 0xff;

    assert!(decompress_with(&codec, &compressed).is_err());
}

/// Drain `r` until it errors, then read again: the failure must persist.
fn assert_failure_is_terminal(mut r: impl Read) -> io::ErrorKind {
    let mut out = Vec::new();
    let first = r.read_to_end(&mut out).unwrap_err();
    let mut buf = [0u8; 4096];
    for _ in 0..3 {
        match r.read(&mut buf) {
            Ok(n) => panic!("read after {:?} returned Ok({n})", first.kind()),
            Err(e) => assert_eq!(e.kind(), first.kind()),
        }
    }
    first.kind()
}

#[test]
fn test_snappy_truncation_is_terminal() {
    let codec = snappy_codec::compressor();
    let compressed = compress_with(&codec, &compressible_bytes(50_000));

    let r = codec.reader(&compressed[..compressed.len() - 3]);
    let kind = assert_failure_is_terminal(r);
    assert_eq!(kind, io::ErrorKind::UnexpectedEof);
    assert_eq!(codec.reader_pool().idle(), 0);
}

#[test]
fn test_snappy_checksum_error_on_shorter_chunk_is_terminal() {
    let codec = snappy_codec::compressor();
    let mut compressed = Vec::new();
    let second_chunk = {
        let mut w = codec.writer(&mut compressed);
        w.write_all(&pseudo_random_bytes(5000, 1)).unwrap();
        w.flush().unwrap();
        let at = w.get_ref().len();
        w.write_all(b"tiny!").unwrap();
        w.close().unwrap();
        at
    };
    // First byte of the second chunk's checksum.
    compressed[second_chunk + 4] ^= 0xff;

    let mut r = codec.reader(&compressed[..]);
    assert!(!r.is_failed());
    let kind = assert_failure_is_terminal(&mut r);
    assert_eq!(kind, io::ErrorKind::InvalidData);
    assert!(r.is_failed());
    assert!(!r.is_finished());
    drop(r);
    assert_eq!(codec.reader_pool().idle(), 0);

    // The pool hands out a healthy engine for the next session.
    let ok = compress_with(&codec, b"after the failure");
    assert_eq!(decompress_with(&codec, &ok).unwrap(), b"after the failure");
    assert_eq!(codec.reader_pool().idle(), 1);
}

#[test]
fn test_deflate_truncation_is_terminal() {
    let codec = deflate_codec::compressor(6);
    let compressed = compress_with(&codec, &pseudo_random_bytes(50_000, 5));

    let r = codec.reader(&compressed[..compressed.len() - 3]);
    assert_failure_is_terminal(r);
    assert_eq!(codec.reader_pool().idle(), 0);
}

#[test]
fn test_deflate_corruption_is_terminal() {
    let codec = deflate_codec::compressor(6);
    let mut compressed = compress_with(&codec, &compressible_bytes(50_000));
    let last = compressed.len() - 1;
    compressed[last] ^= 0xff;

    let r = codec.reader(&compressed[..]);
    assert_failure_is_terminal(r);
    assert_eq!(codec.reader_pool().idle(), 0);
}

#[test]
fn test_name_is_stable() {
    assert_eq!(snappy_codec::NAME, "snappy");
    assert_eq!(snappy_codec::compressor().name(), "snappy");
    assert_eq!(deflate_codec::NAME, "deflate");
}

#[test]
fn test_registry_lookup_and_shadowing() {
    let registry = Registry::new();
    assert!(registry.is_empty());

    let first = snappy_codec::register(&registry);
    assert_eq!(registry.names(), vec!["snappy"]);

    // Last registration wins; the shadowed codec is handed back.
    let second: Arc<dyn Compressor> = Arc::new(snappy_codec::compressor());
    let shadowed = registry.register(second.clone()).unwrap();
    assert!(Arc::ptr_eq(
        &shadowed,
        &(first.clone() as Arc<dyn Compressor>)
    ));
    assert!(Arc::ptr_eq(&registry.get("snappy").unwrap(), &second));

    let looked_up = registry.lookup("snappy").unwrap();
    let data = compressible_bytes(10_000);
    let compressed = compress_with(looked_up.as_ref(), &data);
    assert_eq!(decompress_with(looked_up.as_ref(), &compressed).unwrap(), data);
    // The shadowed codec's pools were never touched.
    assert_eq!(first.writer_pool().created(), 0);

    assert!(registry.unregister("snappy").is_some());
    assert!(registry.get("snappy").is_none());
    let err = registry.lookup("snappy").err().unwrap().to_string();
    assert!(err.contains("unknown compressor"), "got: {err}");
}

#[test]
fn test_default_registry_has_bundled_codecs() {
    let registry = rpcz_codecs::default_registry();
    assert_eq!(registry.names(), vec!["deflate", "snappy"]);
    assert_eq!(registry.len(), 2);
}
