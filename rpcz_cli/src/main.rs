use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use rpcz_codecs::{default_registry, deflate_codec, snappy_codec};
use rpcz_core::{Compressor, Registry};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "rpcz",
    about = "Stream data through pooled RPC compressors and benchmark concurrent sessions",
    version
)]
struct Cli {
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered compressor names
    List,
    /// Compress a file ("-" for stdin/stdout)
    Compress {
        input: PathBuf,
        output: PathBuf,
        /// Compressor name: snappy | deflate
        #[arg(short, long, default_value = snappy_codec::NAME)]
        codec: String,
        /// Deflate level (0–9, only used with --codec deflate)
        #[arg(long, default_value_t = 6)]
        level: u32,
    },
    /// Decompress a file ("-" for stdin/stdout)
    Decompress {
        input: PathBuf,
        output: PathBuf,
        /// Compressor name: snappy | deflate
        #[arg(short, long, default_value = snappy_codec::NAME)]
        codec: String,
    },
    /// Run concurrent compress/decompress sessions against one shared codec
    Bench {
        /// Compressor name: snappy | deflate
        #[arg(short, long, default_value = snappy_codec::NAME)]
        codec: String,
        /// Worker threads, each running its own sessions
        #[arg(short, long, default_value_t = 8)]
        threads: usize,
        /// Sessions per thread
        #[arg(short, long, default_value_t = 200)]
        sessions: usize,
        /// Payload size per session in bytes
        #[arg(long, default_value_t = 64 * 1024)]
        size: usize,
        /// Fixed random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing(quiet: bool, verbose: u8) -> LevelFilter {
    let level_filter = if quiet {
        LevelFilter::ERROR
    } else {
        match verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };

    // Library crates log through the `log` facade.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("warning: could not bridge log records: {e}");
    }

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("RPCZ_LOG")
        .from_env_lossy();

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .compact(),
    );

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: a global tracing subscriber was already set");
    }

    level_filter
}

/// Resolve `name`, honoring `level` for deflate.
fn codec_from_name(registry: &Registry, name: &str, level: u32) -> anyhow::Result<Arc<dyn Compressor>> {
    if name == deflate_codec::NAME {
        if level > 9 {
            anyhow::bail!("deflate level must be 0–9, got {}", level);
        }
        return Ok(Arc::new(deflate_codec::compressor(level)));
    }
    registry.lookup(name)
}

fn open_input(path: &Path) -> anyhow::Result<Box<dyn Read + Send>> {
    if path.to_str() == Some("-") {
        return Ok(Box::new(io::stdin()));
    }
    let file = File::open(path).with_context(|| format!("opening input file {:?}", path))?;
    Ok(Box::new(BufReader::new(file)))
}

fn open_output(path: &Path) -> anyhow::Result<Box<dyn Write + Send>> {
    if path.to_str() == Some("-") {
        return Ok(Box::new(io::stdout()));
    }
    let file = File::create(path).with_context(|| format!("creating output file {:?}", path))?;
    Ok(Box::new(BufWriter::new(file)))
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

/// Counts bytes passing through to the inner writer.
struct Counting<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for Counting<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_list(registry: &Registry) -> anyhow::Result<()> {
    for name in registry.names() {
        println!("{name}");
    }
    Ok(())
}

fn run_compress(
    registry: &Registry,
    input: PathBuf,
    output: PathBuf,
    codec_name: &str,
    level: u32,
) -> anyhow::Result<()> {
    let codec = codec_from_name(registry, codec_name, level)?;
    let mut src = open_input(&input)?;
    let mut sink = Counting {
        inner: open_output(&output)?,
        count: 0,
    };

    let t0 = Instant::now();
    let raw = {
        let mut w = codec.compress(Box::new(&mut sink))?;
        let raw = io::copy(&mut src, &mut w)?;
        w.close()?;
        raw
    };
    let elapsed = t0.elapsed();
    let compressed = sink.count;

    info!(codec = codec.name(), raw, compressed, "compressed");
    eprintln!("  codec       : {}", codec.name());
    eprintln!("  raw size    : {}", human_bytes(raw));
    eprintln!("  compressed  : {}", human_bytes(compressed));
    eprintln!("  ratio       : {:.2}x", raw as f64 / compressed.max(1) as f64);
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((raw as f64 / elapsed.as_secs_f64()) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_decompress(
    registry: &Registry,
    input: PathBuf,
    output: PathBuf,
    codec_name: &str,
) -> anyhow::Result<()> {
    let codec = registry.lookup(codec_name)?;
    let src = open_input(&input)?;
    let mut dst = open_output(&output)?;

    let t0 = Instant::now();
    let mut r = codec.decompress(src)?;
    let raw = io::copy(&mut r, &mut dst)
        .with_context(|| format!("decompressing {:?} with {}", input, codec.name()))?;
    dst.flush()?;
    let elapsed = t0.elapsed();

    eprintln!("  raw size    : {}", human_bytes(raw));
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((raw as f64 / elapsed.as_secs_f64()) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

/// Deterministic payload: alternating runs of LCG noise and repeated text.
fn bench_payload(len: usize, seed: u64) -> Vec<u8> {
    let text = b"service=orders method=Get status=OK latency_ms=12 ";
    let mut rng = seed;
    (0..len)
        .map(|i| {
            rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            if (i / 256) % 4 == 0 {
                (rng >> 56) as u8
            } else {
                text[i % text.len()]
            }
        })
        .collect()
}

fn run_bench(
    registry: &Registry,
    codec_name: &str,
    threads: usize,
    sessions: usize,
    size: usize,
    seed: u64,
) -> anyhow::Result<()> {
    // Typed handles so pool counters can be reported afterwards.
    enum Bench {
        Snappy(snappy_codec::SnappyCompressor),
        Deflate(deflate_codec::DeflateCompressor),
    }
    let bench = match codec_name {
        snappy_codec::NAME => Bench::Snappy(snappy_codec::compressor()),
        deflate_codec::NAME => Bench::Deflate(deflate_codec::compressor(6)),
        other => {
            registry.lookup(other)?;
            anyhow::bail!("bench supports snappy and deflate, not '{}'", other);
        }
    };
    let codec: &dyn Compressor = match &bench {
        Bench::Snappy(c) => c,
        Bench::Deflate(c) => c,
    };

    eprintln!(
        "benchmarking {} threads × {} sessions of {} with {}...",
        threads,
        sessions,
        human_bytes(size as u64),
        codec.name()
    );

    let t0 = Instant::now();
    let compressed_total = std::thread::scope(|s| -> anyhow::Result<u64> {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                s.spawn(move || -> anyhow::Result<u64> {
                    let mut compressed_total = 0u64;
                    for i in 0..sessions {
                        let data = bench_payload(size, seed ^ ((t * sessions + i) as u64));
                        let mut compressed = Vec::with_capacity(size);
                        let mut w = codec.compress(Box::new(&mut compressed))?;
                        w.write_all(&data)?;
                        w.close()?;
                        compressed_total += compressed.len() as u64;

                        let mut restored = Vec::with_capacity(size);
                        codec.decompress(Box::new(&compressed[..]))?.read_to_end(&mut restored)?;
                        if restored != data {
                            anyhow::bail!("thread {} session {} round-trip mismatch", t, i);
                        }
                    }
                    debug!(thread = t, "worker done");
                    Ok(compressed_total)
                })
            })
            .collect();

        let mut total = 0;
        for handle in handles {
            total += handle
                .join()
                .map_err(|_| anyhow::anyhow!("bench worker panicked"))??;
        }
        Ok(total)
    })?;
    let elapsed = t0.elapsed();

    let (writers, readers) = match &bench {
        Bench::Snappy(c) => (c.writer_pool().created(), c.reader_pool().created()),
        Bench::Deflate(c) => (c.writer_pool().created(), c.reader_pool().created()),
    };
    let raw_total = (threads * sessions * size) as u64;

    println!();
    println!("=== Pooled Session Benchmark ===");
    println!("  sessions    : {}", threads * sessions);
    println!(
        "  per session : {} raw, {} compressed (avg)",
        human_bytes(size as u64),
        human_bytes(compressed_total / (threads * sessions).max(1) as u64)
    );
    println!("  raw total   : {}", human_bytes(raw_total));
    println!("  compressed  : {}", human_bytes(compressed_total));
    println!("  ratio       : {:.2}x", raw_total as f64 / compressed_total.max(1) as f64);
    println!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    println!(
        "  throughput  : {}/s (round-trip)",
        human_bytes((raw_total as f64 / elapsed.as_secs_f64()) as u64)
    );
    println!("  engines:");
    println!("    compressors   : {}", writers);
    println!("    decompressors : {}", readers);

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = init_tracing(cli.quiet, cli.verbose);
    debug!("log level: {level}");

    let registry = default_registry();
    match cli.command {
        Commands::List => run_list(&registry),
        Commands::Compress {
            input,
            output,
            codec,
            level,
        } => run_compress(&registry, input, output, &codec, level),
        Commands::Decompress {
            input,
            output,
            codec,
        } => run_decompress(&registry, input, output, &codec),
        Commands::Bench {
            codec,
            threads,
            sessions,
            size,
            seed,
        } => run_bench(&registry, &codec, threads, sessions, size, seed),
    }
}
