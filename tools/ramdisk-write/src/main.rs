use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing_subscriber::EnvFilter;

/// Repeated across every chunk so the data is recognisable when read back from the device.
const PATTERN: &[u8; 16] = b"programmersdkufs";
const CHUNK_SIZE: usize = 4096;

#[derive(Parser, Debug)]
#[command(
    name = "ramdisk-write",
    about = "Fill a file or block device with a repeating 16-byte test pattern, syncing every 4 KiB chunk."
)]
struct Args {
    /// Target path (regular file or block device node); created if missing
    path: PathBuf,

    /// Number of KiB to write
    size_kib: u64,

    /// Suppress progress output
    #[arg(long, action = clap::ArgAction::SetTrue)]
    quiet: bool,

    /// Log filter (e.g. "debug", "ramdisk_write=trace"); falls back to RUST_LOG, then "info"
    #[arg(long, env = "RAMDISK_WRITE_LOG", value_name = "FILTER")]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            // Mirrors a negative status from a C-style main.
            ExitCode::from(255)
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(args: &Args) -> anyhow::Result<()> {
    let total = args
        .size_kib
        .checked_mul(1024)
        .context("size in bytes overflows u64")?;

    let mut file =
        open_target(&args.path).with_context(|| format!("Failed to open {}", args.path.display()))?;
    tracing::debug!(path = %args.path.display(), total, "target opened");

    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {bytes}/{total_bytes} ({bytes_per_sec})")
                .context("progress template")?,
        );
        bar
    };

    let written = write_pattern(&mut file, total, |done| progress.set_position(done))?;
    progress.finish_and_clear();

    tracing::info!(path = %args.path.display(), bytes = written, "pattern written");
    Ok(())
}

fn open_target(path: &Path) -> std::io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o666);
    }
    opts.open(path)
}

/// A chunk-sized buffer tiled with [`PATTERN`].
fn pattern_chunk() -> [u8; CHUNK_SIZE] {
    let mut buf = [0u8; CHUNK_SIZE];
    for piece in buf.chunks_exact_mut(PATTERN.len()) {
        piece.copy_from_slice(PATTERN);
    }
    buf
}

/// Writes `total` bytes of pattern in [`CHUNK_SIZE`] pieces (the last one truncated), syncing
/// after each so every chunk reaches the device before the next is issued.
fn write_pattern(
    file: &mut File,
    total: u64,
    mut on_progress: impl FnMut(u64),
) -> anyhow::Result<u64> {
    let chunk = pattern_chunk();
    let mut written = 0u64;
    while written < total {
        let len = (total - written).min(CHUNK_SIZE as u64) as usize;
        file.write_all(&chunk[..len]).context("Write failed")?;
        file.sync_data().context("Write failed")?;
        written += len as u64;
        tracing::trace!(written, "chunk synced");
        on_progress(written);
    }
    Ok(written)
}
