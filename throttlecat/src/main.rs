use std::{error::Error, fmt, io, time};

use clap::Parser;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Join, Stdin, Stdout, join},
    signal,
    time::{Instant, timeout},
};
use tokio_ratelimit::{Limits, RateLimitedStream, utils::meter::Meter};
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

/// Copy stdin to stdout at a limited rate.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Config {
    /// Read throttle on stdin in bytes per second, 0 for unlimited
    #[arg(
        short = 'r',
        long,
        value_name = "bytes/s",
        default_value_t = 0,
        allow_negative_numbers = true
    )]
    read_limit: i64,

    /// Write throttle on stdout in bytes per second, 0 for unlimited
    #[arg(
        short = 'w',
        long,
        value_name = "bytes/s",
        default_value_t = 0,
        allow_negative_numbers = true
    )]
    write_limit: i64,

    /// Largest number of bytes moved by a single read
    #[arg(long, value_name = "bytes", default_value_t = 8192)]
    chunk_size: usize,

    /// Give up after this long, 0 to run until EOF
    #[arg(long, value_name = "ms", default_value_t = 0)]
    max_duration_ms: u64,
}

impl Config {
    fn validate(&self) -> anyhow::Result<Limits> {
        if self.chunk_size == 0 {
            anyhow::bail!("--chunk-size must be greater than 0");
        }

        Ok(Limits::new(self.read_limit, self.write_limit)?)
    }

    fn max_duration(&self) -> Option<time::Duration> {
        (self.max_duration_ms > 0).then(|| time::Duration::from_millis(self.max_duration_ms))
    }
}

type Stdio = Meter<RateLimitedStream<Join<Stdin, Stdout>>>;

/// Pump everything from the read half to the write half, chunk by chunk.
async fn pump<S>(stream: &mut S, chunk_size: usize) -> io::Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_size];
    let mut copied = 0u64;

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stream.write_all(&buf[..n]).await?;
        copied += n as u64;
    }
    stream.flush().await?;

    Ok(copied)
}

async fn pump_with_deadline<S>(stream: &mut S, config: &Config) -> io::Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let fut = pump(stream, config.chunk_size);

    match config.max_duration() {
        Some(duration) => match timeout(duration, fut).await {
            Ok(res) => res,
            Err(_) => Err(io::Error::other(TimeoutError)),
        },
        None => fut.await,
    }
}

fn report(stdio: &Stdio, elapsed: time::Duration) {
    let reads = stdio.reads();
    let writes = stdio.writes();
    info!(
        read_bytes = reads.total(),
        read_bps = reads.rate_bps().unwrap_or_default(),
        written_bytes = writes.total(),
        write_bps = writes.rate_bps().unwrap_or_default(),
        ?elapsed,
        "done"
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();

    let config = Config::parse();
    let limits = config.validate()?;
    info!(
        read_limit = limits.read(),
        write_limit = limits.write(),
        chunk_size = config.chunk_size,
        "Copying stdin to stdout"
    );

    let stdio = join(tokio::io::stdin(), tokio::io::stdout());
    let mut stdio = Meter::new(RateLimitedStream::from_limits(stdio, limits));

    let start = Instant::now();
    let res = tokio::select! {
        res = pump_with_deadline(&mut stdio, &config) => Some(res),
        _ = signal::ctrl_c() => None,
    };
    report(&stdio, start.elapsed());

    match res {
        Some(Ok(_)) => Ok(()),
        None => {
            warn!("Received Ctrl-C, stopped early");
            Ok(())
        }
        Some(Err(err)) if err.get_ref().is_some_and(|e| e.is::<TimeoutError>()) => {
            info!("stopped after {} ms", config.max_duration_ms);
            Ok(())
        }
        Some(Err(err)) => {
            error!(error = %err, "copy failed");
            Err(err.into())
        }
    }
}

#[derive(Debug)]
pub struct TimeoutError;

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeoutError")
    }
}

impl Error for TimeoutError {}
