use std::time::Duration;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, duplex},
    time::Instant,
};
use tokio_ratelimit::{DynamicLimit, io::RateLimitExt, utils::meter::Meter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (client, server) = duplex(64 * 1024);

    let upload = DynamicLimit::new(16 * 1024); // 16 KiB/s
    let client = client.rate_limit_dyn(DynamicLimit::new(0), upload.clone());
    let mut client = Meter::new(client);

    let reader = tokio::spawn(async move {
        let mut server = server;
        let mut sink = Vec::new();
        server.read_to_end(&mut sink).await?;
        anyhow::Ok(sink.len())
    });

    let chunk = [0u8; 4096];
    let start = Instant::now();
    for i in 0..16 {
        if i == 8 {
            upload.set(32 * 1024); // speed up half way
        }
        client.write_all(&chunk).await?;
    }
    client.shutdown().await?;

    let received = reader.await??;
    let elapsed = start.elapsed();
    println!(
        "sent {} bytes ({received} received) in {:.2?}, average {:.0} B/s",
        client.writes().total(),
        elapsed,
        client.writes().rate_bps().unwrap_or_default(),
    );
    assert!(elapsed > Duration::from_secs(1));

    Ok(())
}
