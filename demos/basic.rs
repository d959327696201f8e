//! Basic capped log usage.
//!
//! Run with `RUST_LOG=cappedlog=debug cargo run --example basic` to see the
//! log's own tracing output.

use cappedlog::{CappedLog, Compression, OptionsBuilder, ReadOutcome, Result, SyncMode};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let dir = std::env::temp_dir().join("cappedlog-demo");
    let path = dir.join("traces.capped");
    let _ = std::fs::remove_file(&path);

    let options = OptionsBuilder::new()
        .size_kb(4)
        .compression(Compression::Lz4)
        .sync_mode(SyncMode::None)
        .build()?;
    let log = CappedLog::open_with_options(&path, options)?;

    // Fill the log well past its capacity.
    let mut ids = Vec::new();
    for i in 0..200 {
        let payload = format!("trace {} checkout took {}ms {}", i, i * 3, "x".repeat(i % 97));
        if let Some(id) = log.write(payload.as_bytes(), "trace")? {
            ids.push(id);
        }
    }

    let first = ids[0];
    let last = ids[ids.len() - 1];
    println!("first id {} expired: {}", first, log.is_expired(first));
    println!("smallest live id: {}", log.smallest_non_expired_id());
    if let ReadOutcome::Found(bytes) = log.read_outcome(last)? {
        println!("newest block: {}", String::from_utf8_lossy(&bytes));
    }

    // Batched records share one block.
    let spans = ["root", "db.query", "http.call"];
    if let Some(id) = log.write_many(&spans, "spans")? {
        println!("batch: {:?}", log.read_many(id)?);
    }

    // Shrinking keeps the newest kilobyte only.
    let kind = log.resize(1)?;
    println!("resize: {:?}, newest still readable: {}", kind, log.read(last)?.is_some());

    print!("{}", log.stats_to_prometheus());

    log.close()?;
    Ok(())
}
