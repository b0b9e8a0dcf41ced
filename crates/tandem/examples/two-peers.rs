//! Two peers in one process, connected by an in-memory pipe.
//!
//! Run with: cargo run -p tandem --example two-peers --features demo

use std::sync::Arc;

use serde_json::json;
use tandem::command::Registry;
use tandem::demo::{self, CopyFile, Echo, SystemLoad};
use tandem::{PeerConfig, Session};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);

    let local = Registry::new();
    demo::register(&local)?;
    let remote = Registry::new();
    demo::deploy(&remote)?;

    let a = Session::start(left_read, left_write, Arc::new(local), PeerConfig::default())?;
    let b = Session::start(right_read, right_write, Arc::new(remote), PeerConfig::default())?;

    let capabilities = a.negotiate(demo::PLUGIN).await?;
    println!("peer runs: {}", capabilities.commands.join(", "));

    let echo = a.invoke(Echo { data: "hello".into() }).await?;
    println!("echo: {echo}");

    match a.invoke(SystemLoad {}).await {
        Ok(report) => println!("load: {:?} at {}", report.loadavg, report.time),
        Err(err) => println!("load unavailable: {err}"),
    }

    let src = std::env::temp_dir().join("tandem-two-peers-src.txt");
    let dest = std::env::temp_dir().join("tandem-two-peers-dest.txt");
    std::fs::write(&src, "copied across the pipe\n")?;
    let copied = a
        .invoke_named(
            "demo:Copy",
            json!({"src": src.display().to_string(), "dest": dest.display().to_string()}),
        )
        .await?;
    println!("copy: {copied}");
    let _ = std::fs::remove_file(&src);
    let _ = std::fs::remove_file(&dest);

    a.shutdown().await?;
    b.shutdown().await?;
    Ok(())
}
