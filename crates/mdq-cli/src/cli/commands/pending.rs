//! `mdq pending` – list jobs interrupted in an earlier session.

use anyhow::Result;
use mdq_core::config::MdqConfig;

use crate::cli::engine;

pub async fn run_pending(cfg: &MdqConfig) -> Result<()> {
    let running = engine::start(cfg, false).await?;
    let listed = running.handle.pending_resumable().await;
    running.stop().await?;

    let pending = listed?;
    if pending.is_empty() {
        println!("No interrupted jobs.");
        return Ok(());
    }
    println!("{:<36} {:<13} {:<10} {}", "ID", "STATE", "FORMAT", "URL");
    for d in pending {
        println!(
            "{:<36} {:<13} {:<10} {}",
            d.job_id,
            d.status.as_str(),
            d.config.format.as_str(),
            d.url
        );
    }
    Ok(())
}
