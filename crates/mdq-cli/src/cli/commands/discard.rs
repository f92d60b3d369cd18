//! `mdq discard` – forget interrupted jobs and delete their partial files.

use anyhow::Result;
use mdq_core::config::MdqConfig;

use crate::cli::engine;

pub async fn run_discard(cfg: &MdqConfig) -> Result<()> {
    let running = engine::start(cfg, false).await?;
    let discarded = running.handle.discard_pending().await;
    running.stop().await?;
    println!("Discarded {} interrupted job(s)", discarded?);
    Ok(())
}
