//! `mdq resume` – continue jobs interrupted in an earlier session.

use anyhow::Result;
use mdq_core::config::MdqConfig;

use crate::cli::engine;
use crate::cli::session::{self, Session};
use crate::cli::ConflictPolicy;

pub async fn run_resume(cfg: &MdqConfig, on_conflict: ConflictPolicy) -> Result<()> {
    let running = engine::start(cfg, true).await?;
    let events = running.handle.subscribe();

    let resumed = match running.handle.resume_all().await {
        Ok(resumed) => resumed,
        Err(e) => {
            running.stop().await?;
            return Err(e.into());
        }
    };
    if resumed.is_empty() {
        println!("Nothing to resume.");
        return running.stop().await;
    }
    println!("Resuming {} job(s)", resumed.len());

    let end = Session::new(running.handle.clone(), events, on_conflict)
        .run()
        .await;
    running.stop().await?;
    session::report(end?);
    Ok(())
}
