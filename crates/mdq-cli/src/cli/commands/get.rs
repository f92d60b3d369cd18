//! `mdq get <URL>...` – queue URLs and stay in the foreground until they finish.

use anyhow::Result;
use mdq_core::config::MdqConfig;
use mdq_core::job::JobConfig;
use mdq_core::SubmitRequest;

use crate::cli::engine;
use crate::cli::session::{self, Session};
use crate::cli::{ConflictPolicy, JobOptions};

/// Settings snapshot for this submission: flags over `[defaults]`.
pub fn job_config(cfg: &MdqConfig, options: &JobOptions) -> Result<JobConfig> {
    let cwd = std::env::current_dir()?;
    let mut job = cfg.defaults.job_config(&cwd);
    if let Some(dir) = &options.output_dir {
        job.output_dir = cwd.join(dir);
    }
    if let Some(preset) = options.preset {
        job.format = preset;
    }
    if let Some(height) = options.max_height {
        job.max_height = Some(height);
    }
    if let Some(template) = &options.template {
        job.filename_template = template.clone();
    }
    job.embed_metadata |= options.embed_metadata;
    job.embed_thumbnail |= options.embed_thumbnail;
    job.restrict_filenames |= options.restrict_filenames;
    job.live_from_start |= options.live_from_start;
    Ok(job)
}

pub async fn run_get(
    cfg: &MdqConfig,
    urls: Vec<String>,
    force: bool,
    options: &JobOptions,
    on_conflict: ConflictPolicy,
    resume: bool,
) -> Result<()> {
    let config = job_config(cfg, options)?;
    let running = engine::start(cfg, true).await?;
    let events = running.handle.subscribe();

    if resume {
        let resumed = running.handle.resume_all().await?;
        if !resumed.is_empty() {
            println!("Resumed {} interrupted job(s)", resumed.len());
        }
    }

    let submitted = running
        .handle
        .submit(SubmitRequest::new(urls, config).bypass_history(force))
        .await;
    let resp = match submitted {
        Ok(resp) => resp,
        Err(e) => {
            running.stop().await?;
            return Err(e.into());
        }
    };
    for url in &resp.skipped_urls {
        println!("skipped   {url} (already downloaded or queued; use --force)");
    }
    if resp.total_found > 1 {
        println!(
            "Found {} item(s), queued {}, skipped {}",
            resp.total_found,
            resp.job_ids.len(),
            resp.skipped_count
        );
    }

    let end = Session::new(running.handle.clone(), events, on_conflict)
        .run()
        .await;
    running.stop().await?;
    session::report(end?);
    Ok(())
}
