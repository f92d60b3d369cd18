//! Submission: validation, collection expansion and duplicate filtering.

use serde::{Deserialize, Serialize};

use crate::adapter::CollectionExpander;
use crate::error::{EngineError, Result};
use crate::job::{JobConfig, JobId};
use crate::store::StateDb;
use crate::url_model::{normalize_url, parse_source_url};

use super::command::PreparedSubmit;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub urls: Vec<String>,
    pub config: JobConfig,
    /// Enqueue even URLs already downloaded or already queued.
    #[serde(default)]
    pub bypass_history: bool,
}

impl SubmitRequest {
    pub fn new(urls: Vec<String>, config: JobConfig) -> Self {
        Self {
            urls,
            config,
            bypass_history: false,
        }
    }

    pub fn bypass_history(mut self, bypass: bool) -> Self {
        self.bypass_history = bypass;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// One id per accepted URL, in submission order.
    pub job_ids: Vec<JobId>,
    pub skipped_count: usize,
    /// Entries found after expanding collections.
    pub total_found: usize,
    pub skipped_urls: Vec<String>,
}

/// Key used to compare URLs for duplicate detection.
pub(super) fn dedup_key(url: &str) -> String {
    normalize_url(url).unwrap_or_else(|_| url.trim().to_string())
}

/// Synchronous part of `submit`: everything that can reject the request happens
/// here, before any job exists.
pub(super) async fn prepare(
    req: SubmitRequest,
    expander: &dyn CollectionExpander,
    db: &StateDb,
) -> Result<PreparedSubmit> {
    if req.urls.iter().all(|u| u.trim().is_empty()) {
        return Err(EngineError::validation("no URLs given"));
    }
    let config = req.config.validated()?;
    let sources: Vec<&str> = req
        .urls
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .collect();
    for url in &sources {
        parse_source_url(url)?;
    }

    let mut found = Vec::new();
    for url in sources {
        found.extend(expander.expand(url).await?);
    }
    let total_found = found.len();

    let mut urls = Vec::with_capacity(found.len());
    let mut skipped_urls = Vec::new();
    for url in found {
        if parse_source_url(&url).is_err() {
            tracing::warn!(%url, "collection entry is not a downloadable URL, skipping");
            skipped_urls.push(url);
            continue;
        }
        if !req.bypass_history {
            match db.history_contains(&url).await {
                Ok(true) => {
                    tracing::debug!(%url, "already downloaded, skipping");
                    skipped_urls.push(url);
                    continue;
                }
                Ok(false) => {}
                // History is advisory; an unreadable store never blocks a submit.
                Err(e) => tracing::warn!(%url, "history lookup failed: {}", e),
            }
        }
        urls.push(url);
    }

    Ok(PreparedSubmit {
        urls,
        config,
        bypass_history: req.bypass_history,
        skipped_urls,
        total_found,
    })
}
