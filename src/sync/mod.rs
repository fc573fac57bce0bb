//! Sync orchestration: one concurrent publish unit per repository.

use anyhow::{Result, anyhow};
use chrono::{Local, NaiveDate};
use log::{error, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::StockpileError;
use crate::repo::{RepoFileLoader, RepoSources, resolve_repositories, validate_path_component};
use crate::runtime::Runtime;
use crate::snapshot::{LATEST_LINK, PACKAGES_DIR, PublishOutcome, publish};
use crate::source::RepoClient;

/// Version label for `date`: `month-day-year` without zero padding.
pub fn format_version_label(date: NaiveDate) -> String {
    date.format("%-m-%-d-%Y").to_string()
}

/// Version label for today in local time.
pub fn version_label() -> String {
    format_version_label(Local::now().date_naive())
}

/// Check a caller-supplied version label.
///
/// It becomes a directory name next to `packages` and `latest`, so it must be
/// a single path component and may not shadow either of them.
pub fn validate_version_label(label: &str) -> Result<(), StockpileError> {
    validate_path_component("version label", label)?;
    if label == PACKAGES_DIR || label == LATEST_LINK {
        return Err(StockpileError::validation(format!(
            "version label \"{}\" is reserved",
            label
        )));
    }
    Ok(())
}

/// Outcome of a whole run.
#[derive(Debug)]
pub struct SyncSummary {
    /// Version label shared by every repository in the run.
    pub version: String,
    /// Number of repositories dispatched.
    pub repos: usize,
    pub published: BTreeMap<String, PublishOutcome>,
    pub failures: BTreeMap<String, anyhow::Error>,
    pub elapsed: Duration,
}

/// Serializable view of a [`SyncSummary`].
#[derive(Debug, Serialize)]
pub struct SummaryReport {
    pub version: String,
    pub repos: usize,
    pub elapsed_secs: f64,
    pub published: BTreeMap<String, PublishOutcome>,
    pub failures: BTreeMap<String, String>,
}

impl SyncSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total packages fetched across all repositories.
    pub fn downloaded(&self) -> usize {
        self.published.values().map(|o| o.downloaded).sum()
    }

    pub fn report(&self) -> SummaryReport {
        SummaryReport {
            version: self.version.clone(),
            repos: self.repos,
            elapsed_secs: self.elapsed.as_secs_f64(),
            published: self.published.clone(),
            failures: self
                .failures
                .iter()
                .map(|(id, e)| (id.clone(), format!("{:#}", e)))
                .collect(),
        }
    }

    /// `Ok(self)` if every repository published, otherwise one error naming
    /// each failed repository and its cause.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let details: Vec<String> = self
            .failures
            .iter()
            .map(|(id, e)| format!("{}: {:#}", id, e))
            .collect();
        Err(anyhow!(
            "{} of {} repositories failed: {}",
            self.failures.len(),
            self.repos,
            details.join("; ")
        ))
    }
}

/// Mirror every resolved repository into `basedir` as one snapshot version.
///
/// Inputs are validated and resolved before anything is dispatched. Each
/// repository then publishes in its own task; a failure (or panic) in one is
/// recorded in the summary and never affects the others.
#[tracing::instrument(skip(runtime, client, loader, sources))]
pub async fn sync<R, C, L>(
    runtime: Arc<R>,
    client: Arc<C>,
    loader: &L,
    basedir: &Path,
    sources: &RepoSources,
    repoversion: Option<&str>,
) -> Result<SyncSummary>
where
    R: Runtime + 'static,
    C: RepoClient + 'static,
    L: RepoFileLoader + ?Sized,
{
    let started = Instant::now();

    if let Some(label) = repoversion {
        validate_version_label(label)?;
    }
    let repos = resolve_repositories(runtime.as_ref(), loader, basedir, sources)?;
    let version = match repoversion {
        Some(label) => label.to_string(),
        None => version_label(),
    };

    info!(
        "Syncing {} repositories into {} as version {}",
        repos.len(),
        basedir.display(),
        version
    );

    let mut ids = Vec::with_capacity(repos.len());
    let mut handles = Vec::with_capacity(repos.len());
    for repo in repos {
        let runtime = runtime.clone();
        let client = client.clone();
        let basedir: PathBuf = basedir.to_path_buf();
        let version = version.clone();
        ids.push(repo.id.clone());
        handles.push(tokio::spawn(async move {
            publish(runtime, client.as_ref(), &repo, &basedir, &version).await
        }));
    }

    let results = futures_util::future::join_all(handles).await;

    let mut summary = SyncSummary {
        version,
        repos: ids.len(),
        published: BTreeMap::new(),
        failures: BTreeMap::new(),
        elapsed: Duration::ZERO,
    };
    for (id, result) in ids.into_iter().zip(results) {
        match result {
            Ok(Ok(outcome)) => {
                summary.published.insert(id, outcome);
            }
            Ok(Err(e)) => {
                error!("{}: {:#}", id, e);
                summary.failures.insert(id, e);
            }
            Err(join_error) => {
                error!("{}: publish task aborted: {}", id, join_error);
                summary
                    .failures
                    .insert(id, anyhow!("publish task aborted: {}", join_error));
            }
        }
    }
    summary.elapsed = started.elapsed();

    info!(
        "Processed {} repositories ({} failed) in {:.1}s",
        summary.repos,
        summary.failures.len(),
        summary.elapsed.as_secs_f64()
    );
    Ok(summary)
}
