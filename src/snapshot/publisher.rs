use anyhow::{Context, Result};
use log::{debug, info};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::error::StockpileError;
use crate::link::{LinkChange, ensure_directory, prune_stale_links, reconcile_symlink};
use crate::repo::RepositoryDescriptor;
use crate::runtime::Runtime;
use crate::source::{Package, RepoClient};

use super::layout::{RepoLayout, latest_link_target, package_link_target};

/// What one [`publish`] run did for a repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    /// Packages in the published snapshot.
    pub packages: usize,
    /// Packages fetched into the pool during this run.
    pub downloaded: usize,
    /// Package links created or repaired.
    pub linked: usize,
    /// Links removed because their package is no longer offered.
    pub pruned: usize,
}

/// Publish snapshot `version` of `repo` under `basedir`.
///
/// The pool is filled first, then the versioned directory is linked, and
/// `latest` is moved last. Any error before that final step leaves `latest`
/// where it was. Filesystem work runs on tokio's blocking pool.
#[tracing::instrument(skip(runtime, client, repo), fields(repo = %repo.id))]
pub async fn publish<R, C>(
    runtime: Arc<R>,
    client: &C,
    repo: &RepositoryDescriptor,
    basedir: &Path,
    version: &str,
) -> Result<PublishOutcome>
where
    R: Runtime + 'static,
    C: RepoClient + ?Sized,
{
    let layout = RepoLayout::new(basedir, &repo.id);
    let pool_dir = layout.packages_dir();

    let pool = pool_dir.clone();
    blocking(&runtime, move |runtime| ensure_directory(runtime, &pool)).await?;

    let packages = client
        .list_packages(repo)
        .await
        .with_context(|| format!("{}: listing packages", repo.id))?;
    info!(
        "Syncing {} packages from repository {}",
        packages.len(),
        repo.id
    );

    let downloaded = client.download(repo, &packages, &pool_dir).await?;
    info!("Finished downloading packages from repository {}", repo.id);

    let filenames: Vec<String> = packages.iter().map(Package::filename).collect();
    let repo_id = repo.id.clone();
    let label = version.to_string();
    let (packages, linked, pruned) = blocking(&runtime, move |runtime| {
        link_snapshot(runtime, &layout, &repo_id, &label, filenames)
    })
    .await?;

    Ok(PublishOutcome {
        packages,
        downloaded,
        linked,
        pruned,
    })
}

/// Run `f` against the runtime on the blocking pool.
async fn blocking<R, T, F>(runtime: &Arc<R>, f: F) -> Result<T>
where
    R: Runtime + 'static,
    T: Send + 'static,
    F: FnOnce(&R) -> Result<T> + Send + 'static,
{
    let runtime = Arc::clone(runtime);
    tokio::task::spawn_blocking(move || f(runtime.as_ref()))
        .await
        .context("filesystem task aborted")?
}

/// Link the downloaded pool into `<repo>/<version>` and move `latest`.
///
/// Returns the number of packages in the snapshot, links created or
/// repaired, and links pruned.
fn link_snapshot<R: Runtime + ?Sized>(
    runtime: &R,
    layout: &RepoLayout,
    repo_id: &str,
    version: &str,
    filenames: Vec<String>,
) -> Result<(usize, usize, usize)> {
    let pool_dir = layout.packages_dir();
    let version_dir = layout.versioned_dir(version);

    let mut keep = HashSet::with_capacity(filenames.len());
    for filename in filenames {
        if !runtime.exists(&pool_dir.join(&filename)) {
            return Err(StockpileError::Download {
                repo: repo_id.to_string(),
                message: format!("{} is missing from {}", filename, pool_dir.display()),
            }
            .into());
        }
        keep.insert(filename);
    }

    ensure_directory(runtime, &version_dir)?;

    let mut linked = 0;
    for filename in &keep {
        let link = layout.package_link(version, filename);
        let change = reconcile_symlink(runtime, &link, &package_link_target(filename))
            .with_context(|| format!("{}: linking {}", repo_id, filename))?;
        if change != LinkChange::Unchanged {
            linked += 1;
        }
    }

    let pruned = prune_stale_links(runtime, &version_dir, &keep, &pool_dir)
        .with_context(|| format!("{}: pruning {}", repo_id, version_dir.display()))?;
    if pruned > 0 {
        debug!("{}: removed {} outdated link(s) from {}", repo_id, pruned, version);
    }

    reconcile_symlink(runtime, &layout.latest_link(), &latest_link_target(version))
        .with_context(|| format!("{}: updating latest", repo_id))?;
    info!("{}: published {} ({} packages)", repo_id, version, keep.len());

    Ok((keep.len(), linked, pruned))
}
