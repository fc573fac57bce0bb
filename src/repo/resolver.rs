//! Repository source resolution.
//!
//! Explicit repositories, repo files and directories of repo files are
//! flattened into one ordered list of enabled descriptors. Everything is
//! validated before the first file is touched.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::StockpileError;
use crate::runtime::Runtime;

use super::{REPO_FILE_EXTENSION, RepoFileLoader, RepoSpec, RepositoryDescriptor};

/// Everything a caller may name as a repository source.
#[derive(Debug, Clone, Default)]
pub struct RepoSources {
    pub repos: Vec<RepoSpec>,
    pub repofiles: Vec<PathBuf>,
    pub repodirs: Vec<PathBuf>,
}

/// Validate the base directory and every source, without any I/O.
///
/// Returns the explicit repositories as validated descriptors.
pub fn validate_sources(
    basedir: &Path,
    sources: &RepoSources,
) -> Result<Vec<RepositoryDescriptor>, StockpileError> {
    if basedir.as_os_str().is_empty() {
        return Err(StockpileError::validation("basedir must be a non-empty path"));
    }
    for file in &sources.repofiles {
        if file.as_os_str().is_empty() {
            return Err(StockpileError::validation("repofile paths must not be empty"));
        }
    }
    for dir in &sources.repodirs {
        if dir.as_os_str().is_empty() {
            return Err(StockpileError::validation("repodir paths must not be empty"));
        }
    }

    sources
        .repos
        .iter()
        .cloned()
        .map(RepoSpec::into_descriptor)
        .collect()
}

/// Resolve all sources into one de-duplicated list of enabled repositories.
///
/// Order: explicit repositories, then repo files in the order given, then
/// directories in the order given (files within a directory sorted by name).
/// The first definition of an id wins.
#[tracing::instrument(skip(runtime, loader, sources))]
pub fn resolve_repositories<R: Runtime, L: RepoFileLoader + ?Sized>(
    runtime: &R,
    loader: &L,
    basedir: &Path,
    sources: &RepoSources,
) -> Result<Vec<RepositoryDescriptor>> {
    let explicit = validate_sources(basedir, sources)?;

    let mut candidates = explicit;
    for file in &sources.repofiles {
        candidates.extend(repos_from_file(loader, file)?);
    }
    for dir in &sources.repodirs {
        candidates.extend(repos_from_dir(runtime, loader, dir)?);
    }

    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(candidates.len());
    for repo in candidates {
        if !seen.insert(repo.id.clone()) {
            warn!("Ignoring duplicate definition of repo {}", repo.id);
            continue;
        }
        resolved.push(repo);
    }

    Ok(resolved)
}

/// Load the enabled repositories of one repo file.
pub fn repos_from_file<L: RepoFileLoader + ?Sized>(
    loader: &L,
    path: &Path,
) -> Result<Vec<RepositoryDescriptor>> {
    let mut repos = Vec::new();
    for repo in loader.load(path)? {
        if repo.enabled {
            info!("Added repo {} from file {}", repo.id, path.display());
            repos.push(repo);
        } else {
            debug!("Not adding repo {} because it is disabled", repo.id);
        }
    }
    Ok(repos)
}

/// Load the enabled repositories of every `*.repo` file directly inside `dir`.
pub fn repos_from_dir<R: Runtime, L: RepoFileLoader + ?Sized>(
    runtime: &R,
    loader: &L,
    dir: &Path,
) -> Result<Vec<RepositoryDescriptor>> {
    let mut repos = Vec::new();
    for file in repo_files_in_dir(runtime, dir)? {
        repos.extend(repos_from_file(loader, &file)?);
    }
    Ok(repos)
}

/// List repo files directly inside `dir`, sorted by file name.
pub fn repo_files_in_dir<R: Runtime>(runtime: &R, dir: &Path) -> Result<Vec<PathBuf>> {
    if !runtime.is_dir(dir) {
        return Err(StockpileError::NotFound(dir.to_path_buf()).into());
    }

    let pattern = glob::Pattern::new(&format!("*.{}", REPO_FILE_EXTENSION))
        .context("Invalid repo file pattern")?;

    let mut files: Vec<PathBuf> = runtime
        .read_dir(dir)
        .with_context(|| format!("Failed to list repo directory {}", dir.display()))?
        .into_iter()
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| pattern.matches(name))
        })
        .filter(|path| !runtime.is_dir(path))
        .collect();

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
