//! On-disk layout of one mirrored repository.
//!
//! ```text
//! <basedir>/<repo>/packages/<file>.rpm      pool of downloaded packages
//! <basedir>/<repo>/<version>/<file>.rpm     -> ../packages/<file>.rpm
//! <basedir>/<repo>/latest                   -> <version>
//! ```
//!
//! Consumers of the mirror rely on exactly these names.

use std::path::{Path, PathBuf};

/// Name of the pool directory inside a repository directory.
pub const PACKAGES_DIR: &str = "packages";

/// Name of the pointer to the most recently published version.
pub const LATEST_LINK: &str = "latest";

/// Paths for one repository under a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    repo_dir: PathBuf,
}

impl RepoLayout {
    /// Layout for `repo_id` under `basedir`.
    ///
    /// Returns: `<basedir>/<repo_id>`
    pub fn new(basedir: &Path, repo_id: &str) -> Self {
        Self {
            repo_dir: basedir.join(repo_id),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// Returns: `<repo_dir>/packages`
    pub fn packages_dir(&self) -> PathBuf {
        self.repo_dir.join(PACKAGES_DIR)
    }

    /// Returns: `<repo_dir>/<version>`
    pub fn versioned_dir(&self, version: &str) -> PathBuf {
        self.repo_dir.join(version)
    }

    /// Returns: `<repo_dir>/latest`
    pub fn latest_link(&self) -> PathBuf {
        self.repo_dir.join(LATEST_LINK)
    }

    /// Returns: `<repo_dir>/<version>/<package_file>`
    pub fn package_link(&self, version: &str, package_file: &str) -> PathBuf {
        self.versioned_dir(version).join(package_file)
    }
}

/// Relative target of a package link: `../packages/<package_file>`.
///
/// Relative so a snapshot survives the base directory being moved or mounted elsewhere.
pub fn package_link_target(package_file: &str) -> PathBuf {
    Path::new("..").join(PACKAGES_DIR).join(package_file)
}

/// Relative target of the `latest` link: the version directory's own name.
pub fn latest_link_target(version: &str) -> PathBuf {
    PathBuf::from(version)
}
