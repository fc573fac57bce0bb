//! Package sources.
//!
//! A [`RepoClient`] knows how to list the packages a repository currently
//! offers and how to fetch them into a local pool directory. The snapshot
//! logic only ever talks to this trait.

mod metadata;
mod version;
mod yum;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::repo::RepositoryDescriptor;

pub use metadata::{find_primary_href, parse_primary};
pub use version::{compare_evr, rpmvercmp};
pub use yum::{YumClient, base_arch, expand_url_vars, parse_mirrorlist};

/// One binary package offered by a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Package {
    pub name: String,
    /// Overrides version ordering; not part of the file name.
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
    /// Location of the package relative to the repository base URL.
    pub location: String,
}

impl Package {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        release: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        let mut package = Self {
            name: name.into(),
            epoch: 0,
            version: version.into(),
            release: release.into(),
            arch: arch.into(),
            location: String::new(),
        };
        package.location = format!("Packages/{}", package.filename());
        package
    }

    pub fn with_epoch(mut self, epoch: u32) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// File name in the pool: `{name}-{version}-{release}.{arch}.rpm`.
    ///
    /// Existing pools are keyed by this exact format.
    pub fn filename(&self) -> String {
        format!(
            "{}-{}-{}.{}.rpm",
            self.name, self.version, self.release, self.arch
        )
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}.{}",
            self.name, self.version, self.release, self.arch
        )
    }
}

/// Repository metadata and download collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepoClient: Send + Sync {
    /// Packages currently available in the repository: the newest build of
    /// each name and architecture.
    async fn list_packages(&self, repo: &RepositoryDescriptor) -> Result<Vec<Package>>;

    /// Fetch `packages` into `pool_dir`, skipping files already present.
    ///
    /// Fails with a download error naming every package that could not be
    /// retrieved. Returns the number of packages actually fetched.
    async fn download(
        &self,
        repo: &RepositoryDescriptor,
        packages: &[Package],
        pool_dir: &Path,
    ) -> Result<usize>;
}
