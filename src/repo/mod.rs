//! Repository descriptors and where they come from.
//!
//! - `repofile` - Loading descriptors from `.repo` (INI) files
//! - `resolver` - Combining explicit descriptors, files and directories

mod repofile;
mod resolver;

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::StockpileError;

pub use repofile::{IniRepoFileLoader, REPO_FILE_EXTENSION, RepoFileLoader};
pub use resolver::{RepoSources, resolve_repositories, validate_sources};

#[cfg(test)]
pub use repofile::MockRepoFileLoader;

/// Package architectures a repository may be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    I386,
    I486,
    I586,
    I686,
    X86_64,
    Noarch,
}

impl Arch {
    pub const ALL: [Arch; 6] = [
        Arch::I386,
        Arch::I486,
        Arch::I586,
        Arch::I686,
        Arch::X86_64,
        Arch::Noarch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::I386 => "i386",
            Arch::I486 => "i486",
            Arch::I586 => "i586",
            Arch::I686 => "i686",
            Arch::X86_64 => "x86_64",
            Arch::Noarch => "noarch",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = StockpileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Arch::ALL
            .iter()
            .find(|arch| arch.as_str() == s)
            .copied()
            .ok_or_else(|| StockpileError::validation(format!("Invalid architecture \"{}\"", s)))
    }
}

/// Where the repository's packages are fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoSource {
    /// One or more base URLs, tried in order.
    BaseUrls(Vec<String>),
    /// A document listing base URLs, one per line.
    Mirrorlist(String),
}

/// A remote repository to mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryDescriptor {
    pub id: String,
    pub source: RepoSource,
    /// Restrict mirrored packages to these architectures; empty means all.
    pub arches: Vec<Arch>,
    pub enabled: bool,
}

impl RepositoryDescriptor {
    /// Build an enabled descriptor, validating id and source.
    pub fn new(id: impl Into<String>, source: RepoSource) -> Result<Self, StockpileError> {
        let descriptor = Self {
            id: id.into(),
            source,
            arches: Vec::new(),
            enabled: true,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Build a descriptor from raw architecture strings (e.g. from the command line).
    pub fn with_arch_names<S: AsRef<str>>(
        mut self,
        arches: &[S],
    ) -> Result<Self, StockpileError> {
        self.arches = arches
            .iter()
            .map(|a| a.as_ref().parse())
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    pub fn with_arches(mut self, arches: Vec<Arch>) -> Self {
        self.arches = arches;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check invariants that must hold before any I/O is attempted.
    ///
    /// The id names a directory under the base directory, so it must be a
    /// single, non-special path component.
    pub fn validate(&self) -> Result<(), StockpileError> {
        validate_path_component("repository id", &self.id)?;

        match &self.source {
            RepoSource::BaseUrls(urls) => {
                if urls.is_empty() {
                    return Err(StockpileError::validation(format!(
                        "repository {} has no base URLs",
                        self.id
                    )));
                }
                for url in urls {
                    if url.trim().is_empty() {
                        return Err(StockpileError::validation(format!(
                            "repository {} has an empty base URL",
                            self.id
                        )));
                    }
                }
            }
            RepoSource::Mirrorlist(url) => {
                if !url.starts_with("http") {
                    return Err(StockpileError::validation(format!(
                        "mirror lists must start with \"http\" (repository {})",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Unvalidated repository definition, as supplied by a caller or the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoSpec {
    pub id: String,
    pub baseurls: Vec<String>,
    pub mirrorlist: Option<String>,
    pub arches: Vec<String>,
}

impl RepoSpec {
    /// Validate into a descriptor. Base URLs win when both sources are given.
    pub fn into_descriptor(self) -> Result<RepositoryDescriptor, StockpileError> {
        let source = if !self.baseurls.is_empty() {
            RepoSource::BaseUrls(self.baseurls)
        } else if let Some(mirrorlist) = self.mirrorlist {
            RepoSource::Mirrorlist(mirrorlist)
        } else {
            return Err(StockpileError::validation(format!(
                "repository {} needs a base URL or a mirror list",
                self.id
            )));
        };
        RepositoryDescriptor::new(self.id, source)?.with_arch_names(&self.arches)
    }
}

/// Reject values that would escape or alias a directory when joined onto a path.
pub fn validate_path_component(what: &str, value: &str) -> Result<(), StockpileError> {
    if value.is_empty() {
        return Err(StockpileError::validation(format!("{} must not be empty", what)));
    }
    if value == "." || value == ".." || value.contains('/') || value.contains('\\') {
        return Err(StockpileError::validation(format!(
            "{} \"{}\" must be a single path component",
            what, value
        )));
    }
    Ok(())
}
