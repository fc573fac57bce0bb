//! `.repo` file loading.
//!
//! A repo file is INI: one section per repository, keyed by its id.
//!
//! ```ini
//! [base]
//! name=CentOS-6 - Base
//! baseurl=http://mirror.centos.org/centos/6/os/$basearch/
//! enabled=1
//!
//! [updates]
//! mirrorlist=http://mirrorlist.centos.org/?release=6&arch=$basearch&repo=updates
//! enabled=0
//! ```

use anyhow::{Context, Result};
use ini::Ini;
use log::debug;
use std::path::Path;

use crate::error::StockpileError;
use crate::runtime::Runtime;

use super::{RepoSource, RepositoryDescriptor};

/// Extension recognized when scanning a directory for repo files.
pub const REPO_FILE_EXTENSION: &str = "repo";

/// Loads every repository definition in a config file, disabled ones included.
#[cfg_attr(test, mockall::automock)]
pub trait RepoFileLoader: Send + Sync {
    /// Fails with [`StockpileError::NotFound`] when `path` does not exist.
    fn load(&self, path: &Path) -> Result<Vec<RepositoryDescriptor>>;
}

/// [`RepoFileLoader`] for yum-style INI files.
pub struct IniRepoFileLoader<'a, R: Runtime> {
    runtime: &'a R,
}

impl<'a, R: Runtime> IniRepoFileLoader<'a, R> {
    pub fn new(runtime: &'a R) -> Self {
        Self { runtime }
    }
}

impl<R: Runtime> RepoFileLoader for IniRepoFileLoader<'_, R> {
    #[tracing::instrument(skip(self))]
    fn load(&self, path: &Path) -> Result<Vec<RepositoryDescriptor>> {
        if !self.runtime.exists(path) {
            return Err(StockpileError::NotFound(path.to_path_buf()).into());
        }

        let content = self.runtime.read_to_string(path)?;
        let repos = parse_repo_file(&content)
            .with_context(|| format!("Failed to parse repo file {}", path.display()))?;
        debug!("Loaded {} repo definition(s) from {}", repos.len(), path.display());
        Ok(repos)
    }
}

/// Parse repo file content into descriptors, in file order.
pub fn parse_repo_file(content: &str) -> Result<Vec<RepositoryDescriptor>> {
    let ini = Ini::load_from_str(content)
        .map_err(|e| StockpileError::validation(format!("malformed repo file: {}", e)))?;

    let mut repos = Vec::new();
    for (section, props) in ini.iter() {
        // Keys before the first header, and yum's global [main], are not repositories
        let Some(id) = section else { continue };
        if id == "main" {
            continue;
        }

        let baseurls: Vec<String> = props
            .get("baseurl")
            .map(split_urls)
            .unwrap_or_default();

        let source = if !baseurls.is_empty() {
            RepoSource::BaseUrls(baseurls)
        } else if let Some(mirrorlist) = props.get("mirrorlist").map(str::trim) {
            RepoSource::Mirrorlist(mirrorlist.to_string())
        } else {
            return Err(StockpileError::validation(format!(
                "repository {} has neither baseurl nor mirrorlist",
                id
            ))
            .into());
        };

        let mut repo = RepositoryDescriptor::new(id.trim(), source)?;
        if !parse_enabled(id, props.get("enabled"))? {
            repo = repo.disabled();
        }
        repos.push(repo);
    }

    Ok(repos)
}

fn split_urls(value: &str) -> Vec<String> {
    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_enabled(id: &str, value: Option<&str>) -> Result<bool, StockpileError> {
    match value.map(|v| v.trim().to_lowercase()).as_deref() {
        None => Ok(true),
        Some("1" | "yes" | "true" | "on") => Ok(true),
        Some("0" | "no" | "false" | "off") => Ok(false),
        Some(other) => Err(StockpileError::validation(format!(
            "repository {} has invalid enabled value \"{}\"",
            id, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;
    use std::path::PathBuf;

    const CENTOS: &str = "\
[base]
name=CentOS-6 - Base
baseurl=http://mirror.centos.org/centos/6/os/$basearch/
gpgcheck=1

[updates]
name=CentOS-6 - Updates
mirrorlist=http://mirrorlist.centos.org/?release=6&arch=$basearch&repo=updates
enabled=0

[extras]
baseurl=http://a.example.com/extras/ http://b.example.com/extras/
enabled=1
";

    #[test]
    fn test_parse_repo_file_in_file_order() {
        let repos = parse_repo_file(CENTOS).unwrap();
        let ids: Vec<_> = repos.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["base", "updates", "extras"]);

        assert!(repos[0].enabled);
        assert_eq!(
            repos[0].source,
            RepoSource::BaseUrls(vec![
                "http://mirror.centos.org/centos/6/os/$basearch/".into()
            ])
        );

        assert!(!repos[1].enabled);
        assert!(matches!(repos[1].source, RepoSource::Mirrorlist(_)));

        assert_eq!(
            repos[2].source,
            RepoSource::BaseUrls(vec![
                "http://a.example.com/extras/".into(),
                "http://b.example.com/extras/".into()
            ])
        );
    }

    #[test]
    fn test_parse_repo_file_skips_main_section() {
        let repos = parse_repo_file("[main]\ncachedir=/var/cache\n\n[r]\nbaseurl=http://x/\n")
            .unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].id, "r");
    }

    #[test]
    fn test_parse_repo_file_requires_a_source() {
        let err = parse_repo_file("[r]\nname=nothing here\n").unwrap_err();
        assert_eq!(StockpileError::kind_of(&err), Some(ErrorKind::Validation));
    }

    #[test]
    fn test_parse_repo_file_bad_enabled_value() {
        let err = parse_repo_file("[r]\nbaseurl=http://x/\nenabled=maybe\n").unwrap_err();
        assert!(err.to_string().contains("maybe"));
    }

    #[test]
    fn test_loader_missing_file_is_not_found() {
        let mut runtime = MockRuntime::new();
        let path = PathBuf::from("/etc/yum.repos.d/missing.repo");
        runtime
            .expect_exists()
            .with(eq(path.clone()))
            .returning(|_| false);

        let loader = IniRepoFileLoader::new(&runtime);
        let err = loader.load(&path).unwrap_err();
        assert_eq!(StockpileError::kind_of(&err), Some(ErrorKind::NotFound));
    }

    #[test]
    fn test_loader_reads_through_runtime() {
        let mut runtime = MockRuntime::new();
        let path = PathBuf::from("/etc/yum.repos.d/centos.repo");
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_read_to_string()
            .with(eq(path.clone()))
            .returning(|_| Ok(CENTOS.to_string()));

        let loader = IniRepoFileLoader::new(&runtime);
        let repos = loader.load(&path).unwrap();
        assert_eq!(repos.len(), 3);
    }

    #[test]
    fn test_loader_parse_error_names_file() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_read_to_string()
            .returning(|_| Ok("[r]\nmirrorlist=ftp://nope\n".to_string()));

        let loader = IniRepoFileLoader::new(&runtime);
        let err = loader.load(Path::new("/etc/yum.repos.d/bad.repo")).unwrap_err();
        assert!(format!("{:#}", err).contains("bad.repo"));
        assert_eq!(StockpileError::kind_of(&err), Some(ErrorKind::Validation));
    }
}
