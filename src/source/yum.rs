//! [`RepoClient`] for yum/dnf repositories served over HTTP.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use log::{debug, info, warn};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::download::download_file;
use crate::error::StockpileError;
use crate::http::HttpClient;
use crate::repo::{RepoSource, RepositoryDescriptor};
use crate::runtime::Runtime;

use super::metadata::{find_primary_href, parse_primary};
use super::{Package, RepoClient, compare_evr};

/// Yum base architecture of the running host.
pub fn base_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86" => "i386",
        "arm" => "armhfp",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

/// Expand yum variables in a repository URL (currently `$basearch`).
pub fn expand_url_vars(url: &str) -> String {
    url.replace("$basearch", base_arch())
}

/// Base URLs listed in a mirror list document, one per line.
pub fn parse_mirrorlist(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

fn join_url(base: &str, href: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        href.trim_start_matches('/')
    )
}

pub struct YumClient<R: Runtime> {
    runtime: Arc<R>,
    http: HttpClient,
}

impl<R: Runtime> YumClient<R> {
    pub fn new(runtime: Arc<R>, http: HttpClient) -> Self {
        Self { runtime, http }
    }

    /// Candidate base URLs for a repository, in preference order.
    #[tracing::instrument(skip(self, repo), fields(repo = %repo.id))]
    pub async fn base_urls(&self, repo: &RepositoryDescriptor) -> Result<Vec<String>> {
        let urls = match &repo.source {
            RepoSource::BaseUrls(urls) => urls.iter().map(|u| expand_url_vars(u)).collect(),
            RepoSource::Mirrorlist(url) => {
                let url = expand_url_vars(url);
                let body = self
                    .http
                    .get_text(&url)
                    .await
                    .with_context(|| format!("Failed to fetch mirror list {}", url))?;
                let mirrors: Vec<String> = parse_mirrorlist(&body)
                    .iter()
                    .map(|u| expand_url_vars(u))
                    .collect();
                debug!("{}: mirror list returned {} mirror(s)", repo.id, mirrors.len());
                mirrors
            }
        };

        if urls.is_empty() {
            return Err(anyhow!("repository {} has no usable base URL", repo.id));
        }
        Ok(urls)
    }

    async fn fetch_primary(&self, base: &str) -> Result<Vec<Package>> {
        let repomd_url = join_url(base, "repodata/repomd.xml");
        let repomd = self.http.get_text(&repomd_url).await?;
        let primary_href =
            find_primary_href(&repomd).context("finding primary metadata in repomd.xml")?;

        let primary_url = join_url(base, &primary_href);
        let body = self.http.get_bytes(&primary_url).await?;

        let xml = if primary_href.ends_with(".gz") {
            let mut xml = String::new();
            GzDecoder::new(&body[..])
                .read_to_string(&mut xml)
                .with_context(|| format!("decompressing {}", primary_url))?;
            xml
        } else {
            String::from_utf8(body).with_context(|| format!("decoding {}", primary_url))?
        };

        parse_primary(&xml).with_context(|| format!("parsing {}", primary_url))
    }
}

/// Drop source packages and packages outside the repository's architectures,
/// then keep only the newest build of each name and architecture.
///
/// Output order follows the first appearance of each name and architecture.
fn select_packages(repo: &RepositoryDescriptor, packages: Vec<Package>) -> Vec<Package> {
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut selected: Vec<Package> = Vec::new();

    for pkg in packages {
        if pkg.arch == "src" || pkg.arch == "nosrc" {
            continue;
        }
        if !repo.arches.is_empty() && !repo.arches.iter().any(|a| a.as_str() == pkg.arch) {
            continue;
        }

        match index.entry((pkg.name.clone(), pkg.arch.clone())) {
            Entry::Occupied(slot) => {
                let current = &mut selected[*slot.get()];
                if compare_evr(&pkg, current) == Ordering::Greater {
                    debug!("{}: {} supersedes {}", repo.id, pkg, current);
                    *current = pkg;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(selected.len());
                selected.push(pkg);
            }
        }
    }

    selected
}

#[async_trait]
impl<R: Runtime> RepoClient for YumClient<R> {
    #[tracing::instrument(skip(self, repo), fields(repo = %repo.id))]
    async fn list_packages(&self, repo: &RepositoryDescriptor) -> Result<Vec<Package>> {
        let mut errors = Vec::new();
        for base in self.base_urls(repo).await? {
            match self.fetch_primary(&base).await {
                Ok(packages) => {
                    let packages = select_packages(repo, packages);
                    debug!("{}: {} package(s) listed by {}", repo.id, packages.len(), base);
                    return Ok(packages);
                }
                Err(e) => {
                    warn!("{}: metadata unavailable from {}: {:#}", repo.id, base, e);
                    errors.push(format!("{}: {:#}", base, e));
                }
            }
        }

        Err(anyhow!(
            "Failed to read metadata for repository {}: {}",
            repo.id,
            errors.join("; ")
        ))
    }

    #[tracing::instrument(skip(self, repo, packages), fields(repo = %repo.id))]
    async fn download(
        &self,
        repo: &RepositoryDescriptor,
        packages: &[Package],
        pool_dir: &Path,
    ) -> Result<usize> {
        let bases = self.base_urls(repo).await?;
        let mut fetched = 0;
        let mut failures = Vec::new();

        for pkg in packages {
            let dest = pool_dir.join(pkg.filename());
            if self.runtime.exists(&dest) {
                debug!("{}: {} already present", repo.id, pkg.filename());
                continue;
            }

            let mut last_error = None;
            for base in &bases {
                let url = join_url(base, &pkg.location);
                match download_file(self.runtime.as_ref(), &url, &dest, &self.http).await {
                    Ok(()) => {
                        last_error = None;
                        break;
                    }
                    Err(e) => last_error = Some(e),
                }
            }

            match last_error {
                None => fetched += 1,
                Some(e) => {
                    warn!("{}: could not download {}: {:#}", repo.id, pkg.filename(), e);
                    failures.push(format!("{} ({:#})", pkg.filename(), e));
                }
            }
        }

        if !failures.is_empty() {
            return Err(StockpileError::Download {
                repo: repo.id.clone(),
                message: format!(
                    "{} of {} package(s) failed: {}",
                    failures.len(),
                    packages.len(),
                    failures.join(", ")
                ),
            }
            .into());
        }

        info!("{}: fetched {} new package(s)", repo.id, fetched);
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::repo::Arch;
    use crate::runtime::RealRuntime;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use reqwest::Client;
    use std::io::Write;
    use std::time::Duration;

    fn http() -> HttpClient {
        HttpClient::new(Client::new()).with_retry_delay(Duration::from_millis(1))
    }

    fn client() -> YumClient<RealRuntime> {
        YumClient::new(Arc::new(RealRuntime), http())
    }

    fn repo(base: &str) -> RepositoryDescriptor {
        RepositoryDescriptor::new("base", RepoSource::BaseUrls(vec![base.to_string()])).unwrap()
    }

    fn primary_xml(packages: &[(&str, &str, &str, &str)]) -> Vec<u8> {
        let mut xml = String::from(r#"<metadata xmlns="http://linux.duke.edu/metadata/common">"#);
        for (name, ver, rel, arch) in packages {
            xml.push_str(&format!(
                r#"<package type="rpm"><name>{name}</name><arch>{arch}</arch><version epoch="0" ver="{ver}" rel="{rel}"/><location href="Packages/{name}-{ver}-{rel}.{arch}.rpm"/></package>"#
            ));
        }
        xml.push_str("</metadata>");

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(xml.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    const REPOMD: &str = r#"<repomd><data type="primary"><location href="repodata/primary.xml.gz"/></data></repomd>"#;

    async fn serve_metadata(
        server: &mut mockito::ServerGuard,
        prefix: &str,
        body: Vec<u8>,
    ) -> Vec<mockito::Mock> {
        vec![
            server
                .mock("GET", format!("{}/repodata/repomd.xml", prefix).as_str())
                .with_body(REPOMD)
                .create_async()
                .await,
            server
                .mock("GET", format!("{}/repodata/primary.xml.gz", prefix).as_str())
                .with_body(body)
                .create_async()
                .await,
        ]
    }

    #[test]
    fn test_parse_mirrorlist() {
        let body = "# mirrors\nhttp://a.example.com/os/\n\n  http://b.example.com/os/  \n#http://c/\n";
        assert_eq!(
            parse_mirrorlist(body),
            vec!["http://a.example.com/os/", "http://b.example.com/os/"]
        );
    }

    #[test]
    fn test_expand_url_vars() {
        let url = expand_url_vars("http://m/centos/6/os/$basearch/");
        assert_eq!(url, format!("http://m/centos/6/os/{}/", base_arch()));
        assert!(!url.contains('$'));
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://m/os/", "/Packages/a.rpm"), "http://m/os/Packages/a.rpm");
        assert_eq!(join_url("http://m/os", "repodata/repomd.xml"), "http://m/os/repodata/repomd.xml");
    }

    #[test]
    fn test_select_packages_filters_and_dedupes() {
        let repo = repo("http://m/").with_arches(vec![Arch::X86_64, Arch::Noarch]);
        let packages = vec![
            Package::new("a", "1", "1", "x86_64"),
            Package::new("a", "1", "1", "i686"),
            Package::new("a", "1", "1", "src"),
            Package::new("b", "2", "1", "noarch"),
            Package::new("a", "1", "1", "x86_64").with_location("mirror2/a.rpm"),
        ];
        let selected = select_packages(&repo, packages);
        let names: Vec<_> = selected.iter().map(Package::filename).collect();
        assert_eq!(names, vec!["a-1-1.x86_64.rpm", "b-2-1.noarch.rpm"]);
        assert_eq!(selected[0].location, "Packages/a-1-1.x86_64.rpm");
    }

    #[test]
    fn test_select_packages_keeps_newest_build() {
        let packages = vec![
            Package::new("bash", "4.1.2", "15", "x86_64"),
            Package::new("bash", "4.2.0", "1", "x86_64"),
            Package::new("bash", "4.1.2", "29", "x86_64"),
            Package::new("bash", "4.1.2", "15", "i686"),
        ];
        let selected = select_packages(&repo("http://m/"), packages);
        let names: Vec<_> = selected.iter().map(Package::filename).collect();
        assert_eq!(names, vec!["bash-4.2.0-1.x86_64.rpm", "bash-4.1.2-15.i686.rpm"]);
    }

    #[test]
    fn test_select_packages_honours_epoch() {
        let packages = vec![
            Package::new("tzdata", "2013g", "1", "noarch").with_epoch(1),
            Package::new("tzdata", "2024a", "1", "noarch"),
        ];
        let selected = select_packages(&repo("http://m/"), packages);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].version, "2013g");
    }

    #[tokio::test]
    async fn test_list_packages_from_base_url() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = serve_metadata(
            &mut server,
            "/os",
            primary_xml(&[("a", "1.0", "1", "x86_64"), ("b", "2.0", "3", "noarch")]),
        )
        .await;

        let packages = client()
            .list_packages(&repo(&format!("{}/os/", server.url())))
            .await
            .unwrap();
        let names: Vec<_> = packages.iter().map(Package::filename).collect();
        assert_eq!(names, vec!["a-1.0-1.x86_64.rpm", "b-2.0-3.noarch.rpm"]);
    }

    #[tokio::test]
    async fn test_list_packages_offers_only_newest_version() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = serve_metadata(
            &mut server,
            "/os",
            primary_xml(&[
                ("bash", "4.1.2", "15.el6_4", "x86_64"),
                ("bash", "4.1.2", "29.el6", "x86_64"),
                ("bash", "4.2.0", "1.el6", "x86_64"),
            ]),
        )
        .await;

        let packages = client()
            .list_packages(&repo(&format!("{}/os/", server.url())))
            .await
            .unwrap();
        let names: Vec<_> = packages.iter().map(Package::filename).collect();
        assert_eq!(names, vec!["bash-4.2.0-1.el6.x86_64.rpm"]);
    }

    #[test_log::test(tokio::test)]
    async fn test_list_packages_falls_back_to_next_mirror() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        let _dead = server
            .mock("GET", "/dead/repodata/repomd.xml")
            .with_status(404)
            .create_async()
            .await;
        let _live =
            serve_metadata(&mut server, "/live", primary_xml(&[("a", "1", "1", "noarch")])).await;
        let _list = server
            .mock("GET", "/mirrorlist")
            .with_body(format!("{0}/dead/\n{0}/live/\n", url))
            .create_async()
            .await;

        let repo = RepositoryDescriptor::new(
            "base",
            RepoSource::Mirrorlist(format!("{}/mirrorlist", server.url())),
        )
        .unwrap();
        let packages = client().list_packages(&repo).await.unwrap();
        assert_eq!(packages.len(), 1);
    }

    #[tokio::test]
    async fn test_list_packages_all_mirrors_fail() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/os/repodata/repomd.xml")
            .with_status(404)
            .create_async()
            .await;

        let err = client()
            .list_packages(&repo(&format!("{}/os", server.url())))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("base"));
    }

    #[tokio::test]
    async fn test_download_skips_present_and_fetches_missing() {
        let mut server = mockito::Server::new_async().await;
        let fetched = server
            .mock("GET", "/os/Packages/b-2-1.noarch.rpm")
            .with_body("b")
            .expect(1)
            .create_async()
            .await;
        let never = server
            .mock("GET", "/os/Packages/a-1-1.noarch.rpm")
            .expect(0)
            .create_async()
            .await;

        let pool = tempfile::tempdir().unwrap();
        std::fs::write(pool.path().join("a-1-1.noarch.rpm"), b"a").unwrap();

        let packages = vec![
            Package::new("a", "1", "1", "noarch"),
            Package::new("b", "2", "1", "noarch"),
        ];
        let count = client()
            .download(&repo(&format!("{}/os", server.url())), &packages, pool.path())
            .await
            .unwrap();

        fetched.assert_async().await;
        never.assert_async().await;
        assert_eq!(count, 1);
        assert_eq!(
            std::fs::read_to_string(pool.path().join("b-2-1.noarch.rpm")).unwrap(),
            "b"
        );
        assert!(!pool.path().join("b-2-1.noarch.rpm.part").exists());
    }

    #[tokio::test]
    async fn test_download_reports_every_failed_package() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("GET", "/os/Packages/ok-1-1.noarch.rpm")
            .with_body("ok")
            .create_async()
            .await;
        let _gone = server
            .mock("GET", "/os/Packages/gone-1-1.noarch.rpm")
            .with_status(404)
            .create_async()
            .await;

        let pool = tempfile::tempdir().unwrap();
        let packages = vec![
            Package::new("gone", "1", "1", "noarch"),
            Package::new("ok", "1", "1", "noarch"),
        ];
        let err = client()
            .download(&repo(&format!("{}/os", server.url())), &packages, pool.path())
            .await
            .unwrap_err();

        assert_eq!(StockpileError::kind_of(&err), Some(ErrorKind::Download));
        assert!(err.to_string().contains("gone-1-1.noarch.rpm"));
        // The other package was still fetched
        assert!(pool.path().join("ok-1-1.noarch.rpm").exists());
        assert!(!pool.path().join("gone-1-1.noarch.rpm").exists());
    }
}
