use anyhow::Result;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

use stockpile::config::Config;
use stockpile::repo::{IniRepoFileLoader, RepoSources, RepoSpec};
use stockpile::runtime::RealRuntime;
use stockpile::sync::sync;

/// stockpile - versioned yum repository mirror
///
/// Downloads the packages of one or more yum repositories into a local pool
/// and publishes a dated snapshot of symlinks for each run:
///
///   DEST/<repo>/packages/     downloaded packages
///   DEST/<repo>/<version>/    snapshot (links into packages/)
///   DEST/<repo>/latest        link to the newest snapshot
///
/// Examples:
///   stockpile --dest /srv/mirror -d /etc/yum.repos.d
///   stockpile --dest /srv/mirror --name epel --mirrorlist 'https://mirrors.fedoraproject.org/mirrorlist?repo=epel-7&arch=$basearch'
#[derive(Parser, Debug)]
#[command(author, version = env!("STOCKPILE_VERSION"), about)]
struct Cli {
    /// Base directory of the mirror (also via STOCKPILE_DEST)
    #[arg(long, env = "STOCKPILE_DEST", value_name = "PATH")]
    dest: PathBuf,

    /// Repo file to mirror; may be repeated
    #[arg(short = 'f', long = "repofile", value_name = "FILE")]
    repofiles: Vec<PathBuf>,

    /// Directory of *.repo files to mirror; may be repeated
    #[arg(short = 'd', long = "repodir", value_name = "DIR")]
    repodirs: Vec<PathBuf>,

    /// Id of a repository given on the command line
    #[arg(long, value_name = "ID", requires = "source")]
    name: Option<String>,

    /// Base URL of the command-line repository; may be repeated
    #[arg(long = "baseurl", value_name = "URL", group = "source", requires = "name")]
    baseurls: Vec<String>,

    /// Mirror list URL of the command-line repository
    #[arg(long, value_name = "URL", group = "source", requires = "name")]
    mirrorlist: Option<String>,

    /// Restrict the command-line repository to an architecture; may be repeated
    #[arg(long = "arch", value_name = "ARCH", requires = "name")]
    arches: Vec<String>,

    /// Version label to publish instead of today's date
    #[arg(long, value_name = "LABEL")]
    repoversion: Option<String>,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn sources(&self) -> RepoSources {
        let repos = self
            .name
            .as_ref()
            .map(|id| RepoSpec {
                id: id.clone(),
                baseurls: self.baseurls.clone(),
                mirrorlist: self.mirrorlist.clone(),
                arches: self.arches.clone(),
            })
            .into_iter()
            .collect();

        RepoSources {
            repos,
            repofiles: self.repofiles.clone(),
            repodirs: self.repodirs.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = Config::new(RealRuntime)?;
    let loader = IniRepoFileLoader::new(config.runtime.as_ref());
    let summary = sync(
        config.runtime.clone(),
        config.client.clone(),
        &loader,
        &cli.dest,
        &cli.sources(),
        cli.repoversion.as_deref(),
    )
    .await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary.report())?);
    }

    info!(
        "Version {}: {} repositories, {} packages downloaded",
        summary.version,
        summary.repos,
        summary.downloaded()
    );
    match summary.into_result() {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!("{:#}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
