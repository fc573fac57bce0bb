use crate::http::HttpClient;
use crate::runtime::Runtime;
use anyhow::{Context, Result};
use log::{debug, info};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Path a download is streamed to before it is renamed into place.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Downloads `url` to `dest` with retry support.
///
/// The body is written to `<dest>.part` and renamed over `dest` only once it
/// is complete, so an interrupted run never leaves a truncated file that a
/// later run would mistake for a finished download.
#[tracing::instrument(skip(runtime, http_client))]
pub async fn download_file<R: Runtime>(
    runtime: &R,
    url: &str,
    dest: &Path,
    http_client: &HttpClient,
) -> Result<()> {
    info!("Downloading {}", url);

    let part = partial_path(dest);
    let result = http_client
        .download_file(url, || {
            runtime
                .create_file(&part)
                .with_context(|| format!("Failed to create temporary file at {:?}", part))
        })
        .await;

    if let Err(e) = result {
        if runtime.exists(&part) {
            debug!("Removing partial download {:?}", part);
            let _ = runtime.remove_file(&part);
        }
        return Err(e);
    }

    runtime
        .rename(&part, dest)
        .with_context(|| format!("Failed to move {:?} into place", dest))?;
    Ok(())
}
