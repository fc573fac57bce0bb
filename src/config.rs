use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;

use crate::http::HttpClient;
use crate::runtime::Runtime;
use crate::source::YumClient;

/// User agent sent with every mirror request.
pub const USER_AGENT: &str = concat!("stockpile/", env!("STOCKPILE_VERSION"));

/// Collaborators for a production run.
pub struct Config<R: Runtime> {
    pub runtime: Arc<R>,
    pub client: Arc<YumClient<R>>,
}

impl<R: Runtime> Config<R> {
    pub fn new(runtime: R) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        let runtime = Arc::new(runtime);
        let client = Arc::new(YumClient::new(runtime.clone(), HttpClient::new(http)));

        Ok(Self { runtime, client })
    }
}
