//! HTTP access to the upstream feed.

mod basic;
pub mod auth;

pub use basic::BasicClient;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Request, Response};

/// Sends a prepared request; auth wrappers decorate a [`BasicClient`].
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

/// GETs `url` and returns the body, failing on non-2xx statuses.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(
        reqwest::Method::GET,
        url.parse().with_context(|| format!("invalid feed URL '{url}'"))?,
    );

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}

/// Loads feed data from a local file path or fetches it over HTTP.
pub async fn load_source<C: HttpClient + ?Sized>(client: &C, source: &str) -> Result<Vec<u8>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        fetch_bytes(client, source).await
    } else {
        tokio::fs::read(source)
            .await
            .with_context(|| format!("cannot read feed file '{source}'"))
    }
}
