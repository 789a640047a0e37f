use crate::fetch::HttpClient;
use anyhow::{Result, bail};
use async_trait::async_trait;
use reqwest::Request;

/// An [`HttpClient`] wrapper that sends the feed API key as a query parameter,
/// for feeds such as `?api_key=...`.
pub struct UrlParam<C> {
    inner: C,
    param_name: String,
    key: String,
}

impl<C> UrlParam<C> {
    pub fn new(inner: C, param_name: &str, key: &str) -> Result<Self> {
        if param_name.trim().is_empty() {
            bail!("API key parameter name is empty");
        }
        Ok(Self {
            inner,
            param_name: param_name.to_string(),
            key: key.to_string(),
        })
    }

    fn sign(&self, req: &mut Request) {
        req.url_mut()
            .query_pairs_mut()
            .append_pair(&self.param_name, &self.key);
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for UrlParam<C> {
    async fn execute(&self, mut req: Request) -> reqwest::Result<reqwest::Response> {
        self.sign(&mut req);
        self.inner.execute(req).await
    }
}
