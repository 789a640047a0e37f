//! Feed authentication.
//!
//! Most transit feeds are open. Those that are not take an API key either as a
//! header ([`ApiKey`]) or as a query parameter ([`UrlParam`]).

mod api_key;
mod url_param;

pub use api_key::ApiKey;
pub use url_param::UrlParam;

use std::time::Duration;

use anyhow::Result;

use super::{BasicClient, HttpClient};

/// How the feed expects its API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedAuth {
    None,
    Header { header_name: String, key: String },
    UrlParam { param_name: String, key: String },
}

impl FeedAuth {
    /// Picks the scheme from optional settings; a key without a header or
    /// parameter name is sent as `Authorization: Bearer`.
    pub fn from_settings(
        key: Option<String>,
        header_name: Option<String>,
        param_name: Option<String>,
    ) -> Self {
        match (key, header_name, param_name) {
            (None, _, _) => FeedAuth::None,
            (Some(key), _, Some(param_name)) => FeedAuth::UrlParam { param_name, key },
            (Some(key), Some(header_name), None) => FeedAuth::Header { header_name, key },
            (Some(key), None, None) => FeedAuth::Header {
                header_name: "Authorization".to_string(),
                key: format!("Bearer {key}"),
            },
        }
    }

    pub fn requires_auth(&self) -> bool {
        !matches!(self, FeedAuth::None)
    }

    /// Builds the HTTP client for this scheme.
    pub fn client(&self, timeout: Duration) -> Result<Box<dyn HttpClient>> {
        let base = BasicClient::with_timeout(timeout)?;
        let client: Box<dyn HttpClient> = match self {
            FeedAuth::None => Box::new(base),
            FeedAuth::Header { header_name, key } => {
                Box::new(ApiKey::new(base, header_name, key)?)
            }
            FeedAuth::UrlParam { param_name, key } => {
                Box::new(UrlParam::new(base, param_name, key)?)
            }
        };
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        assert_eq!(FeedAuth::from_settings(None, Some("x".into()), None), FeedAuth::None);
        assert_eq!(
            FeedAuth::from_settings(Some("k".into()), None, Some("api_key".into())),
            FeedAuth::UrlParam {
                param_name: "api_key".into(),
                key: "k".into()
            }
        );
        assert_eq!(
            FeedAuth::from_settings(Some("k".into()), Some("x-api-key".into()), None),
            FeedAuth::Header {
                header_name: "x-api-key".into(),
                key: "k".into()
            }
        );
        assert_eq!(
            FeedAuth::from_settings(Some("k".into()), None, None),
            FeedAuth::Header {
                header_name: "Authorization".into(),
                key: "Bearer k".into()
            }
        );
    }

    #[test]
    fn test_requires_auth() {
        assert!(!FeedAuth::None.requires_auth());
        assert!(FeedAuth::from_settings(Some("k".into()), None, None).requires_auth());
    }

    #[tokio::test]
    async fn test_client_builds_for_each_scheme() {
        let timeout = Duration::from_secs(30);
        assert!(FeedAuth::None.client(timeout).is_ok());
        assert!(
            FeedAuth::from_settings(Some("k".into()), Some("x-api-key".into()), None)
                .client(timeout)
                .is_ok()
        );
        assert!(
            FeedAuth::from_settings(Some("k".into()), None, Some("api_key".into()))
                .client(timeout)
                .is_ok()
        );
    }
}
