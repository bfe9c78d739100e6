//! Canonical metadata lookup for a post.

use log::debug;
use serde::Deserialize;
use url::Url;

use crate::{Error, Result};

/// Author handle and definitive URL for a post. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalInfo {
    pub author_handle: Option<String>,
    pub canonical_id: Option<String>,
    pub canonical_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataBody {
    id_str: Option<String>,
    user: Option<MetadataUser>,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataUser {
    screen_name: Option<String>,
}

/// Resolves canonical metadata against the content-metadata endpoint.
#[derive(Clone)]
pub struct CanonicalResolver {
    client: reqwest::Client,
    endpoint: Url,
    canonical_base: Url,
}

impl CanonicalResolver {
    pub fn new(client: reqwest::Client, endpoint: Url, canonical_base: Url) -> Self {
        Self {
            client,
            endpoint,
            canonical_base,
        }
    }

    /// Look up `content_id`. 200 and 301 both count as success; any other
    /// status becomes [`Error::ContentNotFound`] carrying that status.
    pub async fn resolve(&self, content_id: u64, language: &str) -> Result<CanonicalInfo> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("id", &content_id.to_string())
            .append_pair("lang", language);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 && status != 301 {
            return Err(Error::ContentNotFound(status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;
        let parsed: MetadataBody = serde_json::from_slice(&body).unwrap_or_else(|e| {
            debug!("metadata for {} is not usable JSON: {}", content_id, e);
            MetadataBody::default()
        });

        Ok(self.canonical_info(parsed))
    }

    fn canonical_info(&self, body: MetadataBody) -> CanonicalInfo {
        let author_handle = body
            .user
            .and_then(|u| u.screen_name)
            .filter(|s| !s.is_empty());
        let canonical_id = body.id_str.filter(|s| !s.is_empty());
        let canonical_url = match (&author_handle, &canonical_id) {
            (Some(handle), Some(id)) => Some(self.canonical_url(handle, id)),
            _ => None,
        };
        CanonicalInfo {
            author_handle,
            canonical_id,
            canonical_url,
        }
    }

    fn canonical_url(&self, handle: &str, id: &str) -> String {
        let base = self.canonical_base.as_str().trim_end_matches('/');
        format!("{base}/{handle}/status/{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> CanonicalResolver {
        CanonicalResolver::new(
            reqwest::Client::new(),
            Url::parse("https://meta.example/tweet-result").unwrap(),
            Url::parse("https://twitter.com").unwrap(),
        )
    }

    #[test]
    fn complete_metadata_yields_canonical_url() {
        let body: MetadataBody =
            serde_json::from_str(r#"{"id_str":"20","user":{"screen_name":"jack"}}"#).unwrap();
        let info = resolver().canonical_info(body);
        assert_eq!(info.author_handle.as_deref(), Some("jack"));
        assert_eq!(info.canonical_id.as_deref(), Some("20"));
        assert_eq!(
            info.canonical_url.as_deref(),
            Some("https://twitter.com/jack/status/20")
        );
    }

    #[test]
    fn incomplete_metadata_has_no_url() {
        let body: MetadataBody = serde_json::from_str(r#"{"id_str":"20"}"#).unwrap();
        let info = resolver().canonical_info(body);
        assert_eq!(info.canonical_id.as_deref(), Some("20"));
        assert!(info.canonical_url.is_none());

        let info = resolver().canonical_info(MetadataBody::default());
        assert_eq!(info, CanonicalInfo::default());
    }
}
