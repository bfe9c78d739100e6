//! Bounded probe of an external, pre-warmed image cache.
//!
//! The probe never fails a request. Anything short of a 200 response that
//! starts streaming before the deadline is a miss, and the render path runs.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use log::{debug, warn};
use url::Url;

use crate::request::RenderRequest;
use crate::{Error, Result};

/// Deadline for the first body chunk.
pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(500);

/// Body of a cache hit: the first chunk followed by the rest of the upstream body.
pub type ImageStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send>>;

/// Result of a cache probe
pub enum CacheOutcome {
    Hit(ImageStream),
    Miss,
    /// The probe could not be attempted at all (bad endpoint)
    Error(Error),
}

impl std::fmt::Debug for CacheOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheOutcome::Hit(_) => f.write_str("Hit(..)"),
            CacheOutcome::Miss => f.write_str("Miss"),
            CacheOutcome::Error(e) => write!(f, "Error({e})"),
        }
    }
}

/// Build the cache key for a request: `{id}.{ext}` plus only the parameters
/// the caller supplied, rendered from their resolved values.
pub fn cache_key(request: &RenderRequest) -> String {
    let mut key = format!("{}.{}", request.content_id(), request.target.extension);
    if !request.explicit.is_empty() {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for param in &request.explicit {
            query.append_pair(param.key(), &request.param_value(*param));
        }
        key.push('?');
        key.push_str(&query.finish());
    }
    key
}

/// Probes one cache endpoint. Cheap to clone; shares the HTTP client.
#[derive(Clone)]
pub struct CacheProbe {
    client: reqwest::Client,
    endpoint: Url,
    bypass_token: Option<String>,
    deadline: Duration,
}

impl CacheProbe {
    pub fn new(
        client: reqwest::Client,
        endpoint: Url,
        bypass_token: Option<String>,
        deadline: Duration,
    ) -> Self {
        Self {
            client,
            endpoint,
            bypass_token,
            deadline,
        }
    }

    /// Requests from the cache warmer itself must render, or the warmer
    /// would be served its own (possibly missing) entries forever.
    pub fn should_probe(&self, user_agent: Option<&str>) -> bool {
        match (&self.bypass_token, user_agent) {
            (Some(token), Some(ua)) => !ua.contains(token.as_str()),
            _ => true,
        }
    }

    /// Full URL of the cache entry for `request`.
    pub fn entry_url(&self, request: &RenderRequest) -> Result<Url> {
        self.endpoint
            .join(&cache_key(request))
            .map_err(|e| Error::ConfigError(format!("invalid cache url: {e}")))
    }

    /// Race the first body chunk against the deadline.
    pub async fn probe(&self, request: &RenderRequest) -> CacheOutcome {
        let url = match self.entry_url(request) {
            Ok(url) => url,
            Err(e) => return CacheOutcome::Error(e),
        };

        match tokio::time::timeout(self.deadline, self.first_chunk(url.clone())).await {
            Err(_) => {
                debug!("cache probe for {} timed out after {:?}", url, self.deadline);
                CacheOutcome::Miss
            }
            Ok(Err(e)) => {
                warn!("cache probe for {} failed: {}", url, e);
                CacheOutcome::Miss
            }
            Ok(Ok(None)) => CacheOutcome::Miss,
            Ok(Ok(Some((status, first, rest)))) => {
                if status == reqwest::StatusCode::OK {
                    debug!("cache hit for {}", url);
                    let body = stream::once(async move { Ok::<_, reqwest::Error>(first) }).chain(rest);
                    CacheOutcome::Hit(Box::pin(body))
                } else {
                    warn!("cache status_code: {} for {}", status.as_u16(), url);
                    CacheOutcome::Miss
                }
            }
        }
    }

    // Resolves once headers and the first non-empty chunk have arrived.
    // An empty body yields `None`.
    async fn first_chunk(
        &self,
        url: Url,
    ) -> std::result::Result<Option<(reqwest::StatusCode, Bytes, ImageStream)>, reqwest::Error> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let mut body = Box::pin(response.bytes_stream());
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if !chunk.is_empty() {
                let rest: ImageStream = body;
                return Ok(Some((status, chunk, rest)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{parse_path, QueryParams};

    fn request(path: &str, query: &str) -> RenderRequest {
        RenderRequest::validate(
            parse_path(path).unwrap(),
            &QueryParams::parse(Some(query)),
        )
        .unwrap()
    }

    fn probe(token: Option<&str>) -> CacheProbe {
        CacheProbe::new(
            reqwest::Client::new(),
            Url::parse("https://cache.example/images/").unwrap(),
            token.map(str::to_string),
            DEFAULT_DEADLINE,
        )
    }

    #[test]
    fn key_without_explicit_params_is_bare() {
        assert_eq!(cache_key(&request("42.png", "")), "42.png");
        assert_eq!(cache_key(&request("42.jpg", "")), "42.jpg");
    }

    #[test]
    fn key_contains_only_explicit_params() {
        assert_eq!(cache_key(&request("42.png", "tz=5")), "42.png?tz=5");
    }

    #[test]
    fn key_uses_fixed_order_and_resolved_values() {
        let key = cache_key(&request(
            "7.jpg",
            "t2iSkipSensitiveWarning=1&tz=-5&lang=en&scale=1.50&hideCard=1",
        ));
        assert_eq!(
            key,
            "7.jpg?hideCard=true&scale=1.5&lang=en&tz=-5&t2iSkipSensitiveWarning=true"
        );
    }

    #[test]
    fn identical_requests_share_a_key() {
        let a = cache_key(&request("9.png", "theme=dark&scale=3"));
        let b = cache_key(&request("9.png", "theme=dark&scale=3"));
        assert_eq!(a, b);
    }

    #[test]
    fn entry_url_joins_key_onto_endpoint() {
        let url = probe(None).entry_url(&request("5.png", "tz=5")).unwrap();
        assert_eq!(url.as_str(), "https://cache.example/images/5.png?tz=5");
    }

    #[test]
    fn warmer_requests_bypass_the_probe() {
        let probe = probe(Some("postshot-warmer"));
        assert!(!probe.should_probe(Some("Mozilla/5.0 postshot-warmer/1.0")));
        assert!(probe.should_probe(Some("Mozilla/5.0")));
        assert!(probe.should_probe(None));
    }
}
