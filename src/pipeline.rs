//! The request pipeline: validate, resolve, probe, render, assemble.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::cache_probe::{CacheOutcome, CacheProbe};
use crate::canonical::CanonicalResolver;
use crate::config::ServiceConfig;
use crate::request::{PathMatch, QueryParams, RenderRequest};
use crate::response::{self, ImageBody, ImageResponse};
use crate::session::RenderSession;
use crate::{EngineFactory, Error, Result};

const USER_AGENT: &str = concat!("postshot/", env!("CARGO_PKG_VERSION"));

/// Shared per-process state. One instance serves all requests.
pub struct Pipeline {
    config: ServiceConfig,
    client: reqwest::Client,
    resolver: CanonicalResolver,
    cache: Option<CacheProbe>,
    engines: Arc<dyn EngineFactory>,
}

impl Pipeline {
    pub fn new(config: ServiceConfig, engines: Arc<dyn EngineFactory>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::ConfigError(format!("http client: {}", e)))?;

        let resolver = CanonicalResolver::new(
            client.clone(),
            config.metadata_endpoint.clone(),
            config.canonical_base.clone(),
        );

        // Probing needs both the cache location and the warmer's identity
        let cache = match (&config.cache_endpoint, &config.cache_bypass_token) {
            (Some(endpoint), Some(token)) => {
                info!(
                    "image cache probing enabled at {} (deadline {:?})",
                    endpoint, config.cache_deadline
                );
                Some(CacheProbe::new(
                    client.clone(),
                    endpoint.clone(),
                    Some(token.clone()),
                    config.cache_deadline,
                ))
            }
            (Some(_), None) => {
                info!("image cache configured without a warmer user agent; probing disabled");
                None
            }
            _ => None,
        };

        Ok(Self {
            config,
            client,
            resolver,
            cache,
            engines,
        })
    }

    /// Turn one image request into a response or a classified error.
    pub async fn handle(
        &self,
        path: PathMatch,
        query: &QueryParams,
        user_agent: Option<&str>,
    ) -> Result<ImageResponse> {
        let started = Instant::now();
        let request = RenderRequest::validate(path, query)?;
        let id = request.content_id();

        let canonical = self.resolver.resolve(id, &request.language).await?;
        debug!("resolved {} to {:?}", id, canonical.canonical_url);

        if let Some(cache) = &self.cache {
            if cache.should_probe(user_agent) {
                match cache.probe(&request).await {
                    CacheOutcome::Hit(stream) => {
                        info!("served {} from image cache in {:?}", id, started.elapsed());
                        return Ok(response::assemble(
                            ImageBody::Cached(stream),
                            request.format(),
                            request.scale,
                            &canonical,
                        ));
                    }
                    CacheOutcome::Miss => {}
                    CacheOutcome::Error(e) => error!("cache probe for {} skipped: {}", id, e),
                }
            } else {
                debug!("cache warmer request for {}; rendering", id);
            }
        }

        let image = RenderSession::new(&self.config, &self.client, self.engines.clone(), &request)
            .run()
            .await?;
        info!(
            "rendered {} ({} bytes) in {:?}",
            id,
            image.bytes.len(),
            started.elapsed()
        );

        Ok(response::assemble(
            ImageBody::Rendered(image.bytes),
            image.format,
            request.scale,
            &canonical,
        ))
    }
}
