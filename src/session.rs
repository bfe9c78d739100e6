//! One browser lifecycle producing one clipped screenshot.
//!
//! The session walks a fixed sequence of states. Any failure jumps straight
//! to [`SessionState::Closed`]; the browser is closed on every exit path,
//! and if the surrounding future is dropped mid-session the worker thread
//! closes it when the handle goes away.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use url::Url;

use crate::config::ServiceConfig;
use crate::fonts;
use crate::intercept::{self, RewriteRules};
use crate::request::RenderRequest;
use crate::{
    BoundingBox, Browser, ClipRect, EngineConfig, EngineFactory, Error, RenderedImage, Result,
};

/// Session progress, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Created,
    FontsProvisioned,
    BrowserLaunched,
    PageOpened,
    ContentPolicyConfigured,
    DocumentLoaded,
    ContentBoundsMeasured,
    ViewportMatched,
    Captured,
    Closed,
}

/// Drives one render for one request
pub struct RenderSession<'a> {
    config: &'a ServiceConfig,
    client: &'a reqwest::Client,
    engines: Arc<dyn EngineFactory>,
    request: &'a RenderRequest,
    state: SessionState,
}

impl<'a> RenderSession<'a> {
    pub fn new(
        config: &'a ServiceConfig,
        client: &'a reqwest::Client,
        engines: Arc<dyn EngineFactory>,
        request: &'a RenderRequest,
    ) -> Self {
        Self {
            config,
            client,
            engines,
            request,
            state: SessionState::Created,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion. Always ends in `Closed`.
    pub async fn run(mut self) -> Result<RenderedImage> {
        let id = self.request.content_id();
        let result = self.render().await;
        if let Err(e) = &result {
            error!(
                "render of {} failed in state {:?}: {}",
                id, self.state, e
            );
        }
        self.state = SessionState::Closed;
        result
    }

    async fn render(&mut self) -> Result<RenderedImage> {
        if self.config.provision_fonts {
            fonts::provision(self.client, &self.config.font_dir, &self.config.fonts).await?;
        }
        self.advance(SessionState::FontsProvisioned);

        let browser = Browser::launch(self.engines.clone(), self.engine_config()).await?;
        self.advance(SessionState::BrowserLaunched);

        // Close on every path out of the browser steps
        let captured = self.drive(&browser).await;
        let closed = browser.close().await;
        let image = captured?;
        if let Err(e) = closed {
            // The image is complete; a failed close only leaks a process
            error!("failed to close browser for {}: {}", self.request.content_id(), e);
        }
        Ok(image)
    }

    async fn drive(&mut self, browser: &Browser) -> Result<RenderedImage> {
        browser.open_page().await?;
        if let Some(shim) = &self.config.timer_shim {
            browser.add_init_script(&shim.script()).await?;
        }
        self.advance(SessionState::PageOpened);

        if self.request.skip_sensitive_warning {
            browser.intercept(self.rewrite_rules()).await?;
        }
        self.advance(SessionState::ContentPolicyConfigured);

        let url = self.embed_url();
        browser.navigate(url.as_str()).await?;
        if !browser
            .wait_for_network_idle(self.config.network_idle_wait)
            .await?
        {
            // The root element check below still decides the outcome
            warn!(
                "network for {} not idle after {:?}; measuring anyway",
                self.request.content_id(),
                self.config.network_idle_wait
            );
        }
        let selector = &self.config.root_selector;
        if !browser
            .wait_for_selector(selector, self.config.root_wait)
            .await?
        {
            return Err(Error::ContentUnavailable(selector.clone()));
        }
        self.advance(SessionState::DocumentLoaded);

        let value = browser.evaluate(&bounds_script(selector)).await?;
        if value.is_null() {
            return Err(Error::ContentUnavailable(selector.clone()));
        }
        let bounds: BoundingBox = serde_json::from_value(value)
            .map_err(|e| Error::RenderError(format!("unexpected bounds: {}", e)))?;
        let clip = ClipRect::padded(bounds);
        self.advance(SessionState::ContentBoundsMeasured);

        browser.set_viewport(clip.viewport(), self.request.scale).await?;
        self.advance(SessionState::ViewportMatched);

        let format = self.request.format();
        let bytes = browser
            .screenshot(clip, format, format.transparent_background())
            .await?;
        if bytes.is_empty() {
            return Err(Error::RenderError("empty screenshot".into()));
        }
        self.advance(SessionState::Captured);
        info!(
            "rendered {} at {}x{} (scale {})",
            self.request.content_id(),
            clip.width,
            clip.height,
            self.request.scale
        );

        Ok(RenderedImage {
            bytes,
            bounds: clip,
            format,
        })
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(next > self.state);
        debug!("render {}: {:?} -> {:?}", self.request.content_id(), self.state, next);
        self.state = next;
    }

    fn engine_config(&self) -> EngineConfig {
        let mut env = HashMap::new();
        env.insert("TZ".to_string(), self.request.timezone.zone.to_string());
        if self.config.provision_fonts {
            // Fontconfig picks up `$HOME/.fonts`
            if let Some(home) = self.config.font_dir.parent() {
                env.insert("HOME".to_string(), home.display().to_string());
            }
        }
        EngineConfig {
            viewport: self.config.initial_viewport,
            device_scale_factor: self.request.scale,
            env,
            executable: self.config.chrome_path.clone(),
            sandbox: self.config.sandbox,
            timeout: self.config.browser_idle_timeout,
        }
    }

    fn rewrite_rules(&self) -> RewriteRules {
        RewriteRules::new().with(intercept::sensitivity_override(
            &self.config.sensitivity_rule_prefix,
        ))
    }

    /// Embed document URL for this request.
    pub fn embed_url(&self) -> Url {
        embed_url(self.config, self.request)
    }
}

pub(crate) fn embed_url(config: &ServiceConfig, request: &RenderRequest) -> Url {
    let mut url = config.embed_endpoint.clone();
    url.query_pairs_mut()
        .append_pair("dnt", "false")
        .append_pair("embedId", "twitter-widget-0")
        .append_pair("frame", "false")
        .append_pair("hideCard", &request.hide_card.to_string())
        .append_pair("hideThread", &request.hide_thread.to_string())
        .append_pair("id", &request.content_id().to_string())
        .append_pair("lang", &request.language)
        .append_pair("origin", &config.embed_origin)
        .append_pair("theme", &request.theme)
        .append_pair("widgetsVersion", &config.widgets_version);
    url
}

fn bounds_script(selector: &str) -> String {
    let selector = serde_json::to_string(selector).unwrap_or_else(|_| "\"article\"".into());
    format!(
        r#"(function() {{
            const el = document.querySelector({selector});
            if (!el) return null;
            const r = el.getBoundingClientRect();
            return {{ x: r.x, y: r.y, width: r.width, height: r.height }};
        }})()"#
    )
}
