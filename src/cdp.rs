//! Chrome DevTools Protocol backend (uses the `headless_chrome` crate)

use std::ffi::OsString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::{RequestInterceptor, RequestPausedDecision, Tab};
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::{FulfillRequest, HeaderEntry};
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::{Emulation, Page, DOM};
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};

use crate::intercept::RewriteRules;
use crate::{ClipRect, Engine, EngineConfig, EngineFactory, Error, ImageFormat, Result, Viewport};

/// Launches a fresh headless Chrome per render
#[derive(Debug, Default, Clone)]
pub struct CdpFactory;

impl EngineFactory for CdpFactory {
    fn launch(&self, config: EngineConfig) -> Result<Box<dyn Engine>> {
        Ok(Box::new(CdpEngine::launch(config)?))
    }
}

/// One Chrome process driving a single tab.
pub struct CdpEngine {
    browser: Browser,
    tab: Option<Arc<Tab>>,
    /// Set by the `networkIdle` lifecycle event, cleared on `init` and on navigation
    network_idle: Arc<AtomicBool>,
    config: EngineConfig,
}

const IDLE_POLL: Duration = Duration::from_millis(50);

impl CdpEngine {
    pub fn launch(config: EngineConfig) -> Result<Self> {
        let args: Vec<OsString> = vec![
            "--hide-scrollbars".into(),
            "--disable-gpu".into(),
            "--font-render-hinting=none".into(),
        ];
        let arg_refs = args.iter().map(|a| a.as_os_str()).collect::<Vec<_>>();

        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(config.sandbox)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .path(config.executable.clone())
            .idle_browser_timeout(config.timeout)
            .process_envs(Some(config.env.clone()))
            .args(arg_refs)
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        Ok(Self {
            browser,
            tab: None,
            network_idle: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    fn tab(&self) -> Result<&Arc<Tab>> {
        self.tab
            .as_ref()
            .ok_or_else(|| Error::RenderError("no page is open".into()))
    }
}

impl Engine for CdpEngine {
    fn open_page(&mut self) -> Result<()> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(self.config.timeout);
        tab.call_method(Page::SetLifecycleEventsEnabled { enabled: true })
            .map_err(|e| Error::InitializationError(format!("Failed to enable lifecycle events: {}", e)))?;

        let idle = self.network_idle.clone();
        tab.add_event_listener(Arc::new(move |event: &Event| {
            if let Event::PageLifecycleEvent(lifecycle) = event {
                match lifecycle.params.name.as_str() {
                    "init" => idle.store(false, Ordering::SeqCst),
                    "networkIdle" => idle.store(true, Ordering::SeqCst),
                    _ => {}
                }
            }
        }))
        .map_err(|e| Error::InitializationError(format!("Failed to watch lifecycle events: {}", e)))?;

        self.tab = Some(tab);
        let viewport = self.config.viewport;
        let scale = self.config.device_scale_factor;
        self.set_viewport(viewport, scale)
    }

    fn add_init_script(&mut self, source: &str) -> Result<()> {
        self.tab()?
            .call_method(Page::AddScriptToEvaluateOnNewDocument {
                source: source.to_string(),
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            })
            .map_err(|e| Error::ScriptError(format!("Failed to add init script: {}", e)))?;
        Ok(())
    }

    fn intercept(&mut self, rules: RewriteRules) -> Result<()> {
        if rules.is_empty() {
            return Ok(());
        }
        let tab = self.tab()?;
        tab.enable_fetch(None, Some(false))
            .map_err(|e| Error::InitializationError(format!("Failed to enable fetch domain: {}", e)))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| Error::NetworkError(format!("Failed to build interception client: {}", e)))?;

        let interceptor: Arc<dyn RequestInterceptor + Send + Sync> = Arc::new(
            move |_transport, _session_id, event: RequestPausedEvent| {
                let url = event.params.request.url.clone();
                let Some(rule) = rules.find(&url) else {
                    return RequestPausedDecision::Continue(None);
                };
                match fetch_and_rewrite(&client, &event, rule) {
                    Ok(fulfill) => {
                        debug!("{} rewrote {}", rule.name(), url);
                        RequestPausedDecision::Fulfill(fulfill)
                    }
                    Err(e) => {
                        // Fall through to the unmodified response
                        warn!("{} could not rewrite {}: {}", rule.name(), url, e);
                        RequestPausedDecision::Continue(None)
                    }
                }
            },
        );

        tab.enable_request_interception(interceptor)
            .map_err(|e| Error::InitializationError(format!("Failed to enable request interception: {}", e)))?;
        Ok(())
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        let tab = self.tab()?;
        self.network_idle.store(false, Ordering::SeqCst);
        tab.navigate_to(url)
            .map_err(|e| Error::LoadError(format!("Navigation failed: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| Error::LoadError(format!("Wait for navigation failed: {}", e)))?;
        Ok(())
    }

    fn wait_for_network_idle(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        while !self.network_idle.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(IDLE_POLL);
        }
        Ok(true)
    }

    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<bool> {
        match self
            .tab()?
            .wait_for_element_with_custom_timeout(selector, timeout)
        {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!("{} did not appear within {:?}: {}", selector, timeout, e);
                Ok(false)
            }
        }
    }

    fn evaluate(&mut self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .tab()?
            .evaluate(script, false)
            .map_err(|e| Error::ScriptError(format!("Evaluation failed: {}", e)))?;
        Ok(result.value.unwrap_or(serde_json::Value::Null))
    }

    fn set_viewport(&mut self, viewport: Viewport, device_scale_factor: f64) -> Result<()> {
        self.tab()?
            .call_method(Emulation::SetDeviceMetricsOverride {
                width: viewport.width,
                height: viewport.height,
                device_scale_factor,
                mobile: false,
                scale: None,
                screen_width: None,
                screen_height: None,
                position_x: None,
                position_y: None,
                dont_set_visible_size: None,
                screen_orientation: None,
                viewport: None,
                display_feature: None,
                device_posture: None,
            })
            .map_err(|e| Error::RenderError(format!("Failed to set viewport: {}", e)))?;
        Ok(())
    }

    fn screenshot(
        &mut self,
        clip: ClipRect,
        format: ImageFormat,
        transparent: bool,
    ) -> Result<Vec<u8>> {
        let tab = self.tab()?;
        if transparent {
            tab.call_method(Emulation::SetDefaultBackgroundColorOverride {
                color: Some(DOM::RGBA {
                    r: 0,
                    g: 0,
                    b: 0,
                    a: Some(0.0),
                }),
            })
            .map_err(|e| Error::RenderError(format!("Failed to clear background: {}", e)))?;
        }

        let format = match format {
            ImageFormat::Png => Page::CaptureScreenshotFormatOption::Png,
            ImageFormat::Jpeg => Page::CaptureScreenshotFormatOption::Jpeg,
        };
        let clip = Page::Viewport {
            x: clip.x,
            y: clip.y,
            width: clip.width as f64,
            height: clip.height as f64,
            scale: 1.0,
        };
        tab.capture_screenshot(format, None, Some(clip), true)
            .map_err(|e| Error::RenderError(format!("Screenshot failed: {}", e)))
    }

    fn close(self: Box<Self>) -> Result<()> {
        // Dropping the browser terminates the child process
        let CdpEngine { browser, tab, .. } = *self;
        drop(tab);
        drop(browser);
        Ok(())
    }
}

// Fetch the upstream response outside the browser and fulfil the paused
// request with the rewritten body.
fn fetch_and_rewrite(
    client: &reqwest::blocking::Client,
    event: &RequestPausedEvent,
    rule: &dyn crate::intercept::RewriteRule,
) -> Result<FulfillRequest> {
    let request = &event.params.request;
    let mut outgoing = client.get(&request.url);
    if let Some(serde_json::Value::Object(headers)) = &request.headers.0 {
        for (name, value) in headers {
            if let Some(value) = value.as_str() {
                outgoing = outgoing.header(name.as_str(), value);
            }
        }
    }
    let response = outgoing.send()?;
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter(|(name, _)| {
            // The body is re-encoded and re-sized below
            !matches!(
                name.as_str(),
                "content-length" | "content-encoding" | "transfer-encoding"
            )
        })
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| HeaderEntry {
                name: name.to_string(),
                value: v.to_string(),
            })
        })
        .collect::<Vec<_>>();
    let body = response.bytes()?;

    let body = if status == 200 {
        rule.rewrite(&body)?
    } else {
        body.to_vec()
    };

    Ok(FulfillRequest {
        request_id: event.params.request_id.clone(),
        response_code: status as u32,
        response_headers: Some(headers),
        binary_response_headers: None,
        body: Some(base64::engine::general_purpose::STANDARD.encode(&body)),
        response_phrase: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires a local Chrome"]
    fn test_cdp_engine_renders_a_data_url() {
        let config = EngineConfig::default();
        let mut engine = match CdpEngine::launch(config) {
            Ok(engine) => engine,
            Err(e) => {
                eprintln!("Skipping CDP test because Chrome failed to launch: {}", e);
                return;
            }
        };
        engine.open_page().unwrap();
        engine
            .navigate("data:text/html,<article style='width:200px;height:80px'>hi</article>")
            .unwrap();
        assert!(engine
            .wait_for_network_idle(Duration::from_secs(5))
            .unwrap());
        assert!(engine
            .wait_for_selector("article", Duration::from_secs(1))
            .unwrap());
        let bytes = engine
            .screenshot(
                ClipRect { x: 0.0, y: 0.0, width: 202, height: 82 },
                ImageFormat::Png,
                true,
            )
            .unwrap();
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
        Box::new(engine).close().unwrap();
    }
}
