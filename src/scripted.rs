//! A deterministic engine that needs no browser.
//!
//! Every call is recorded, the measured content box and screenshot bytes
//! are scripted up front, and any step can be made to fail. The pipeline
//! tests use it to assert ordering, release on every exit path, and that
//! no browser is launched when it should not be.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::intercept::RewriteRules;
use crate::{
    BoundingBox, ClipRect, Engine, EngineConfig, EngineFactory, Error, ImageFormat, Result,
    Viewport,
};

/// A recorded engine call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Launch { device_scale_factor: f64, tz: Option<String> },
    OpenPage,
    AddInitScript(String),
    Intercept(usize),
    Navigate(String),
    WaitForNetworkIdle(Duration),
    WaitForSelector(String),
    Evaluate,
    SetViewport(Viewport, f64),
    Screenshot { clip: ClipRect, format: ImageFormat, transparent: bool },
    Close,
}

/// Shared view of everything the scripted engines did
#[derive(Debug, Default)]
pub struct ScriptedStats {
    calls: Mutex<Vec<Call>>,
}

impl ScriptedStats {
    fn record(&self, call: Call) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn launches(&self) -> usize {
        self.count(|c| matches!(c, Call::Launch { .. }))
    }

    pub fn closes(&self) -> usize {
        self.count(|c| matches!(c, Call::Close))
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls
            .lock()
            .map(|c| c.iter().filter(|call| pred(call)).count())
            .unwrap_or(0)
    }
}

/// Factory for [`ScriptedEngine`]s
#[derive(Clone)]
pub struct ScriptedFactory {
    bounds: Option<BoundingBox>,
    image: Vec<u8>,
    fail_at: Option<&'static str>,
    network_idle: bool,
    stats: Arc<ScriptedStats>,
}

impl Default for ScriptedFactory {
    fn default() -> Self {
        Self {
            bounds: Some(BoundingBox {
                x: 10.0,
                y: 10.0,
                width: 100.0,
                height: 50.0,
            }),
            image: b"scripted-image".to_vec(),
            fail_at: None,
            network_idle: true,
            stats: Arc::new(ScriptedStats::default()),
        }
    }
}

impl ScriptedFactory {
    /// Content box reported by the page; `None` means the root never appears
    pub fn with_bounds(mut self, bounds: Option<BoundingBox>) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_image(mut self, image: impl Into<Vec<u8>>) -> Self {
        self.image = image.into();
        self
    }

    /// Network never settles; idle waits run out their bound
    pub fn never_idle(mut self) -> Self {
        self.network_idle = false;
        self
    }

    /// Fail the named step (`launch`, `navigate`, `evaluate`, `screenshot`, ...)
    pub fn fail_at(mut self, step: &'static str) -> Self {
        self.fail_at = Some(step);
        self
    }

    pub fn stats(&self) -> Arc<ScriptedStats> {
        self.stats.clone()
    }
}

impl EngineFactory for ScriptedFactory {
    fn launch(&self, config: EngineConfig) -> Result<Box<dyn Engine>> {
        self.stats.record(Call::Launch {
            device_scale_factor: config.device_scale_factor,
            tz: config.env.get("TZ").cloned(),
        });
        if self.fail_at == Some("launch") {
            return Err(Error::InitializationError("scripted launch failure".into()));
        }
        Ok(Box::new(ScriptedEngine {
            bounds: self.bounds,
            image: self.image.clone(),
            fail_at: self.fail_at,
            network_idle: self.network_idle,
            stats: self.stats.clone(),
        }))
    }
}

/// Engine returning scripted measurements and bytes
pub struct ScriptedEngine {
    bounds: Option<BoundingBox>,
    image: Vec<u8>,
    fail_at: Option<&'static str>,
    network_idle: bool,
    stats: Arc<ScriptedStats>,
}

impl ScriptedEngine {
    fn step(&self, name: &'static str, call: Call) -> Result<()> {
        self.stats.record(call);
        if self.fail_at == Some(name) {
            return Err(Error::RenderError(format!("scripted {} failure", name)));
        }
        Ok(())
    }
}

impl Engine for ScriptedEngine {
    fn open_page(&mut self) -> Result<()> {
        self.step("open_page", Call::OpenPage)
    }

    fn add_init_script(&mut self, source: &str) -> Result<()> {
        self.step("add_init_script", Call::AddInitScript(source.to_string()))
    }

    fn intercept(&mut self, rules: RewriteRules) -> Result<()> {
        self.step("intercept", Call::Intercept(rules.len()))
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        self.step("navigate", Call::Navigate(url.to_string()))
    }

    fn wait_for_network_idle(&mut self, timeout: Duration) -> Result<bool> {
        self.step("wait_for_network_idle", Call::WaitForNetworkIdle(timeout))?;
        Ok(self.network_idle)
    }

    fn wait_for_selector(&mut self, selector: &str, _timeout: Duration) -> Result<bool> {
        self.step("wait_for_selector", Call::WaitForSelector(selector.to_string()))?;
        Ok(self.bounds.is_some())
    }

    fn evaluate(&mut self, _script: &str) -> Result<serde_json::Value> {
        self.step("evaluate", Call::Evaluate)?;
        Ok(match self.bounds {
            Some(b) => serde_json::json!({
                "x": b.x,
                "y": b.y,
                "width": b.width,
                "height": b.height,
            }),
            None => serde_json::Value::Null,
        })
    }

    fn set_viewport(&mut self, viewport: Viewport, device_scale_factor: f64) -> Result<()> {
        self.step("set_viewport", Call::SetViewport(viewport, device_scale_factor))
    }

    fn screenshot(
        &mut self,
        clip: ClipRect,
        format: ImageFormat,
        transparent: bool,
    ) -> Result<Vec<u8>> {
        self.step(
            "screenshot",
            Call::Screenshot {
                clip,
                format,
                transparent,
            },
        )?;
        Ok(self.image.clone())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.stats.record(Call::Close);
        Ok(())
    }
}
