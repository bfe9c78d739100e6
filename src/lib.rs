//! postshot
//!
//! Renders a social-media post as a static PNG/JPEG image suitable for
//! hot-linking. A request flows through a fixed pipeline:
//!
//! - **Validate** query parameters into a [`request::RenderRequest`]
//! - **Resolve** canonical metadata for the post ([`canonical`])
//! - **Probe** an optional pre-warmed image cache with a short deadline ([`cache_probe`])
//! - **Render** in a headless browser session on a cache miss ([`session`])
//! - **Assemble** bytes and caching headers ([`response`])
//!
//! The browser is reached through the [`Engine`] trait. The `cdp` feature
//! provides a Chrome DevTools Protocol backend; [`scripted`] provides a
//! deterministic backend that needs no browser at all.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use postshot::{config::ServiceConfig, pipeline::Pipeline, scripted::ScriptedFactory};
//!
//! # fn main() -> postshot::Result<()> {
//! let config = ServiceConfig::default();
//! let pipeline = Pipeline::new(config, Arc::new(ScriptedFactory::default()))?;
//! let app = postshot::server::router(Arc::new(pipeline));
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

pub mod error;
pub use error::{Error, Result};

pub mod cache_probe;
pub mod canonical;
pub mod config;
pub mod fonts;
pub mod intercept;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;
pub mod session;
pub mod shim;
pub mod timezone;

// Deterministic engine used by tests and local development
pub mod scripted;

// Async facade over a synchronous engine running on its own thread
pub mod async_api;

#[cfg(feature = "cdp")]
pub mod cdp;

pub use async_api::Browser;
use intercept::RewriteRules;

/// Output image format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    /// Parse a path extension (`png` or `jpg`).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "png" => Some(ImageFormat::Png),
            "jpg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    /// PNG captures keep transparency; JPEG has no alpha channel.
    pub fn transparent_background(self) -> bool {
        matches!(self, ImageFormat::Png)
    }
}

/// Viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 1280,
        }
    }
}

/// Bounding rectangle as reported by `getBoundingClientRect()`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Screenshot clip rectangle, whole pixels in width and height
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRect {
    pub x: f64,
    pub y: f64,
    pub width: u32,
    pub height: u32,
}

impl ClipRect {
    /// Grow a measured box by one pixel on every side and round the size up.
    pub fn padded(bounds: BoundingBox) -> Self {
        Self {
            x: bounds.x - 1.0,
            y: bounds.y - 1.0,
            width: (bounds.width + 2.0).ceil().max(1.0) as u32,
            height: (bounds.height + 2.0).ceil().max(1.0) as u32,
        }
    }

    pub fn viewport(&self) -> Viewport {
        Viewport {
            width: self.width,
            height: self.height,
        }
    }
}

/// A captured image. Only produced by a session that reached the capture step.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub bounds: ClipRect,
    pub format: ImageFormat,
}

/// Configuration handed to an [`EngineFactory`] when a browser is launched
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Initial viewport before it is matched to the content
    pub viewport: Viewport,
    /// Device scale factor for the initial viewport
    pub device_scale_factor: f64,
    /// Extra environment for the browser process (`TZ`, `HOME`)
    pub env: HashMap<String, String>,
    /// Explicit browser executable, otherwise auto-detected
    pub executable: Option<PathBuf>,
    /// Whether to keep the browser's own sandbox enabled
    pub sandbox: bool,
    /// Idle timeout for the automation connection
    pub timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            device_scale_factor: 1.0,
            env: HashMap::new(),
            executable: None,
            sandbox: true,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Core trait for browser automation backends.
///
/// One engine value is one browser process with a single page. Calls are
/// strictly sequential; [`async_api::Browser`] runs an engine on its own
/// thread so async callers can drive it.
pub trait Engine: Send {
    /// Open (or adopt) the page all later calls act on
    fn open_page(&mut self) -> Result<()>;

    /// Register a script that runs before any document script on every navigation
    fn add_init_script(&mut self, source: &str) -> Result<()>;

    /// Install response rewrite rules. Requests that match no rule continue unmodified.
    fn intercept(&mut self, rules: RewriteRules) -> Result<()>;

    /// Navigate and wait for the load to settle
    fn navigate(&mut self, url: &str) -> Result<()>;

    /// Wait up to `timeout` for the page's network to go idle after the last
    /// navigation. `Ok(false)` means the bound elapsed first.
    fn wait_for_network_idle(&mut self, timeout: Duration) -> Result<bool>;

    /// Wait up to `timeout` for `selector` to match. `Ok(false)` means it never did.
    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<bool>;

    /// Evaluate an expression in the page and return its JSON value
    fn evaluate(&mut self, script: &str) -> Result<serde_json::Value>;

    /// Resize the viewport at the given device scale factor
    fn set_viewport(&mut self, viewport: Viewport, device_scale_factor: f64) -> Result<()>;

    /// Capture the clipped region
    fn screenshot(&mut self, clip: ClipRect, format: ImageFormat, transparent: bool)
        -> Result<Vec<u8>>;

    /// Close the browser and release the process
    fn close(self: Box<Self>) -> Result<()>;
}

/// Launches engines. Shared across requests; every launch is independent.
pub trait EngineFactory: Send + Sync {
    fn launch(&self, config: EngineConfig) -> Result<Box<dyn Engine>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_viewport() {
        let viewport = Viewport::default();
        assert_eq!(viewport.width, 1280);
        assert_eq!(viewport.height, 1280);
    }

    #[test]
    fn test_clip_padding() {
        let clip = ClipRect::padded(BoundingBox {
            x: 10.0,
            y: 10.0,
            width: 100.0,
            height: 50.0,
        });
        assert_eq!(
            clip,
            ClipRect {
                x: 9.0,
                y: 9.0,
                width: 102,
                height: 52
            }
        );
    }

    #[test]
    fn test_clip_rounds_up_fractional_sizes() {
        let clip = ClipRect::padded(BoundingBox {
            x: 0.5,
            y: 20.25,
            width: 549.2,
            height: 300.01,
        });
        assert_eq!(clip.x, -0.5);
        assert_eq!(clip.y, 19.25);
        assert_eq!(clip.width, 552);
        assert_eq!(clip.height, 303);
    }

    #[test]
    fn test_format_extensions() {
        assert_eq!(ImageFormat::from_extension("png"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_extension("jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_extension("jpeg"), None);
        assert_eq!(ImageFormat::Jpeg.mime(), "image/jpeg");
        assert!(ImageFormat::Png.transparent_background());
        assert!(!ImageFormat::Jpeg.transparent_background());
    }
}
