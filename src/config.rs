//! Service configuration.
//!
//! [`ServiceConfig`] is the only place environment-derived settings live.
//! The binary builds one from [`Cli`] (flags with environment fallbacks)
//! and hands it to [`crate::pipeline::Pipeline::new`]; tests construct it
//! directly.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{builder::BoolishValueParser, Parser};
use url::Url;

use crate::cache_probe::DEFAULT_DEADLINE;
use crate::fonts::{self, FontAsset};
use crate::intercept::EMBED_METADATA_PREFIX;
use crate::shim::{TimerShim, DEFAULT_COLLAPSE_CEILING_MS};
use crate::{Error, Result, Viewport};

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_METADATA_ENDPOINT: &str = "https://cdn.syndication.twimg.com/tweet-result";
pub const DEFAULT_CANONICAL_BASE: &str = "https://twitter.com";
pub const DEFAULT_EMBED_ENDPOINT: &str = "https://platform.twitter.com/embed/Tweet.html";
pub const DEFAULT_WIDGETS_VERSION: &str = "a3525f077c700:1667415560940";
pub const DEFAULT_EMBED_ORIGIN: &str = "file:///postshot.html";
pub const DEFAULT_ROOT_SELECTOR: &str = "article";
pub const DEFAULT_ROOT_WAIT: Duration = Duration::from_millis(1000);
pub const DEFAULT_NETWORK_IDLE_WAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_FONT_DIR: &str = "/tmp/.fonts";

/// Everything the pipeline needs to know about its environment
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to
    pub listen: SocketAddr,
    /// Content-metadata lookup (`?id=..&lang=..` is appended)
    pub metadata_endpoint: Url,
    /// Base for canonical post URLs in the `link` header
    pub canonical_base: Url,
    /// Embed widget document loaded in the browser
    pub embed_endpoint: Url,
    /// Session-identity constants sent to the embed document
    pub widgets_version: String,
    pub embed_origin: String,
    /// External image cache; `None` disables probing
    pub cache_endpoint: Option<Url>,
    /// User-agent token of the cache warmer; its requests skip the probe
    pub cache_bypass_token: Option<String>,
    pub cache_deadline: Duration,
    /// Upper bound on waiting for the embed document's network to settle
    pub network_idle_wait: Duration,
    /// Element whose bounds define the captured image
    pub root_selector: String,
    /// How long to wait for the root element before giving up
    pub root_wait: Duration,
    pub initial_viewport: Viewport,
    /// Download fonts before launching (runtimes without system fonts)
    pub provision_fonts: bool,
    pub font_dir: PathBuf,
    pub fonts: Vec<FontAsset>,
    /// Widget timer normalisation; `None` disables it
    pub timer_shim: Option<TimerShim>,
    /// URL prefix (without scheme) of the widget's own metadata request
    pub sensitivity_rule_prefix: String,
    pub chrome_path: Option<PathBuf>,
    pub sandbox: bool,
    pub browser_idle_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            metadata_endpoint: parse_default(DEFAULT_METADATA_ENDPOINT),
            canonical_base: parse_default(DEFAULT_CANONICAL_BASE),
            embed_endpoint: parse_default(DEFAULT_EMBED_ENDPOINT),
            widgets_version: DEFAULT_WIDGETS_VERSION.to_string(),
            embed_origin: DEFAULT_EMBED_ORIGIN.to_string(),
            cache_endpoint: None,
            cache_bypass_token: None,
            cache_deadline: DEFAULT_DEADLINE,
            network_idle_wait: DEFAULT_NETWORK_IDLE_WAIT,
            root_selector: DEFAULT_ROOT_SELECTOR.to_string(),
            root_wait: DEFAULT_ROOT_WAIT,
            initial_viewport: Viewport::default(),
            provision_fonts: false,
            font_dir: PathBuf::from(DEFAULT_FONT_DIR),
            fonts: fonts::default_fonts(),
            timer_shim: Some(TimerShim::default()),
            sensitivity_rule_prefix: EMBED_METADATA_PREFIX.to_string(),
            chrome_path: None,
            sandbox: true,
            browser_idle_timeout: Duration::from_secs(30),
        }
    }
}

// Only used for compile-time constants above.
fn parse_default(raw: &str) -> Url {
    Url::parse(raw).unwrap_or_else(|e| panic!("built-in URL {raw} is invalid: {e}"))
}

/// Command-line arguments for the postshot binary.
#[derive(Debug, Parser)]
#[command(name = "postshot", version, about = "Render posts as hot-linkable images")]
pub struct Cli {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Host to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: std::net::IpAddr,

    /// Base URL of the external image cache.
    #[arg(long, env = "IMAGE_CACHE_URL", value_name = "URL")]
    pub image_cache_url: Option<Url>,

    /// User-agent token identifying the cache warmer.
    #[arg(long, env = "IMAGE_CACHE_UA", value_name = "TOKEN")]
    pub image_cache_ua: Option<String>,

    /// Cache probe deadline in milliseconds.
    #[arg(long, env = "IMAGE_CACHE_DEADLINE_MS", default_value_t = DEFAULT_DEADLINE.as_millis() as u64)]
    pub image_cache_deadline_ms: u64,

    /// Content-metadata endpoint.
    #[arg(long, env = "METADATA_ENDPOINT", default_value = DEFAULT_METADATA_ENDPOINT)]
    pub metadata_endpoint: Url,

    /// Embed widget document.
    #[arg(long, env = "EMBED_ENDPOINT", default_value = DEFAULT_EMBED_ENDPOINT)]
    pub embed_endpoint: Url,

    /// Download fonts before rendering. Defaults to on in serverless runtimes.
    #[arg(long, env = "PROVISION_FONTS", value_parser = BoolishValueParser::new())]
    pub provision_fonts: Option<bool>,

    /// Directory fonts are provisioned into.
    #[arg(long, env = "FONT_DIR", default_value = DEFAULT_FONT_DIR)]
    pub font_dir: PathBuf,

    /// Disable the widget timer shim.
    #[arg(
        long,
        env = "NO_TIMER_SHIM",
        action = clap::ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        default_value_t = false
    )]
    pub no_timer_shim: bool,

    /// Chrome/Chromium executable.
    #[arg(long, env = "CHROME_PATH", value_name = "PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: log::LevelFilter,
}

impl Cli {
    /// Resolve arguments into a [`ServiceConfig`], probing the runtime once.
    pub fn into_config(self) -> Result<ServiceConfig> {
        self.into_config_with(serverless_runtime())
    }

    fn into_config_with(self, serverless: bool) -> Result<ServiceConfig> {
        if self.image_cache_deadline_ms == 0 {
            return Err(Error::ConfigError(
                "image cache deadline must be positive".into(),
            ));
        }
        Ok(ServiceConfig {
            listen: SocketAddr::new(self.host, self.port),
            metadata_endpoint: self.metadata_endpoint,
            embed_endpoint: self.embed_endpoint,
            cache_endpoint: self.image_cache_url,
            cache_bypass_token: self.image_cache_ua.filter(|t| !t.is_empty()),
            cache_deadline: Duration::from_millis(self.image_cache_deadline_ms),
            provision_fonts: self.provision_fonts.unwrap_or(serverless),
            font_dir: self.font_dir,
            timer_shim: (!self.no_timer_shim)
                .then(|| TimerShim::new(DEFAULT_COLLAPSE_CEILING_MS)),
            chrome_path: self.chrome_path,
            // Serverless sandboxes forbid the browser's own sandbox
            sandbox: !serverless,
            ..ServiceConfig::default()
        })
    }
}

/// Whether we run inside a serverless function without system fonts.
fn serverless_runtime() -> bool {
    ["AWS_LAMBDA_FUNCTION_NAME", "VERCEL", "NETLIFY"]
        .iter()
        .any(|key| std::env::var_os(key).is_some())
}
