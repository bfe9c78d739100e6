use crate::intercept::RewriteRules;
use crate::{ClipRect, EngineConfig, EngineFactory, Error, ImageFormat, Result, Viewport};
use log::warn;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;

enum Command {
    OpenPage(oneshot::Sender<Result<()>>),
    AddInitScript(String, oneshot::Sender<Result<()>>),
    Intercept(RewriteRules, oneshot::Sender<Result<()>>),
    Navigate(String, oneshot::Sender<Result<()>>),
    WaitForNetworkIdle(Duration, oneshot::Sender<Result<bool>>),
    WaitForSelector(String, Duration, oneshot::Sender<Result<bool>>),
    Evaluate(String, oneshot::Sender<Result<serde_json::Value>>),
    SetViewport(Viewport, f64, oneshot::Sender<Result<()>>),
    Screenshot(ClipRect, ImageFormat, bool, oneshot::Sender<Result<Vec<u8>>>),
    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly browser handle backed by a dedicated worker thread.
///
/// The worker thread owns a synchronous [`Engine`] and executes commands
/// sent from async tasks, so callers get an async interface without the
/// engine having to be driven from the runtime's threads.
///
/// Dropping the handle without calling [`Browser::close`] still closes the
/// engine: the worker sees the channel disconnect and shuts it down.
pub struct Browser {
    cmd_tx: Sender<Command>,
}

impl Browser {
    /// Launch a browser through `factory` on a fresh worker thread.
    pub async fn launch(factory: Arc<dyn EngineFactory>, config: EngineConfig) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx): (oneshot::Sender<Result<()>>, oneshot::Receiver<Result<()>>) =
            oneshot::channel();

        thread::Builder::new()
            .name("postshot-browser".to_string())
            .spawn(move || {
                // Initialize engine on the worker thread
                let mut engine = match factory.launch(config) {
                    Ok(e) => Some(e),
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };

                // If the caller went away during launch, close right away
                if init_tx.send(Ok(())).is_err() {
                    if let Some(engine) = engine.take() {
                        let _ = engine.close();
                    }
                    return;
                }

                // Command loop
                while let Ok(cmd) = cmd_rx.recv() {
                    let Some(e) = engine.as_mut() else { break };
                    match cmd {
                        Command::OpenPage(resp) => {
                            let _ = resp.send(e.open_page());
                        }
                        Command::AddInitScript(source, resp) => {
                            let _ = resp.send(e.add_init_script(&source));
                        }
                        Command::Intercept(rules, resp) => {
                            let _ = resp.send(e.intercept(rules));
                        }
                        Command::Navigate(url, resp) => {
                            let _ = resp.send(e.navigate(&url));
                        }
                        Command::WaitForNetworkIdle(timeout, resp) => {
                            let _ = resp.send(e.wait_for_network_idle(timeout));
                        }
                        Command::WaitForSelector(selector, timeout, resp) => {
                            let _ = resp.send(e.wait_for_selector(&selector, timeout));
                        }
                        Command::Evaluate(script, resp) => {
                            let _ = resp.send(e.evaluate(&script));
                        }
                        Command::SetViewport(viewport, scale, resp) => {
                            let _ = resp.send(e.set_viewport(viewport, scale));
                        }
                        Command::Screenshot(clip, format, transparent, resp) => {
                            let _ = resp.send(e.screenshot(clip, format, transparent));
                        }
                        Command::Close(resp) => {
                            let res = match engine.take() {
                                Some(engine) => engine.close(),
                                None => Ok(()),
                            };
                            let _ = resp.send(res);
                            break;
                        }
                    }
                }

                // Handle dropped without an explicit close
                if let Some(engine) = engine.take() {
                    if let Err(err) = engine.close() {
                        warn!("Failed to close abandoned browser: {}", err);
                    }
                }
            })
            .map_err(|e| Error::InitializationError(format!("Failed to spawn browser worker: {}", e)))?;

        // Wait for the worker to report initialization success or failure
        let init_res = init_rx
            .await
            .map_err(|e| Error::Other(format!("Worker init canceled: {}", e)))?;
        init_res?;

        Ok(Self { cmd_tx })
    }

    async fn call<T>(
        &self,
        what: &str,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .map_err(|_| Error::Other(format!("{} failed: browser worker is gone", what)))?;
        rx.await
            .map_err(|e| Error::Other(format!("{} canceled: {}", what, e)))?
    }

    pub async fn open_page(&self) -> Result<()> {
        self.call("OpenPage", Command::OpenPage).await
    }

    /// Register a script that runs before any document script
    pub async fn add_init_script(&self, source: &str) -> Result<()> {
        let source = source.to_string();
        self.call("AddInitScript", |tx| Command::AddInitScript(source, tx))
            .await
    }

    pub async fn intercept(&self, rules: RewriteRules) -> Result<()> {
        self.call("Intercept", |tx| Command::Intercept(rules, tx)).await
    }

    /// Navigate to a URL
    pub async fn navigate(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.call("Navigate", |tx| Command::Navigate(url, tx)).await
    }

    /// Wait for the network to go idle; `Ok(false)` when `timeout` elapsed first
    pub async fn wait_for_network_idle(&self, timeout: Duration) -> Result<bool> {
        self.call("WaitForNetworkIdle", |tx| {
            Command::WaitForNetworkIdle(timeout, tx)
        })
        .await
    }

    /// Wait for `selector`; `Ok(false)` when it did not appear within `timeout`
    pub async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool> {
        let selector = selector.to_string();
        self.call("WaitForSelector", |tx| {
            Command::WaitForSelector(selector, timeout, tx)
        })
        .await
    }

    /// Evaluate an expression in the page and return its JSON value
    pub async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let script = script.to_string();
        self.call("Evaluate", |tx| Command::Evaluate(script, tx)).await
    }

    pub async fn set_viewport(&self, viewport: Viewport, device_scale_factor: f64) -> Result<()> {
        self.call("SetViewport", |tx| {
            Command::SetViewport(viewport, device_scale_factor, tx)
        })
        .await
    }

    /// Take a clipped screenshot
    pub async fn screenshot(
        &self,
        clip: ClipRect,
        format: ImageFormat,
        transparent: bool,
    ) -> Result<Vec<u8>> {
        self.call("Screenshot", |tx| {
            Command::Screenshot(clip, format, transparent, tx)
        })
        .await
    }

    /// Shutdown the background worker and close the browser.
    pub async fn close(self) -> Result<()> {
        self.call("Close", Command::Close).await
    }
}
