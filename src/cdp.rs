//! Chrome DevTools Protocol render session
//!
//! One [`ChromeSession`] owns one Chrome process and one tab for the lifetime
//! of a single conversion. Dropping or closing it terminates the process.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, info, warn};
use tempfile::NamedTempFile;

use crate::launch::{self, LaunchPlan};
use crate::{
    CancelToken, Error, Launcher, PrintLayout, RasterCapture, RenderConfig, RenderEngine, Result,
    Stage,
};

/// Polled until the document is complete and no new resource has finished
/// loading for the quiet window.
const QUIESCENCE_PROBE: &str = r#"JSON.stringify({
    ready: document.readyState,
    resources: performance.getEntriesByType('resource').length
})"#;

const CONTENT_HEIGHT_JS: &str = r#"(function() {
    const body = document.body;
    const root = document.documentElement;
    return Math.max(
        body ? body.scrollHeight : 0,
        body ? body.offsetHeight : 0,
        root.scrollHeight,
        root.offsetHeight
    );
})()"#;

/// Starts waiting for images plus the settle delay; `{{SETTLE_MS}}` is
/// substituted before evaluation. Completion is observed with [`SETTLED_PROBE`].
const IMAGE_SETTLE_TEMPLATE: &str = r#"(function() {
    if (window.__html2pdfSettled === undefined) {
        window.__html2pdfSettled = false;
        Promise.all([
            ...Array.from(document.images).map((img) =>
                img.complete ? Promise.resolve() : new Promise((resolve) => { img.onload = img.onerror = resolve; })
            ),
            new Promise((resolve) => setTimeout(resolve, {{SETTLE_MS}}))
        ]).then(() => { window.__html2pdfSettled = true; });
    }
    return true;
})()"#;

const SETTLED_PROBE: &str = "window.__html2pdfSettled === true";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Launches [`ChromeSession`]s through the fallback-aware protocol
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeLauncher;

impl Launcher for ChromeLauncher {
    type Engine = ChromeSession;

    fn launch(&self, config: &RenderConfig) -> Result<ChromeSession> {
        ChromeSession::launch(config)
    }
}

/// One Chrome process with exactly one tab
pub struct ChromeSession {
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
    config: RenderConfig,
    // Keeps the navigated document alive until close.
    document: Option<NamedTempFile>,
}

impl ChromeSession {
    pub fn launch(config: &RenderConfig) -> Result<Self> {
        let plan = LaunchPlan::for_config(config);
        let browser = launch::launch_with_fallback(&plan, |binary| {
            start_browser(config, &plan.args, binary)
        })
        .into_result()?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::Launch { cause: format!("Failed to create tab: {}", e) })?;
        tab.set_default_timeout(config.protocol_timeout);

        Ok(Self {
            browser: Some(browser),
            tab: Some(tab),
            config: config.clone(),
            document: None,
        })
    }

    /// OS process id of the engine, while it is running.
    pub fn process_id(&self) -> Option<u32> {
        self.browser.as_ref().and_then(|b| b.get_process_id())
    }

    fn tab(&self) -> Result<&Arc<Tab>> {
        self.tab.as_ref().ok_or(Error::SessionClosed)
    }

    fn evaluate_value(&self, script: &str, await_promise: bool) -> Result<serde_json::Value> {
        let result = self.tab()?.evaluate(script, await_promise)?;
        result
            .value
            .ok_or_else(|| Error::Render("No value returned from evaluation".into()))
    }

    /// Run one protocol call of the navigation stage within `budget`.
    ///
    /// The tab's call timeout is narrowed to what is left of the budget, and
    /// any failure once the deadline has passed is reported as a navigation
    /// timeout.
    fn navigation_call<T, F>(&self, budget: &NavigationBudget, what: &str, call: F) -> Result<T>
    where
        F: FnOnce(&Tab) -> anyhow::Result<T>,
    {
        let tab: &Tab = self.tab()?;
        let remaining = budget.remaining().ok_or_else(|| budget.timeout_error())?;
        tab.set_default_timeout(remaining.min(self.config.protocol_timeout));
        let res = call(tab);
        tab.set_default_timeout(self.config.protocol_timeout);
        res.map_err(|e| budget.failure(what, e))
    }

    fn navigation_eval(&self, budget: &NavigationBudget, script: &str) -> Result<serde_json::Value> {
        let result = self.navigation_call(budget, "Evaluation", |tab| tab.evaluate(script, false))?;
        Ok(result.value.unwrap_or(serde_json::Value::Null))
    }

    fn wait_for_quiescence(&self, budget: &NavigationBudget, cancel: &CancelToken) -> Result<()> {
        let quiet = self.config.quiet_window;
        let mut last_count: Option<u64> = None;
        let mut stable_since = Instant::now();

        poll_until(budget, cancel, || {
            let probe = self.navigation_eval(budget, QUIESCENCE_PROBE)?;
            let probe: serde_json::Value = match probe.as_str() {
                Some(s) => serde_json::from_str(s).unwrap_or(serde_json::Value::Null),
                None => probe,
            };
            let complete = probe.get("ready").and_then(|v| v.as_str()) == Some("complete");
            let count = probe.get("resources").and_then(|v| v.as_u64()).unwrap_or(0);

            if last_count != Some(count) || !complete {
                last_count = Some(count);
                stable_since = Instant::now();
                Ok(false)
            } else if stable_since.elapsed() >= quiet {
                debug!("page quiescent with {} resources", count);
                Ok(true)
            } else {
                Ok(false)
            }
        })
    }

    fn wait_for_images(&self, budget: &NavigationBudget, cancel: &CancelToken) -> Result<()> {
        let settle = IMAGE_SETTLE_TEMPLATE
            .replace("{{SETTLE_MS}}", &self.config.settle_delay.as_millis().to_string());
        self.navigation_eval(budget, &settle)?;
        poll_until(budget, cancel, || {
            Ok(self.navigation_eval(budget, SETTLED_PROBE)?.as_bool() == Some(true))
        })
    }
}

/// Deadline of one `open` call
#[derive(Debug, Clone, Copy)]
struct NavigationBudget {
    deadline: Instant,
    timeout: Duration,
}

impl NavigationBudget {
    fn start(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    /// Time left, or `None` once the deadline has passed.
    fn remaining(&self) -> Option<Duration> {
        let left = self.deadline.saturating_duration_since(Instant::now());
        (!left.is_zero()).then_some(left)
    }

    fn timeout_error(&self) -> Error {
        Error::Timeout {
            stage: Stage::Navigation,
            ms: self.timeout.as_millis() as u64,
        }
    }

    fn failure(&self, what: &str, err: anyhow::Error) -> Error {
        if self.remaining().is_none() {
            self.timeout_error()
        } else {
            Error::Render(format!("{} failed: {}", what, err))
        }
    }
}

/// Poll `ready` until it reports true, the budget runs out or `cancel` fires.
fn poll_until<F>(budget: &NavigationBudget, cancel: &CancelToken, mut ready: F) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    loop {
        cancel.check()?;
        if budget.remaining().is_none() {
            return Err(budget.timeout_error());
        }
        if ready()? {
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL);
    }
}

impl RenderEngine for ChromeSession {
    fn open(&mut self, html: &str, timeout: Duration, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        let budget = NavigationBudget::start(timeout);

        let document = tempfile::Builder::new()
            .prefix("html2pdf-")
            .suffix(".html")
            .tempfile()?;
        std::fs::write(document.path(), html)?;
        let url = url::Url::from_file_path(document.path())
            .map_err(|_| Error::Render("Failed to convert document path to URL".into()))?;
        self.document = Some(document);

        self.navigation_call(&budget, "Navigation", |tab| tab.navigate_to(url.as_str()).map(|_| ()))?;
        self.navigation_call(&budget, "Wait for navigation", |tab| {
            tab.wait_until_navigated().map(|_| ())
        })?;
        cancel.check()?;

        self.wait_for_quiescence(&budget, cancel)?;
        self.wait_for_images(&budget, cancel)?;
        cancel.check()
    }

    fn measure_content_height(&self) -> Result<u32> {
        let value = self.evaluate_value(CONTENT_HEIGHT_JS, false)?;
        let height = value
            .as_f64()
            .ok_or_else(|| Error::Render(format!("Unexpected content height: {}", value)))?;
        Ok(height.max(1.0).ceil() as u32)
    }

    fn screenshot(&self) -> Result<RasterCapture> {
        let height = self.measure_content_height()?;
        let width = self.config.viewport.width;
        debug!("capturing {}x{} css px", width, height);

        let started = Instant::now();
        let shot = self
            .tab()?
            .call_method(Page::CaptureScreenshot {
                format: Some(Page::CaptureScreenshotFormatOption::Png),
                quality: None,
                clip: Some(Page::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: width as f64,
                    height: height as f64,
                    scale: 1.0,
                }),
                from_surface: Some(true),
                capture_beyond_viewport: Some(true),
                optimize_for_speed: None,
            })
            .map_err(|e| {
                if started.elapsed() >= self.config.protocol_timeout {
                    Error::Timeout {
                        stage: Stage::Capture,
                        ms: self.config.protocol_timeout.as_millis() as u64,
                    }
                } else {
                    Error::from(e)
                }
            })?;

        let png = base64::engine::general_purpose::STANDARD
            .decode(shot.data)
            .map_err(|e| Error::Render(format!("Screenshot payload is not base64: {}", e)))?;
        RasterCapture::from_png(&png)
    }

    fn render_pdf(&self, layout: &PrintLayout) -> Result<Vec<u8>> {
        let options = PrintToPdfOptions {
            print_background: Some(layout.print_background),
            paper_width: Some(layout.paper_width),
            paper_height: Some(layout.paper_height),
            margin_top: Some(layout.margin),
            margin_bottom: Some(layout.margin),
            margin_left: Some(layout.margin),
            margin_right: Some(layout.margin),
            prefer_css_page_size: Some(layout.prefer_css_page_size),
            ..Default::default()
        };

        let started = Instant::now();
        self.tab()?.print_to_pdf(Some(options)).map_err(|e| {
            if started.elapsed() >= self.config.protocol_timeout {
                Error::Timeout {
                    stage: Stage::Print,
                    ms: self.config.protocol_timeout.as_millis() as u64,
                }
            } else {
                Error::from(e)
            }
        })
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the browser kills the child process.
        if let Some(browser) = self.browser.take() {
            info!("Closing browser (pid {:?})", browser.get_process_id());
            drop(self.tab.take());
            drop(browser);
        }
        self.document = None;
        Ok(())
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// One launch attempt, bounded by `config.launch_timeout`.
///
/// The engine is started on a helper thread; if the deadline passes first the
/// receiver is gone and a late browser is dropped (and killed) by that thread.
fn start_browser(config: &RenderConfig, args: &[String], binary: Option<&Path>) -> Result<Browser> {
    let args = args.to_vec();
    let binary: Option<PathBuf> = binary.map(Path::to_path_buf);
    let viewport = config.viewport;
    let idle_timeout = config.protocol_timeout;
    let (tx, rx) = mpsc::channel();

    match &binary {
        Some(path) => info!("Launching browser from {}", path.display()),
        None => info!("Launching browser with engine discovery"),
    }

    thread::spawn(move || {
        let res = (|| -> Result<Browser> {
            let options = LaunchOptions::default_builder()
                .headless(true)
                .sandbox(false)
                .ignore_certificate_errors(true)
                .window_size(Some((viewport.width, viewport.height)))
                .idle_browser_timeout(idle_timeout)
                .path(binary)
                .args(args.iter().map(OsStr::new).collect())
                .build()
                .map_err(|e| Error::Launch {
                    cause: format!("Failed to build launch options: {}", e),
                })?;
            Browser::new(options).map_err(|e| Error::Launch { cause: e.to_string() })
        })();
        if tx.send(res).is_err() {
            warn!("Browser finished launching after the deadline; shutting it down");
        }
    });

    rx.recv_timeout(config.launch_timeout).map_err(|e| match e {
        mpsc::RecvTimeoutError::Timeout => Error::Timeout {
            stage: Stage::Launch,
            ms: config.launch_timeout.as_millis() as u64,
        },
        mpsc::RecvTimeoutError::Disconnected => Error::Launch {
            cause: "launch thread exited without a result".into(),
        },
    })?
}
