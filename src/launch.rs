//! Engine launch protocol
//!
//! 1. a fixed argument set for running Chrome in an unprivileged container,
//! 2. binary selection (explicit override, then system paths in production),
//! 3. one launch attempt,
//! 4. if a binary was forced and the attempt failed, exactly one retry
//!    letting the engine library pick its own (bundled) binary,
//! 5. otherwise a fatal [`Error::Launch`].

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::{Error, RenderConfig, Result};

/// Arguments passed to every engine process.
pub const ENGINE_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-software-rasterizer",
    "--disable-web-security",
    "--no-first-run",
    "--disable-extensions",
    "--disable-default-apps",
    "--disable-translate",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
    "--disable-features=TranslateUI",
    "--disable-ipc-flooding-protection",
    "--memory-pressure-off",
    "--hide-scrollbars",
];

/// System install locations probed in production mode, in order.
pub const KNOWN_BINARY_PATHS: &[&str] = &[
    "/usr/bin/chromium-browser",
    "/usr/bin/chromium",
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/snap/bin/chromium",
];

/// What to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub args: Vec<String>,
    /// Forced binary; `None` lets the engine library discover one
    pub binary: Option<PathBuf>,
}

impl LaunchPlan {
    /// Build the plan for `config`, probing the real filesystem.
    pub fn for_config(config: &RenderConfig) -> Self {
        Self::with_probe(config, |p| p.exists())
    }

    /// Build the plan with a custom existence check.
    pub fn with_probe<F>(config: &RenderConfig, exists: F) -> Self
    where
        F: Fn(&Path) -> bool,
    {
        let mut args: Vec<String> = ENGINE_ARGS.iter().map(|a| a.to_string()).collect();
        args.push(format!(
            "--force-device-scale-factor={}",
            config.device_scale_factor
        ));
        Self {
            args,
            binary: resolve_binary(config, exists),
        }
    }
}

/// Pick the binary to force, if any.
///
/// An explicit override wins in every mode. Without one, production mode
/// probes [`KNOWN_BINARY_PATHS`]; development mode forces nothing.
pub fn resolve_binary<F>(config: &RenderConfig, exists: F) -> Option<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    if let Some(path) = &config.chrome_path {
        info!("Using engine binary override {}", path.display());
        return Some(path.clone());
    }
    if !config.mode.is_production() {
        info!("Using bundled engine discovery in {} mode", config.mode);
        return None;
    }
    let found = KNOWN_BINARY_PATHS
        .iter()
        .map(Path::new)
        .find(|p| exists(p))
        .map(Path::to_path_buf);
    match &found {
        Some(path) => info!("Found system engine at {}", path.display()),
        None => warn!("No system engine found, falling back to bundled discovery"),
    }
    found
}

/// Result of running the launch protocol
#[derive(Debug)]
pub enum LaunchOutcome<S> {
    Launched {
        session: S,
        /// Whether the forced binary failed and the retry succeeded
        used_fallback: bool,
    },
    Failed(Error),
}

impl<S> LaunchOutcome<S> {
    /// Convert into a `Result`, turning failures into [`Error::Launch`].
    ///
    /// Timeouts keep their own variant.
    pub fn into_result(self) -> Result<S> {
        match self {
            LaunchOutcome::Launched { session, .. } => Ok(session),
            LaunchOutcome::Failed(err @ Error::Timeout { .. }) => Err(err),
            LaunchOutcome::Failed(err @ Error::Launch { .. }) => Err(err),
            LaunchOutcome::Failed(other) => Err(Error::Launch {
                cause: other.to_string(),
            }),
        }
    }
}

/// Run `attempt` following the plan, with at most one fallback retry.
///
/// `attempt` receives the binary to force, or `None` for engine discovery.
pub fn launch_with_fallback<S, F>(plan: &LaunchPlan, mut attempt: F) -> LaunchOutcome<S>
where
    F: FnMut(Option<&Path>) -> Result<S>,
{
    match attempt(plan.binary.as_deref()) {
        Ok(session) => {
            info!("Browser launched");
            LaunchOutcome::Launched {
                session,
                used_fallback: false,
            }
        }
        Err(first) => {
            warn!("Failed to launch browser: {}", first);
            if plan.binary.is_none() {
                return LaunchOutcome::Failed(first);
            }
            info!("Retrying without the forced engine binary");
            match attempt(None) {
                Ok(session) => {
                    info!("Browser launched (fallback)");
                    LaunchOutcome::Launched {
                        session,
                        used_fallback: true,
                    }
                }
                Err(second) => LaunchOutcome::Failed(second),
            }
        }
    }
}
