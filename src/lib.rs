//! html2pdf-render
//!
//! Renders arbitrary HTML through headless Chrome and produces a PDF, either
//! paginated by the engine itself (A4) or as one continuous page whose height
//! is fitted to the rendered content.
//!
//! # Pipeline
//!
//! - [`enhance`]: normalizes user HTML (CSS reset + Tailwind CDN)
//! - [`launch`] / [`cdp`]: starts one Chrome process per conversion, with a
//!   single fallback retry, and drives one tab through the DevTools protocol
//! - [`boundary`]: finds where content ends inside an oversized screenshot
//! - [`assemble`]: builds the output PDF
//! - [`convert`]: the orchestrator tying the stages together
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "cdp")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use html2pdf_render::{cdp::ChromeLauncher, ConversionRequest, Converter, PageFormat, RenderConfig};
//!
//! let converter = Converter::new(ChromeLauncher, RenderConfig::default());
//! let request = ConversionRequest::new("<html><body><h1>Hi</h1></body></html>", PageFormat::Continuous);
//! let pdf = converter.convert(&request, &Default::default())?;
//! std::fs::write("out.pdf", &pdf.bytes)?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "cdp"))]
//! # fn main() {}
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result, Stage};

pub mod assemble;
pub mod boundary;
pub mod cancel;
pub mod config;
pub mod convert;
pub mod enhance;
pub mod launch;
pub mod server;
pub mod storage;

#[cfg(feature = "cdp")]
pub mod cdp;

// Async-friendly facade (worker-thread backed)
pub mod async_api;

pub use assemble::{PdfAssembler, PdfOutput};
pub use boundary::{BoundaryConfig, BoundaryDetector};
pub use cancel::CancelToken;
pub use config::{ExecutionMode, ServiceConfig};
pub use async_api::AsyncConverter;
pub use convert::{ConversionRequest, ConversionRun, ConversionState, Converter};

/// Configuration for one render session
///
/// The defaults mirror the production service: a fixed 1920×1080 logical
/// viewport rendered at 2× device pixel ratio, a 30 s navigation bound and a
/// 60 s bound for engine launch and individual protocol calls.
///
/// # Examples
///
/// ```
/// let cfg = html2pdf_render::RenderConfig::default();
/// assert_eq!(cfg.viewport.width, 1920);
/// assert_eq!(cfg.device_scale_factor, 2);
/// ```
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Logical viewport content is measured and rendered against
    pub viewport: Viewport,
    /// Device pixel ratio used for screenshots
    pub device_scale_factor: u32,
    /// Bound for load + quiescence after navigation
    pub navigation_timeout: Duration,
    /// Bound for starting the engine process
    pub launch_timeout: Duration,
    /// Bound for any single DevTools call
    pub protocol_timeout: Duration,
    /// No new network activity for this long counts as quiescent
    pub quiet_window: Duration,
    /// Fixed delay after images settle, for client-side rendering
    pub settle_delay: Duration,
    /// Selects whether well-known install paths are probed
    pub mode: ExecutionMode,
    /// Explicit engine binary; takes precedence over probing
    pub chrome_path: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            device_scale_factor: 2,
            navigation_timeout: Duration::from_secs(30),
            launch_timeout: Duration::from_secs(60),
            protocol_timeout: Duration::from_secs(60),
            quiet_window: Duration::from_millis(500),
            settle_delay: Duration::from_millis(500),
            mode: ExecutionMode::default(),
            chrome_path: None,
        }
    }
}

impl RenderConfig {
    /// Width in device pixels of a full-page capture.
    pub fn raster_width(&self) -> u32 {
        self.viewport.width * self.device_scale_factor
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
            width: 1920,
            height: 1080,
        }
    }
}

/// Output layout requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum PageFormat {
    /// Engine-native pagination on A4 sheets
    #[default]
    #[serde(rename = "a4")]
    #[value(name = "a4")]
    Paged,
    /// One page sized to the trimmed content
    #[serde(rename = "single")]
    #[value(name = "single")]
    Continuous,
}

impl std::fmt::Display for PageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageFormat::Paged => f.write_str("a4"),
            PageFormat::Continuous => f.write_str("single"),
        }
    }
}

/// A decoded full-page screenshot
///
/// `pixels` is row-major, `channels` bytes per pixel, no row padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterCapture {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub pixels: Vec<u8>,
}

impl RasterCapture {
    /// Wrap a raw pixel buffer, checking its length against the dimensions.
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if !(1..=4).contains(&channels) || pixels.len() != expected {
            return Err(Error::Assembly(format!(
                "raster buffer of {} bytes does not match {}x{}x{}",
                pixels.len(),
                width,
                height,
                channels
            )));
        }
        Ok(Self { width, height, channels, pixels })
    }

    /// Decode PNG bytes (as produced by the engine) into an RGBA capture.
    pub fn from_png(data: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Png)
            .map_err(|e| Error::Assembly(format!("Failed to decode screenshot: {}", e)))?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            channels: 4,
            pixels: rgba.into_raw(),
        })
    }

    /// Red, green and blue values at `(x, y)`; gray captures repeat the luma.
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * self.channels as usize;
        match self.channels {
            1 | 2 => {
                let l = self.pixels[idx];
                [l, l, l]
            }
            _ => [self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]],
        }
    }
}

/// Page setup for the engine's native print path
#[derive(Debug, Clone, PartialEq)]
pub struct PrintLayout {
    /// Paper width in inches
    pub paper_width: f64,
    /// Paper height in inches
    pub paper_height: f64,
    /// Uniform margin in inches
    pub margin: f64,
    pub print_background: bool,
    pub prefer_css_page_size: bool,
}

impl PrintLayout {
    /// A4, no margins, backgrounds on, `@page` size overrides ignored.
    pub fn a4() -> Self {
        Self {
            paper_width: 8.27,
            paper_height: 11.69,
            margin: 0.0,
            print_background: true,
            prefer_css_page_size: false,
        }
    }
}

/// One live rendering engine instance with exactly one page
///
/// Implementations own the engine process. `close` must terminate it, must be
/// callable more than once, and every other method must fail with
/// [`Error::SessionClosed`] afterwards.
pub trait RenderEngine {
    /// Load `html` into the page and wait until it has settled.
    fn open(&mut self, html: &str, timeout: Duration, cancel: &CancelToken) -> Result<()>;

    /// Height in CSS pixels of the rendered document.
    fn measure_content_height(&self) -> Result<u32>;

    /// Capture the whole scrollable area.
    fn screenshot(&self) -> Result<RasterCapture>;

    /// Print through the engine's native paginated PDF path.
    fn render_pdf(&self, layout: &PrintLayout) -> Result<Vec<u8>>;

    /// Terminate the engine process.
    fn close(&mut self) -> Result<()>;
}

/// Starts render sessions
pub trait Launcher {
    type Engine: RenderEngine;

    fn launch(&self, config: &RenderConfig) -> Result<Self::Engine>;
}
