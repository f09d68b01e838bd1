//! End-to-end conversion
//!
//! `Idle → Validating → Launching → Rendering → Assembling → Done`, with
//! `Failed` reachable from every non-terminal state. A launched session is
//! closed exactly once on every exit path.

use std::time::Instant;

use log::{debug, error, info, warn};
use serde::Deserialize;

use crate::assemble::{PdfAssembler, PdfOutput};
use crate::boundary::BoundaryDetector;
use crate::enhance::enhance_html;
use crate::{CancelToken, Error, Launcher, PageFormat, RenderConfig, RenderEngine, Result};

/// A request to render one HTML document
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConversionRequest {
    pub html: String,
    #[serde(default)]
    pub page_format: PageFormat,
}

impl ConversionRequest {
    pub fn new(html: impl Into<String>, page_format: PageFormat) -> Self {
        Self {
            html: html.into(),
            page_format,
        }
    }

    /// Reject documents that are empty after trimming.
    pub fn validate(&self) -> Result<()> {
        if self.html.trim().is_empty() {
            return Err(Error::Validation("HTML content is missing".into()));
        }
        Ok(())
    }
}

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionState {
    Idle,
    Validating,
    Launching,
    Rendering,
    Assembling,
    Done,
    Failed,
}

impl ConversionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConversionState::Done | ConversionState::Failed)
    }

    fn can_advance_to(self, next: ConversionState) -> bool {
        use ConversionState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Idle, Validating)
            | (Validating, Launching)
            | (Launching, Rendering)
            | (Rendering, Assembling)
            | (Assembling, Done) => true,
            _ => false,
        }
    }
}

/// Outcome of one run plus every state it passed through
#[derive(Debug)]
pub struct ConversionRun {
    pub result: Result<PdfOutput>,
    pub states: Vec<ConversionState>,
}

/// Drives one request through the pipeline
pub struct Converter<L: Launcher> {
    launcher: L,
    config: RenderConfig,
    assembler: PdfAssembler,
}

impl<L: Launcher> Converter<L> {
    pub fn new(launcher: L, config: RenderConfig) -> Self {
        Self::with_detector(launcher, config, BoundaryDetector::default())
    }

    pub fn with_detector(launcher: L, config: RenderConfig, detector: BoundaryDetector) -> Self {
        let assembler = PdfAssembler::new(&config, detector);
        Self {
            launcher,
            config,
            assembler,
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Convert `request`, honoring `cancel` between and inside stages.
    pub fn convert(&self, request: &ConversionRequest, cancel: &CancelToken) -> Result<PdfOutput> {
        self.run(request, cancel).result
    }

    /// Like [`Converter::convert`] but also reports the state trace.
    pub fn run(&self, request: &ConversionRequest, cancel: &CancelToken) -> ConversionRun {
        let started = Instant::now();
        let mut tracker = StateTracker::new();
        let result = self.drive(request, cancel, &mut tracker);

        match &result {
            Ok(pdf) => {
                tracker.advance(ConversionState::Done);
                info!(
                    "Conversion done: {} bytes, {} page(s) in {}ms",
                    pdf.len(),
                    pdf.page_count,
                    started.elapsed().as_millis()
                );
            }
            Err(err) => {
                let failed_in = tracker.current();
                tracker.advance(ConversionState::Failed);
                match err {
                    Error::Validation(_) => warn!("Rejected request: {}", err),
                    _ => error!(
                        "Conversion failed during {:?} ({} mode): {}",
                        failed_in, self.config.mode, err
                    ),
                }
            }
        }

        ConversionRun {
            result,
            states: tracker.into_states(),
        }
    }

    fn drive(
        &self,
        request: &ConversionRequest,
        cancel: &CancelToken,
        tracker: &mut StateTracker,
    ) -> Result<PdfOutput> {
        tracker.advance(ConversionState::Validating);
        request.validate()?;
        cancel.check()?;

        tracker.advance(ConversionState::Launching);
        info!("Launching browser in {} mode", self.config.mode);
        let mut session = SessionGuard::new(self.launcher.launch(&self.config)?);

        let outcome = (|| -> Result<PdfOutput> {
            cancel.check()?;
            tracker.advance(ConversionState::Rendering);
            let html = enhance_html(&request.html);
            session
                .engine_mut()?
                .open(&html, self.config.navigation_timeout, cancel)?;
            cancel.check()?;

            tracker.advance(ConversionState::Assembling);
            let pdf = self.assembler.assemble(session.engine()?, request.page_format)?;
            cancel.check()?;
            Ok(pdf)
        })();

        let closed = session.close();
        let pdf = outcome?;
        closed?;
        Ok(pdf)
    }
}

struct StateTracker {
    states: Vec<ConversionState>,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            states: vec![ConversionState::Idle],
        }
    }

    fn current(&self) -> ConversionState {
        *self.states.last().unwrap_or(&ConversionState::Idle)
    }

    fn advance(&mut self, next: ConversionState) {
        let current = self.current();
        debug_assert!(current.can_advance_to(next), "{:?} -> {:?}", current, next);
        if current.can_advance_to(next) {
            debug!("conversion state {:?} -> {:?}", current, next);
            self.states.push(next);
        }
    }

    fn into_states(self) -> Vec<ConversionState> {
        self.states
    }
}

/// Owns a launched engine and closes it exactly once.
struct SessionGuard<E: RenderEngine> {
    engine: Option<E>,
}

impl<E: RenderEngine> SessionGuard<E> {
    fn new(engine: E) -> Self {
        Self { engine: Some(engine) }
    }

    fn engine(&self) -> Result<&E> {
        self.engine.as_ref().ok_or(Error::SessionClosed)
    }

    fn engine_mut(&mut self) -> Result<&mut E> {
        self.engine.as_mut().ok_or(Error::SessionClosed)
    }

    fn close(&mut self) -> Result<()> {
        match self.engine.take() {
            Some(mut engine) => engine.close().map_err(|e| {
                warn!("Error closing browser: {}", e);
                e
            }),
            None => Ok(()),
        }
    }
}

impl<E: RenderEngine> Drop for SessionGuard<E> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
