use crate::assemble::PdfOutput;
use crate::{CancelToken, ConversionRequest, Converter, Error, Launcher, Result};
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;

/// An async-friendly converter backed by one worker thread per conversion.
///
/// Each call runs the blocking pipeline on its own thread and reports back
/// through a oneshot channel, so concurrent requests never share an engine.
/// Dropping the returned future cancels the conversion and the worker closes
/// its engine on the way out.
pub struct AsyncConverter<L: Launcher> {
    inner: Arc<Converter<L>>,
}

impl<L: Launcher> Clone for AsyncConverter<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L> AsyncConverter<L>
where
    L: Launcher + Send + Sync + 'static,
{
    pub fn new(converter: Converter<L>) -> Self {
        Self {
            inner: Arc::new(converter),
        }
    }

    /// Shared access to the blocking converter.
    pub fn converter(&self) -> &Converter<L> {
        &self.inner
    }

    /// Convert `request` on a worker thread.
    pub async fn convert(&self, request: ConversionRequest) -> Result<PdfOutput> {
        self.convert_with(request, CancelToken::new()).await
    }

    /// Convert with a caller-owned cancellation token.
    pub async fn convert_with(&self, request: ConversionRequest, cancel: CancelToken) -> Result<PdfOutput> {
        // Validate on the caller's task so a bad request never spawns a worker.
        request.validate()?;

        let (tx, rx) = oneshot::channel();
        let converter = self.inner.clone();
        let worker_cancel = cancel.clone();
        thread::Builder::new()
            .name("html2pdf-convert".into())
            .spawn(move || {
                let res = converter.convert(&request, &worker_cancel);
                // Receiver gone means the caller stopped waiting.
                let _ = tx.send(res);
            })?;

        let guard = cancel.drop_guard();
        let res = rx
            .await
            .map_err(|e| Error::Other(format!("Conversion worker exited: {}", e)))?;
        guard.disarm();
        res
    }
}
