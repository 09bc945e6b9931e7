use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::CaptureError;

/// Anything that produces frames one `process` call at a time.
pub trait FrameCapturer {
    type Frame;

    fn is_done(&self) -> bool;

    /// `Ok(None)` means "call again", not an error.
    fn process(&mut self) -> Result<Option<Self::Frame>, CaptureError>;

    fn close(&mut self) -> Result<(), CaptureError>;
}

/// Destination for captured frames, typically an encoder.
pub trait FrameSink<F> {
    fn consume(&mut self, frame: F) -> anyhow::Result<()>;

    /// Called once after the last frame of a session that was not aborted.
    fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<F> FrameSink<F> for Vec<F> {
    fn consume(&mut self, frame: F) -> anyhow::Result<()> {
        self.push(frame);
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("frame sink failed: {0:#}")]
    Sink(anyhow::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    /// `process` calls made.
    pub calls: u64,
    /// Frames handed to the sink.
    pub frames: u32,
    pub cancelled: bool,
}

/// Calls a capturer until it is done or cancelled, feeding a sink.
///
/// The capturer is always closed before `run` returns.
#[derive(Debug, Clone, Default)]
pub struct CaptureDriver {
    cancel: Arc<AtomicBool>,
}

impl CaptureDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag that stops the session at the next call boundary once set.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn run<C, S>(&self, capturer: &mut C, sink: &mut S) -> Result<CaptureSummary, DriverError>
    where
        C: FrameCapturer,
        S: FrameSink<C::Frame>,
    {
        let mut summary = CaptureSummary::default();
        let outcome = self
            .drive(capturer, sink, &mut summary)
            .and_then(|()| {
                if summary.cancelled {
                    Ok(())
                } else {
                    sink.finish().map_err(DriverError::Sink)
                }
            });
        let closed = capturer.close();

        match (outcome, closed) {
            (Ok(()), Ok(())) => Ok(summary),
            (Ok(()), Err(err)) => Err(err.into()),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close)) => {
                tracing::warn!(%close, "failed to close capturer after error");
                Err(err)
            }
        }
    }

    fn drive<C, S>(
        &self,
        capturer: &mut C,
        sink: &mut S,
        summary: &mut CaptureSummary,
    ) -> Result<(), DriverError>
    where
        C: FrameCapturer,
        S: FrameSink<C::Frame>,
    {
        while !capturer.is_done() {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::info!(frames = summary.frames, "capture cancelled");
                summary.cancelled = true;
                return Ok(());
            }
            summary.calls += 1;
            if let Some(frame) = capturer.process()? {
                sink.consume(frame).map_err(DriverError::Sink)?;
                summary.frames += 1;
                tracing::debug!(frames = summary.frames, calls = summary.calls, "frame captured");
            }
        }
        Ok(())
    }
}
