//! Frame time progression shared by both eyes.
//!
//! Both eye capturers ask their [`RenderInfo`] for the next frame's partial
//! tick. [`StereoRenderInfo`] sits between them and the real info: the left
//! eye's request advances the simulation, the right eye's request reuses the
//! same partial tick, so both eyes see the same instant.

use crate::error::CaptureError;
use crate::frame::Eye;
use crate::gpu::GpuBackend;
use crate::ods::ProgramBinding;
use crate::settings::RenderSettings;

/// Source of frame timing for a capturer.
pub trait RenderInfo {
    /// Face size as `(width, height)` in pixels.
    fn frame_size(&self) -> (u32, u32);

    fn frames_done(&self) -> u32;

    fn total_frames(&self) -> u32;

    /// Moves the simulation to the next output frame and returns its partial
    /// tick.
    fn update_for_next_frame(&mut self, gpu: &mut dyn GpuBackend) -> anyhow::Result<f32>;

    fn render_settings(&self) -> &RenderSettings;
}

/// Advances once per left/right pair and enforces that eyes alternate.
#[derive(Debug, Clone)]
pub struct VirtualFrameClock {
    calls: u64,
    advances: u64,
    partial_ticks: f32,
    expected: Eye,
}

impl Default for VirtualFrameClock {
    fn default() -> Self {
        Self {
            calls: 0,
            advances: 0,
            partial_ticks: 0.0,
            expected: Eye::Left,
        }
    }
}

impl VirtualFrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles one eye's request for the next frame. `advance` runs only for
    /// the first request of a pair; a failed advance leaves the clock where
    /// it was.
    pub fn request<F>(&mut self, eye: Eye, advance: F) -> Result<f32, CaptureError>
    where
        F: FnOnce() -> anyhow::Result<f32>,
    {
        if eye != self.expected {
            return Err(CaptureError::EyeOrder {
                expected: self.expected,
                got: eye,
            });
        }
        if self.calls % 2 == 0 {
            self.partial_ticks = advance().map_err(CaptureError::from_timeline)?;
            self.advances += 1;
            tracing::debug!(
                advances = self.advances,
                partial_ticks = self.partial_ticks,
                "advanced frame clock"
            );
        }
        self.calls += 1;
        self.expected = eye.other();
        Ok(self.partial_ticks)
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn advances(&self) -> u64 {
        self.advances
    }

    pub fn partial_ticks(&self) -> f32 {
        self.partial_ticks
    }

    pub fn expected_eye(&self) -> Eye {
        self.expected
    }
}

/// Per-eye view of the shared [`RenderInfo`].
///
/// Advancing the wrapped info happens with the ODS program and interceptor
/// unbound, since the simulation step may toggle state or draw on its own.
pub(crate) struct StereoRenderInfo<'a> {
    inner: &'a mut dyn RenderInfo,
    clock: &'a mut VirtualFrameClock,
    binding: &'a mut ProgramBinding,
    eye: Eye,
}

impl<'a> StereoRenderInfo<'a> {
    pub(crate) fn new(
        inner: &'a mut dyn RenderInfo,
        clock: &'a mut VirtualFrameClock,
        binding: &'a mut ProgramBinding,
        eye: Eye,
    ) -> Self {
        Self {
            inner,
            clock,
            binding,
            eye,
        }
    }
}

impl RenderInfo for StereoRenderInfo<'_> {
    fn frame_size(&self) -> (u32, u32) {
        self.inner.frame_size()
    }

    fn frames_done(&self) -> u32 {
        self.inner.frames_done()
    }

    fn total_frames(&self) -> u32 {
        self.inner.total_frames()
    }

    fn update_for_next_frame(&mut self, gpu: &mut dyn GpuBackend) -> anyhow::Result<f32> {
        let inner = &mut *self.inner;
        let binding = &mut *self.binding;
        let mut rebound = Ok(());
        let requested = self.clock.request(self.eye, || {
            binding.unbind(gpu)?;
            let advanced = inner.update_for_next_frame(gpu);
            rebound = binding.bind(gpu);
            advanced
        });
        // A successful advance stays counted even when the rebind fails.
        match (requested, rebound) {
            (Ok(partial_ticks), Ok(())) => Ok(partial_ticks),
            (Ok(_), Err(err)) => Err(err.into()),
            (Err(err), rebound) => {
                if let Err(cleanup) = rebound {
                    tracing::warn!(%cleanup, "failed to rebind ODS program after advance error");
                }
                Err(err.into())
            }
        }
    }

    fn render_settings(&self) -> &RenderSettings {
        self.inner.render_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_once_per_pair() {
        let mut clock = VirtualFrameClock::new();
        let mut ticks = 0.0;
        let mut advance = || -> anyhow::Result<f32> {
            ticks += 0.25;
            Ok(ticks)
        };

        assert_eq!(clock.request(Eye::Left, &mut advance).unwrap(), 0.25);
        assert_eq!(clock.request(Eye::Right, &mut advance).unwrap(), 0.25);
        assert_eq!(clock.request(Eye::Left, &mut advance).unwrap(), 0.5);
        assert_eq!(clock.request(Eye::Right, &mut advance).unwrap(), 0.5);
        assert_eq!(clock.advances(), 2);
        assert_eq!(clock.calls(), 4);
    }

    #[test]
    fn out_of_order_eyes_are_rejected() {
        let mut clock = VirtualFrameClock::new();
        let err = clock.request(Eye::Right, || Ok(0.0)).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::EyeOrder {
                expected: Eye::Left,
                got: Eye::Right
            }
        ));

        clock.request(Eye::Left, || Ok(0.0)).unwrap();
        assert!(clock.request(Eye::Left, || Ok(0.0)).is_err());
        assert_eq!(clock.expected_eye(), Eye::Right);
    }

    #[test]
    fn failed_advance_can_be_retried() {
        let mut clock = VirtualFrameClock::new();
        let err = clock
            .request(Eye::Left, || Err(anyhow::anyhow!("world not loaded")))
            .unwrap_err();
        assert!(matches!(err, CaptureError::Timeline(_)));
        assert_eq!(clock.calls(), 0);

        assert_eq!(clock.request(Eye::Left, || Ok(0.5)).unwrap(), 0.5);
        assert_eq!(clock.advances(), 1);
    }
}
