use crate::gpu::GpuBackend;
use crate::hooks;

/// The renderer whose output gets captured.
///
/// Implementations toggle fixed-function state through [`hooks`] so the
/// toggles can be intercepted, and draw into whatever target is bound.
pub trait SceneRenderer {
    fn render_world(&mut self, gpu: &mut dyn GpuBackend, partial_ticks: f32)
        -> anyhow::Result<()>;
}

impl<F> SceneRenderer for F
where
    F: FnMut(&mut dyn GpuBackend, f32) -> anyhow::Result<()>,
{
    fn render_world(
        &mut self,
        gpu: &mut dyn GpuBackend,
        partial_ticks: f32,
    ) -> anyhow::Result<()> {
        self(gpu, partial_ticks)
    }
}

/// Built-in scene: a light-mapped, optionally fogged ground plane that
/// flashes the hurt overlay during the second half of every tick.
#[derive(Debug, Clone)]
pub struct TestPatternScene {
    fog: bool,
    draws: u64,
}

impl Default for TestPatternScene {
    fn default() -> Self {
        Self {
            fog: true,
            draws: 0,
        }
    }
}

impl TestPatternScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fog(mut self, fog: bool) -> Self {
        self.fog = fog;
        self
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }
}

impl SceneRenderer for TestPatternScene {
    fn render_world(
        &mut self,
        gpu: &mut dyn GpuBackend,
        partial_ticks: f32,
    ) -> anyhow::Result<()> {
        hooks::set_texture_2d(gpu, 1, true)?;
        hooks::set_texture_2d(gpu, 2, partial_ticks >= 0.5)?;
        hooks::set_fog(gpu, self.fog)?;
        gpu.draw_fullscreen()?;
        hooks::set_fog(gpu, false)?;
        hooks::set_texture_2d(gpu, 2, false)?;
        hooks::set_texture_2d(gpu, 1, false)?;
        self.draws += 1;
        Ok(())
    }
}
