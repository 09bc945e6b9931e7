use crate::clock::RenderInfo;
use crate::gpu::GpuBackend;
use crate::settings::RenderSettings;

/// [`RenderInfo`] over a simulated clock that moves `1 / fps` seconds per
/// frame.
///
/// The partial tick is the fraction of a simulation tick (at `tick_rate`)
/// that has elapsed at the frame's instant. Frame 0 sits at time zero.
#[derive(Debug, Clone)]
pub struct FixedStepTimeline {
    settings: RenderSettings,
    frames_done: u32,
    seconds: f64,
}

impl FixedStepTimeline {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            settings,
            frames_done: 0,
            seconds: 0.0,
        }
    }

    /// Simulated time of the most recently started frame.
    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    /// Whole simulation ticks elapsed at the current frame.
    pub fn whole_ticks(&self) -> u64 {
        (self.seconds * self.settings.tick_rate).floor() as u64
    }
}

impl RenderInfo for FixedStepTimeline {
    fn frame_size(&self) -> (u32, u32) {
        (self.settings.frame_size, self.settings.frame_size)
    }

    fn frames_done(&self) -> u32 {
        self.frames_done
    }

    fn total_frames(&self) -> u32 {
        self.settings.total_frames
    }

    fn update_for_next_frame(&mut self, _gpu: &mut dyn GpuBackend) -> anyhow::Result<f32> {
        if self.frames_done >= self.settings.total_frames {
            anyhow::bail!(
                "timeline already produced all {} frames",
                self.settings.total_frames
            );
        }
        self.seconds = f64::from(self.frames_done) / self.settings.fps.max(f64::EPSILON);
        self.frames_done += 1;
        let ticks = self.seconds * self.settings.tick_rate;
        Ok(ticks.fract() as f32)
    }

    fn render_settings(&self) -> &RenderSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessGpu;

    fn timeline(fps: f64, tick_rate: f64, total_frames: u32) -> FixedStepTimeline {
        FixedStepTimeline::new(RenderSettings {
            fps,
            tick_rate,
            total_frames,
            ..RenderSettings::default()
        })
    }

    #[test]
    fn partial_ticks_cycle_through_a_tick() {
        let mut gpu = HeadlessGpu::new();
        let mut timeline = timeline(40.0, 20.0, 4);
        let partials: Vec<f32> = (0..4)
            .map(|_| timeline.update_for_next_frame(&mut gpu).unwrap())
            .collect();
        assert_eq!(partials, vec![0.0, 0.5, 0.0, 0.5]);
        assert_eq!(timeline.frames_done(), 4);
        assert_eq!(timeline.whole_ticks(), 1);
    }

    #[test]
    fn refuses_to_run_past_the_last_frame() {
        let mut gpu = HeadlessGpu::new();
        let mut timeline = timeline(60.0, 20.0, 1);
        timeline.update_for_next_frame(&mut gpu).unwrap();
        let err = timeline.update_for_next_frame(&mut gpu).unwrap_err();
        assert!(err.to_string().contains("all 1 frames"));
    }

    #[test]
    fn frame_size_is_square() {
        let timeline = timeline(60.0, 20.0, 1);
        assert_eq!(timeline.frame_size(), (512, 512));
    }
}
