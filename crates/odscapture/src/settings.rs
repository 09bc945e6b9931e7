use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// When a rendered face is copied back to host memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadbackMode {
    /// Render a face on one `process` call and read it back on the next,
    /// giving the GPU a call's worth of time to finish the copy.
    #[default]
    Deferred,
    /// Render and read back within the same call.
    Immediate,
}

impl ReadbackMode {
    /// `process` calls one eye needs for a full cubic frame.
    pub fn calls_per_eye_frame(self) -> u32 {
        match self {
            ReadbackMode::Deferred => 12,
            ReadbackMode::Immediate => 6,
        }
    }
}

impl fmt::Display for ReadbackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadbackMode::Deferred => f.write_str("deferred"),
            ReadbackMode::Immediate => f.write_str("immediate"),
        }
    }
}

impl FromStr for ReadbackMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "deferred" => Ok(ReadbackMode::Deferred),
            "immediate" => Ok(ReadbackMode::Immediate),
            other => Err(format!(
                "unknown readback mode '{other}' (expected 'deferred' or 'immediate')"
            )),
        }
    }
}

/// Parameters of one capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    /// Edge length of every cube face in pixels.
    pub frame_size: u32,
    /// Output frames per second of simulated time.
    pub fps: f64,
    /// Number of stereo frames to capture.
    pub total_frames: u32,
    /// Simulation ticks per second; partial ticks are fractions of one tick.
    pub tick_rate: f64,
    pub readback: ReadbackMode,
}

impl RenderSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(f64::EPSILON))
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            frame_size: 512,
            fps: 60.0,
            total_frames: 1,
            tick_rate: 20.0,
            readback: ReadbackMode::default(),
        }
    }
}
