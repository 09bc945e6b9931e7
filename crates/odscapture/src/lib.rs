//! Stereo omnidirectional (ODS) frame capture.
//!
//! A scene renderer is drawn six times per eye, once per cube face, through a
//! shader program that bends every face into the ODS projection. Both eyes
//! share one simulation instant per output frame. The flow of one session:
//!
//! ```text
//!   CaptureDriver::run
//!          │ process()
//!          ▼
//!   OdsFrameCapturer ──▶ bind program + StateInterceptor
//!          │                       │
//!          │                       └─▶ hooks::set_texture_2d / set_fog ─▶ uniforms
//!          ├─▶ CubeFaceCapturer (left)  ──▶ render_world() ─▶ read back ─▶ CubicFrame
//!          ├─▶ CubeFaceCapturer (right) ──▶ render_world() ─▶ read back ─▶ CubicFrame
//!          ▼
//!   StereoFrame ──▶ FrameSink
//! ```
//!
//! The left eye's request for a new frame advances the [`RenderInfo`]; the
//! right eye reuses the same partial tick. All GPU access goes through
//! [`GpuBackend`], with a CPU model ([`HeadlessGpu`]) and, behind the `wgpu`
//! feature, a real device ([`WgpuGpu`]).

pub mod clock;
pub mod cubic;
pub mod driver;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod hooks;
pub mod intercept;
pub mod ods;
pub mod program;
pub mod scene;
pub mod settings;
pub mod timeline;

pub use clock::{RenderInfo, VirtualFrameClock};
pub use cubic::{CubeFaceCapturer, FaceRequest, RenderStep};
pub use driver::{CaptureDriver, CaptureSummary, DriverError, FrameCapturer, FrameSink};
pub use error::{
    CaptureError, GpuError, InterceptError, ProgramError, ShaderCompileError, ShaderStage,
    UniformError,
};
pub use frame::{CubeFace, CubicFrame, Eye, FaceImage, FrameError, Rgba8, StereoFrame};
pub use gpu::{GpuBackend, HeadlessGpu, HeadlessStats, UniformValue};
#[cfg(feature = "wgpu")]
pub use gpu::WgpuGpu;
pub use ods::{OdsFrameCapturer, OdsState};
pub use program::{OdsUniform, OdsUniforms, ShaderProgram, ShaderSources, UniformHandle};
pub use scene::{SceneRenderer, TestPatternScene};
pub use settings::{ReadbackMode, RenderSettings};
pub use timeline::FixedStepTimeline;
