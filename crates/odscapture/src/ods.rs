use crate::clock::{RenderInfo, StereoRenderInfo, VirtualFrameClock};
use crate::cubic::{CubeFaceCapturer, FaceRequest};
use crate::driver::FrameCapturer;
use crate::error::{CaptureError, GpuError, ProgramError};
use crate::frame::{CubicFrame, Eye, StereoFrame};
use crate::gpu::GpuBackend;
use crate::intercept::StateInterceptor;
use crate::program::{OdsUniform, OdsUniforms, ShaderProgram, ShaderSources};
use crate::scene::SceneRenderer;
use crate::settings::ReadbackMode;

/// Where the stereo capturer is between `process` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OdsState {
    /// No frame has been started since the last stereo frame was emitted.
    Idle,
    /// The named eye has a started frame that still needs calls.
    EyeInProgress(Eye),
    /// The last `process` call returned a stereo frame.
    FrameReady,
    Closed,
}

/// The ODS program together with the interceptor that feeds it.
///
/// Bound for the duration of a `process` call, except while the frame clock
/// advances the wrapped [`RenderInfo`].
#[derive(Debug)]
pub(crate) struct ProgramBinding {
    program: ShaderProgram,
    interceptor: StateInterceptor,
    uniforms: OdsUniforms,
}

impl ProgramBinding {
    pub(crate) fn uniforms(&self) -> &OdsUniforms {
        &self.uniforms
    }

    /// Activates the program, points the samplers at units 0 and 1 and
    /// starts intercepting state toggles.
    pub(crate) fn bind(&mut self, gpu: &mut dyn GpuBackend) -> Result<(), CaptureError> {
        self.program.use_program(gpu)?;
        if let Err(err) = self.prepare(gpu) {
            self.interceptor.deactivate();
            if let Err(cleanup) = self.program.stop_using(gpu) {
                tracing::warn!(%cleanup, "failed to unbind ODS program after bind error");
            }
            return Err(err);
        }
        Ok(())
    }

    fn prepare(&mut self, gpu: &mut dyn GpuBackend) -> Result<(), CaptureError> {
        self.uniforms.get(OdsUniform::TextureUnit).set(gpu, 0)?;
        self.uniforms.get(OdsUniform::LightMapUnit).set(gpu, 1)?;
        self.interceptor
            .activate(&self.uniforms.intercept_bindings())?;
        Ok(())
    }

    /// Stops intercepting, then deactivates the program. A no-op when not
    /// bound.
    pub(crate) fn unbind(&mut self, gpu: &mut dyn GpuBackend) -> Result<(), CaptureError> {
        self.interceptor.deactivate();
        if !self.program.is_active() {
            return Ok(());
        }
        self.program.stop_using(gpu)?;
        Ok(())
    }
}

/// Stereo omnidirectional capturer: six cube faces per eye, rendered with
/// the ODS program, combined into one [`StereoFrame`] per output frame.
///
/// Owns the device, the scene renderer and the frame timing. Each `process`
/// call binds the program, advances the left eye capturer by one step, then
/// the right one, and unbinds again.
pub struct OdsFrameCapturer<G, R, I>
where
    G: GpuBackend,
    R: SceneRenderer,
    I: RenderInfo,
{
    gpu: G,
    renderer: R,
    info: I,
    binding: ProgramBinding,
    clock: VirtualFrameClock,
    left: CubeFaceCapturer,
    right: CubeFaceCapturer,
    pending_left: Option<CubicFrame>,
    pending_right: Option<CubicFrame>,
    state: OdsState,
}

impl<G, R, I> OdsFrameCapturer<G, R, I>
where
    G: GpuBackend,
    R: SceneRenderer,
    I: RenderInfo,
{
    /// Compiles the program and checks its uniforms before anything else is
    /// allocated.
    pub fn new(
        mut gpu: G,
        renderer: R,
        info: I,
        sources: &ShaderSources,
    ) -> Result<Self, CaptureError> {
        let mut program = ShaderProgram::compile_and_link(&mut gpu, sources)?;
        let uniforms = match OdsUniforms::resolve(&mut gpu, &mut program) {
            Ok(uniforms) => uniforms,
            Err(err) => {
                if let Err(release) = program.release(&mut gpu) {
                    tracing::warn!(%release, "failed to release rejected ODS program");
                }
                return Err(err.into());
            }
        };

        let settings = info.render_settings();
        let total_frames = info.total_frames();
        let left = eye_capturer(Eye::Left, total_frames, settings.readback, &uniforms);
        let right = eye_capturer(Eye::Right, total_frames, settings.readback, &uniforms);
        tracing::debug!(
            total_frames,
            readback = %settings.readback,
            frame_size = ?info.frame_size(),
            "created ODS capturer"
        );

        Ok(Self {
            gpu,
            renderer,
            info,
            binding: ProgramBinding {
                program,
                interceptor: StateInterceptor::new(),
                uniforms,
            },
            clock: VirtualFrameClock::new(),
            left,
            right,
            pending_left: None,
            pending_right: None,
            state: OdsState::Idle,
        })
    }

    pub fn state(&self) -> OdsState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.left.is_done() && self.right.is_done()
    }

    pub fn clock(&self) -> &VirtualFrameClock {
        &self.clock
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.binding.program
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn info(&self) -> &I {
        &self.info
    }

    /// One capture step for both eyes. Returns a stereo frame once both eyes
    /// completed the same frame.
    pub fn process(&mut self) -> Result<Option<StereoFrame>, CaptureError> {
        if self.state == OdsState::Closed {
            return Err(CaptureError::Closed);
        }
        if self.is_done() {
            return Ok(None);
        }

        self.binding.bind(&mut self.gpu)?;
        let captured = self.capture_eyes();
        let unbound = self.binding.unbind(&mut self.gpu);
        if let Err(err) = captured {
            if let Err(cleanup) = unbound {
                tracing::warn!(%cleanup, "failed to unbind ODS program after capture error");
            }
            return Err(err);
        }
        unbound?;

        let frame = match (self.pending_left.take(), self.pending_right.take()) {
            (Some(left), Some(right)) => StereoFrame::new(left, right)?,
            (left, right) => {
                self.pending_left = left;
                self.pending_right = right;
                self.state = if self.left.in_progress() {
                    OdsState::EyeInProgress(Eye::Left)
                } else if self.right.in_progress() {
                    OdsState::EyeInProgress(Eye::Right)
                } else {
                    OdsState::Idle
                };
                return Ok(None);
            }
        };
        self.state = OdsState::FrameReady;
        tracing::debug!(frame = frame.frame_id(), "stereo frame ready");
        Ok(Some(frame))
    }

    fn capture_eyes(&mut self) -> Result<(), CaptureError> {
        for eye in [Eye::Left, Eye::Right] {
            self.binding
                .uniforms()
                .get(OdsUniform::LeftEye)
                .set(&mut self.gpu, eye == Eye::Left)?;
            let capturer = match eye {
                Eye::Left => &mut self.left,
                Eye::Right => &mut self.right,
            };
            let mut info =
                StereoRenderInfo::new(&mut self.info, &mut self.clock, &mut self.binding, eye);
            let frame = capturer.process(&mut self.gpu, &mut info, &mut self.renderer)?;
            if let Some(frame) = frame {
                match eye {
                    Eye::Left => self.pending_left = Some(frame),
                    Eye::Right => self.pending_right = Some(frame),
                }
            }
        }
        Ok(())
    }

    /// Releases both eye capturers and the program. Every release is
    /// attempted; failures are reported together. Later calls do nothing.
    pub fn close(&mut self) -> Result<(), CaptureError> {
        if self.state == OdsState::Closed {
            return Ok(());
        }
        self.state = OdsState::Closed;
        self.pending_left = None;
        self.pending_right = None;

        let mut failures: Vec<GpuError> = Vec::new();
        match self.binding.unbind(&mut self.gpu) {
            Ok(()) => {}
            Err(CaptureError::Gpu(err)) | Err(CaptureError::Program(ProgramError::Gpu(err))) => {
                failures.push(err)
            }
            Err(err) => tracing::warn!(%err, "failed to unbind ODS program while closing"),
        }
        for capturer in [&mut self.left, &mut self.right] {
            if let Err(err) = capturer.close(&mut self.gpu) {
                failures.push(err);
            }
        }
        if let Err(err) = self.binding.program.release(&mut self.gpu) {
            failures.push(err);
        }

        if failures.is_empty() {
            tracing::debug!("closed ODS capturer");
            Ok(())
        } else {
            Err(CaptureError::Close(failures))
        }
    }
}

fn eye_capturer(
    eye: Eye,
    total_frames: u32,
    readback: ReadbackMode,
    uniforms: &OdsUniforms,
) -> CubeFaceCapturer {
    let direction = uniforms.get(OdsUniform::Direction).clone();
    CubeFaceCapturer::new(
        eye,
        total_frames,
        readback,
        Box::new(
            move |gpu: &mut dyn GpuBackend,
                  renderer: &mut dyn SceneRenderer,
                  request: &FaceRequest| {
                direction.set(gpu, request.face.ordinal() as i32)?;
                renderer
                    .render_world(gpu, request.partial_ticks)
                    .map_err(|cause| CaptureError::Render {
                        eye: request.eye,
                        face: request.face,
                        cause,
                    })
            },
        ),
    )
}

impl<G, R, I> FrameCapturer for OdsFrameCapturer<G, R, I>
where
    G: GpuBackend,
    R: SceneRenderer,
    I: RenderInfo,
{
    type Frame = StereoFrame;

    fn is_done(&self) -> bool {
        OdsFrameCapturer::is_done(self)
    }

    fn process(&mut self) -> Result<Option<StereoFrame>, CaptureError> {
        OdsFrameCapturer::process(self)
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        OdsFrameCapturer::close(self)
    }
}

impl<G, R, I> Drop for OdsFrameCapturer<G, R, I>
where
    G: GpuBackend,
    R: SceneRenderer,
    I: RenderInfo,
{
    fn drop(&mut self) {
        if self.state != OdsState::Closed {
            if let Err(err) = self.close() {
                tracing::warn!(%err, "failed to release ODS capturer on drop");
            }
        }
    }
}
