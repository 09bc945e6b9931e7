use crate::clock::RenderInfo;
use crate::error::{CaptureError, GpuError};
use crate::frame::{CubeFace, CubicFrame, Eye, FaceImage};
use crate::gpu::{ClearMask, GpuBackend, TargetId};
use crate::hooks;
use crate::scene::SceneRenderer;
use crate::settings::ReadbackMode;

/// What the render step is asked to draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRequest {
    pub eye: Eye,
    pub face: CubeFace,
    pub frame_id: u32,
    pub partial_ticks: f32,
}

/// Draws one face into the bound, cleared target.
pub type RenderStep = Box<
    dyn FnMut(
        &mut dyn GpuBackend,
        &mut dyn SceneRenderer,
        &FaceRequest,
    ) -> Result<(), CaptureError>,
>;

struct FrameProgress {
    frame_id: u32,
    partial_ticks: f32,
    width: u32,
    height: u32,
    faces: Vec<FaceImage>,
    awaiting_readback: Option<CubeFace>,
}

impl FrameProgress {
    fn next_face(&self) -> Option<CubeFace> {
        let rendered = self.faces.len() + usize::from(self.awaiting_readback.is_some());
        CubeFace::from_ordinal(rendered)
    }
}

/// Captures the six faces of one eye into a [`CubicFrame`], one face step
/// per [`process`](Self::process) call.
pub struct CubeFaceCapturer {
    eye: Eye,
    total_frames: u32,
    readback: ReadbackMode,
    render_step: RenderStep,
    target: Option<TargetId>,
    progress: Option<FrameProgress>,
    frames_emitted: u32,
    closed: bool,
}

impl CubeFaceCapturer {
    pub fn new(
        eye: Eye,
        total_frames: u32,
        readback: ReadbackMode,
        render_step: RenderStep,
    ) -> Self {
        Self {
            eye,
            total_frames,
            readback,
            render_step,
            target: None,
            progress: None,
            frames_emitted: 0,
            closed: false,
        }
    }

    pub fn eye(&self) -> Eye {
        self.eye
    }

    pub fn is_done(&self) -> bool {
        self.frames_emitted >= self.total_frames
    }

    pub fn frames_emitted(&self) -> u32 {
        self.frames_emitted
    }

    /// Whether a frame has been started but not all faces are read back.
    pub fn in_progress(&self) -> bool {
        self.progress.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Advances the current frame by one step, starting a new frame (and
    /// asking `info` for its partial tick) when none is in progress.
    ///
    /// Returns the cubic frame on the call that reads back its last face.
    /// A failed step abandons the frame.
    pub fn process(
        &mut self,
        gpu: &mut dyn GpuBackend,
        info: &mut dyn RenderInfo,
        renderer: &mut dyn SceneRenderer,
    ) -> Result<Option<CubicFrame>, CaptureError> {
        if self.closed {
            return Err(CaptureError::Closed);
        }
        if self.is_done() {
            return Ok(None);
        }

        let mut progress = match self.progress.take() {
            Some(progress) => progress,
            None => {
                let partial_ticks = info
                    .update_for_next_frame(gpu)
                    .map_err(CaptureError::from_timeline)?;
                let (width, height) = info.frame_size();
                tracing::debug!(
                    eye = %self.eye,
                    frame = self.frames_emitted,
                    partial_ticks,
                    "starting cubic frame"
                );
                FrameProgress {
                    frame_id: self.frames_emitted,
                    partial_ticks,
                    width,
                    height,
                    faces: Vec::with_capacity(CubeFace::ALL.len()),
                    awaiting_readback: None,
                }
            }
        };

        match self.readback {
            ReadbackMode::Deferred => match progress.awaiting_readback.take() {
                Some(face) => self.read_face(gpu, &mut progress, face)?,
                None => {
                    let face = self.next_face(&progress)?;
                    self.render_face(gpu, renderer, &progress, face)?;
                    progress.awaiting_readback = Some(face);
                }
            },
            ReadbackMode::Immediate => {
                let face = self.next_face(&progress)?;
                self.render_face(gpu, renderer, &progress, face)?;
                self.read_face(gpu, &mut progress, face)?;
            }
        }

        if progress.faces.len() < CubeFace::ALL.len() {
            self.progress = Some(progress);
            return Ok(None);
        }

        let faces: [FaceImage; 6] = progress.faces.try_into().map_err(|faces: Vec<FaceImage>| {
            GpuError::Readback(format!("{} faces captured", faces.len()))
        })?;
        let frame = CubicFrame::new(self.eye, progress.frame_id, faces)?;
        self.frames_emitted += 1;
        tracing::debug!(eye = %self.eye, frame = progress.frame_id, "completed cubic frame");
        Ok(Some(frame))
    }

    /// Releases the render target. Safe to call repeatedly.
    pub fn close(&mut self, gpu: &mut dyn GpuBackend) -> Result<(), GpuError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.progress = None;
        match self.target.take() {
            Some(target) => gpu.delete_target(target),
            None => Ok(()),
        }
    }

    fn next_face(&self, progress: &FrameProgress) -> Result<CubeFace, CaptureError> {
        progress.next_face().ok_or_else(|| {
            CaptureError::Gpu(GpuError::Readback(format!(
                "{} eye frame {} has no face left to render",
                self.eye, progress.frame_id
            )))
        })
    }

    fn ensure_target(
        &mut self,
        gpu: &mut dyn GpuBackend,
        width: u32,
        height: u32,
    ) -> Result<TargetId, GpuError> {
        match self.target {
            Some(target) => {
                gpu.resize_target(target, width, height)?;
                Ok(target)
            }
            None => {
                let target = gpu.create_target(width, height)?;
                self.target = Some(target);
                Ok(target)
            }
        }
    }

    fn render_face(
        &mut self,
        gpu: &mut dyn GpuBackend,
        renderer: &mut dyn SceneRenderer,
        progress: &FrameProgress,
        face: CubeFace,
    ) -> Result<(), CaptureError> {
        let target = self.ensure_target(gpu, progress.width, progress.height)?;
        gpu.bind_target(Some(target))?;
        let request = FaceRequest {
            eye: self.eye,
            face,
            frame_id: progress.frame_id,
            partial_ticks: progress.partial_ticks,
        };
        let drawn = self.draw_face(gpu, renderer, &request);
        let unbound = gpu.bind_target(None);
        drawn?;
        unbound?;
        Ok(())
    }

    fn draw_face(
        &mut self,
        gpu: &mut dyn GpuBackend,
        renderer: &mut dyn SceneRenderer,
        request: &FaceRequest,
    ) -> Result<(), CaptureError> {
        gpu.clear(ClearMask::COLOR_AND_DEPTH)?;
        hooks::set_texture_2d(gpu, 0, true)?;
        (self.render_step)(gpu, renderer, request)
    }

    fn read_face(
        &mut self,
        gpu: &mut dyn GpuBackend,
        progress: &mut FrameProgress,
        face: CubeFace,
    ) -> Result<(), CaptureError> {
        let target = self.target.ok_or(GpuError::NoBoundTarget)?;
        let readback = gpu.read_target(target)?;
        let image = FaceImage::new(
            face,
            self.eye,
            progress.frame_id,
            readback.width,
            readback.height,
            readback.pixels,
        )?;
        progress.faces.push(image);
        Ok(())
    }
}
