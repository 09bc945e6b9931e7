use std::cell::{Cell, RefCell};
use std::rc::Rc;

use odscapture::gpu::{ClearMask, ProgramId, Readback, TargetId, UniformLocation};
use odscapture::hooks::{self, EventKind};
use odscapture::{
    CaptureDriver, CaptureError, CubeFace, Eye, FixedStepTimeline, GpuBackend, GpuError,
    HeadlessGpu, OdsFrameCapturer, OdsState, ReadbackMode, RenderInfo, RenderSettings,
    SceneRenderer, ShaderCompileError, ShaderSources, ShaderStage, StereoFrame,
    TestPatternScene, UniformError, UniformValue,
};

fn settings(frame_size: u32, total_frames: u32, readback: ReadbackMode) -> RenderSettings {
    RenderSettings {
        frame_size,
        total_frames,
        readback,
        ..RenderSettings::default()
    }
}

fn capturer<R: SceneRenderer>(
    scene: R,
    settings: RenderSettings,
) -> OdsFrameCapturer<HeadlessGpu, R, FixedStepTimeline> {
    OdsFrameCapturer::new(
        HeadlessGpu::new(),
        scene,
        FixedStepTimeline::new(settings),
        &ShaderSources::ods(),
    )
    .expect("bundled ODS shaders compile")
}

fn run_to_frame<R: SceneRenderer>(
    capturer: &mut OdsFrameCapturer<HeadlessGpu, R, FixedStepTimeline>,
) -> (u32, StereoFrame) {
    for call in 1..=64 {
        if let Some(frame) = capturer.process().unwrap() {
            return (call, frame);
        }
    }
    panic!("no stereo frame within 64 calls");
}

#[test]
fn deferred_capture_emits_a_stereo_frame_on_the_twelfth_call() {
    let mut capturer = capturer(
        TestPatternScene::new(),
        settings(512, 1, ReadbackMode::Deferred),
    );
    assert_eq!(capturer.state(), OdsState::Idle);

    for _ in 0..11 {
        assert!(capturer.process().unwrap().is_none());
        assert_eq!(capturer.state(), OdsState::EyeInProgress(Eye::Left));
        assert!(!capturer.is_done());
    }
    let frame = capturer.process().unwrap().expect("frame on call twelve");
    assert_eq!(capturer.state(), OdsState::FrameReady);
    assert!(capturer.is_done());

    assert_eq!(frame.frame_id(), 0);
    for eye in [Eye::Left, Eye::Right] {
        let cubic = frame.eye(eye);
        assert_eq!(cubic.eye(), eye);
        assert_eq!(cubic.face_size(), (512, 512));
        for face in CubeFace::ALL {
            assert_eq!(cubic.face(face).face(), face);
            assert_eq!(cubic.face(face).pixels().len(), 512 * 512);
        }
    }
    assert_ne!(
        frame.left().face(CubeFace::Front).pixels(),
        frame.right().face(CubeFace::Front).pixels(),
        "eyes are rendered from different positions"
    );
    assert_eq!(capturer.gpu().stats().readbacks, 12);
    assert_eq!(capturer.renderer().draws(), 12);
    assert!(capturer.process().unwrap().is_none());
}

#[test]
fn immediate_readback_emits_every_six_calls() {
    let mut capturer = capturer(
        TestPatternScene::new(),
        settings(16, 3, ReadbackMode::Immediate),
    );
    let mut ids = Vec::new();
    for _ in 0..3 {
        let (calls, frame) = run_to_frame(&mut capturer);
        assert_eq!(calls, 6);
        ids.push(frame.frame_id());
    }
    assert_eq!(ids, vec![0, 1, 2]);
    assert!(capturer.is_done());
}

#[test]
fn both_eyes_share_one_clock_advance_per_frame() {
    let ticks = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&ticks);
    let scene = move |gpu: &mut dyn GpuBackend, partial_ticks: f32| -> anyhow::Result<()> {
        seen.borrow_mut().push(partial_ticks);
        gpu.draw_fullscreen()?;
        Ok(())
    };
    let mut capturer = capturer(
        scene,
        RenderSettings {
            fps: 40.0,
            tick_rate: 20.0,
            ..settings(4, 2, ReadbackMode::Deferred)
        },
    );

    run_to_frame(&mut capturer);
    run_to_frame(&mut capturer);

    assert_eq!(capturer.clock().advances(), 2);
    assert_eq!(capturer.info().frames_done(), 2);
    let ticks = ticks.borrow();
    assert_eq!(ticks.len(), 24);
    assert!(ticks[..12].iter().all(|&tick| tick == 0.0));
    assert!(ticks[12..].iter().all(|&tick| tick == 0.5));
}

#[test]
fn intercepted_toggles_drive_uniforms_instead_of_fixed_function_state() {
    let fogged = |gpu: &mut dyn GpuBackend, _: f32| -> anyhow::Result<()> {
        hooks::set_fog(gpu, true)?;
        gpu.draw_fullscreen()?;
        Ok(())
    };
    let clear = |gpu: &mut dyn GpuBackend, _: f32| -> anyhow::Result<()> {
        gpu.draw_fullscreen()?;
        Ok(())
    };

    let mut with_fog = capturer(fogged, settings(8, 1, ReadbackMode::Immediate));
    let (_, foggy) = run_to_frame(&mut with_fog);
    assert!(!with_fog.gpu().fog_state());

    let mut without_fog = capturer(clear, settings(8, 1, ReadbackMode::Immediate));
    let (_, plain) = run_to_frame(&mut without_fog);

    let foggy_pixel = foggy.left().face(CubeFace::Top).pixel(0, 0).unwrap();
    let plain_pixel = plain.left().face(CubeFace::Top).pixel(0, 0).unwrap();
    assert_ne!(foggy_pixel, plain_pixel);
    assert!(foggy_pixel[2] >= plain_pixel[2]);
}

#[test]
fn program_and_interceptor_are_unbound_between_calls() {
    let mut capturer = capturer(
        TestPatternScene::new(),
        settings(4, 1, ReadbackMode::Deferred),
    );
    capturer.process().unwrap();
    assert!(!capturer.program().is_active());
    assert_eq!(capturer.gpu().active_program(), None);
    assert_eq!(hooks::listener_count(EventKind::Fog), 0);
    assert_eq!(hooks::listener_count(EventKind::Texture2d), 0);
}

#[test]
fn malformed_fragment_fails_before_any_target_exists() {
    let mut sources = ShaderSources::ods();
    sources.fragment = sources
        .fragment
        .replacen("void main() {", "void main() { outColor = ;", 1);
    let mut gpu = HeadlessGpu::new();
    let err = OdsFrameCapturer::new(
        &mut gpu,
        TestPatternScene::new(),
        FixedStepTimeline::new(RenderSettings::default()),
        &sources,
    )
    .err()
    .expect("fragment with an incomplete statement is rejected");
    match err {
        CaptureError::Shader(compile) => {
            assert_eq!(compile.stage, ShaderStage::Fragment);
            assert!(!compile.log.is_empty());
        }
        other => panic!("expected a shader error, got {other}"),
    }
    assert_eq!(gpu.live_programs(), 0);
    assert_eq!(gpu.live_targets(), 0);
}

#[test]
fn missing_uniform_is_reported_and_the_program_released() {
    let sources = ShaderSources {
        label: "partial".to_string(),
        vertex: "void main() {}".to_string(),
        fragment: "layout(set = 0, binding = 0) uniform Params {\n\
                   int leftEye;\n\
                   int direction;\n\
                   } params;\n\
                   void main() {}"
            .to_string(),
    };
    let mut gpu = HeadlessGpu::new();
    let err = OdsFrameCapturer::new(
        &mut gpu,
        TestPatternScene::new(),
        FixedStepTimeline::new(RenderSettings::default()),
        &sources,
    )
    .err()
    .expect("program without sampler uniforms is rejected");
    match err {
        CaptureError::Uniform(UniformError::NotFound { program, name }) => {
            assert_eq!(program, "partial");
            assert_eq!(name, "textureUnit");
        }
        other => panic!("expected a missing uniform, got {other}"),
    }
    assert_eq!(gpu.live_programs(), 0);
    assert_eq!(gpu.live_targets(), 0);
}

#[test]
fn render_failure_leaves_nothing_bound() {
    let failing = |gpu: &mut dyn GpuBackend, _: f32| -> anyhow::Result<()> {
        hooks::set_fog(gpu, true)?;
        anyhow::bail!("world not loaded")
    };
    let mut capturer = capturer(failing, settings(4, 1, ReadbackMode::Deferred));
    let err = capturer.process().unwrap_err();
    assert!(matches!(
        err,
        CaptureError::Render {
            eye: Eye::Left,
            face: CubeFace::Left,
            ..
        }
    ));
    assert!(err.to_string().contains("world not loaded"));
    assert!(!capturer.program().is_active());
    assert_eq!(capturer.gpu().bound_target(), None);
    assert_eq!(hooks::listener_count(EventKind::Fog), 0);
    assert!(!capturer.gpu().fog_state());
}

#[test]
fn close_releases_everything_once() {
    let mut capturer = capturer(
        TestPatternScene::new(),
        settings(4, 2, ReadbackMode::Deferred),
    );
    capturer.process().unwrap();
    assert_eq!(capturer.gpu().live_targets(), 2);

    capturer.close().unwrap();
    capturer.close().unwrap();
    assert_eq!(capturer.state(), OdsState::Closed);
    assert_eq!(capturer.gpu().live_targets(), 0);
    assert_eq!(capturer.gpu().live_programs(), 0);
    assert_eq!(capturer.gpu().stats().programs_deleted, 1);
    assert!(matches!(capturer.process(), Err(CaptureError::Closed)));
}

#[test]
fn close_reports_every_failed_release() {
    let mut capturer = capturer(
        TestPatternScene::new(),
        settings(4, 1, ReadbackMode::Deferred),
    );
    capturer.process().unwrap();
    capturer.gpu_mut().fail_deletes(true);

    match capturer.close().unwrap_err() {
        CaptureError::Close(failures) => assert_eq!(failures.len(), 3),
        other => panic!("expected aggregated close failures, got {other}"),
    }
    assert!(capturer.close().is_ok());
}

#[test]
fn dropping_an_open_capturer_releases_its_resources() {
    let mut gpu = HeadlessGpu::new();
    {
        let mut capturer = OdsFrameCapturer::new(
            &mut gpu,
            TestPatternScene::new(),
            FixedStepTimeline::new(settings(4, 1, ReadbackMode::Deferred)),
            &ShaderSources::ods(),
        )
        .unwrap();
        capturer.process().unwrap();
    }
    assert_eq!(gpu.live_targets(), 0);
    assert_eq!(gpu.live_programs(), 0);
}

#[test]
fn driver_runs_a_session_to_completion() {
    let mut capturer = capturer(
        TestPatternScene::new().with_fog(false),
        settings(8, 2, ReadbackMode::Deferred),
    );
    let mut frames: Vec<StereoFrame> = Vec::new();
    let summary = CaptureDriver::new().run(&mut capturer, &mut frames).unwrap();

    assert_eq!(summary.frames, 2);
    assert_eq!(summary.calls, 24);
    assert!(!summary.cancelled);
    assert_eq!(frames[1].frame_id(), 1);
    assert_eq!(capturer.state(), OdsState::Closed);
    assert_eq!(capturer.gpu().live_programs(), 0);
}

/// Delegates to [`HeadlessGpu`] but fails the next program bind once armed.
struct FlakyBindGpu {
    inner: HeadlessGpu,
    fail_next_bind: Rc<Cell<bool>>,
}

impl GpuBackend for FlakyBindGpu {
    fn compile_program(
        &mut self,
        label: &str,
        vertex: &str,
        fragment: &str,
    ) -> Result<ProgramId, ShaderCompileError> {
        self.inner.compile_program(label, vertex, fragment)
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.inner.uniform_location(program, name)
    }

    fn use_program(&mut self, program: Option<ProgramId>) -> Result<(), GpuError> {
        if program.is_some() && self.fail_next_bind.replace(false) {
            return Err(GpuError::Device("bind rejected".into()));
        }
        self.inner.use_program(program)
    }

    fn active_program(&self) -> Option<ProgramId> {
        self.inner.active_program()
    }

    fn set_uniform(
        &mut self,
        location: UniformLocation,
        value: UniformValue,
    ) -> Result<(), GpuError> {
        self.inner.set_uniform(location, value)
    }

    fn delete_program(&mut self, program: ProgramId) -> Result<(), GpuError> {
        self.inner.delete_program(program)
    }

    fn create_target(&mut self, width: u32, height: u32) -> Result<TargetId, GpuError> {
        self.inner.create_target(width, height)
    }

    fn resize_target(
        &mut self,
        target: TargetId,
        width: u32,
        height: u32,
    ) -> Result<(), GpuError> {
        self.inner.resize_target(target, width, height)
    }

    fn bind_target(&mut self, target: Option<TargetId>) -> Result<(), GpuError> {
        self.inner.bind_target(target)
    }

    fn clear(&mut self, mask: ClearMask) -> Result<(), GpuError> {
        self.inner.clear(mask)
    }

    fn draw_fullscreen(&mut self) -> Result<(), GpuError> {
        self.inner.draw_fullscreen()
    }

    fn read_target(&mut self, target: TargetId) -> Result<Readback, GpuError> {
        self.inner.read_target(target)
    }

    fn delete_target(&mut self, target: TargetId) -> Result<(), GpuError> {
        self.inner.delete_target(target)
    }

    fn set_texture_2d_state(&mut self, unit: u32, enabled: bool) {
        self.inner.set_texture_2d_state(unit, enabled)
    }

    fn set_fog_state(&mut self, enabled: bool) {
        self.inner.set_fog_state(enabled)
    }
}

/// Timeline that arms the bind failure while it advances.
struct ArmingTimeline {
    inner: FixedStepTimeline,
    advances: Rc<Cell<u32>>,
    fail_next_bind: Rc<Cell<bool>>,
}

impl RenderInfo for ArmingTimeline {
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
        self.advances.set(self.advances.get() + 1);
        self.fail_next_bind.set(true);
        self.inner.update_for_next_frame(gpu)
    }

    fn render_settings(&self) -> &RenderSettings {
        self.inner.render_settings()
    }
}

#[test]
fn failed_rebind_after_an_advance_does_not_advance_again() {
    let fail_next_bind = Rc::new(Cell::new(false));
    let advances = Rc::new(Cell::new(0));
    let gpu = FlakyBindGpu {
        inner: HeadlessGpu::new(),
        fail_next_bind: Rc::clone(&fail_next_bind),
    };
    let info = ArmingTimeline {
        inner: FixedStepTimeline::new(settings(4, 2, ReadbackMode::Deferred)),
        advances: Rc::clone(&advances),
        fail_next_bind,
    };
    let mut capturer = OdsFrameCapturer::new(
        gpu,
        TestPatternScene::new(),
        info,
        &ShaderSources::ods(),
    )
    .unwrap();

    assert!(matches!(capturer.process(), Err(CaptureError::Program(_))));
    assert_eq!(advances.get(), 1);
    assert_eq!(capturer.clock().advances(), 1);
    assert!(!capturer.program().is_active());

    let retry = capturer.process().unwrap_err();
    assert!(matches!(
        retry,
        CaptureError::EyeOrder {
            expected: Eye::Right,
            got: Eye::Left
        }
    ));
    assert_eq!(advances.get(), 1);
    assert_eq!(capturer.info().frames_done(), 1);
}
