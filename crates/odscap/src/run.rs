use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use captureconfig::{CaptureConfig, ReadbackSetting};
use odscapture::{
    CaptureDriver, FixedStepTimeline, GpuBackend, HeadlessGpu, OdsFrameCapturer, OdsUniform,
    ReadbackMode, RenderSettings, ShaderProgram, ShaderSources, TestPatternScene,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::cli::{Backend, CheckShadersArgs, RunArgs, ShaderArgs};
use crate::sink::PngStripSink;

pub const SESSION_FILE: &str = "session.json";

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Everything a capture session needs once config and flags are merged.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub settings: RenderSettings,
    pub sources: ShaderSources,
    pub output: PathBuf,
    pub backend: Backend,
    pub fog: bool,
}

/// Written next to the frames once a session ends.
#[derive(Debug, Serialize)]
struct SessionReport<'a> {
    program: &'a str,
    backend: String,
    frame_size: u32,
    fps: f64,
    tick_rate: f64,
    readback: String,
    frames_requested: u32,
    frames_written: u32,
    process_calls: u64,
    cancelled: bool,
    elapsed_ms: u128,
    files: Vec<String>,
}

pub fn run(args: RunArgs) -> Result<()> {
    let plan = resolve_plan(&args)?;
    tracing::info!(
        backend = %plan.backend,
        program = %plan.sources.label,
        frames = plan.settings.total_frames,
        frame_size = plan.settings.frame_size,
        readback = %plan.settings.readback,
        output = %plan.output.display(),
        "starting ODS capture"
    );
    match plan.backend {
        Backend::Headless => run_session(HeadlessGpu::new(), &plan),
        Backend::Wgpu => run_wgpu_session(&plan),
    }
}

#[cfg(feature = "wgpu")]
fn run_wgpu_session(plan: &SessionPlan) -> Result<()> {
    let gpu = odscapture::WgpuGpu::new_headless().context("failed to initialise wgpu device")?;
    run_session(gpu, plan)
}

#[cfg(not(feature = "wgpu"))]
fn run_wgpu_session(_plan: &SessionPlan) -> Result<()> {
    bail!("wgpu support is not enabled in this build")
}

pub fn resolve_plan(args: &RunArgs) -> Result<SessionPlan> {
    let config = match args.config.as_deref() {
        Some(path) => CaptureConfig::load(path)
            .with_context(|| format!("failed to load capture config {}", path.display()))?,
        None => CaptureConfig::default(),
    };

    let readback = args.readback.unwrap_or(match config.capture.readback {
        ReadbackSetting::Deferred => ReadbackMode::Deferred,
        ReadbackSetting::Immediate => ReadbackMode::Immediate,
    });
    let settings = RenderSettings {
        frame_size: args.frame_size.unwrap_or(config.capture.frame_size),
        fps: args.fps.unwrap_or_else(|| config.frame_rate()),
        total_frames: args.frames.unwrap_or(config.capture.frames),
        tick_rate: config.capture.tick_rate,
        readback,
    };

    let sources = match (&args.shaders.vertex, &args.shaders.fragment, &config.shaders) {
        (Some(vertex), Some(fragment), _) => ShaderSources::load(vertex, fragment)?,
        (None, None, Some(paths)) => ShaderSources::load(&paths.vertex, &paths.fragment)?,
        (None, None, None) => ShaderSources::ods(),
        _ => bail!("--vertex and --fragment must be given together"),
    };

    Ok(SessionPlan {
        settings,
        sources,
        output: args
            .output
            .clone()
            .unwrap_or_else(|| config.output.directory.clone()),
        backend: args.backend,
        fog: !args.no_fog,
    })
}

fn run_session<G: GpuBackend>(gpu: G, plan: &SessionPlan) -> Result<()> {
    let started = Instant::now();
    let timeline = FixedStepTimeline::new(plan.settings.clone());
    let scene = TestPatternScene::new().with_fog(plan.fog);
    let mut capturer = OdsFrameCapturer::new(gpu, scene, timeline, &plan.sources)
        .with_context(|| format!("failed to set up ODS program '{}'", plan.sources.label))?;
    let mut sink = PngStripSink::create(&plan.output)?;

    let driver = CaptureDriver::new();
    if let Err(err) = cancel_on_interrupt(driver.cancel_handle()) {
        tracing::warn!(%err, "failed to install Ctrl-C handler; capture cannot be interrupted");
    }
    let summary = driver
        .run(&mut capturer, &mut sink)
        .context("capture session failed")?;
    if summary.cancelled {
        tracing::warn!(frames = summary.frames, "capture interrupted");
    }

    let report = SessionReport {
        program: &plan.sources.label,
        backend: plan.backend.to_string(),
        frame_size: plan.settings.frame_size,
        fps: plan.settings.fps,
        tick_rate: plan.settings.tick_rate,
        readback: plan.settings.readback.to_string(),
        frames_requested: plan.settings.total_frames,
        frames_written: summary.frames,
        process_calls: summary.calls,
        cancelled: summary.cancelled,
        elapsed_ms: started.elapsed().as_millis(),
        files: sink
            .written()
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect(),
    };
    write_report(sink.directory(), &report)?;

    tracing::info!(
        frames = summary.frames,
        calls = summary.calls,
        elapsed_ms = report.elapsed_ms,
        "capture finished"
    );
    Ok(())
}

/// Stops the session at the next call boundary on Ctrl-C.
fn cancel_on_interrupt(cancel: Arc<AtomicBool>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || cancel.store(true, Ordering::SeqCst))
}

fn write_report(directory: &Path, report: &SessionReport<'_>) -> Result<()> {
    let path = directory.join(SESSION_FILE);
    let json = serde_json::to_string_pretty(report).context("failed to encode session report")?;
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn check_shaders(args: CheckShadersArgs) -> Result<()> {
    let sources = shader_sources(&args.shaders)?;
    match args.backend {
        Backend::Headless => check_program(&mut HeadlessGpu::new(), &sources),
        Backend::Wgpu => check_program_wgpu(&sources),
    }
}

#[cfg(feature = "wgpu")]
fn check_program_wgpu(sources: &ShaderSources) -> Result<()> {
    let mut gpu =
        odscapture::WgpuGpu::new_headless().context("failed to initialise wgpu device")?;
    check_program(&mut gpu, sources)
}

#[cfg(not(feature = "wgpu"))]
fn check_program_wgpu(_sources: &ShaderSources) -> Result<()> {
    bail!("wgpu support is not enabled in this build")
}

fn shader_sources(args: &ShaderArgs) -> Result<ShaderSources> {
    match (&args.vertex, &args.fragment) {
        (Some(vertex), Some(fragment)) => ShaderSources::load(vertex, fragment),
        (None, None) => Ok(ShaderSources::ods()),
        _ => bail!("--vertex and --fragment must be given together"),
    }
}

fn check_program(gpu: &mut dyn GpuBackend, sources: &ShaderSources) -> Result<()> {
    let mut program = ShaderProgram::compile_and_link(gpu, sources)
        .with_context(|| format!("shader program '{}' failed to build", sources.label))?;
    let missing: Vec<&str> = OdsUniform::ALL
        .iter()
        .map(|uniform| uniform.name())
        .filter(|name| program.uniform(gpu, name).is_err())
        .collect();
    program
        .release(gpu)
        .context("failed to release checked program")?;

    if !missing.is_empty() {
        bail!(
            "shader program '{}' is missing ODS uniforms: {}",
            sources.label,
            missing.join(", ")
        );
    }
    println!(
        "{}: ok ({} ODS uniforms resolved)",
        sources.label,
        OdsUniform::ALL.len()
    );
    Ok(())
}
