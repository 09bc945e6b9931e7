use std::fmt;

use crate::frame::{CubeFace, Eye, FrameError};
use crate::gpu::{ProgramId, TargetId};

/// Pipeline stage a shader diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Link,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
            ShaderStage::Link => f.write_str("link"),
        }
    }
}

/// Compiler or linker diagnostic for a shader program.
///
/// Always fatal for a capture session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage} stage of shader program failed: {log}")]
pub struct ShaderCompileError {
    pub stage: ShaderStage,
    pub log: String,
}

impl ShaderCompileError {
    pub fn new(stage: ShaderStage, log: impl Into<String>) -> Self {
        Self {
            stage,
            log: log.into(),
        }
    }
}

/// Failures reported by a [`GpuBackend`](crate::gpu::GpuBackend).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GpuError {
    #[error("unknown program {0:?}")]
    UnknownProgram(ProgramId),
    #[error("unknown render target {0:?}")]
    UnknownTarget(TargetId),
    #[error("no program is active")]
    NoActiveProgram,
    #[error("no render target is bound")]
    NoBoundTarget,
    #[error("invalid render target size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("uniform '{name}' cannot hold a {value} value")]
    UniformType { name: String, value: &'static str },
    #[error("uniform location {0} is out of range for the active program")]
    UnknownUniform(u32),
    #[error("render target readback failed: {0}")]
    Readback(String),
    #[error("GPU device error: {0}")]
    Device(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UniformError {
    #[error("uniform '{name}' not found in program '{program}'")]
    NotFound { program: String, name: String },
    #[error("uniform '{name}' written while its program is not active")]
    ProgramInactive { name: String },
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgramError {
    #[error("program '{label}' is already active")]
    AlreadyActive { label: String },
    #[error("program '{label}' is not active")]
    NotActive { label: String },
    #[error("program '{label}' has been released")]
    Released { label: String },
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InterceptError {
    #[error("state interceptor is already active")]
    AlreadyActive,
}

/// Everything that can stop a capture session.
///
/// "Not ready yet" is never an error; capturers report it as `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error(transparent)]
    Shader(#[from] ShaderCompileError),
    #[error(transparent)]
    Uniform(#[from] UniformError),
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error(transparent)]
    Intercept(#[from] InterceptError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("scene render failed for the {face} face of the {eye} eye: {cause:#}")]
    Render {
        eye: Eye,
        face: CubeFace,
        cause: anyhow::Error,
    },
    #[error("frame timeline failed to advance: {0:#}")]
    Timeline(anyhow::Error),
    #[error("eye requests must alternate: expected the {expected} eye, got the {got} eye")]
    EyeOrder { expected: Eye, got: Eye },
    #[error("capturer has been closed")]
    Closed,
    #[error("failed to release {} capture resource(s): {}", .0.len(), join_errors(.0))]
    Close(Vec<GpuError>),
}

impl CaptureError {
    /// Recovers a typed capture error that travelled through an
    /// `anyhow::Error` (for example out of a wrapped `RenderInfo`).
    pub(crate) fn from_timeline(err: anyhow::Error) -> Self {
        match err.downcast::<CaptureError>() {
            Ok(capture) => capture,
            Err(other) => CaptureError::Timeline(other),
        }
    }
}

fn join_errors(errors: &[GpuError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
