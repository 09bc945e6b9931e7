use std::fmt;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use odscapture::ReadbackMode;

#[derive(Parser, Debug)]
#[command(
    name = "odscap",
    author,
    version,
    about = "Headless stereo ODS capture driver",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Capture session TOML file; flags below override its values.
    #[arg(long, value_name = "FILE", env = "ODSCAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of stereo frames to capture.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub frames: Option<u32>,

    /// Edge length of each cube face in pixels.
    #[arg(long, value_name = "PX", value_parser = parse_frame_size)]
    pub frame_size: Option<u32>,

    /// Output frames per second of simulated time.
    #[arg(long, value_name = "FPS", value_parser = parse_fps)]
    pub fps: Option<f64>,

    /// Face readback strategy: `deferred` (one call later) or `immediate`.
    #[arg(long, value_name = "MODE", value_parser = parse_readback)]
    pub readback: Option<ReadbackMode>,

    /// Directory receiving the PNG strips and `session.json`.
    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// GPU backend: `headless` (CPU model) or `wgpu`.
    #[arg(
        long,
        value_name = "BACKEND",
        value_parser = parse_backend,
        default_value_t = Backend::Headless
    )]
    pub backend: Backend,

    #[command(flatten)]
    pub shaders: ShaderArgs,

    /// Render the test pattern without fog.
    #[arg(long)]
    pub no_fog: bool,
}

#[derive(Parser, Debug, Default)]
pub struct ShaderArgs {
    /// Vertex shader replacing the bundled ODS one (requires `--fragment`).
    #[arg(long, value_name = "PATH", requires = "fragment")]
    pub vertex: Option<PathBuf>,

    /// Fragment shader replacing the bundled ODS one (requires `--vertex`).
    #[arg(long, value_name = "PATH", requires = "vertex")]
    pub fragment: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a shader pair and check it exposes every ODS uniform.
    CheckShaders(CheckShadersArgs),
}

#[derive(Parser, Debug)]
pub struct CheckShadersArgs {
    #[command(flatten)]
    pub shaders: ShaderArgs,

    #[arg(
        long,
        value_name = "BACKEND",
        value_parser = parse_backend,
        default_value_t = Backend::Headless
    )]
    pub backend: Backend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Headless,
    Wgpu,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Headless => f.write_str("headless"),
            Backend::Wgpu => f.write_str("wgpu"),
        }
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_backend(value: &str) -> Result<Backend, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("backend must not be empty".to_string());
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "headless" | "cpu" => Ok(Backend::Headless),
        "wgpu" | "gpu" => {
            if cfg!(feature = "wgpu") {
                Ok(Backend::Wgpu)
            } else {
                Err("wgpu support is not enabled in this build".to_string())
            }
        }
        other => Err(format!(
            "unknown backend '{other}' (expected headless or wgpu)"
        )),
    }
}

pub fn parse_readback(value: &str) -> Result<ReadbackMode, String> {
    value.parse()
}

pub fn parse_frame_size(value: &str) -> Result<u32, String> {
    let size: u32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid frame size '{value}'; expected pixels"))?;
    if size == 0 {
        return Err("frame size must be greater than zero".into());
    }
    if size > 8192 {
        return Err(format!("frame size {size} exceeds the 8192px limit"));
    }
    Ok(size)
}

pub fn parse_fps(value: &str) -> Result<f64, String> {
    let fps: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid fps '{value}'"))?;
    if !fps.is_finite() || fps <= 0.0 {
        return Err("fps must be greater than zero".into());
    }
    Ok(fps)
}
