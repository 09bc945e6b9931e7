//! GPU seam used by the capture pipeline.
//!
//! The capturers never talk to a graphics API directly. Everything they need
//! from the device goes through [`GpuBackend`], a deliberately GL-shaped
//! surface:
//! - programs are compiled and linked from a vertex/fragment pair, their
//!   uniforms are resolved by name and written while the program is bound;
//! - offscreen render targets are created, resized, bound, cleared and read
//!   back into host memory;
//! - the legacy fixed-function toggles (2D texturing per unit, fog) exist so
//!   a scene renderer written against them keeps working, and so the
//!   [`hooks`](crate::hooks) layer has something to intercept.
//!
//! Two implementations ship with the crate:
//! - `headless` is a CPU model with deterministic output, used by the tests
//!   and the `odscap` driver by default; it parses GLSL with naga like the
//!   device backend does;
//! - `wgpu_backend` (feature `wgpu`) maps programs to render pipelines with a
//!   single uniform block and render targets to textures.

mod glsl;
mod headless;
#[cfg(feature = "wgpu")]
mod wgpu_backend;

pub use headless::{HeadlessGpu, HeadlessStats};
#[cfg(feature = "wgpu")]
pub use wgpu_backend::WgpuGpu;

use crate::error::{GpuError, ShaderCompileError};
use crate::frame::Rgba8;

/// Opaque handle to a linked program owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(u32);

impl ProgramId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Location of a uniform inside one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(u32);

impl UniformLocation {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Opaque handle to an offscreen color+depth render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u32);

impl TargetId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Scalar values a uniform can be set to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    Float(f32),
}

impl UniformValue {
    pub fn kind_name(self) -> &'static str {
        match self {
            UniformValue::Bool(_) => "bool",
            UniformValue::Int(_) => "int",
            UniformValue::Float(_) => "float",
        }
    }

    /// Interprets the value the way GLSL converts scalars to `bool`.
    pub fn as_bool(self) -> bool {
        match self {
            UniformValue::Bool(value) => value,
            UniformValue::Int(value) => value != 0,
            UniformValue::Float(value) => value != 0.0,
        }
    }

    pub fn as_i32(self) -> Option<i32> {
        match self {
            UniformValue::Bool(value) => Some(i32::from(value)),
            UniformValue::Int(value) => Some(value),
            UniformValue::Float(_) => None,
        }
    }
}

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        UniformValue::Bool(value)
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        UniformValue::Int(value)
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Float(value)
    }
}

/// Buffers affected by [`GpuBackend::clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearMask {
    pub color: bool,
    pub depth: bool,
}

impl ClearMask {
    pub const COLOR: ClearMask = ClearMask {
        color: true,
        depth: false,
    };
    pub const COLOR_AND_DEPTH: ClearMask = ClearMask {
        color: true,
        depth: true,
    };
}

/// Tightly packed RGBA8 copy of a render target, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readback {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Rgba8>,
}

/// GL-shaped device operations consumed by the capture pipeline.
///
/// All calls happen on the thread that owns the device. Uniform writes go to
/// the active program; drawing goes to the bound target.
pub trait GpuBackend {
    /// Compiles both stages and links them into a program.
    fn compile_program(
        &mut self,
        label: &str,
        vertex: &str,
        fragment: &str,
    ) -> Result<ProgramId, ShaderCompileError>;

    /// Resolves a uniform by name, `None` when the linked program lacks it.
    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    /// Binds `program`, or unbinds the current one with `None`.
    fn use_program(&mut self, program: Option<ProgramId>) -> Result<(), GpuError>;

    fn active_program(&self) -> Option<ProgramId>;

    /// Writes a uniform of the active program.
    fn set_uniform(
        &mut self,
        location: UniformLocation,
        value: UniformValue,
    ) -> Result<(), GpuError>;

    fn delete_program(&mut self, program: ProgramId) -> Result<(), GpuError>;

    fn create_target(&mut self, width: u32, height: u32) -> Result<TargetId, GpuError>;

    /// Reallocates the target's storage when the size changed; contents are
    /// undefined afterwards.
    fn resize_target(
        &mut self,
        target: TargetId,
        width: u32,
        height: u32,
    ) -> Result<(), GpuError>;

    /// Routes drawing into `target`, or back to the default framebuffer.
    fn bind_target(&mut self, target: Option<TargetId>) -> Result<(), GpuError>;

    fn clear(&mut self, mask: ClearMask) -> Result<(), GpuError>;

    /// Draws one full-screen triangle with the active program into the bound
    /// target.
    fn draw_fullscreen(&mut self) -> Result<(), GpuError>;

    fn read_target(&mut self, target: TargetId) -> Result<Readback, GpuError>;

    fn delete_target(&mut self, target: TargetId) -> Result<(), GpuError>;

    /// Fixed-function 2D texturing toggle for one texture unit.
    fn set_texture_2d_state(&mut self, unit: u32, enabled: bool);

    /// Fixed-function fog toggle.
    fn set_fog_state(&mut self, enabled: bool);
}

impl<T: GpuBackend + ?Sized> GpuBackend for &mut T {
    fn compile_program(
        &mut self,
        label: &str,
        vertex: &str,
        fragment: &str,
    ) -> Result<ProgramId, ShaderCompileError> {
        (**self).compile_program(label, vertex, fragment)
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        (**self).uniform_location(program, name)
    }

    fn use_program(&mut self, program: Option<ProgramId>) -> Result<(), GpuError> {
        (**self).use_program(program)
    }

    fn active_program(&self) -> Option<ProgramId> {
        (**self).active_program()
    }

    fn set_uniform(
        &mut self,
        location: UniformLocation,
        value: UniformValue,
    ) -> Result<(), GpuError> {
        (**self).set_uniform(location, value)
    }

    fn delete_program(&mut self, program: ProgramId) -> Result<(), GpuError> {
        (**self).delete_program(program)
    }

    fn create_target(&mut self, width: u32, height: u32) -> Result<TargetId, GpuError> {
        (**self).create_target(width, height)
    }

    fn resize_target(
        &mut self,
        target: TargetId,
        width: u32,
        height: u32,
    ) -> Result<(), GpuError> {
        (**self).resize_target(target, width, height)
    }

    fn bind_target(&mut self, target: Option<TargetId>) -> Result<(), GpuError> {
        (**self).bind_target(target)
    }

    fn clear(&mut self, mask: ClearMask) -> Result<(), GpuError> {
        (**self).clear(mask)
    }

    fn draw_fullscreen(&mut self) -> Result<(), GpuError> {
        (**self).draw_fullscreen()
    }

    fn read_target(&mut self, target: TargetId) -> Result<Readback, GpuError> {
        (**self).read_target(target)
    }

    fn delete_target(&mut self, target: TargetId) -> Result<(), GpuError> {
        (**self).delete_target(target)
    }

    fn set_texture_2d_state(&mut self, unit: u32, enabled: bool) {
        (**self).set_texture_2d_state(unit, enabled)
    }

    fn set_fog_state(&mut self, enabled: bool) {
        (**self).set_fog_state(enabled)
    }
}
