use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::error::{GpuError, ProgramError, ShaderCompileError, UniformError};
use crate::gpu::{GpuBackend, ProgramId, UniformLocation, UniformValue};
use crate::intercept::InterceptBindings;

const ODS_VERTEX: &str = include_str!("../shaders/ods.vert");
const ODS_FRAGMENT: &str = include_str!("../shaders/ods.frag");

/// GLSL source pair for one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSources {
    pub label: String,
    pub vertex: String,
    pub fragment: String,
}

impl ShaderSources {
    /// The ODS projection shaders bundled with the crate.
    pub fn ods() -> Self {
        Self {
            label: "ods".to_string(),
            vertex: ODS_VERTEX.to_string(),
            fragment: ODS_FRAGMENT.to_string(),
        }
    }

    /// Reads a vertex/fragment pair from disk, labelled after the fragment
    /// file stem.
    pub fn load(vertex: &Path, fragment: &Path) -> anyhow::Result<Self> {
        let vertex_source = std::fs::read_to_string(vertex)
            .with_context(|| format!("failed to read vertex shader at {}", vertex.display()))?;
        let fragment_source = std::fs::read_to_string(fragment).with_context(|| {
            format!("failed to read fragment shader at {}", fragment.display())
        })?;
        let label = fragment
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("custom")
            .to_string();
        Ok(Self {
            label,
            vertex: vertex_source,
            fragment: fragment_source,
        })
    }
}

/// Typed handle to one uniform of one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformHandle {
    program: ProgramId,
    location: UniformLocation,
    name: Arc<str>,
}

impl UniformHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn location(&self) -> UniformLocation {
        self.location
    }

    /// Writes the uniform. The owning program must be the active one;
    /// otherwise nothing reaches the GPU.
    pub fn set(
        &self,
        gpu: &mut dyn GpuBackend,
        value: impl Into<UniformValue>,
    ) -> Result<(), UniformError> {
        if gpu.active_program() != Some(self.program) {
            return Err(UniformError::ProgramInactive {
                name: self.name.to_string(),
            });
        }
        gpu.set_uniform(self.location, value.into())?;
        Ok(())
    }
}

/// A linked program and its resolved uniforms.
#[derive(Debug)]
pub struct ShaderProgram {
    id: ProgramId,
    label: String,
    uniforms: HashMap<String, UniformHandle>,
    active: bool,
    released: bool,
}

impl ShaderProgram {
    pub fn compile_and_link(
        gpu: &mut dyn GpuBackend,
        sources: &ShaderSources,
    ) -> Result<Self, ShaderCompileError> {
        let id = gpu.compile_program(&sources.label, &sources.vertex, &sources.fragment)?;
        tracing::debug!(program = %sources.label, id = id.raw(), "compiled shader program");
        Ok(Self {
            id,
            label: sources.label.clone(),
            uniforms: HashMap::new(),
            active: false,
            released: false,
        })
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Resolves `name` once; later lookups return the cached handle.
    pub fn uniform(
        &mut self,
        gpu: &mut dyn GpuBackend,
        name: &str,
    ) -> Result<UniformHandle, UniformError> {
        if let Some(handle) = self.uniforms.get(name) {
            return Ok(handle.clone());
        }
        let not_found = || UniformError::NotFound {
            program: self.label.clone(),
            name: name.to_string(),
        };
        if self.released {
            return Err(not_found());
        }
        let location = gpu.uniform_location(self.id, name).ok_or_else(not_found)?;
        let handle = UniformHandle {
            program: self.id,
            location,
            name: Arc::from(name),
        };
        self.uniforms.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    pub fn use_program(&mut self, gpu: &mut dyn GpuBackend) -> Result<(), ProgramError> {
        self.ensure_live()?;
        if self.active {
            return Err(ProgramError::AlreadyActive {
                label: self.label.clone(),
            });
        }
        gpu.use_program(Some(self.id))?;
        self.active = true;
        Ok(())
    }

    pub fn stop_using(&mut self, gpu: &mut dyn GpuBackend) -> Result<(), ProgramError> {
        self.ensure_live()?;
        if !self.active {
            return Err(ProgramError::NotActive {
                label: self.label.clone(),
            });
        }
        self.active = false;
        gpu.use_program(None)?;
        Ok(())
    }

    /// Deletes the GPU program. Only the first call reaches the device.
    pub fn release(&mut self, gpu: &mut dyn GpuBackend) -> Result<(), GpuError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.uniforms.clear();
        if self.active {
            self.active = false;
            if gpu.active_program() == Some(self.id) {
                gpu.use_program(None)?;
            }
        }
        gpu.delete_program(self.id)?;
        tracing::debug!(program = %self.label, "released shader program");
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), ProgramError> {
        if self.released {
            Err(ProgramError::Released {
                label: self.label.clone(),
            })
        } else {
            Ok(())
        }
    }
}

/// Uniforms the ODS program has to expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OdsUniform {
    LeftEye,
    Direction,
    TextureUnit,
    LightMapUnit,
    TextureEnabled,
    LightMapEnabled,
    HurtTextureEnabled,
    FogEnabled,
}

impl OdsUniform {
    pub const ALL: [OdsUniform; 8] = [
        OdsUniform::LeftEye,
        OdsUniform::Direction,
        OdsUniform::TextureUnit,
        OdsUniform::LightMapUnit,
        OdsUniform::TextureEnabled,
        OdsUniform::LightMapEnabled,
        OdsUniform::HurtTextureEnabled,
        OdsUniform::FogEnabled,
    ];

    /// Identifier in the GLSL source.
    pub fn name(self) -> &'static str {
        match self {
            OdsUniform::LeftEye => "leftEye",
            OdsUniform::Direction => "direction",
            OdsUniform::TextureUnit => "textureUnit",
            OdsUniform::LightMapUnit => "lightMapUnit",
            OdsUniform::TextureEnabled => "textureEnabled",
            OdsUniform::LightMapEnabled => "lightMapEnabled",
            OdsUniform::HurtTextureEnabled => "hurtTextureEnabled",
            OdsUniform::FogEnabled => "fogEnabled",
        }
    }
}

/// Every [`OdsUniform`] resolved against one program.
#[derive(Debug, Clone)]
pub struct OdsUniforms {
    handles: Vec<UniformHandle>,
}

impl OdsUniforms {
    /// Fails with the first uniform the program does not expose.
    pub fn resolve(
        gpu: &mut dyn GpuBackend,
        program: &mut ShaderProgram,
    ) -> Result<Self, UniformError> {
        let handles = OdsUniform::ALL
            .iter()
            .map(|uniform| program.uniform(gpu, uniform.name()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { handles })
    }

    pub fn get(&self, uniform: OdsUniform) -> &UniformHandle {
        &self.handles[uniform as usize]
    }

    /// Texture units 0..=2 and fog, in the order the interceptor maps them.
    pub fn intercept_bindings(&self) -> InterceptBindings {
        InterceptBindings {
            texture_units: [
                self.get(OdsUniform::TextureEnabled).clone(),
                self.get(OdsUniform::LightMapEnabled).clone(),
                self.get(OdsUniform::HurtTextureEnabled).clone(),
            ],
            fog: self.get(OdsUniform::FogEnabled).clone(),
        }
    }
}
