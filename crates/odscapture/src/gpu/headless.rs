use std::collections::{BTreeMap, HashMap};

use crate::error::{GpuError, ShaderCompileError, ShaderStage};
use crate::frame::Rgba8;

use super::{
    glsl, ClearMask, GpuBackend, ProgramId, Readback, TargetId, UniformLocation, UniformValue,
};

const MAX_TARGET_DIMENSION: u32 = 16_384;
const CLEAR_COLOR: Rgba8 = [0, 0, 0, 255];
const FOG_COLOR: [f32; 3] = [192.0, 216.0, 255.0];
const CHECKER_CELL: u32 = 8;
const EYE_PARALLAX: u32 = 4;

/// Base colour per cube face ordinal, so every face of a capture is
/// distinguishable in the output.
const FACE_PALETTE: [[f32; 3]; 6] = [
    [220.0, 60.0, 60.0],
    [60.0, 200.0, 80.0],
    [70.0, 90.0, 230.0],
    [230.0, 210.0, 60.0],
    [200.0, 70.0, 210.0],
    [60.0, 200.0, 210.0],
];

/// Counters exposed for assertions about GPU traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub programs_linked: u32,
    pub programs_deleted: u32,
    pub program_binds: u64,
    pub uniform_writes: u64,
    pub targets_created: u32,
    pub targets_deleted: u32,
    pub clears: u64,
    pub draws: u64,
    pub readbacks: u64,
    pub fixed_function_toggles: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UniformKind {
    Bool,
    Int,
    Float,
    Vector,
}

impl UniformKind {
    fn from_type(inner: &naga::TypeInner) -> Self {
        match inner {
            naga::TypeInner::Scalar(scalar) => match scalar.kind {
                naga::ScalarKind::Bool => UniformKind::Bool,
                naga::ScalarKind::Sint | naga::ScalarKind::Uint => UniformKind::Int,
                _ => UniformKind::Float,
            },
            _ => UniformKind::Vector,
        }
    }

    fn accepts(self, value: UniformValue) -> bool {
        match (self, value) {
            (
                UniformKind::Bool | UniformKind::Int,
                UniformValue::Bool(_) | UniformValue::Int(_),
            ) => true,
            (UniformKind::Float, UniformValue::Float(_)) => true,
            _ => false,
        }
    }

    fn name(self) -> &'static str {
        match self {
            UniformKind::Bool => "bool",
            UniformKind::Int => "int",
            UniformKind::Float => "float",
            UniformKind::Vector => "vector",
        }
    }
}

#[derive(Debug, Clone)]
struct UniformSlot {
    name: String,
    kind: UniformKind,
    value: Option<UniformValue>,
}

#[derive(Debug, Clone)]
struct HeadlessProgram {
    label: String,
    uniforms: Vec<UniformSlot>,
}

impl HeadlessProgram {
    fn value(&self, name: &str) -> Option<UniformValue> {
        self.uniforms
            .iter()
            .find(|slot| slot.name == name)
            .and_then(|slot| slot.value)
    }
}

#[derive(Debug, Clone)]
struct Framebuffer {
    width: u32,
    height: u32,
    color: Vec<Rgba8>,
    depth: Vec<f32>,
}

impl Framebuffer {
    fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            color: vec![CLEAR_COLOR; len],
            depth: vec![1.0; len],
        }
    }
}

/// CPU implementation of [`GpuBackend`].
///
/// Both stages are parsed with naga, and the uniforms they declare (plain,
/// opaque, or members of uniform blocks) become the program's uniform table.
/// Drawing fills the bound target with a deterministic pattern derived from
/// the ODS uniforms (`direction`, `leftEye`, `textureEnabled`,
/// `lightMapEnabled`, `hurtTextureEnabled`, `fogEnabled`), which makes
/// captured faces easy to tell apart.
#[derive(Debug, Default)]
pub struct HeadlessGpu {
    next_id: u32,
    programs: HashMap<ProgramId, HeadlessProgram>,
    active: Option<ProgramId>,
    targets: HashMap<TargetId, Framebuffer>,
    bound: Option<TargetId>,
    texture_units: BTreeMap<u32, bool>,
    fog: bool,
    fail_deletes: bool,
    stats: HeadlessStats,
}

impl HeadlessGpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> HeadlessStats {
        self.stats
    }

    /// Makes every subsequent delete call fail, leaving the resource alive.
    pub fn fail_deletes(&mut self, fail: bool) {
        self.fail_deletes = fail;
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn bound_target(&self) -> Option<TargetId> {
        self.bound
    }

    /// Last value written to a uniform, regardless of which program is bound.
    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        self.programs.get(&program)?.value(name)
    }

    pub fn program_label(&self, program: ProgramId) -> Option<&str> {
        self.programs
            .get(&program)
            .map(|program| program.label.as_str())
    }

    pub fn texture_2d_state(&self, unit: u32) -> bool {
        self.texture_units.get(&unit).copied().unwrap_or(false)
    }

    pub fn fog_state(&self) -> bool {
        self.fog
    }

    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn bound_framebuffer(&mut self) -> Result<&mut Framebuffer, GpuError> {
        let target = self.bound.ok_or(GpuError::NoBoundTarget)?;
        self.targets
            .get_mut(&target)
            .ok_or(GpuError::UnknownTarget(target))
    }
}

fn validate_size(width: u32, height: u32) -> Result<(), GpuError> {
    if width == 0 || height == 0 || width > MAX_TARGET_DIMENSION || height > MAX_TARGET_DIMENSION {
        return Err(GpuError::InvalidSize { width, height });
    }
    Ok(())
}

impl GpuBackend for HeadlessGpu {
    fn compile_program(
        &mut self,
        label: &str,
        vertex: &str,
        fragment: &str,
    ) -> Result<ProgramId, ShaderCompileError> {
        let vertex_module = glsl::parse_stage(ShaderStage::Vertex, vertex)?;
        let fragment_module = glsl::parse_stage(ShaderStage::Fragment, fragment)?;
        let uniforms = link(declarations(&vertex_module), declarations(&fragment_module))?;

        let id = ProgramId::from_raw(self.allocate_id());
        self.programs.insert(
            id,
            HeadlessProgram {
                label: label.to_string(),
                uniforms,
            },
        );
        self.stats.programs_linked += 1;
        Ok(id)
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs
            .get(&program)?
            .uniforms
            .iter()
            .position(|slot| slot.name == name)
            .map(|index| UniformLocation::from_raw(index as u32))
    }

    fn use_program(&mut self, program: Option<ProgramId>) -> Result<(), GpuError> {
        if let Some(id) = program {
            if !self.programs.contains_key(&id) {
                return Err(GpuError::UnknownProgram(id));
            }
        }
        self.active = program;
        self.stats.program_binds += 1;
        Ok(())
    }

    fn active_program(&self) -> Option<ProgramId> {
        self.active
    }

    fn set_uniform(
        &mut self,
        location: UniformLocation,
        value: UniformValue,
    ) -> Result<(), GpuError> {
        let active = self.active.ok_or(GpuError::NoActiveProgram)?;
        let program = self
            .programs
            .get_mut(&active)
            .ok_or(GpuError::UnknownProgram(active))?;
        let slot = program
            .uniforms
            .get_mut(location.raw() as usize)
            .ok_or(GpuError::UnknownUniform(location.raw()))?;
        if !slot.kind.accepts(value) {
            return Err(GpuError::UniformType {
                name: slot.name.clone(),
                value: value.kind_name(),
            });
        }
        slot.value = Some(value);
        self.stats.uniform_writes += 1;
        Ok(())
    }

    fn delete_program(&mut self, program: ProgramId) -> Result<(), GpuError> {
        if self.fail_deletes {
            return Err(GpuError::Device(format!(
                "injected failure deleting program {}",
                program.raw()
            )));
        }
        self.programs
            .remove(&program)
            .ok_or(GpuError::UnknownProgram(program))?;
        if self.active == Some(program) {
            self.active = None;
        }
        self.stats.programs_deleted += 1;
        Ok(())
    }

    fn create_target(&mut self, width: u32, height: u32) -> Result<TargetId, GpuError> {
        validate_size(width, height)?;
        let id = TargetId::from_raw(self.allocate_id());
        self.targets.insert(id, Framebuffer::new(width, height));
        self.stats.targets_created += 1;
        Ok(id)
    }

    fn resize_target(
        &mut self,
        target: TargetId,
        width: u32,
        height: u32,
    ) -> Result<(), GpuError> {
        validate_size(width, height)?;
        let framebuffer = self
            .targets
            .get_mut(&target)
            .ok_or(GpuError::UnknownTarget(target))?;
        if framebuffer.width != width || framebuffer.height != height {
            *framebuffer = Framebuffer::new(width, height);
        }
        Ok(())
    }

    fn bind_target(&mut self, target: Option<TargetId>) -> Result<(), GpuError> {
        if let Some(id) = target {
            if !self.targets.contains_key(&id) {
                return Err(GpuError::UnknownTarget(id));
            }
        }
        self.bound = target;
        Ok(())
    }

    fn clear(&mut self, mask: ClearMask) -> Result<(), GpuError> {
        let framebuffer = self.bound_framebuffer()?;
        if mask.color {
            framebuffer.color.fill(CLEAR_COLOR);
        }
        if mask.depth {
            framebuffer.depth.fill(1.0);
        }
        self.stats.clears += 1;
        Ok(())
    }

    fn draw_fullscreen(&mut self) -> Result<(), GpuError> {
        let active = self.active.ok_or(GpuError::NoActiveProgram)?;
        let pattern = self
            .programs
            .get(&active)
            .map(Pattern::from_program)
            .ok_or(GpuError::UnknownProgram(active))?;
        let framebuffer = self.bound_framebuffer()?;
        let (width, height) = (framebuffer.width, framebuffer.height);
        for y in 0..height {
            for x in 0..width {
                let index = y as usize * width as usize + x as usize;
                framebuffer.color[index] = pattern.shade(x, y, height);
                framebuffer.depth[index] = 0.5;
            }
        }
        self.stats.draws += 1;
        Ok(())
    }

    fn read_target(&mut self, target: TargetId) -> Result<Readback, GpuError> {
        let framebuffer = self
            .targets
            .get(&target)
            .ok_or(GpuError::UnknownTarget(target))?;
        let readback = Readback {
            width: framebuffer.width,
            height: framebuffer.height,
            pixels: framebuffer.color.clone(),
        };
        self.stats.readbacks += 1;
        Ok(readback)
    }

    fn delete_target(&mut self, target: TargetId) -> Result<(), GpuError> {
        if self.fail_deletes {
            return Err(GpuError::Device(format!(
                "injected failure deleting target {}",
                target.raw()
            )));
        }
        self.targets
            .remove(&target)
            .ok_or(GpuError::UnknownTarget(target))?;
        if self.bound == Some(target) {
            self.bound = None;
        }
        self.stats.targets_deleted += 1;
        Ok(())
    }

    fn set_texture_2d_state(&mut self, unit: u32, enabled: bool) {
        self.texture_units.insert(unit, enabled);
        self.stats.fixed_function_toggles += 1;
    }

    fn set_fog_state(&mut self, enabled: bool) {
        self.fog = enabled;
        self.stats.fixed_function_toggles += 1;
    }
}

/// Fragment model evaluated by [`HeadlessGpu::draw_fullscreen`].
struct Pattern {
    base: [f32; 3],
    left_eye: bool,
    textured: bool,
    light_mapped: bool,
    hurt: bool,
    fog: bool,
}

impl Pattern {
    fn from_program(program: &HeadlessProgram) -> Self {
        let flag = |name: &str, default: bool| {
            program
                .value(name)
                .map(UniformValue::as_bool)
                .unwrap_or(default)
        };
        let direction = program
            .value("direction")
            .and_then(UniformValue::as_i32)
            .unwrap_or(0);
        Self {
            base: FACE_PALETTE[direction.rem_euclid(FACE_PALETTE.len() as i32) as usize],
            left_eye: flag("leftEye", true),
            textured: flag("textureEnabled", false),
            light_mapped: flag("lightMapEnabled", false),
            hurt: flag("hurtTextureEnabled", false),
            fog: flag("fogEnabled", false),
        }
    }

    fn shade(&self, x: u32, y: u32, height: u32) -> Rgba8 {
        let mut rgb = self.base;
        if self.textured {
            let shifted = if self.left_eye { x } else { x + EYE_PARALLAX };
            if (shifted / CHECKER_CELL + y / CHECKER_CELL) % 2 == 0 {
                rgb = rgb.map(|channel| channel * 0.75);
            }
        }
        if self.light_mapped {
            let light = 1.0 - 0.5 * (y as f32 / height.max(1) as f32);
            rgb = rgb.map(|channel| channel * light);
        }
        if self.hurt {
            rgb = [rgb[0] * 0.6 + 255.0 * 0.4, rgb[1] * 0.6, rgb[2] * 0.6];
        }
        if self.fog {
            rgb = [
                (rgb[0] + FOG_COLOR[0]) * 0.5,
                (rgb[1] + FOG_COLOR[1]) * 0.5,
                (rgb[2] + FOG_COLOR[2]) * 0.5,
            ];
        }
        [
            rgb[0].round().clamp(0.0, 255.0) as u8,
            rgb[1].round().clamp(0.0, 255.0) as u8,
            rgb[2].round().clamp(0.0, 255.0) as u8,
            255,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Declaration {
    name: String,
    kind: UniformKind,
}

fn declarations(module: &naga::Module) -> Vec<Declaration> {
    let mut declarations = Vec::new();
    for (_, global) in module.global_variables.iter() {
        match global.space {
            naga::AddressSpace::Uniform => match &module.types[global.ty].inner {
                naga::TypeInner::Struct { members, .. } => {
                    declarations.extend(members.iter().filter_map(|member| {
                        Some(Declaration {
                            name: member.name.clone()?,
                            kind: UniformKind::from_type(&module.types[member.ty].inner),
                        })
                    }));
                }
                inner => declarations.extend(global.name.clone().map(|name| Declaration {
                    name,
                    kind: UniformKind::from_type(inner),
                })),
            },
            // Samplers and textures are addressed by unit.
            naga::AddressSpace::Handle => {
                declarations.extend(global.name.clone().map(|name| Declaration {
                    name,
                    kind: UniformKind::Int,
                }))
            }
            _ => {}
        }
    }
    declarations
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = r"#version 450
layout(location = 0) out vec2 v_uv;
void main() {
    v_uv = vec2(0.0);
}
";

    const FRAGMENT: &str = r"#version 450
// uniform float commentedOut;
layout(std140, set = 0, binding = 0) uniform Params {
    int direction;
    int leftEye;
    float strength;
    vec4 tint;
    int fogEnabled;
} params;
layout(set = 1, binding = 0) uniform texture2D colorMap;
layout(location = 0) out vec4 outColor;
void main() {
    outColor = params.tint * params.strength;
}
";

    fn linked() -> (HeadlessGpu, ProgramId) {
        let mut gpu = HeadlessGpu::new();
        let program = gpu.compile_program("test", VERTEX, FRAGMENT).unwrap();
        (gpu, program)
    }

    #[test]
    fn reflects_block_members_and_handles() {
        let (mut gpu, program) = linked();
        for name in ["direction", "leftEye", "strength", "tint", "fogEnabled", "colorMap"] {
            assert!(gpu.uniform_location(program, name).is_some(), "{name}");
        }
        assert!(gpu.uniform_location(program, "commentedOut").is_none());
        assert!(gpu.uniform_location(program, "params").is_none());
    }

    #[test]
    fn malformed_statement_is_a_fragment_error() {
        let mut gpu = HeadlessGpu::new();
        let broken = "#version 450
layout(location = 0) out vec4 outColor;
void main() {
    outColor = ;
}
";
        let err = gpu.compile_program("broken", VERTEX, broken).unwrap_err();
        assert_eq!(err.stage, ShaderStage::Fragment);
        assert!(!err.log.is_empty());
        assert_eq!(gpu.live_programs(), 0);
        assert_eq!(gpu.stats().programs_linked, 0);
    }

    #[test]
    fn missing_main_is_a_compile_error() {
        let mut gpu = HeadlessGpu::new();
        let err = gpu
            .compile_program("no-main", "void helper() {}", FRAGMENT)
            .unwrap_err();
        assert_eq!(err.stage, ShaderStage::Vertex);
    }

    #[test]
    fn conflicting_declarations_fail_to_link() {
        let mut gpu = HeadlessGpu::new();
        let vertex = "layout(set = 0, binding = 0) uniform Params { float direction; } params;
void main() {}
";
        let err = gpu.compile_program("clash", vertex, FRAGMENT).unwrap_err();
        assert_eq!(err.stage, ShaderStage::Link);
        assert!(err.log.contains("direction"));
    }

    #[test]
    fn uniform_writes_need_an_active_program() {
        let (mut gpu, program) = linked();
        let location = gpu.uniform_location(program, "direction").unwrap();
        assert_eq!(
            gpu.set_uniform(location, UniformValue::Int(2)),
            Err(GpuError::NoActiveProgram)
        );

        gpu.use_program(Some(program)).unwrap();
        gpu.set_uniform(location, UniformValue::Int(2)).unwrap();
        assert_eq!(
            gpu.uniform_value(program, "direction"),
            Some(UniformValue::Int(2))
        );

        let strength = gpu.uniform_location(program, "strength").unwrap();
        assert!(matches!(
            gpu.set_uniform(strength, UniformValue::Bool(true)),
            Err(GpuError::UniformType { .. })
        ));
    }

    #[test]
    fn draw_shades_by_direction_and_fog() {
        let (mut gpu, program) = linked();
        let target = gpu.create_target(4, 4).unwrap();
        gpu.bind_target(Some(target)).unwrap();
        gpu.use_program(Some(program)).unwrap();
        let direction = gpu.uniform_location(program, "direction").unwrap();
        gpu.set_uniform(direction, UniformValue::Int(2)).unwrap();
        gpu.draw_fullscreen().unwrap();
        let plain = gpu.read_target(target).unwrap();
        assert_eq!(plain.pixels[0], [70, 90, 230, 255]);

        let fog = gpu.uniform_location(program, "fogEnabled").unwrap();
        gpu.set_uniform(fog, UniformValue::Bool(true)).unwrap();
        gpu.draw_fullscreen().unwrap();
        let fogged = gpu.read_target(target).unwrap();
        assert_eq!(fogged.pixels[0], [131, 153, 243, 255]);
    }

    #[test]
    fn clear_and_resize_reset_contents() {
        let (mut gpu, program) = linked();
        let target = gpu.create_target(2, 2).unwrap();
        gpu.bind_target(Some(target)).unwrap();
        gpu.use_program(Some(program)).unwrap();
        gpu.draw_fullscreen().unwrap();
        gpu.clear(ClearMask::COLOR_AND_DEPTH).unwrap();
        assert!(gpu
            .read_target(target)
            .unwrap()
            .pixels
            .iter()
            .all(|pixel| *pixel == CLEAR_COLOR));

        gpu.resize_target(target, 3, 5).unwrap();
        let resized = gpu.read_target(target).unwrap();
        assert_eq!((resized.width, resized.height), (3, 5));
        assert_eq!(resized.pixels.len(), 15);
        assert!(matches!(
            gpu.resize_target(target, 0, 5),
            Err(GpuError::InvalidSize { .. })
        ));
    }

    #[test]
    fn injected_delete_failures_keep_resources_alive() {
        let (mut gpu, program) = linked();
        let target = gpu.create_target(1, 1).unwrap();
        gpu.fail_deletes(true);
        assert!(gpu.delete_target(target).is_err());
        assert!(gpu.delete_program(program).is_err());
        assert_eq!((gpu.live_programs(), gpu.live_targets()), (1, 1));

        gpu.fail_deletes(false);
        gpu.delete_target(target).unwrap();
        gpu.delete_program(program).unwrap();
        assert_eq!(gpu.stats().programs_deleted, 1);
        assert_eq!(
            gpu.delete_program(program),
            Err(GpuError::UnknownProgram(program))
        );
    }
}
