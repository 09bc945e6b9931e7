use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};

use crate::error::{GpuError, ShaderCompileError, ShaderStage};
use crate::frame::Rgba8;

use super::{
    glsl, ClearMask, GpuBackend, ProgramId, Readback, TargetId, UniformLocation, UniformValue,
};

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.0,
    g: 0.0,
    b: 0.0,
    a: 1.0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberKind {
    Int,
    Float,
    Other,
}

#[derive(Debug, Clone)]
struct BlockMember {
    name: String,
    offset: u32,
    kind: MemberKind,
}

/// Reflected layout of the program's `set = 0, binding = 0` uniform block.
#[derive(Debug, Clone, Default)]
struct BlockLayout {
    size: u32,
    members: Vec<BlockMember>,
}

struct UniformBlock {
    layout: BlockLayout,
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    mirror: Vec<u8>,
}

struct WgpuProgram {
    label: String,
    pipeline: wgpu::RenderPipeline,
    block: Option<UniformBlock>,
}

struct WgpuTarget {
    width: u32,
    height: u32,
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
}

/// [`GpuBackend`] on top of a wgpu device without a presentation surface.
///
/// Each program becomes a render pipeline whose single uniform block
/// (`layout(std140, set = 0, binding = 0)`) is mirrored on the host; uniform
/// writes patch the mirror and upload the touched bytes through the queue.
/// Render targets are an RGBA8 color texture paired with a depth texture.
pub struct WgpuGpu {
    _instance: wgpu::Instance,
    device: wgpu::Device,
    queue: wgpu::Queue,
    uniform_layout: wgpu::BindGroupLayout,
    next_id: u32,
    programs: HashMap<ProgramId, WgpuProgram>,
    active: Option<ProgramId>,
    targets: HashMap<TargetId, WgpuTarget>,
    bound: Option<TargetId>,
    texture_units: BTreeMap<u32, bool>,
    fog: bool,
}

impl WgpuGpu {
    /// Opens the first adapter wgpu offers, preferring high performance.
    pub fn new_headless() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let info = adapter.get_info();
        tracing::debug!(
            name = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "selected GPU adapter"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("odscapture device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ods uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        Ok(Self {
            _instance: instance,
            device,
            queue,
            uniform_layout,
            next_id: 0,
            programs: HashMap::new(),
            active: None,
            targets: HashMap::new(),
            bound: None,
            texture_units: BTreeMap::new(),
            fog: false,
        })
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

    fn bound_target(&self) -> Result<&WgpuTarget, GpuError> {
        let target = self.bound.ok_or(GpuError::NoBoundTarget)?;
        self.targets
            .get(&target)
            .ok_or(GpuError::UnknownTarget(target))
    }

    fn max_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn create_textures(&self, width: u32, height: u32) -> WgpuTarget {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let color = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("ods face color"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("ods face depth"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
        WgpuTarget {
            width,
            height,
            color,
            color_view,
            depth_view,
        }
    }

    fn build_pipeline(
        &self,
        label: &str,
        vertex: &str,
        fragment: &str,
        has_block: bool,
    ) -> Result<wgpu::RenderPipeline, ShaderCompileError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Glsl {
                shader: glsl::versioned(vertex),
                stage: wgpu::naga::ShaderStage::Vertex,
                defines: &[],
            },
        });
        let fragment_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Glsl {
                shader: glsl::versioned(fragment),
                stage: wgpu::naga::ShaderStage::Fragment,
                defines: &[],
            },
        });

        let bind_group_layouts: &[&wgpu::BindGroupLayout] = if has_block {
            &[&self.uniform_layout]
        } else {
            &[]
        };
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts,
                push_constant_ranges: &[],
            });

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some("main"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::LessEqual,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some("main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            });

        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(ShaderCompileError::new(ShaderStage::Link, err.to_string())),
            None => Ok(pipeline),
        }
    }

    fn create_block(&self, label: &str, layout: BlockLayout) -> UniformBlock {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: u64::from(layout.size),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        UniformBlock {
            mirror: vec![0; layout.size as usize],
            layout,
            buffer,
            bind_group,
        }
    }

    fn submit_pass(
        &self,
        label: &str,
        color: wgpu::LoadOp<wgpu::Color>,
        depth: wgpu::LoadOp<f32>,
        draw: bool,
    ) -> Result<(), GpuError> {
        let target = self.bound_target()?;
        let program = if draw {
            let active = self.active.ok_or(GpuError::NoActiveProgram)?;
            Some(
                self.programs
                    .get(&active)
                    .ok_or(GpuError::UnknownProgram(active))?,
            )
        } else {
            None
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            if let Some(program) = program {
                pass.set_pipeline(&program.pipeline);
                if let Some(block) = &program.block {
                    pass.set_bind_group(0, &block.bind_group, &[]);
                }
                pass.draw(0..3, 0..1);
            }
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

fn reflect_block(module: &naga::Module) -> Option<BlockLayout> {
    module.global_variables.iter().find_map(|(_, global)| {
        let binding = global.binding.as_ref()?;
        if global.space != naga::AddressSpace::Uniform || binding.group != 0 || binding.binding != 0
        {
            return None;
        }
        let naga::TypeInner::Struct { members, span } = &module.types[global.ty].inner else {
            return None;
        };
        let members = members
            .iter()
            .filter_map(|member| {
                let kind = match module.types[member.ty].inner {
                    naga::TypeInner::Scalar(naga::Scalar {
                        kind:
                            naga::ScalarKind::Sint
                            | naga::ScalarKind::Uint
                            | naga::ScalarKind::Bool,
                        ..
                    }) => MemberKind::Int,
                    naga::TypeInner::Scalar(naga::Scalar {
                        kind: naga::ScalarKind::Float,
                        ..
                    }) => MemberKind::Float,
                    _ => MemberKind::Other,
                };
                Some(BlockMember {
                    name: member.name.clone()?,
                    offset: member.offset,
                    kind,
                })
            })
            .collect();
        Some(BlockLayout {
            size: span.next_multiple_of(16).max(16),
            members,
        })
    })
}

fn merge_layouts(
    vertex: Option<BlockLayout>,
    fragment: Option<BlockLayout>,
) -> Result<Option<BlockLayout>, ShaderCompileError> {
    match (vertex, fragment) {
        (Some(vertex), Some(fragment)) => {
            let same = vertex.size == fragment.size
                && vertex.members.len() == fragment.members.len()
                && vertex
                    .members
                    .iter()
                    .zip(&fragment.members)
                    .all(|(a, b)| a.name == b.name && a.offset == b.offset && a.kind == b.kind);
            if same {
                Ok(Some(fragment))
            } else {
                Err(ShaderCompileError::new(
                    ShaderStage::Link,
                    "vertex and fragment stages declare different uniform blocks \
                     at set 0, binding 0",
                ))
            }
        }
        (vertex, fragment) => Ok(fragment.or(vertex)),
    }
}

impl GpuBackend for WgpuGpu {
    fn compile_program(
        &mut self,
        label: &str,
        vertex: &str,
        fragment: &str,
    ) -> Result<ProgramId, ShaderCompileError> {
        let vertex_module = glsl::parse_stage(ShaderStage::Vertex, vertex)?;
        let fragment_module = glsl::parse_stage(ShaderStage::Fragment, fragment)?;
        let layout = merge_layouts(
            reflect_block(&vertex_module),
            reflect_block(&fragment_module),
        )?;

        let pipeline = self.build_pipeline(label, vertex, fragment, layout.is_some())?;
        let block = layout.map(|layout| self.create_block(label, layout));

        let id = ProgramId::from_raw(self.allocate_id());
        self.programs.insert(
            id,
            WgpuProgram {
                label: label.to_string(),
                pipeline,
                block,
            },
        );
        tracing::debug!(program = label, id = id.raw(), "linked shader program");
        Ok(id)
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs
            .get(&program)?
            .block
            .as_ref()?
            .layout
            .members
            .iter()
            .position(|member| member.name == name)
            .map(|index| UniformLocation::from_raw(index as u32))
    }

    fn use_program(&mut self, program: Option<ProgramId>) -> Result<(), GpuError> {
        if let Some(id) = program {
            if !self.programs.contains_key(&id) {
                return Err(GpuError::UnknownProgram(id));
            }
        }
        self.active = program;
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
        let block = program
            .block
            .as_mut()
            .ok_or(GpuError::UnknownUniform(location.raw()))?;
        let member = block
            .layout
            .members
            .get(location.raw() as usize)
            .ok_or(GpuError::UnknownUniform(location.raw()))?;

        let bytes: [u8; 4] = match (member.kind, value) {
            (MemberKind::Int, UniformValue::Bool(_) | UniformValue::Int(_)) => {
                value.as_i32().unwrap_or_default().to_ne_bytes()
            }
            (MemberKind::Float, UniformValue::Float(value)) => value.to_ne_bytes(),
            _ => {
                return Err(GpuError::UniformType {
                    name: member.name.clone(),
                    value: value.kind_name(),
                })
            }
        };
        let offset = member.offset as usize;
        block.mirror[offset..offset + 4].copy_from_slice(&bytes);
        self.queue
            .write_buffer(&block.buffer, u64::from(member.offset), &bytes);
        Ok(())
    }

    fn delete_program(&mut self, program: ProgramId) -> Result<(), GpuError> {
        let removed = self
            .programs
            .remove(&program)
            .ok_or(GpuError::UnknownProgram(program))?;
        if self.active == Some(program) {
            self.active = None;
        }
        if let Some(block) = removed.block {
            block.buffer.destroy();
        }
        tracing::debug!(program = %removed.label, "deleted shader program");
        Ok(())
    }

    fn create_target(&mut self, width: u32, height: u32) -> Result<TargetId, GpuError> {
        let max = self.max_dimension();
        if width == 0 || height == 0 || width > max || height > max {
            return Err(GpuError::InvalidSize { width, height });
        }
        let target = self.create_textures(width, height);
        let id = TargetId::from_raw(self.allocate_id());
        self.targets.insert(id, target);
        Ok(id)
    }

    fn resize_target(
        &mut self,
        target: TargetId,
        width: u32,
        height: u32,
    ) -> Result<(), GpuError> {
        let max = self.max_dimension();
        if width == 0 || height == 0 || width > max || height > max {
            return Err(GpuError::InvalidSize { width, height });
        }
        let current = self
            .targets
            .get(&target)
            .ok_or(GpuError::UnknownTarget(target))?;
        if current.width == width && current.height == height {
            return Ok(());
        }
        let replacement = self.create_textures(width, height);
        if let Some(previous) = self.targets.insert(target, replacement) {
            previous.color.destroy();
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
        let color = if mask.color {
            wgpu::LoadOp::Clear(CLEAR_COLOR)
        } else {
            wgpu::LoadOp::Load
        };
        let depth = if mask.depth {
            wgpu::LoadOp::Clear(1.0)
        } else {
            wgpu::LoadOp::Load
        };
        self.submit_pass("ods clear", color, depth, false)
    }

    fn draw_fullscreen(&mut self) -> Result<(), GpuError> {
        self.submit_pass("ods draw", wgpu::LoadOp::Load, wgpu::LoadOp::Load, true)
    }

    fn read_target(&mut self, target: TargetId) -> Result<Readback, GpuError> {
        let source = self
            .targets
            .get(&target)
            .ok_or(GpuError::UnknownTarget(target))?;
        let (width, height) = (source.width, source.height);
        let bytes_per_row = 4 * width;
        let padded_bytes_per_row =
            bytes_per_row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ods readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("ods readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &source.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| GpuError::Readback(err.to_string()))?;
        rx.recv()
            .map_err(|err| GpuError::Readback(err.to_string()))?
            .map_err(|err| GpuError::Readback(err.to_string()))?;

        let mut pixels: Vec<Rgba8> = Vec::with_capacity(width as usize * height as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded_bytes_per_row as usize) {
                pixels.extend_from_slice(bytemuck::cast_slice(&row[..bytes_per_row as usize]));
            }
        }
        buffer.unmap();

        Ok(Readback {
            width,
            height,
            pixels,
        })
    }

    fn delete_target(&mut self, target: TargetId) -> Result<(), GpuError> {
        let removed = self
            .targets
            .remove(&target)
            .ok_or(GpuError::UnknownTarget(target))?;
        if self.bound == Some(target) {
            self.bound = None;
        }
        removed.color.destroy();
        Ok(())
    }

    fn set_texture_2d_state(&mut self, unit: u32, enabled: bool) {
        tracing::trace!(unit, enabled, "fixed-function texture state");
        self.texture_units.insert(unit, enabled);
    }

    fn set_fog_state(&mut self, enabled: bool) {
        tracing::trace!(enabled, "fixed-function fog state");
        self.fog = enabled;
    }
}
