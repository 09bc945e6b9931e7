use crate::error::InterceptError;
use crate::hooks::EventRegistrations;
use crate::program::UniformHandle;

/// Uniforms that fixed-function toggles are redirected into.
#[derive(Debug, Clone)]
pub struct InterceptBindings {
    /// Indexed by texture unit: base texture, light map, hurt overlay.
    pub texture_units: [UniformHandle; 3],
    pub fog: UniformHandle,
}

/// Turns fixed-function texture and fog toggles into uniform writes while
/// active.
///
/// Texture unit `i` in `0..=2` writes the event's enabled flag into the i-th
/// binding; other units are swallowed. Fog always writes the fog binding.
#[derive(Debug, Default)]
pub struct StateInterceptor {
    registrations: Option<EventRegistrations>,
}

impl StateInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to the state events. The bindings' program must be active
    /// whenever an event fires.
    pub fn activate(&mut self, bindings: &InterceptBindings) -> Result<(), InterceptError> {
        if self.registrations.is_some() {
            return Err(InterceptError::AlreadyActive);
        }
        let mut registrations = EventRegistrations::new();

        let units = bindings.texture_units.clone();
        registrations.on_texture_2d(move |gpu, unit, enabled| {
            match units.get(unit as usize) {
                Some(binding) => binding.set(gpu, enabled),
                None => Ok(()),
            }
        });

        let fog = bindings.fog.clone();
        registrations.on_fog(move |gpu, enabled| fog.set(gpu, enabled));

        self.registrations = Some(registrations);
        Ok(())
    }

    /// Unsubscribes. Returns whether the interceptor was active.
    pub fn deactivate(&mut self) -> bool {
        self.registrations.take().is_some()
    }

    pub fn is_active(&self) -> bool {
        self.registrations.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GpuBackend, HeadlessGpu, UniformValue};
    use crate::hooks::{self, EventKind};
    use crate::program::{OdsUniforms, ShaderProgram, ShaderSources};

    fn active_program(gpu: &mut HeadlessGpu) -> (ShaderProgram, OdsUniforms) {
        let mut program = ShaderProgram::compile_and_link(gpu, &ShaderSources::ods()).unwrap();
        let uniforms = OdsUniforms::resolve(gpu, &mut program).unwrap();
        program.use_program(gpu).unwrap();
        (program, uniforms)
    }

    #[test]
    fn texture_units_map_onto_bindings() {
        let mut gpu = HeadlessGpu::new();
        let (program, uniforms) = active_program(&mut gpu);
        let mut interceptor = StateInterceptor::new();
        interceptor
            .activate(&uniforms.intercept_bindings())
            .unwrap();

        hooks::set_texture_2d(&mut gpu, 0, true).unwrap();
        hooks::set_texture_2d(&mut gpu, 1, false).unwrap();
        hooks::set_texture_2d(&mut gpu, 2, true).unwrap();
        let id = program.id();
        assert_eq!(
            gpu.uniform_value(id, "textureEnabled"),
            Some(UniformValue::Bool(true))
        );
        assert_eq!(
            gpu.uniform_value(id, "lightMapEnabled"),
            Some(UniformValue::Bool(false))
        );
        assert_eq!(
            gpu.uniform_value(id, "hurtTextureEnabled"),
            Some(UniformValue::Bool(true))
        );
        assert!(!gpu.texture_2d_state(0));
    }

    #[test]
    fn units_outside_the_table_are_ignored() {
        let mut gpu = HeadlessGpu::new();
        let (_program, uniforms) = active_program(&mut gpu);
        let mut interceptor = StateInterceptor::new();
        interceptor
            .activate(&uniforms.intercept_bindings())
            .unwrap();

        let writes = gpu.stats().uniform_writes;
        hooks::set_texture_2d(&mut gpu, 3, true).unwrap();
        hooks::set_texture_2d(&mut gpu, 7, false).unwrap();
        assert_eq!(gpu.stats().uniform_writes, writes);
    }

    #[test]
    fn fog_follows_activation() {
        let mut gpu = HeadlessGpu::new();
        let (program, uniforms) = active_program(&mut gpu);
        let mut interceptor = StateInterceptor::new();
        interceptor
            .activate(&uniforms.intercept_bindings())
            .unwrap();

        hooks::set_fog(&mut gpu, true).unwrap();
        assert_eq!(
            gpu.uniform_value(program.id(), "fogEnabled"),
            Some(UniformValue::Bool(true))
        );

        assert!(interceptor.deactivate());
        assert_eq!(hooks::listener_count(EventKind::Fog), 0);
        hooks::set_fog(&mut gpu, false).unwrap();
        assert_eq!(
            gpu.uniform_value(program.id(), "fogEnabled"),
            Some(UniformValue::Bool(true))
        );
        assert!(!gpu.fog_state());
    }

    #[test]
    fn double_activation_is_rejected() {
        let mut gpu = HeadlessGpu::new();
        let (_program, uniforms) = active_program(&mut gpu);
        let bindings = uniforms.intercept_bindings();
        let mut interceptor = StateInterceptor::new();
        interceptor.activate(&bindings).unwrap();
        assert_eq!(
            interceptor.activate(&bindings),
            Err(InterceptError::AlreadyActive)
        );
        assert_eq!(hooks::listener_count(EventKind::Texture2d), 1);
        assert!(gpu.active_program().is_some());
    }
}
