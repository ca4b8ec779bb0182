//! Per-uniform upload caches.
//!
//! A binder is created once per compiled uniform (program + location) and
//! shared by every pass that feeds that uniform. It remembers which parameter
//! it uploaded last and at which version, so re-binding an unchanged
//! parameter costs nothing.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::device::{Device, ProgramId, UniformInfo};
use crate::tables::ParamHandle;

/// Upload cache for one non-sampler uniform.
#[derive(Debug)]
pub struct UniformBinder {
    program: ProgramId,
    uniform: UniformInfo,
    /// `(parameter id, version)` of the last upload.
    last: Mutex<Option<(u64, u64)>>,
}

impl UniformBinder {
    fn new(program: ProgramId, uniform: UniformInfo) -> Self {
        Self {
            program,
            uniform,
            last: Mutex::new(None),
        }
    }

    pub fn uniform(&self) -> &UniformInfo {
        &self.uniform
    }

    /// Uploads `param` if it differs from the last upload, by identity or by
    /// version. Returns whether an upload happened.
    ///
    /// At most `min(param.count(), uniform.size)` elements are sent.
    pub fn bind(&self, device: &mut dyn Device, param: &ParamHandle) -> bool {
        let observed = (param.id(), param.version());
        let mut last = self.last.lock();
        if *last == Some(observed) {
            return false;
        }

        let value = param.read();
        let count = value.count().min(self.uniform.size);
        device.upload_uniform(self.program, &self.uniform, count, &value.bytes(count));
        *last = Some(observed);
        true
    }

    /// Forgets the cached upload so the next bind always uploads.
    pub fn invalidate(&self) {
        *self.last.lock() = None;
    }
}

/// Texture-stage assignment for one sampler uniform.
#[derive(Debug)]
pub struct SamplerBinder {
    program: ProgramId,
    uniform: UniformInfo,
    state: Mutex<SamplerState>,
}

#[derive(Debug, Default)]
struct SamplerState {
    /// Stage the texture is currently bound to.
    bound_stage: Option<u32>,
    /// Stage index last written into the sampler uniform.
    uploaded_stage: Option<u32>,
}

impl SamplerBinder {
    fn new(program: ProgramId, uniform: UniformInfo) -> Self {
        Self {
            program,
            uniform,
            state: Mutex::new(SamplerState::default()),
        }
    }

    pub fn uniform(&self) -> &UniformInfo {
        &self.uniform
    }

    /// Binds the parameter's texture to `stage` and points the sampler at it.
    pub fn bind(&self, device: &mut dyn Device, param: &ParamHandle, stage: u32) {
        let texture = param.read().texture();
        device.bind_texture(stage, texture);

        let mut state = self.state.lock();
        if state.uploaded_stage != Some(stage) {
            let index = stage as i32;
            device.upload_uniform(self.program, &self.uniform, 1, bytemuck::bytes_of(&index));
            state.uploaded_stage = Some(stage);
        }
        state.bound_stage = Some(stage);
    }

    /// Clears the stage bound by the last [`bind`](Self::bind).
    pub fn unbind(&self, device: &mut dyn Device) {
        if let Some(stage) = self.state.lock().bound_stage.take() {
            device.bind_texture(stage, None);
        }
    }

    pub fn bound_stage(&self) -> Option<u32> {
        self.state.lock().bound_stage
    }
}

type BinderKey = (ProgramId, u32);

/// Deduplicates binders per compiled uniform.
#[derive(Debug, Default)]
pub struct UniformTable {
    uniforms: HashMap<BinderKey, Weak<UniformBinder>>,
    samplers: HashMap<BinderKey, Weak<SamplerBinder>>,
}

impl UniformTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared binder for `uniform` of `program`.
    pub fn uniform_binder(&mut self, program: ProgramId, uniform: &UniformInfo) -> Arc<UniformBinder> {
        let key = (program, uniform.location);
        if let Some(binder) = self.uniforms.get(&key).and_then(Weak::upgrade) {
            return binder;
        }
        let binder = Arc::new(UniformBinder::new(program, uniform.clone()));
        self.uniforms.retain(|_, binder| binder.strong_count() > 0);
        self.uniforms.insert(key, Arc::downgrade(&binder));
        binder
    }

    /// The shared sampler binder for `uniform` of `program`.
    pub fn sampler_binder(&mut self, program: ProgramId, uniform: &UniformInfo) -> Arc<SamplerBinder> {
        let key = (program, uniform.location);
        if let Some(binder) = self.samplers.get(&key).and_then(Weak::upgrade) {
            return binder;
        }
        let binder = Arc::new(SamplerBinder::new(program, uniform.clone()));
        self.samplers.retain(|_, binder| binder.strong_count() > 0);
        self.samplers.insert(key, Arc::downgrade(&binder));
        binder
    }

    /// Number of live binders of both kinds.
    ///
    /// Entries whose binders were dropped are pruned on the next miss.
    pub fn len(&self) -> usize {
        let live_uniforms = self.uniforms.values().filter(|b| b.strong_count() > 0).count();
        let live_samplers = self.samplers.values().filter(|b| b.strong_count() > 0).count();
        live_uniforms + live_samplers
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HeadlessDevice, ShaderStage, TextureId};
    use crate::tables::{ParamType, ParamValue, ParameterTable, TextureKind};
    use glam::{Mat4, Vec4};

    fn program(device: &mut HeadlessDevice) -> ProgramId {
        let vs = device
            .compile_shader(
                ShaderStage::Vertex,
                "uniform mat4 viewMatrix;\nuniform vec4 lights[2];\nuniform sampler2D diffuseMap;\nin vec3 position;\n",
            )
            .unwrap();
        device.link_program(&[vs]).unwrap()
    }

    fn uniform(device: &HeadlessDevice, program: ProgramId, name: &str) -> UniformInfo {
        device
            .program_uniforms(program)
            .into_iter()
            .find(|u| u.name == name)
            .unwrap()
    }

    #[test]
    fn unchanged_parameter_uploads_once() {
        let mut device = HeadlessDevice::new();
        let program = program(&mut device);
        let mut params = ParameterTable::new();
        let mut table = UniformTable::new();

        let view = params.add_parameter("viewMatrix", Mat4::IDENTITY, false).unwrap();
        view.write_values(Mat4::IDENTITY);

        let binder = table.uniform_binder(program, &uniform(&device, program, "viewMatrix"));
        for _ in 0..5 {
            binder.bind(&mut device, &view);
        }
        assert_eq!(device.uploads_of("viewMatrix"), 1);
    }

    #[test]
    fn each_distinct_version_uploads_once() {
        let mut device = HeadlessDevice::new();
        let program = program(&mut device);
        let mut table = UniformTable::new();
        let binder = table.uniform_binder(program, &uniform(&device, program, "viewMatrix"));
        let view = ParamHandle::anonymous(Mat4::IDENTITY, false);

        for i in 0..4 {
            view.write_values(Mat4::from_scale(glam::Vec3::splat(i as f32 + 1.0)));
            binder.bind(&mut device, &view);
            binder.bind(&mut device, &view);
        }
        assert_eq!(device.uploads_of("viewMatrix"), 4);
    }

    #[test]
    fn switching_parameter_identity_reuploads() {
        let mut device = HeadlessDevice::new();
        let program = program(&mut device);
        let mut table = UniformTable::new();
        let binder = table.uniform_binder(program, &uniform(&device, program, "viewMatrix"));

        let a = ParamHandle::anonymous(Mat4::IDENTITY, false);
        let b = ParamHandle::anonymous(Mat4::IDENTITY, false);
        assert!(binder.bind(&mut device, &a));
        assert!(binder.bind(&mut device, &b));
        assert!(binder.bind(&mut device, &a));
        assert!(!binder.bind(&mut device, &a));
    }

    #[test]
    fn dynamic_parameter_uploads_every_bind() {
        let mut device = HeadlessDevice::new();
        let program = program(&mut device);
        let mut table = UniformTable::new();
        let binder = table.uniform_binder(program, &uniform(&device, program, "viewMatrix"));
        let view = ParamHandle::anonymous(Mat4::IDENTITY, true);

        for _ in 0..3 {
            binder.bind(&mut device, &view);
        }
        assert_eq!(device.uploads_of("viewMatrix"), 3);
    }

    #[test]
    fn upload_count_is_clamped_to_uniform_size() {
        let mut device = HeadlessDevice::new();
        let program = program(&mut device);
        let mut table = UniformTable::new();
        let binder = table.uniform_binder(program, &uniform(&device, program, "lights"));
        let lights = ParamHandle::anonymous(vec![Vec4::ONE; 3], false);

        binder.bind(&mut device, &lights);
        assert_eq!(device.uploads[0].count, 2);
    }

    #[test]
    fn binders_are_shared_per_uniform() {
        let mut device = HeadlessDevice::new();
        let program = program(&mut device);
        let mut table = UniformTable::new();
        let info = uniform(&device, program, "viewMatrix");

        let a = table.uniform_binder(program, &info);
        let b = table.uniform_binder(program, &info);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn sampler_unbind_clears_stage() {
        let mut device = HeadlessDevice::new();
        let program = program(&mut device);
        let mut table = UniformTable::new();
        let info = uniform(&device, program, "diffuseMap");
        assert_eq!(info.ty, Some(ParamType::Texture(TextureKind::D2)));

        let sampler = table.sampler_binder(program, &info);
        let map = ParamHandle::anonymous(ParamValue::Texture(TextureKind::D2, Some(TextureId(9))), false);

        sampler.bind(&mut device, &map, 3);
        assert_eq!(device.bound_texture(3), Some(TextureId(9)));

        sampler.unbind(&mut device);
        assert_eq!(device.bound_texture(3), None);
        assert_eq!(sampler.bound_stage(), None);
    }

    #[test]
    fn dropped_binders_are_pruned_on_the_next_miss() {
        let mut device = HeadlessDevice::new();
        let program = program(&mut device);
        let mut table = UniformTable::new();

        let view = table.uniform_binder(program, &uniform(&device, program, "viewMatrix"));
        let sampler = table.sampler_binder(program, &uniform(&device, program, "diffuseMap"));
        drop((view, sampler));
        assert!(table.is_empty());

        let _lights = table.uniform_binder(program, &uniform(&device, program, "lights"));
        let _sampler = table.sampler_binder(program, &uniform(&device, program, "diffuseMap"));
        assert_eq!(table.uniforms.len(), 1);
        assert_eq!(table.samplers.len(), 1);
        assert_eq!(table.len(), 2);
    }
}
