use glam::Vec4;

use super::acquire;
use crate::camera::Camera;
use crate::scene::Light;
use crate::tables::{ParamHandle, ParameterTable};

/// Per-bucket light arrays, each `max_light_count` long.
///
/// Only the first `lightCount` entries are meaningful after a setup call;
/// programs compiled for smaller buckets read a prefix.
pub(crate) struct LightParams {
    max_light_count: usize,
    count: ParamHandle,
    view_direction_ambient: ParamHandle,
    view_position_radius: ParamHandle,
    direction_ambient: ParamHandle,
    position_radius: ParamHandle,
    color_intensity: ParamHandle,
}

impl LightParams {
    pub fn new(params: &mut ParameterTable, max_light_count: usize) -> Self {
        let array = || vec![Vec4::ZERO; max_light_count];
        Self {
            max_light_count,
            count: acquire(params, "lightCount", 0i32),
            view_direction_ambient: acquire(params, "lightViewDirectionAmbient", array()),
            view_position_radius: acquire(params, "lightViewPositionRadius", array()),
            direction_ambient: acquire(params, "lightDirectionAmbient", array()),
            position_radius: acquire(params, "lightPositionRadius", array()),
            color_intensity: acquire(params, "lightColorIntensity", array()),
        }
    }

    pub fn max_light_count(&self) -> usize {
        self.max_light_count
    }

    /// Publishes up to `max_light_count` directional lights. Other kinds in
    /// `lights` are skipped.
    pub fn setup_directional(&self, camera: &Camera, lights: &[Light]) {
        let normal = camera.normal_matrix();
        let mut count = 0;
        for light in lights.iter().take(self.max_light_count) {
            let Light::Directional(directional) = light else {
                continue;
            };
            let direction = directional.direction;
            self.direction_ambient
                .write_value(count, direction.normalize_or_zero().extend(directional.ambient));
            self.view_direction_ambient
                .write_value(count, (normal * direction).normalize_or_zero().extend(directional.ambient));
            self.color_intensity.write_value(count, light.color_intensity());
            count += 1;
        }
        self.count.write_values(count as i32);
    }

    /// Publishes up to `max_light_count` point lights.
    pub fn setup_point(&self, camera: &Camera, lights: &[Light]) {
        let view = camera.view();
        let mut count = 0;
        for light in lights.iter().take(self.max_light_count) {
            let Light::Point(point) = light else {
                continue;
            };
            self.position_radius
                .write_value(count, point.position.extend(point.radius));
            self.view_position_radius
                .write_value(count, view.transform_point3(point.position).extend(point.radius));
            self.color_intensity.write_value(count, light.color_intensity());
            count += 1;
        }
        self.count.write_values(count as i32);
    }
}
