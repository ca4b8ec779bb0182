use glam::{Mat3, Mat4, Vec4};

use super::acquire;
use crate::camera::Camera;
use crate::tables::{ParamHandle, ParameterTable};

/// Scene-wide camera parameters, rewritten for every camera.
pub(crate) struct CameraParams {
    normal: ParamHandle,
    view: ParamHandle,
    inv_view: ParamHandle,
    projection: ParamHandle,
    inv_projection: ParamHandle,
    depth_params: ParamHandle,
    eye_position: ParamHandle,
}

impl CameraParams {
    pub fn new(params: &mut ParameterTable) -> Self {
        Self {
            normal: acquire(params, "normalMatrix", Mat3::IDENTITY),
            view: acquire(params, "viewMatrix", Mat4::IDENTITY),
            inv_view: acquire(params, "invViewMatrix", Mat4::IDENTITY),
            projection: acquire(params, "projectionMatrix", Mat4::IDENTITY),
            inv_projection: acquire(params, "invProjectionMatrix", Mat4::IDENTITY),
            depth_params: acquire(params, "depthParams", Vec4::ZERO),
            eye_position: acquire(params, "eyePosition", Vec4::W),
        }
    }

    pub fn setup(&self, camera: &Camera) {
        let inv_view = camera.inverse_view();
        let inv_projection = camera.projection().inverse();

        self.normal.write_values(camera.normal_matrix());
        self.view.write_values(camera.view());
        self.inv_view.write_values(inv_view);
        self.projection.write_values(camera.projection());
        self.inv_projection.write_values(inv_projection);
        self.depth_params.write_values(depth_params(inv_projection));
        self.eye_position.write_values(inv_view.w_axis);
    }
}

/// The inverse projection entries needed to turn window depth back into
/// view-space depth.
pub(crate) fn depth_params(inv_projection: Mat4) -> Vec4 {
    Vec4::new(
        inv_projection.z_axis.z,
        inv_projection.z_axis.w,
        inv_projection.w_axis.z,
        inv_projection.w_axis.w,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::ParamType;
    use approx::assert_relative_eq;
    use glam::Vec3;

    #[test]
    fn depth_params_linearize_depth() {
        let (near, far) = (0.5, 40.0);
        let projection = Mat4::perspective_rh_gl(1.0, 1.0, near, far);
        let params = depth_params(projection.inverse());

        // Mirrors linearizeDepth in depth.frag.
        let linearize = |ndc_z: f32| -(params.x * ndc_z + params.z) / (params.y * ndc_z + params.w);
        assert_relative_eq!(linearize(-1.0), near, epsilon = 1e-4);
        assert_relative_eq!(linearize(1.0), far, epsilon = 1e-2);
    }

    #[test]
    fn eye_position_comes_from_the_inverse_view() {
        let mut table = ParameterTable::new();
        let params = CameraParams::new(&mut table);
        let eye = Vec3::new(3.0, 1.0, -2.0);
        params.setup(&Camera::new().looking_at(eye, Vec3::ZERO, Vec3::Y));

        let published = table
            .parameter_of_type("eyePosition", ParamType::Vec4)
            .and_then(|p| p.read().vec4(0))
            .unwrap();
        assert_relative_eq!(published.truncate().distance(eye), 0.0, epsilon = 1e-5);
        assert_eq!(published.w, 1.0);
    }
}
