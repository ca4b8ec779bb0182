//! Cameras: view, projection, viewport and where the frame ends up.
//!
//! A camera is plain data handed to
//! [`ForwardRenderer::render`](crate::ForwardRenderer::render). Besides its
//! matrices it carries an optional explicit render target and a chain of
//! post-process filters. A camera with filters but no target renders into the
//! renderer's internal ping-pong target and the last filter writes to the
//! screen.
//!
//! Reflect cameras mirror another camera about a plane. They draw the
//! `Reflect` render group, usually into an off-screen texture that a water
//! surface samples later in the frame.
//!
//! ```ignore
//! let main = Camera::new()
//!     .with_viewport(Viewport::new(1280, 720))
//!     .looking_at(Vec3::new(0.0, 4.0, 10.0), Vec3::ZERO, Vec3::Y)
//!     .with_fov(60.0);
//!
//! let water_plane = Vec4::new(0.0, 1.0, 0.0, 0.0);
//! let reflect = main.reflected(water_plane, reflect_target, reflect_texture);
//! ```

use std::sync::Arc;

use glam::{Mat3, Mat4, Vec3, Vec4};
use parking_lot::RwLock;

use crate::device::{RenderTargetId, TextureId, Viewport};
use crate::post_process::PostProcessFilter;

/// A camera shared between the application and effects reading its matrices.
pub type SharedCamera = Arc<RwLock<Camera>>;

/// Six clip planes, normals pointing inwards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extracts the planes of a view-projection matrix (OpenGL clip space).
    pub fn from_matrix(view_projection: Mat4) -> Self {
        let row = |i| view_projection.row(i);
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));
        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r3 + r2, r3 - r2].map(|plane| {
            let length = plane.truncate().length();
            if length > 0.0 { plane / length } else { plane }
        });
        Self { planes }
    }

    pub fn planes(&self) -> &[Vec4; 6] {
        &self.planes
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.intersects_sphere(point, 0.0)
    }

    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }
}

/// What a camera renders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CameraKind {
    #[default]
    Main,
    /// Draws the `Reflect` group; `reflect_texture` gets its mip chain
    /// regenerated after the camera finishes.
    Reflect { reflect_texture: Option<TextureId> },
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Lens {
    fov: f32,
    near: f32,
    far: f32,
}

/// View and projection plus the render target and filter chain they feed.
#[derive(Clone)]
pub struct Camera {
    view: Mat4,
    projection: Mat4,
    /// Projection used for culling when it differs from the drawing one.
    cull_projection: Option<Mat4>,
    lens: Option<Lens>,
    viewport: Viewport,
    kind: CameraKind,
    target: Option<RenderTargetId>,
    filters: Vec<Arc<dyn PostProcessFilter>>,
}

impl Default for Camera {
    fn default() -> Self {
        let viewport = Viewport::new(1280, 720);
        let lens = Lens {
            fov: std::f32::consts::FRAC_PI_2,
            near: 0.1,
            far: 1000.0,
        };
        Self {
            view: Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y),
            projection: perspective(lens, viewport),
            cull_projection: None,
            lens: Some(lens),
            viewport,
            kind: CameraKind::Main,
            target: None,
            filters: Vec::new(),
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn looking_at(mut self, eye: Vec3, target: Vec3, up: Vec3) -> Self {
        self.view = Mat4::look_at_rh(eye, target, up);
        self
    }

    /// Vertical field of view in degrees.
    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        let mut lens = self.lens.unwrap_or(Lens {
            fov: 0.0,
            near: 0.1,
            far: 1000.0,
        });
        lens.fov = fov_degrees.to_radians();
        self.set_lens(lens);
        self
    }

    pub fn with_clip_planes(mut self, near: f32, far: f32) -> Self {
        let mut lens = self.lens.unwrap_or(Lens {
            fov: std::f32::consts::FRAC_PI_2,
            near,
            far,
        });
        lens.near = near;
        lens.far = far;
        self.set_lens(lens);
        self
    }

    pub fn with_view(mut self, view: Mat4) -> Self {
        self.view = view;
        self
    }

    /// Replaces the projection. Later viewport changes leave it untouched.
    pub fn with_projection(mut self, projection: Mat4) -> Self {
        self.projection = projection;
        self.lens = None;
        self
    }

    /// Sets the viewport, refitting a perspective projection to its aspect.
    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        if let Some(lens) = self.lens {
            self.projection = perspective(lens, viewport);
        }
        self
    }

    pub fn with_target(mut self, target: RenderTargetId) -> Self {
        self.target = Some(target);
        self
    }

    /// Appends a post-process filter.
    pub fn with_filter(mut self, filter: Arc<dyn PostProcessFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_kind(mut self, kind: CameraKind) -> Self {
        self.kind = kind;
        self
    }

    /// A camera mirroring this one about `plane` (`xyz` normal, `w` offset).
    ///
    /// The projection gets an oblique near plane lying on the mirror, so
    /// geometry behind it is clipped. Culling still uses this camera's
    /// projection.
    pub fn reflected(&self, plane: Vec4, target: RenderTargetId, reflect_texture: TextureId) -> Camera {
        let length = plane.truncate().length();
        let plane = if length > 0.0 { plane / length } else { plane };
        let view = self.view * mirror(plane);
        let view_plane = view.inverse().transpose() * plane;

        Camera {
            view,
            projection: oblique_projection(self.projection, view_plane),
            cull_projection: Some(self.projection),
            lens: None,
            viewport: self.viewport,
            kind: CameraKind::Reflect {
                reflect_texture: Some(reflect_texture),
            },
            target: Some(target),
            filters: Vec::new(),
        }
    }

    pub fn set_view(&mut self, view: Mat4) {
        self.view = view;
    }

    pub fn set_filters(&mut self, filters: Vec<Arc<dyn PostProcessFilter>>) {
        self.filters = filters;
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn inverse_view(&self) -> Mat4 {
        self.view.inverse()
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    /// Transforms world-space directions into view space.
    pub fn normal_matrix(&self) -> Mat3 {
        Mat3::from_mat4(self.view.inverse().transpose())
    }

    pub fn eye_position(&self) -> Vec3 {
        self.inverse_view().w_axis.truncate()
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_matrix(self.cull_projection.unwrap_or(self.projection) * self.view)
    }

    /// Maps world positions to `[0, 1]` texture coordinates of this camera's
    /// image.
    pub fn reflection_matrix(&self) -> Mat4 {
        Mat4::from_translation(Vec3::new(0.5, 0.5, 0.0))
            * Mat4::from_scale(Vec3::new(0.5, 0.5, 1.0))
            * self.projection
            * self.view
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn kind(&self) -> CameraKind {
        self.kind
    }

    pub fn is_reflect(&self) -> bool {
        matches!(self.kind, CameraKind::Reflect { .. })
    }

    /// Explicit render target, if any.
    pub fn target(&self) -> Option<RenderTargetId> {
        self.target
    }

    pub fn filters(&self) -> &[Arc<dyn PostProcessFilter>] {
        &self.filters
    }

    fn set_lens(&mut self, lens: Lens) {
        self.lens = Some(lens);
        self.projection = perspective(lens, self.viewport);
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("view", &self.view)
            .field("projection", &self.projection)
            .field("viewport", &self.viewport)
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("filters", &self.filters.len())
            .finish()
    }
}

fn perspective(lens: Lens, viewport: Viewport) -> Mat4 {
    Mat4::perspective_rh_gl(lens.fov, viewport.aspect(), lens.near, lens.far)
}

/// Householder reflection about a normalized plane.
fn mirror(plane: Vec4) -> Mat4 {
    let n = plane.truncate();
    Mat4::from_cols(
        (Vec3::X - 2.0 * n.x * n).extend(0.0),
        (Vec3::Y - 2.0 * n.y * n).extend(0.0),
        (Vec3::Z - 2.0 * n.z * n).extend(0.0),
        (-2.0 * plane.w * n).extend(1.0),
    )
}

/// Replaces the near plane of `projection` with `clip_plane` (view space).
fn oblique_projection(mut projection: Mat4, clip_plane: Vec4) -> Mat4 {
    let q = Vec4::new(
        (clip_plane.x.signum() + projection.z_axis.x) / projection.x_axis.x,
        (clip_plane.y.signum() + projection.z_axis.y) / projection.y_axis.y,
        -1.0,
        (1.0 + projection.z_axis.z) / projection.w_axis.z,
    );
    let c = clip_plane * (2.0 / clip_plane.dot(q));
    projection.x_axis.z = c.x;
    projection.y_axis.z = c.y;
    projection.z_axis.z = c.z + 1.0;
    projection.w_axis.z = c.w;
    projection
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn frustum_culls_points_behind_the_eye() {
        let camera = Camera::new().looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let frustum = camera.frustum();
        assert!(frustum.contains_point(Vec3::ZERO));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 10.0)));
        assert!(frustum.intersects_sphere(Vec3::new(0.0, 0.0, 5.5), 1.0));
    }

    #[test]
    fn viewport_change_refits_aspect() {
        let camera = Camera::new().with_fov(60.0).with_viewport(Viewport::new(800, 400));
        let expected = Mat4::perspective_rh_gl(60f32.to_radians(), 2.0, 0.1, 1000.0);
        assert_eq!(camera.projection(), expected);

        let fixed = Camera::new()
            .with_projection(Mat4::IDENTITY)
            .with_viewport(Viewport::new(10, 10));
        assert_eq!(fixed.projection(), Mat4::IDENTITY);
    }

    #[test]
    fn reflected_camera_mirrors_the_eye() {
        let main = Camera::new().looking_at(Vec3::new(1.0, 3.0, 6.0), Vec3::ZERO, Vec3::Y);
        let reflect = main.reflected(Vec4::new(0.0, 2.0, 0.0, 0.0), RenderTargetId(1), TextureId(7));

        let eye = reflect.eye_position();
        assert_relative_eq!(eye.x, 1.0, epsilon = 1e-4);
        assert_relative_eq!(eye.y, -3.0, epsilon = 1e-4);
        assert_relative_eq!(eye.z, 6.0, epsilon = 1e-4);

        assert!(reflect.is_reflect());
        assert_eq!(reflect.target(), Some(RenderTargetId(1)));
        assert_eq!(
            reflect.kind(),
            CameraKind::Reflect {
                reflect_texture: Some(TextureId(7))
            }
        );
        // Mirroring flips the winding.
        assert!(reflect.view().determinant() < 0.0);
    }

    #[test]
    fn oblique_near_plane_lies_on_the_mirror() {
        let main = Camera::new().looking_at(Vec3::new(0.0, 3.0, 6.0), Vec3::ZERO, Vec3::Y);
        let reflect = main.reflected(Vec4::new(0.0, 1.0, 0.0, 0.0), RenderTargetId(1), TextureId(2));

        // A point on the mirror plane in front of the camera lands on the near plane.
        let clip = reflect.projection() * reflect.view() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(clip.z / clip.w, -1.0, epsilon = 1e-3);
    }

    #[test]
    fn reflection_matrix_maps_to_texture_space() {
        let camera = Camera::new();
        let uv = camera.reflection_matrix() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(uv.x / uv.w, 0.5, epsilon = 1e-5);
        assert_relative_eq!(uv.y / uv.w, 0.5, epsilon = 1e-5);
    }
}
