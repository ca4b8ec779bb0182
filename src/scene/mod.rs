//! The seam between the renderer and whatever owns the scene.
//!
//! The renderer never walks a scene graph itself. It hands a camera
//! [`Frustum`] to [`SceneWorld::visit`] and collects what the world reports
//! through a [`CullVisitor`]:
//!
//! ```text
//! ForwardRenderer ──visit(frustum)──► SceneWorld
//!        ▲                               │
//!        └── add_renderable / add_light ─┘
//! ```
//!
//! [`EcsWorld`] is a small `hecs`-backed world good enough for demos and
//! tests. Anything with real spatial structure implements [`SceneWorld`]
//! directly.

mod light;
mod world;

pub use light::{DirectionalLight, Light, LightKind, PointLight, SpotLight};
pub use world::{BoundingSphere, EcsWorld};

use std::ops::Range;
use std::sync::Arc;

use crate::camera::Frustum;
use crate::device::Device;
use crate::effect::SharedEffect;

/// Something drawn with an effect.
pub trait Renderable: Send + Sync {
    fn effect(&self) -> &SharedEffect;

    /// Issues the draw calls. The effect's pass is already bound.
    fn render(&self, device: &mut dyn Device);
}

/// A renderable issuing one non-indexed draw.
pub struct Primitive {
    effect: SharedEffect,
    vertices: Range<u32>,
    instances: Range<u32>,
}

impl Primitive {
    pub fn new(effect: SharedEffect, vertices: Range<u32>) -> Self {
        Self {
            effect,
            vertices,
            instances: 0..1,
        }
    }

    pub fn with_instances(mut self, instances: Range<u32>) -> Self {
        self.instances = instances;
        self
    }
}

impl Renderable for Primitive {
    fn effect(&self) -> &SharedEffect {
        &self.effect
    }

    fn render(&self, device: &mut dyn Device) {
        device.draw(self.vertices.clone(), self.instances.clone());
    }
}

/// Receives what a world finds inside a frustum.
pub trait CullVisitor {
    fn add_renderable(&mut self, renderable: Arc<dyn Renderable>);

    fn add_light(&mut self, light: Light);
}

/// A scene the renderer can cull.
pub trait SceneWorld: Send + Sync {
    /// Reports every renderable and light that may affect `frustum`.
    fn visit(&self, frustum: &Frustum, visitor: &mut dyn CullVisitor);
}

/// Renderables and lights collected by one visit.
#[derive(Default)]
pub struct CullResults {
    pub renderables: Vec<Arc<dyn Renderable>>,
    pub lights: Vec<Light>,
}

impl CullResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empties both lists, keeping their capacity.
    pub fn clear(&mut self) {
        self.renderables.clear();
        self.lights.clear();
    }
}

impl CullVisitor for CullResults {
    fn add_renderable(&mut self, renderable: Arc<dyn Renderable>) {
        self.renderables.push(renderable);
    }

    fn add_light(&mut self, light: Light) {
        self.lights.push(light);
    }
}
