//! A flat `hecs` world.

use std::sync::Arc;

use glam::Vec3;
use hecs::Entity;

use super::{CullVisitor, Light, Renderable, SceneWorld};
use crate::camera::Frustum;

/// World-space bounds used for frustum culling.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }
}

struct Drawable(Arc<dyn Renderable>);

/// Renderables and lights stored as entities, culled by brute force.
///
/// Renderables without a [`BoundingSphere`] and directional lights are
/// always visible.
///
/// # Example
///
/// ```ignore
/// let mut world = EcsWorld::new();
/// world.spawn_renderable(Arc::new(Primitive::new(effect, 0..36)), None);
/// world.spawn_light(DirectionalLight::new(Vec3::NEG_Y));
/// let world = parking_lot::RwLock::new(world);
/// renderer.render(&mut device, &mut ctx, &world, &camera);
/// ```
#[derive(Default)]
pub struct EcsWorld {
    world: hecs::World,
}

impl EcsWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn_renderable(
        &mut self,
        renderable: Arc<dyn Renderable>,
        bounds: Option<BoundingSphere>,
    ) -> Entity {
        match bounds {
            Some(bounds) => self.world.spawn((Drawable(renderable), bounds)),
            None => self.world.spawn((Drawable(renderable),)),
        }
    }

    pub fn spawn_light(&mut self, light: impl Into<Light>) -> Entity {
        self.world.spawn((light.into(),))
    }

    /// Removes an entity. Returns `false` if it was already gone.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        self.world.despawn(entity).is_ok()
    }

    pub fn set_bounds(&mut self, entity: Entity, bounds: BoundingSphere) -> bool {
        self.world.insert_one(entity, bounds).is_ok()
    }

    /// Mutable access to a light, e.g. to animate it.
    pub fn light_mut(&mut self, entity: Entity) -> Option<hecs::RefMut<'_, Light>> {
        self.world.get::<&mut Light>(entity).ok()
    }

    pub fn len(&self) -> u32 {
        self.world.len()
    }

    pub fn is_empty(&self) -> bool {
        self.world.is_empty()
    }
}

impl SceneWorld for EcsWorld {
    fn visit(&self, frustum: &Frustum, visitor: &mut dyn CullVisitor) {
        for (drawable, bounds) in self
            .world
            .query::<(&Drawable, Option<&BoundingSphere>)>()
            .iter()
            .map(|(_, components)| components)
        {
            let visible = bounds.is_none_or(|b| frustum.intersects_sphere(b.center, b.radius));
            if visible {
                visitor.add_renderable(Arc::clone(&drawable.0));
            }
        }

        for (_, light) in self.world.query::<&Light>().iter() {
            let visible = light
                .bounds()
                .is_none_or(|(center, radius)| frustum.intersects_sphere(center, radius));
            if visible {
                visitor.add_light(*light);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::device::Device;
    use crate::effect::{EffectState, SharedEffect};
    use crate::scene::{CullResults, DirectionalLight, PointLight};

    struct Marker(SharedEffect);

    impl Renderable for Marker {
        fn effect(&self) -> &SharedEffect {
            &self.0
        }

        fn render(&self, _device: &mut dyn Device) {}
    }

    struct Inert;

    impl crate::effect::Effect for Inert {
        fn present(
            &mut self,
            _device: &mut dyn Device,
            _ctx: &mut crate::tables::RenderContext,
            _group: crate::phase::RenderGroup,
            _pass: crate::phase::RenderPass,
        ) -> crate::effect_pass::PassList {
            Vec::new()
        }

        fn query_attribute(&self, _name: &str) -> Option<u32> {
            None
        }

        fn state(&self) -> EffectState {
            EffectState::Clean
        }

        fn mark_dirty(&mut self) {}
    }

    fn marker() -> Arc<dyn Renderable> {
        Arc::new(Marker(crate::effect::shared(Inert)))
    }

    #[test]
    fn culls_by_bounds() {
        let mut world = EcsWorld::new();
        world.spawn_renderable(marker(), Some(BoundingSphere::new(Vec3::ZERO, 1.0)));
        world.spawn_renderable(marker(), Some(BoundingSphere::new(Vec3::new(0.0, 0.0, 50.0), 1.0)));
        world.spawn_renderable(marker(), None);
        world.spawn_light(DirectionalLight::new(Vec3::NEG_Y));
        world.spawn_light(PointLight::new(Vec3::new(0.0, 0.0, 40.0), 2.0));
        world.spawn_light(PointLight::new(Vec3::new(0.0, 0.0, 10.0), 8.0));

        let camera = Camera::new().looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let mut results = CullResults::new();
        world.visit(&camera.frustum(), &mut results);

        assert_eq!(results.renderables.len(), 2);
        assert_eq!(results.lights.len(), 2);
    }

    #[test]
    fn despawn_removes_entities() {
        let mut world = EcsWorld::new();
        let light = world.spawn_light(DirectionalLight::new(Vec3::NEG_Y));
        assert_eq!(world.len(), 1);
        assert!(world.despawn(light));
        assert!(!world.despawn(light));
        assert!(world.is_empty());
    }
}
