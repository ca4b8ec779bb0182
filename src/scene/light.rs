//! Light sources the renderer groups into lighting passes.

use glam::{Vec3, Vec4};

/// Light types, in the order the renderer draws them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LightKind {
    Directional,
    Point,
    Spot,
}

/// Parallel light, like the sun.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels in (world space).
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub ambient: f32,
}

impl DirectionalLight {
    pub fn new(direction: Vec3) -> Self {
        Self {
            direction,
            color: Vec3::ONE,
            intensity: 1.0,
            ambient: 0.0,
        }
    }

    pub fn with_color(mut self, color: Vec3) -> Self {
        self.color = color;
        self
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_ambient(mut self, ambient: f32) -> Self {
        self.ambient = ambient;
        self
    }
}

/// Omni light with a finite range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub radius: f32,
    pub color: Vec3,
    pub intensity: f32,
    pub ambient: f32,
}

impl PointLight {
    pub fn new(position: Vec3, radius: f32) -> Self {
        Self {
            position,
            radius,
            color: Vec3::ONE,
            intensity: 1.0,
            ambient: 0.0,
        }
    }

    pub fn with_color(mut self, color: Vec3) -> Self {
        self.color = color;
        self
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }
}

/// Cone light. Drawn in its own pass but not parameterized yet.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpotLight {
    pub position: Vec3,
    pub direction: Vec3,
    pub radius: f32,
    /// Half-angle of the cone, radians.
    pub cutoff: f32,
    pub color: Vec3,
    pub intensity: f32,
}

impl SpotLight {
    pub fn new(position: Vec3, direction: Vec3, radius: f32, cutoff: f32) -> Self {
        Self {
            position,
            direction,
            radius,
            cutoff,
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }
}

/// Any light a world can report.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Light {
    Directional(DirectionalLight),
    Point(PointLight),
    Spot(SpotLight),
}

impl Light {
    pub fn kind(&self) -> LightKind {
        match self {
            Light::Directional(_) => LightKind::Directional,
            Light::Point(_) => LightKind::Point,
            Light::Spot(_) => LightKind::Spot,
        }
    }

    /// Color in `xyz`, intensity in `w`.
    pub fn color_intensity(&self) -> Vec4 {
        let (color, intensity) = match self {
            Light::Directional(light) => (light.color, light.intensity),
            Light::Point(light) => (light.color, light.intensity),
            Light::Spot(light) => (light.color, light.intensity),
        };
        color.extend(intensity)
    }

    /// Sphere outside of which the light has no effect, `None` for unbounded
    /// lights.
    pub fn bounds(&self) -> Option<(Vec3, f32)> {
        match self {
            Light::Directional(_) => None,
            Light::Point(light) => Some((light.position, light.radius)),
            Light::Spot(light) => Some((light.position, light.radius)),
        }
    }
}

impl From<DirectionalLight> for Light {
    fn from(light: DirectionalLight) -> Self {
        Light::Directional(light)
    }
}

impl From<PointLight> for Light {
    fn from(light: PointLight) -> Self {
        Light::Point(light)
    }
}

impl From<SpotLight> for Light {
    fn from(light: SpotLight) -> Self {
        Light::Spot(light)
    }
}
