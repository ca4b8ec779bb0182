//! Named, versioned parameter slots.
//!
//! A parameter connects a producer (camera setup, light gathering, an effect's
//! per-object transforms) to any number of consumers that only know its name
//! and type. Values are stored as a [`ParamValue`], a tagged union over the
//! supported uniform types, so matching a parameter against a uniform is a
//! single tag comparison.
//!
//! Handles are shared; the [`ParameterTable`] only keeps weak references, so
//! an entry disappears once the last handle to it drops.
//!
//! # Versions
//!
//! Every write bumps the slot's version. A *dynamic* slot also bumps on every
//! [`ParamHandle::version`] call, which forces consumers to re-upload it each
//! time they bind.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use glam::{IVec2, IVec3, IVec4, Mat2, Mat3, Mat4, Vec2, Vec3, Vec4};
use parking_lot::{RwLock, RwLockReadGuard};

use crate::device::TextureId;

/// Texture dimensionality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// Accepted by any sampler.
    Any,
    D2,
    D3,
    Cube,
}

/// Type tag of a parameter or uniform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamType {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    IVec2,
    IVec3,
    IVec4,
    Mat2,
    Mat3,
    Mat4,
    Texture(TextureKind),
}

impl ParamType {
    /// Whether a parameter of this type can feed a uniform of type `uniform`.
    pub fn binds_to(self, uniform: ParamType) -> bool {
        match (self, uniform) {
            (ParamType::Texture(TextureKind::Any), ParamType::Texture(_)) => true,
            (a, b) => a == b,
        }
    }

    pub fn is_texture(self) -> bool {
        matches!(self, ParamType::Texture(_))
    }
}

/// An array of values of one supported type.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Float(Vec<f32>),
    Int(Vec<i32>),
    Bool(Vec<bool>),
    Vec2(Vec<Vec2>),
    Vec3(Vec<Vec3>),
    Vec4(Vec<Vec4>),
    IVec2(Vec<IVec2>),
    IVec3(Vec<IVec3>),
    IVec4(Vec<IVec4>),
    Mat2(Vec<Mat2>),
    Mat3(Vec<Mat3>),
    Mat4(Vec<Mat4>),
    Texture(TextureKind, Option<TextureId>),
}

impl ParamValue {
    pub fn ty(&self) -> ParamType {
        match self {
            ParamValue::Float(_) => ParamType::Float,
            ParamValue::Int(_) => ParamType::Int,
            ParamValue::Bool(_) => ParamType::Bool,
            ParamValue::Vec2(_) => ParamType::Vec2,
            ParamValue::Vec3(_) => ParamType::Vec3,
            ParamValue::Vec4(_) => ParamType::Vec4,
            ParamValue::IVec2(_) => ParamType::IVec2,
            ParamValue::IVec3(_) => ParamType::IVec3,
            ParamValue::IVec4(_) => ParamType::IVec4,
            ParamValue::Mat2(_) => ParamType::Mat2,
            ParamValue::Mat3(_) => ParamType::Mat3,
            ParamValue::Mat4(_) => ParamType::Mat4,
            ParamValue::Texture(kind, _) => ParamType::Texture(*kind),
        }
    }

    /// Number of array elements.
    pub fn count(&self) -> usize {
        match self {
            ParamValue::Float(v) => v.len(),
            ParamValue::Int(v) => v.len(),
            ParamValue::Bool(v) => v.len(),
            ParamValue::Vec2(v) => v.len(),
            ParamValue::Vec3(v) => v.len(),
            ParamValue::Vec4(v) => v.len(),
            ParamValue::IVec2(v) => v.len(),
            ParamValue::IVec3(v) => v.len(),
            ParamValue::IVec4(v) => v.len(),
            ParamValue::Mat2(v) => v.len(),
            ParamValue::Mat3(v) => v.len(),
            ParamValue::Mat4(v) => v.len(),
            ParamValue::Texture(..) => 1,
        }
    }

    /// Raw bytes of the first `count` elements, as handed to the device.
    ///
    /// Booleans widen to 32-bit integers. Textures have no byte form.
    pub fn bytes(&self, count: usize) -> Cow<'_, [u8]> {
        fn head<T: bytemuck::Pod>(values: &[T], count: usize) -> Cow<'_, [u8]> {
            Cow::Borrowed(bytemuck::cast_slice(&values[..count.min(values.len())]))
        }

        match self {
            ParamValue::Float(v) => head(v, count),
            ParamValue::Int(v) => head(v, count),
            ParamValue::Bool(v) => {
                let ints: Vec<i32> = v.iter().take(count).map(|&b| b as i32).collect();
                Cow::Owned(bytemuck::cast_slice(&ints).to_vec())
            }
            ParamValue::Vec2(v) => head(v, count),
            ParamValue::Vec3(v) => head(v, count),
            ParamValue::Vec4(v) => head(v, count),
            ParamValue::IVec2(v) => head(v, count),
            ParamValue::IVec3(v) => head(v, count),
            ParamValue::IVec4(v) => head(v, count),
            ParamValue::Mat2(v) => head(v, count),
            ParamValue::Mat3(v) => head(v, count),
            ParamValue::Mat4(v) => head(v, count),
            ParamValue::Texture(..) => Cow::Borrowed(&[]),
        }
    }

    /// Overwrites element `offset` with the first element of `value`.
    fn write_element(&mut self, offset: usize, value: &ParamValue) -> bool {
        fn put<T: Copy>(dst: &mut [T], src: &[T], offset: usize) -> bool {
            match (dst.get_mut(offset), src.first()) {
                (Some(slot), Some(v)) => {
                    *slot = *v;
                    true
                }
                _ => false,
            }
        }

        match (self, value) {
            (ParamValue::Float(d), ParamValue::Float(s)) => put(d, s, offset),
            (ParamValue::Int(d), ParamValue::Int(s)) => put(d, s, offset),
            (ParamValue::Bool(d), ParamValue::Bool(s)) => put(d, s, offset),
            (ParamValue::Vec2(d), ParamValue::Vec2(s)) => put(d, s, offset),
            (ParamValue::Vec3(d), ParamValue::Vec3(s)) => put(d, s, offset),
            (ParamValue::Vec4(d), ParamValue::Vec4(s)) => put(d, s, offset),
            (ParamValue::IVec2(d), ParamValue::IVec2(s)) => put(d, s, offset),
            (ParamValue::IVec3(d), ParamValue::IVec3(s)) => put(d, s, offset),
            (ParamValue::IVec4(d), ParamValue::IVec4(s)) => put(d, s, offset),
            (ParamValue::Mat2(d), ParamValue::Mat2(s)) => put(d, s, offset),
            (ParamValue::Mat3(d), ParamValue::Mat3(s)) => put(d, s, offset),
            (ParamValue::Mat4(d), ParamValue::Mat4(s)) => put(d, s, offset),
            (ParamValue::Texture(dk, d), ParamValue::Texture(sk, s)) if dk == sk && offset == 0 => {
                *d = *s;
                true
            }
            _ => false,
        }
    }

    pub fn float(&self, index: usize) -> Option<f32> {
        match self {
            ParamValue::Float(v) => v.get(index).copied(),
            _ => None,
        }
    }

    pub fn int(&self, index: usize) -> Option<i32> {
        match self {
            ParamValue::Int(v) => v.get(index).copied(),
            _ => None,
        }
    }

    pub fn boolean(&self, index: usize) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => v.get(index).copied(),
            _ => None,
        }
    }

    pub fn vec2(&self, index: usize) -> Option<Vec2> {
        match self {
            ParamValue::Vec2(v) => v.get(index).copied(),
            _ => None,
        }
    }

    pub fn vec3(&self, index: usize) -> Option<Vec3> {
        match self {
            ParamValue::Vec3(v) => v.get(index).copied(),
            _ => None,
        }
    }

    pub fn vec4(&self, index: usize) -> Option<Vec4> {
        match self {
            ParamValue::Vec4(v) => v.get(index).copied(),
            _ => None,
        }
    }

    pub fn mat3(&self, index: usize) -> Option<Mat3> {
        match self {
            ParamValue::Mat3(v) => v.get(index).copied(),
            _ => None,
        }
    }

    pub fn mat4(&self, index: usize) -> Option<Mat4> {
        match self {
            ParamValue::Mat4(v) => v.get(index).copied(),
            _ => None,
        }
    }

    pub fn texture(&self) -> Option<TextureId> {
        match self {
            ParamValue::Texture(_, t) => *t,
            _ => None,
        }
    }

    /// An empty texture slot of the given kind.
    pub fn texture_slot(kind: TextureKind) -> Self {
        ParamValue::Texture(kind, None)
    }
}

macro_rules! impl_from_values {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(value: $ty) -> Self {
                    ParamValue::$variant(vec![value])
                }
            }

            impl From<Vec<$ty>> for ParamValue {
                fn from(values: Vec<$ty>) -> Self {
                    ParamValue::$variant(values)
                }
            }
        )*
    };
}

impl_from_values! {
    Float => f32,
    Int => i32,
    Bool => bool,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    IVec2 => IVec2,
    IVec3 => IVec3,
    IVec4 => IVec4,
    Mat2 => Mat2,
    Mat3 => Mat3,
    Mat4 => Mat4,
}

static NEXT_PARAM_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct ParamSlot {
    id: u64,
    name: Option<String>,
    ty: ParamType,
    value: RwLock<ParamValue>,
    version: AtomicU64,
    dynamic: AtomicBool,
}

/// A shared handle to a parameter slot.
///
/// Cloning is cheap and yields the same slot (same [`id`](Self::id)).
#[derive(Clone, Debug)]
pub struct ParamHandle(Arc<ParamSlot>);

impl ParamHandle {
    fn with_name(name: Option<String>, value: ParamValue, dynamic: bool) -> Self {
        Self(Arc::new(ParamSlot {
            id: NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed),
            name,
            ty: value.ty(),
            value: RwLock::new(value),
            version: AtomicU64::new(0),
            dynamic: AtomicBool::new(dynamic),
        }))
    }

    /// Creates a slot that is not registered under any name.
    pub fn anonymous(value: impl Into<ParamValue>, dynamic: bool) -> Self {
        Self::with_name(None, value.into(), dynamic)
    }

    /// Process-unique identity of the slot.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn ty(&self) -> ParamType {
        self.0.ty
    }

    pub fn count(&self) -> usize {
        self.0.value.read().count()
    }

    pub fn is_dynamic(&self) -> bool {
        self.0.dynamic.load(Ordering::Relaxed)
    }

    /// Observes the version, bumping it first if the slot is dynamic.
    pub fn version(&self) -> u64 {
        if self.is_dynamic() {
            self.0.version.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.0.version.load(Ordering::Relaxed)
        }
    }

    /// Observes the version without counting as a read.
    pub fn peek_version(&self) -> u64 {
        self.0.version.load(Ordering::Relaxed)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ParamValue> {
        self.0.value.read()
    }

    /// Writes one element at `offset`. Returns `false` on a type mismatch or
    /// an out-of-range offset, leaving the slot untouched.
    pub fn write_value(&self, offset: usize, value: impl Into<ParamValue>) -> bool {
        let written = self.0.value.write().write_element(offset, &value.into());
        if written {
            self.bump();
        }
        written
    }

    /// Replaces the whole array. The type must match.
    pub fn write_values(&self, values: impl Into<ParamValue>) -> bool {
        let values = values.into();
        if values.ty() != self.0.ty {
            return false;
        }
        *self.0.value.write() = values;
        self.bump();
        true
    }

    /// Replaces the array and the dynamic flag.
    pub fn switch_values(&self, values: impl Into<ParamValue>, dynamic: bool) -> bool {
        let switched = self.write_values(values);
        if switched {
            self.0.dynamic.store(dynamic, Ordering::Relaxed);
        }
        switched
    }

    /// Points a texture slot at `texture`.
    pub fn set_texture(&self, texture: Option<TextureId>) -> bool {
        match self.0.ty {
            ParamType::Texture(kind) => self.write_values(ParamValue::Texture(kind, texture)),
            _ => false,
        }
    }

    pub fn ptr_eq(&self, other: &ParamHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn bump(&self) {
        self.0.version.fetch_add(1, Ordering::Relaxed);
    }
}

/// Registry of named parameters.
///
/// # Example
///
/// ```
/// use glam::Mat4;
/// use phalanx::{ParamType, ParameterTable};
///
/// let mut table = ParameterTable::new();
/// let view = table.add_parameter("viewMatrix", Mat4::IDENTITY, false).unwrap();
/// assert!(table.add_parameter("viewMatrix", Mat4::IDENTITY, false).is_none());
///
/// let found = table.parameter_of_type("viewMatrix", ParamType::Mat4).unwrap();
/// assert_eq!(found.id(), view.id());
/// assert!(table.parameter_of_type("viewMatrix", ParamType::Vec4).is_none());
/// ```
#[derive(Debug, Default)]
pub struct ParameterTable {
    entries: HashMap<String, Weak<ParamSlot>>,
}

impl ParameterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named slot. Returns `None` if `name` is taken by a live
    /// entry.
    pub fn add_parameter(
        &mut self,
        name: &str,
        value: impl Into<ParamValue>,
        dynamic: bool,
    ) -> Option<ParamHandle> {
        if self.parameter(name).is_some() {
            return None;
        }
        let handle = ParamHandle::with_name(Some(name.to_string()), value.into(), dynamic);
        self.entries.insert(name.to_string(), Arc::downgrade(&handle.0));
        Some(handle)
    }

    pub fn parameter(&self, name: &str) -> Option<ParamHandle> {
        self.entries.get(name).and_then(Weak::upgrade).map(ParamHandle)
    }

    /// Typed lookup; `None` when the name is unknown or has another type.
    pub fn parameter_of_type(&self, name: &str, ty: ParamType) -> Option<ParamHandle> {
        self.parameter(name).filter(|p| p.ty() == ty)
    }

    /// Drops entries whose handles are all gone.
    pub fn prune(&mut self) {
        self.entries.retain(|_, slot| slot.strong_count() > 0);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.values().filter(|s| s.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
