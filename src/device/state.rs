//! Immutable render-state descriptors and their per-device cache.

use std::collections::HashMap;

use super::{Device, StateId};

/// The three categories of render state a pass binds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateCategory {
    Blend,
    DepthStencil,
    Rasterizer,
}

impl StateCategory {
    pub const ALL: [StateCategory; 3] = [
        StateCategory::Blend,
        StateCategory::DepthStencil,
        StateCategory::Rasterizer,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            StateCategory::Blend => 0,
            StateCategory::DepthStencil => 1,
            StateCategory::Rasterizer => 2,
        }
    }
}

/// Blending. `None` disables blending.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct BlendStateDesc {
    pub blend: Option<wgpu::BlendState>,
}

impl BlendStateDesc {
    pub const DISABLED: Self = Self { blend: None };

    /// `dst = src + dst`, used to accumulate lighting passes.
    pub const ADDITIVE: Self = Self {
        blend: Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
        }),
    };

    /// Classic `src.a * src + (1 - src.a) * dst` on both color and alpha.
    pub const ALPHA: Self = Self {
        blend: Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
        }),
    };
}

/// Depth test and depth writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare: wgpu::CompareFunction,
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            compare: wgpu::CompareFunction::LessEqual,
        }
    }
}

impl DepthStencilDesc {
    pub fn read_only() -> Self {
        Self {
            depth_write: false,
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            compare: wgpu::CompareFunction::Always,
        }
    }
}

/// Culling, fill mode and color write mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RasterizerDesc {
    pub cull: Option<wgpu::Face>,
    pub polygon_mode: wgpu::PolygonMode,
    pub color_writes: wgpu::ColorWrites,
}

impl Default for RasterizerDesc {
    fn default() -> Self {
        Self {
            cull: Some(wgpu::Face::Back),
            polygon_mode: wgpu::PolygonMode::Fill,
            color_writes: wgpu::ColorWrites::ALL,
        }
    }
}

impl RasterizerDesc {
    pub fn cull(mut self, cull: Option<wgpu::Face>) -> Self {
        self.cull = cull;
        self
    }

    pub fn polygon_mode(mut self, mode: wgpu::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    pub fn color_writes(mut self, writes: wgpu::ColorWrites) -> Self {
        self.color_writes = writes;
        self
    }

    /// Both faces, lines only.
    pub fn wireframe() -> Self {
        Self::default()
            .cull(None)
            .polygon_mode(wgpu::PolygonMode::Line)
    }
}

/// Any render-state descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateDesc {
    Blend(BlendStateDesc),
    DepthStencil(DepthStencilDesc),
    Rasterizer(RasterizerDesc),
}

impl StateDesc {
    pub fn category(&self) -> StateCategory {
        match self {
            StateDesc::Blend(_) => StateCategory::Blend,
            StateDesc::DepthStencil(_) => StateCategory::DepthStencil,
            StateDesc::Rasterizer(_) => StateCategory::Rasterizer,
        }
    }

    /// The shared default for a category.
    pub fn default_for(category: StateCategory) -> Self {
        match category {
            StateCategory::Blend => StateDesc::Blend(BlendStateDesc::default()),
            StateCategory::DepthStencil => StateDesc::DepthStencil(DepthStencilDesc::default()),
            StateCategory::Rasterizer => StateDesc::Rasterizer(RasterizerDesc::default()),
        }
    }
}

/// Interns state descriptors into device state objects.
///
/// Equal descriptors always yield the same [`StateId`], so the defaults are
/// effectively shared singletons and "already current" checks compare ids.
#[derive(Debug, Default)]
pub struct StateCache {
    states: HashMap<StateDesc, StateId>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, device: &mut dyn Device, desc: StateDesc) -> StateId {
        *self
            .states
            .entry(desc)
            .or_insert_with(|| device.create_state(&desc))
    }

    pub fn default_state(&mut self, device: &mut dyn Device, category: StateCategory) -> StateId {
        self.get(device, StateDesc::default_for(category))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
