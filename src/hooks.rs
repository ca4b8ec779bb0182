//! Pre- and post-render callbacks.
//!
//! Registering a hook returns a [`HookToken`]; the hook stays installed for as
//! long as the token lives. Use [`HookToken::detach`] to keep it for the
//! renderer's lifetime.
//!
//! ```
//! use parking_lot::RwLock;
//! use phalanx::{Camera, EcsWorld, ForwardRenderer, HeadlessDevice, RenderContext, RendererConfig};
//!
//! let mut device = HeadlessDevice::new();
//! let mut ctx = RenderContext::with_builtin_shaders();
//! let mut renderer = ForwardRenderer::new(&mut device, &mut ctx, RendererConfig::new());
//! let world = RwLock::new(EcsWorld::new());
//!
//! let token = renderer.hooks().on_post_render(|camera| {
//!     log::debug!("finished {:?}", camera.viewport());
//! });
//! renderer.render(&mut device, &mut ctx, &world, &Camera::new());
//! drop(token); // unregistered
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::camera::Camera;

type Hook = Arc<Mutex<dyn FnMut(&Camera) + Send>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    PreRender,
    PostRender,
}

#[derive(Default)]
struct HookLists {
    next_id: u64,
    pre_render: Vec<(u64, Hook)>,
    post_render: Vec<(u64, Hook)>,
}

impl HookLists {
    fn list(&mut self, stage: Stage) -> &mut Vec<(u64, Hook)> {
        match stage {
            Stage::PreRender => &mut self.pre_render,
            Stage::PostRender => &mut self.post_render,
        }
    }
}

/// Observers fired around each camera the renderer draws.
#[derive(Clone, Default)]
pub struct FrameHooks {
    lists: Arc<Mutex<HookLists>>,
}

impl FrameHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `hook` before each camera, after nothing has been drawn yet.
    pub fn on_pre_render(&self, hook: impl FnMut(&Camera) + Send + 'static) -> HookToken {
        self.register(Stage::PreRender, Arc::new(Mutex::new(hook)))
    }

    /// Runs `hook` after each camera's passes and filters.
    pub fn on_post_render(&self, hook: impl FnMut(&Camera) + Send + 'static) -> HookToken {
        self.register(Stage::PostRender, Arc::new(Mutex::new(hook)))
    }

    pub fn fire_pre_render(&self, camera: &Camera) {
        self.fire(Stage::PreRender, camera);
    }

    pub fn fire_post_render(&self, camera: &Camera) {
        self.fire(Stage::PostRender, camera);
    }

    pub fn len(&self) -> usize {
        let lists = self.lists.lock();
        lists.pre_render.len() + lists.post_render.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn register(&self, stage: Stage, hook: Hook) -> HookToken {
        let mut lists = self.lists.lock();
        let id = lists.next_id;
        lists.next_id += 1;
        lists.list(stage).push((id, hook));
        HookToken {
            id,
            stage,
            lists: Arc::downgrade(&self.lists),
        }
    }

    fn fire(&self, stage: Stage, camera: &Camera) {
        // Snapshot so hooks may register or drop tokens while running.
        let hooks: Vec<Hook> = self
            .lists
            .lock()
            .list(stage)
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in hooks {
            let mut hook = hook.lock();
            (*hook)(camera);
        }
    }
}

/// Keeps a hook registered. Dropping it removes the hook.
#[must_use = "the hook is removed when the token is dropped"]
pub struct HookToken {
    id: u64,
    stage: Stage,
    lists: Weak<Mutex<HookLists>>,
}

impl HookToken {
    /// Leaves the hook installed for good.
    pub fn detach(mut self) {
        self.lists = Weak::new();
    }
}

impl Drop for HookToken {
    fn drop(&mut self) {
        if let Some(lists) = self.lists.upgrade() {
            lists.lock().list(self.stage).retain(|(id, _)| *id != self.id);
        }
    }
}
