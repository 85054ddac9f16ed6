use std::{hash::BuildHasherDefault, sync::Arc};

use api::{
    framebuffer::{FramebufferState, ViewId},
    Backend, BackendError,
};
use ard_log::{debug, warn};
use dashmap::{mapref::entry::Entry, DashMap};
use rustc_hash::{FxHashSet, FxHasher};

use crate::{config::FramebufferStrategy, render_pass::RenderPass};

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// A native framebuffer. Keeps the render pass it was created against alive.
pub struct Framebuffer<B: Backend> {
    backend: Arc<B>,
    framebuffer: B::Framebuffer,
    render_pass: Arc<RenderPass<B>>,
    state: FramebufferState,
    imageless: bool,
}

/// Caches framebuffers for a render pass and attachment state.
pub trait FramebufferCache<B: Backend>: Send + Sync {
    /// Returns the framebuffer for `state` used with `pass`, creating it on a miss. `views`
    /// are the views named by `state`, in attachment order. Nothing is cached if creation
    /// fails.
    fn get_or_create(
        &self,
        pass: &Arc<RenderPass<B>>,
        state: &FramebufferState,
        views: &[&B::ImageView],
    ) -> Result<Arc<Framebuffer<B>>, BackendError>;

    /// Evicts every framebuffer that references `view`. Returns the number evicted.
    fn attachment_destroyed(&self, view: ViewId) -> usize;

    fn len(&self) -> usize;

    fn strategy(&self) -> FramebufferStrategy;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FramebufferKey {
    render_pass: u64,
    state: FramebufferState,
}

/// Framebuffers keyed on attachment structure only. Views are bound when a render pass
/// begins, so destroying a view never invalidates an entry.
pub struct ImagelessFramebufferCache<B: Backend> {
    backend: Arc<B>,
    framebuffers: DashMap<FramebufferKey, Arc<Framebuffer<B>>, FxBuildHasher>,
}

/// Framebuffers keyed on the exact views they were created with.
pub struct ConcreteFramebufferCache<B: Backend> {
    backend: Arc<B>,
    framebuffers: DashMap<FramebufferKey, Arc<Framebuffer<B>>, FxBuildHasher>,
    /// Every key whose framebuffer references the view.
    view_refs: DashMap<ViewId, FxHashSet<FramebufferKey>, FxBuildHasher>,
}

impl<B: Backend> Framebuffer<B> {
    #[inline(always)]
    pub fn internal(&self) -> &B::Framebuffer {
        &self.framebuffer
    }

    #[inline(always)]
    pub fn render_pass(&self) -> &Arc<RenderPass<B>> {
        &self.render_pass
    }

    #[inline(always)]
    pub fn state(&self) -> &FramebufferState {
        &self.state
    }

    /// Views must be supplied when beginning a render pass with this framebuffer.
    #[inline(always)]
    pub fn is_imageless(&self) -> bool {
        self.imageless
    }
}

impl<B: Backend> Drop for Framebuffer<B> {
    fn drop(&mut self) {
        unsafe {
            self.backend.destroy_framebuffer(&mut self.framebuffer);
        }
    }
}

fn create_framebuffer<B: Backend>(
    backend: &Arc<B>,
    pass: &Arc<RenderPass<B>>,
    state: &FramebufferState,
    views: Option<&[&B::ImageView]>,
) -> Result<Arc<Framebuffer<B>>, BackendError> {
    puffin::profile_function!();

    let framebuffer = match unsafe { backend.create_framebuffer(pass.internal(), state, views) } {
        Ok(framebuffer) => framebuffer,
        Err(err) => {
            warn!("unable to create framebuffer: {err}");
            return Err(err);
        }
    };
    debug!(
        "created {} framebuffer {}x{} with {} attachments",
        if views.is_none() { "imageless" } else { "concrete" },
        state.width,
        state.height,
        state.num_attachments()
    );

    Ok(Arc::new(Framebuffer {
        backend: backend.clone(),
        framebuffer,
        render_pass: pass.clone(),
        state: state.clone(),
        imageless: views.is_none(),
    }))
}

impl<B: Backend> ImagelessFramebufferCache<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            framebuffers: DashMap::default(),
        }
    }
}

impl<B: Backend> FramebufferCache<B> for ImagelessFramebufferCache<B> {
    fn get_or_create(
        &self,
        pass: &Arc<RenderPass<B>>,
        state: &FramebufferState,
        _views: &[&B::ImageView],
    ) -> Result<Arc<Framebuffer<B>>, BackendError> {
        let key = FramebufferKey {
            render_pass: pass.id(),
            state: state.structural(),
        };

        match self.framebuffers.entry(key) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let framebuffer = create_framebuffer(&self.backend, pass, &entry.key().state, None)?;
                entry.insert(framebuffer.clone());
                Ok(framebuffer)
            }
        }
    }

    #[inline(always)]
    fn attachment_destroyed(&self, _view: ViewId) -> usize {
        0
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline(always)]
    fn strategy(&self) -> FramebufferStrategy {
        FramebufferStrategy::Imageless
    }
}

impl<B: Backend> ConcreteFramebufferCache<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            framebuffers: DashMap::default(),
            view_refs: DashMap::default(),
        }
    }

    /// Number of views with at least one cached framebuffer.
    #[inline(always)]
    pub fn referenced_views(&self) -> usize {
        self.view_refs.len()
    }
}

impl<B: Backend> FramebufferCache<B> for ConcreteFramebufferCache<B> {
    fn get_or_create(
        &self,
        pass: &Arc<RenderPass<B>>,
        state: &FramebufferState,
        views: &[&B::ImageView],
    ) -> Result<Arc<Framebuffer<B>>, BackendError> {
        assert_eq!(
            views.len(),
            state.num_attachments(),
            "one view is required per attachment"
        );

        let key = FramebufferKey {
            render_pass: pass.id(),
            state: state.clone(),
        };

        let framebuffer = match self.framebuffers.entry(key.clone()) {
            Entry::Occupied(entry) => return Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let framebuffer = create_framebuffer(&self.backend, pass, state, Some(views))?;
                entry.insert(framebuffer.clone());
                framebuffer
            }
        };

        // The entry must exist before any back reference points at it.
        for view in state.views() {
            self.view_refs.entry(view).or_default().insert(key.clone());
        }

        Ok(framebuffer)
    }

    fn attachment_destroyed(&self, view: ViewId) -> usize {
        let Some((_, keys)) = self.view_refs.remove(&view) else {
            return 0;
        };

        let mut evicted = 0;
        for key in keys {
            let Some((key, framebuffer)) = self.framebuffers.remove(&key) else {
                continue;
            };
            evicted += 1;

            for other in framebuffer.state().views().filter(|other| *other != view) {
                let now_empty = match self.view_refs.get_mut(&other) {
                    Some(mut refs) => {
                        refs.remove(&key);
                        refs.is_empty()
                    }
                    None => false,
                };

                if now_empty {
                    self.view_refs.remove_if(&other, |_, refs| refs.is_empty());
                }
            }
        }

        debug!("evicted {evicted} framebuffers referencing view {}", view.0);
        evicted
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline(always)]
    fn strategy(&self) -> FramebufferStrategy {
        FramebufferStrategy::Concrete
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use api::{
        framebuffer::FramebufferAttachment,
        render_pass::{RenderPassAttachment, RenderPassState},
        types::{Format, ImageUsage},
    };
    use empty::{EmptyBackend, EmptyObject};

    use crate::render_pass::RenderPassCache;

    use super::*;

    fn pass(cache: &RenderPassCache<EmptyBackend>, colors: usize) -> Arc<RenderPass<EmptyBackend>> {
        let mut state = RenderPassState::default();
        for _ in 0..colors {
            state.push_color(RenderPassAttachment {
                format: Format::Rgba8Unorm,
                samples: 1,
                ..Default::default()
            });
        }
        cache.get_or_create(&state).unwrap()
    }

    fn state(views: &[u32]) -> FramebufferState {
        FramebufferState {
            width: 64,
            height: 64,
            layers: 1,
            samples: 1,
            attachments: views
                .iter()
                .map(|view| FramebufferAttachment {
                    view: ViewId(*view),
                    format: Format::Rgba8Unorm,
                    usage: ImageUsage::COLOR_ATTACHMENT,
                    width: 64,
                    height: 64,
                    layers: 1,
                })
                .collect(),
        }
    }

    fn views(ids: &[u32]) -> Vec<EmptyObject> {
        ids.iter().map(|id| EmptyObject { id: *id as u64 }).collect()
    }

    fn get(
        cache: &dyn FramebufferCache<EmptyBackend>,
        pass: &Arc<RenderPass<EmptyBackend>>,
        ids: &[u32],
    ) -> Arc<Framebuffer<EmptyBackend>> {
        let objects = views(ids);
        let refs: Vec<_> = objects.iter().collect();
        cache.get_or_create(pass, &state(ids), &refs).unwrap()
    }

    #[test]
    fn imageless_ignores_view_identity() {
        let backend = Arc::new(EmptyBackend::default());
        let passes = RenderPassCache::new(backend.clone());
        let cache = ImagelessFramebufferCache::new(backend.clone());
        let pass = pass(&passes, 2);

        let a = get(&cache, &pass, &[1, 2]);
        let b = get(&cache, &pass, &[3, 4]);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_imageless());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.attachment_destroyed(ViewId(1)), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concrete_evicts_every_referencing_framebuffer() {
        let backend = Arc::new(EmptyBackend::default());
        let passes = RenderPassCache::new(backend.clone());
        let cache = ConcreteFramebufferCache::new(backend.clone());
        let two = pass(&passes, 2);
        let one = pass(&passes, 1);

        drop(get(&cache, &two, &[1, 2]));
        drop(get(&cache, &two, &[1, 3]));
        drop(get(&cache, &one, &[1]));
        drop(get(&cache, &one, &[4]));
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.referenced_views(), 4);

        assert_eq!(cache.attachment_destroyed(ViewId(1)), 3);
        assert_eq!(cache.len(), 1);
        // Views 2 and 3 only appeared alongside view 1.
        assert_eq!(cache.referenced_views(), 1);
        assert_eq!(
            backend.counters().framebuffers_destroyed.load(Ordering::Relaxed),
            3
        );

        assert_eq!(cache.attachment_destroyed(ViewId(1)), 0);
    }

    #[test]
    fn recycled_view_id_misses() {
        let backend = Arc::new(EmptyBackend::default());
        let passes = RenderPassCache::new(backend.clone());
        let cache = ConcreteFramebufferCache::new(backend.clone());
        let pass = pass(&passes, 1);

        let old = get(&cache, &pass, &[7]);
        assert!(Arc::ptr_eq(&old, &get(&cache, &pass, &[7])));

        assert_eq!(cache.attachment_destroyed(ViewId(7)), 1);
        let new = get(&cache, &pass, &[7]);
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(
            backend.counters().framebuffers_created.load(Ordering::Relaxed),
            2
        );
    }

    #[test]
    fn failed_creation_caches_nothing() {
        let backend = Arc::new(EmptyBackend::default());
        let passes = RenderPassCache::new(backend.clone());
        let cache = ConcreteFramebufferCache::new(backend.clone());
        let pass = pass(&passes, 1);

        backend.set_fail_creation(true);
        let objects = views(&[5]);
        let refs: Vec<_> = objects.iter().collect();
        assert!(cache.get_or_create(&pass, &state(&[5]), &refs).is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.referenced_views(), 0);
    }
}
