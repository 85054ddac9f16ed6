use std::{
    hash::BuildHasherDefault,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
};

use api::{
    render_pass::{PipelineRenderPassState, RenderPassState},
    Backend, BackendError,
};
use ard_log::{debug, warn};
use dashmap::{mapref::entry::Entry, DashMap};
use rustc_hash::FxHasher;

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// A native render pass along with the state it was created from.
pub struct RenderPass<B: Backend> {
    backend: Arc<B>,
    id: u64,
    pass: B::RenderPass,
    state: RenderPassState,
    pipeline_state: u32,
}

/// Interns render passes by structural state. Entries live as long as the cache.
pub struct RenderPassCache<B: Backend> {
    backend: Arc<B>,
    passes: DashMap<RenderPassState, Arc<RenderPass<B>>, FxBuildHasher>,
    pipeline_states: DashMap<PipelineRenderPassState, u32, FxBuildHasher>,
    next_pipeline_state: AtomicU32,
    next_id: AtomicU64,
}

impl<B: Backend> RenderPass<B> {
    /// Unique among every render pass created by the owning cache.
    #[inline(always)]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline(always)]
    pub fn internal(&self) -> &B::RenderPass {
        &self.pass
    }

    #[inline(always)]
    pub fn state(&self) -> &RenderPassState {
        &self.state
    }

    /// Id of the pipeline-compatible projection of this pass. Passes that differ only in load
    /// behavior share an id.
    #[inline(always)]
    pub fn pipeline_state(&self) -> u32 {
        self.pipeline_state
    }
}

impl<B: Backend> Drop for RenderPass<B> {
    fn drop(&mut self) {
        unsafe {
            self.backend.destroy_render_pass(&mut self.pass);
        }
    }
}

impl<B: Backend> RenderPassCache<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            passes: DashMap::default(),
            pipeline_states: DashMap::default(),
            next_pipeline_state: AtomicU32::new(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the cached render pass for `state`, creating it on a miss. Nothing is cached if
    /// creation fails.
    pub fn get_or_create(
        &self,
        state: &RenderPassState,
    ) -> Result<Arc<RenderPass<B>>, BackendError> {
        if let Some(pass) = self.passes.get(state) {
            return Ok(pass.clone());
        }

        match self.passes.entry(state.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                puffin::profile_scope!("create_render_pass");

                let pass = match unsafe { self.backend.create_render_pass(state) } {
                    Ok(pass) => pass,
                    Err(err) => {
                        warn!("unable to create render pass: {err}");
                        return Err(err);
                    }
                };
                let pipeline_state = self.intern_pipeline_state(state.pipeline_state());
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "created render pass {id} with {} attachments (pipeline state {pipeline_state})",
                    state.num_attachments()
                );

                let pass = Arc::new(RenderPass {
                    backend: self.backend.clone(),
                    id,
                    pass,
                    state: state.clone(),
                    pipeline_state,
                });
                entry.insert(pass.clone());
                Ok(pass)
            }
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    #[inline(always)]
    pub fn pipeline_state_count(&self) -> usize {
        self.pipeline_states.len()
    }

    fn intern_pipeline_state(&self, state: PipelineRenderPassState) -> u32 {
        *self.pipeline_states.entry(state).or_insert_with(|| {
            self.next_pipeline_state.fetch_add(1, Ordering::Relaxed)
        })
    }
}

#[cfg(test)]
mod tests {
    use api::{
        render_pass::RenderPassAttachment,
        types::{Format, ImageLayout},
    };
    use empty::EmptyBackend;

    use super::*;

    fn attachment(format: Format) -> RenderPassAttachment {
        RenderPassAttachment {
            format,
            samples: 1,
            ..Default::default()
        }
    }

    fn color_depth() -> RenderPassState {
        let mut state = RenderPassState::default();
        state.push_color(attachment(Format::Rgba8Unorm));
        state.set_depth_stencil(attachment(Format::D32Sfloat));
        state
    }

    #[test]
    fn equal_states_share_a_pass() {
        let backend = Arc::new(EmptyBackend::default());
        let cache = RenderPassCache::new(backend.clone());

        let a = cache.get_or_create(&color_depth()).unwrap();
        let b = cache.get_or_create(&color_depth()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert_eq!(backend.counters().render_passes_created.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn clear_flag_is_a_miss_with_shared_pipeline_state() {
        let backend = Arc::new(EmptyBackend::default());
        let cache = RenderPassCache::new(backend.clone());

        let load = cache.get_or_create(&color_depth()).unwrap();

        let mut cleared = color_depth();
        cleared.attachments_mut()[0].clear_color = true;
        let clear = cache.get_or_create(&cleared).unwrap();

        assert_ne!(load.id(), clear.id());
        assert_eq!(load.pipeline_state(), clear.pipeline_state());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.pipeline_state_count(), 1);
        assert_eq!(
            clear.state().attachment_barrier_info(0).layout,
            ImageLayout::ColorAttachmentOptimal
        );
    }

    #[test]
    fn pipeline_state_ids_are_monotonic() {
        let backend = Arc::new(EmptyBackend::default());
        let cache = RenderPassCache::new(backend);

        let first = cache.get_or_create(&color_depth()).unwrap();

        let mut wide = color_depth();
        wide.attachments_mut()[0].format = Format::Rgba16SFloat;
        let second = cache.get_or_create(&wide).unwrap();

        assert_eq!(first.pipeline_state(), 1);
        assert_eq!(second.pipeline_state(), 2);
    }

    #[test]
    fn failed_creation_caches_nothing() {
        let backend = Arc::new(EmptyBackend::default());
        let cache = RenderPassCache::new(backend.clone());

        backend.set_fail_creation(true);
        assert!(cache.get_or_create(&color_depth()).is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.pipeline_state_count(), 0);

        backend.set_fail_creation(false);
        assert!(cache.get_or_create(&color_depth()).is_ok());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn passes_destroyed_with_cache() {
        let backend = Arc::new(EmptyBackend::default());
        let cache = RenderPassCache::new(backend.clone());
        let pass = cache.get_or_create(&color_depth()).unwrap();
        drop(cache);
        assert_eq!(backend.counters().render_passes_destroyed.load(Ordering::Relaxed), 0);
        drop(pass);
        assert_eq!(backend.counters().render_passes_destroyed.load(Ordering::Relaxed), 1);
    }
}
