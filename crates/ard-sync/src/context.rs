use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use api::{
    buffer::BufferCreateInfo,
    framebuffer::ViewId,
    image::{ImageCreateInfo, ImageViewCreateInfo},
    types::Domain,
    Backend, BackendError, Capabilities,
};
use arc_swap::ArcSwapOption;
use ard_log::{error, info, warn};
use thiserror::Error;

use crate::{
    batch::{BatchQueue, BatchState, WaitError},
    bindings::Bindings,
    bindless::BindlessHandles,
    config::{ContextCreateInfo, FramebufferStrategy},
    draw::MemoryBarrierFlags,
    framebuffer::{ConcreteFramebufferCache, FramebufferCache, ImagelessFramebufferCache},
    render_pass::RenderPassCache,
    render_target::RenderTarget,
    resource::{Resource, ResourceId, ResourceKind, ResourceState, ResourceTable},
    scheduler::BarrierScheduler,
    surface::{Surface, SurfaceDescriptor, SurfaceTable},
};

/// Called once when the device is found to be lost.
pub type ResetCallback = Box<dyn Fn(ResetStatus) + Send + Sync>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResetStatus {
    NoReset,
    /// The device was lost while this context had work in flight.
    GuiltyContextReset,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlushError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Wait(#[from] WaitError),
}

/// Tracks resources, records barriers and submits batches for a single stream of commands.
pub struct Context<B: Backend> {
    pub(crate) backend: Arc<B>,
    pub(crate) resources: ResourceTable<B>,
    pub(crate) surfaces: SurfaceTable<B>,
    pub(crate) scheduler: BarrierScheduler,
    pub(crate) bindings: Bindings,
    pub(crate) bindless: BindlessHandles<B>,
    pub(crate) render_passes: RenderPassCache<B>,
    pub(crate) framebuffers: Box<dyn FramebufferCache<B>>,
    pub(crate) batches: BatchQueue<B>,
    /// The batch being recorded.
    pub(crate) batch: BatchState<B>,
    pub(crate) target: RenderTarget<B>,
    pub(crate) memory_barrier: MemoryBarrierFlags,
    pub(crate) last_was_compute: bool,
    device_lost: AtomicBool,
    reset_callback: ArcSwapOption<ResetCallback>,
}

impl<B: Backend> Context<B> {
    pub fn new(backend: Arc<B>, create_info: ContextCreateInfo) -> Result<Self, BackendError> {
        let capabilities = backend.capabilities();

        let strategy = match create_info.framebuffer_strategy {
            FramebufferStrategy::Auto | FramebufferStrategy::Imageless
                if capabilities.imageless_framebuffer =>
            {
                FramebufferStrategy::Imageless
            }
            FramebufferStrategy::Imageless => {
                warn!("imageless framebuffers requested but not supported, using concrete");
                FramebufferStrategy::Concrete
            }
            _ => FramebufferStrategy::Concrete,
        };

        let framebuffers: Box<dyn FramebufferCache<B>> = match strategy {
            FramebufferStrategy::Imageless => {
                Box::new(ImagelessFramebufferCache::new(backend.clone()))
            }
            _ => Box::new(ConcreteFramebufferCache::new(backend.clone())),
        };

        let batches = BatchQueue::new(backend.clone(), &create_info)?;
        let batch = batches.acquire()?;

        info!(
            "created context {} (framebuffers: {strategy:?}, timeline: {}, threaded submit: {})",
            create_info.debug_name.as_deref().unwrap_or("<unnamed>"),
            capabilities.timeline_semaphore,
            create_info.threaded_submit,
        );

        Ok(Self {
            render_passes: RenderPassCache::new(backend.clone()),
            backend,
            resources: ResourceTable::default(),
            surfaces: SurfaceTable::default(),
            scheduler: BarrierScheduler::default(),
            bindings: Bindings::default(),
            bindless: BindlessHandles::default(),
            framebuffers,
            batches,
            batch,
            target: RenderTarget::default(),
            memory_barrier: MemoryBarrierFlags::empty(),
            last_was_compute: false,
            device_lost: AtomicBool::new(false),
            reset_callback: ArcSwapOption::empty(),
        })
    }

    #[inline(always)]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    #[inline(always)]
    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    #[inline(always)]
    pub fn framebuffer_strategy(&self) -> FramebufferStrategy {
        self.framebuffers.strategy()
    }

    /// The batch currently being recorded.
    #[inline(always)]
    pub fn current_batch(&self) -> &BatchState<B> {
        &self.batch
    }

    #[inline(always)]
    pub fn resource_state(&self, id: ResourceId) -> Option<&ResourceState> {
        self.resources.state(id)
    }

    #[inline(always)]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Whether the resource waits for a barrier before the next command in `domain`.
    #[inline(always)]
    pub fn is_pending(&self, id: ResourceId, domain: Domain) -> bool {
        self.scheduler.contains(id, domain)
    }

    #[inline(always)]
    pub fn pending_barriers(&self, domain: Domain) -> usize {
        self.scheduler.pending(domain)
    }

    #[inline(always)]
    pub fn render_pass_count(&self) -> usize {
        self.render_passes.len()
    }

    #[inline(always)]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline(always)]
    pub fn surface(&self, view: ViewId) -> Option<&Arc<Surface<B>>> {
        self.surfaces.get(view)
    }

    #[inline(always)]
    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    #[inline(always)]
    pub fn bindless_handle_count(&self) -> usize {
        self.bindless.len()
    }

    /// Id of the most recently submitted batch, or `0` if nothing was submitted.
    #[inline(always)]
    pub fn last_submitted(&self) -> u64 {
        self.batches.last_submitted()
    }

    /// Every batch with an id at or below this value is known to be complete.
    #[inline(always)]
    pub fn last_finished(&self) -> u64 {
        self.batches.last_finished()
    }

    pub fn create_buffer(&mut self, create_info: BufferCreateInfo) -> Result<ResourceId, BackendError> {
        let buffer = unsafe { self.backend.create_buffer(&create_info)? };
        let id = self.resources.allocate_id();
        self.resources.insert(
            Resource::new(
                self.backend.clone(),
                id,
                ResourceKind::Buffer {
                    buffer,
                    size: create_info.size,
                },
                create_info.debug_name,
            ),
            ResourceState::new_buffer(),
        );
        Ok(id)
    }

    pub fn create_image(&mut self, create_info: ImageCreateInfo) -> Result<ResourceId, BackendError> {
        let image = unsafe { self.backend.create_image(&create_info)? };
        let id = self.resources.allocate_id();
        self.resources.insert(
            Resource::new(
                self.backend.clone(),
                id,
                ResourceKind::Image {
                    image,
                    format: create_info.format,
                    usage: create_info.image_usage,
                    width: create_info.width,
                    height: create_info.height,
                    layers: create_info.array_layers,
                    samples: create_info.samples.max(1),
                    presentable: create_info.presentable,
                },
                create_info.debug_name,
            ),
            ResourceState::new_image(create_info.format),
        );
        Ok(id)
    }

    /// Releases the resource. The native object lives on until every batch that used it
    /// completes.
    ///
    /// # Panics
    /// - If the resource is still bound or attached to the framebuffer.
    /// - If a surface still views the resource. Its id is reused once destroyed.
    pub fn destroy_resource(&mut self, id: ResourceId) {
        let Some(state) = self.resources.state(id) else {
            warn!("destroyed unknown resource {id:?}");
            return;
        };
        assert!(
            !state.has_binds() && state.fb_binds == 0,
            "destroyed {id:?} while it is still bound"
        );
        assert!(
            !self.surfaces.views_resource(id),
            "destroyed {id:?} while a surface still views it"
        );

        for domain in Domain::ALL {
            self.scheduler.remove(id, domain);
        }
        self.resources.remove(id);
    }

    /// Whether any submitted or recording batch still uses the resource.
    pub fn is_resource_busy(&self, id: ResourceId) -> bool {
        let Some(state) = self.resources.state(id) else {
            return false;
        };

        if self.batch.is_using(state) {
            return true;
        }

        state.last_batch != 0
            && self
                .batches
                .wait(state.last_batch, Some(Duration::ZERO))
                .is_err()
    }

    /// Creates a view of an image that can be attached to a framebuffer.
    ///
    /// # Panics
    /// - If `resource` is not an image.
    pub fn create_surface(
        &mut self,
        resource: ResourceId,
        create_info: ImageViewCreateInfo,
    ) -> Result<ViewId, BackendError> {
        let Some(entry) = self.resources.get(resource) else {
            panic!("surface of unknown resource {resource:?}");
        };

        let ResourceKind::Image {
            image,
            format,
            usage,
            width,
            height,
            samples,
            presentable,
            ..
        } = entry.object.kind()
        else {
            panic!("surface of buffer {resource:?}");
        };

        let view = unsafe { self.backend.create_image_view(image, &create_info)? };
        let descriptor = SurfaceDescriptor {
            format: create_info.format.unwrap_or(*format),
            usage: *usage,
            width: *width,
            height: *height,
            layers: create_info.array_layers,
            samples: *samples,
            presentable: *presentable,
        };

        let id = self.surfaces.allocate_id();
        let surface = Surface::new(
            self.backend.clone(),
            id,
            entry.object.clone(),
            view,
            descriptor,
        );
        self.surfaces.insert(surface);
        Ok(id)
    }

    /// Destroys a surface and evicts every framebuffer that references it. Batches that used
    /// the surface keep the view alive until they complete. The id may be reused right away.
    ///
    /// # Panics
    /// - If the surface is attached to the current framebuffer state.
    pub fn destroy_surface(&mut self, view: ViewId) {
        assert!(
            !self.target.is_attached(view),
            "destroyed surface {} while it is attached",
            view.0
        );

        self.framebuffers.attachment_destroyed(view);
        if self.surfaces.remove(view).is_none() {
            warn!("destroyed unknown surface {}", view.0);
        }
    }

    /// Submits the current batch. Returns the id of the submitted batch, or of the last
    /// submitted batch if there was nothing to submit.
    pub fn flush(&mut self) -> Result<u64, BackendError> {
        puffin::profile_function!();

        if self.check_device_lost() {
            return Err(BackendError::DeviceLost);
        }

        if self.target.has_pending_clears() {
            self.begin_render_pass()?;
        }
        self.end_render_pass();

        if !self.batch.has_work() {
            return Ok(self.batches.last_submitted());
        }

        let next = self.batches.acquire()?;
        let batch = std::mem::replace(&mut self.batch, next);

        // Resources destroyed while recording are skipped, their ids may already be reused.
        let used: Vec<ResourceId> = batch
            .resources()
            .filter(|resource| {
                self.resources
                    .get(resource.id())
                    .is_some_and(|entry| Arc::ptr_eq(&entry.object, resource))
            })
            .map(|resource| resource.id())
            .collect();

        // A batch that fails before being assigned an id must not be waited on.
        let id = match self.batches.submit(batch) {
            Ok(id) => id,
            Err(err) => {
                self.check_device_lost();
                return Err(err);
            }
        };

        for resource in used {
            if let Some(state) = self.resources.state_mut(resource) {
                state.last_batch = id;
            }
        }
        Ok(id)
    }

    /// Submits pending work and waits for everything to complete.
    pub fn finish(&mut self) -> Result<(), FlushError> {
        puffin::profile_function!();

        if self.batch.has_work() || self.target.has_pending_clears() {
            self.flush()?;
        }
        self.stall()
    }

    /// Waits for the last submitted batch and recycles every completed batch.
    pub fn stall(&mut self) -> Result<(), FlushError> {
        let res = self.batches.stall();
        self.check_device_lost();
        Ok(res?)
    }

    /// Waits for batch `id`. An id of `0` refers to the batch being recorded, which is flushed
    /// first.
    pub fn wait_for_batch(&mut self, id: u64) -> Result<(), FlushError> {
        let id = if id == 0 { self.flush()? } else { id };
        if id == 0 {
            return Ok(());
        }

        let res = self.batches.wait(id, None);
        self.check_device_lost();
        Ok(res?)
    }

    /// Whether batch `id` has completed. Never blocks.
    pub fn check_batch_completion(&self, id: u64) -> bool {
        if id == 0 {
            return false;
        }

        let done = self.batches.wait(id, Some(Duration::ZERO)).is_ok();
        self.check_device_lost();
        done
    }

    /// Replaces the callback invoked when the device is lost.
    pub fn set_device_reset_callback(&self, callback: Option<ResetCallback>) {
        self.reset_callback.store(callback.map(Arc::new));
    }

    pub fn device_reset_status(&self) -> ResetStatus {
        if self.check_device_lost() {
            ResetStatus::GuiltyContextReset
        } else {
            ResetStatus::NoReset
        }
    }

    #[inline(always)]
    pub fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::Acquire)
    }

    /// Latches device loss once observed. The reset callback only fires on the first
    /// observation.
    pub(crate) fn check_device_lost(&self) -> bool {
        if self.is_device_lost() {
            return true;
        }

        if !self.batches.is_device_lost() {
            return false;
        }

        if !self.device_lost.swap(true, Ordering::AcqRel) {
            error!("device lost");
            if let Some(callback) = self.reset_callback.load_full() {
                (callback.as_ref())(ResetStatus::GuiltyContextReset);
            }
        }

        true
    }
}

impl<B: Backend> Drop for Context<B> {
    fn drop(&mut self) {
        if self.check_device_lost() {
            return;
        }

        if let Err(err) = self.finish() {
            warn!("unable to finish outstanding work: {err}");
        }
    }
}
