use std::{num::NonZeroU32, sync::Arc};

use api::{
    framebuffer::{FramebufferAttachment, ViewId},
    types::{Format, ImageUsage},
    Backend,
};
use rustc_hash::FxHashMap;

use crate::resource::{IdGenerator, Resource, ResourceId};

/// A view of an image that can be attached to a framebuffer.
pub struct Surface<B: Backend> {
    backend: Arc<B>,
    id: ViewId,
    resource: Arc<Resource<B>>,
    view: B::ImageView,
    pub(crate) format: Format,
    pub(crate) usage: ImageUsage,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) layers: u32,
    pub(crate) samples: u8,
    pub(crate) presentable: bool,
}

pub(crate) struct SurfaceTable<B: Backend> {
    ids: IdGenerator,
    surfaces: FxHashMap<ViewId, Arc<Surface<B>>>,
}

pub(crate) struct SurfaceDescriptor {
    pub format: Format,
    pub usage: ImageUsage,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub samples: u8,
    pub presentable: bool,
}

impl<B: Backend> Surface<B> {
    pub(crate) fn new(
        backend: Arc<B>,
        id: ViewId,
        resource: Arc<Resource<B>>,
        view: B::ImageView,
        descriptor: SurfaceDescriptor,
    ) -> Self {
        Self {
            backend,
            id,
            resource,
            view,
            format: descriptor.format,
            usage: descriptor.usage,
            width: descriptor.width,
            height: descriptor.height,
            layers: descriptor.layers,
            samples: descriptor.samples,
            presentable: descriptor.presentable,
        }
    }

    #[inline(always)]
    pub fn id(&self) -> ViewId {
        self.id
    }

    /// The image this surface views.
    #[inline(always)]
    pub fn resource(&self) -> ResourceId {
        self.resource.id()
    }

    #[inline(always)]
    pub fn internal(&self) -> &B::ImageView {
        &self.view
    }

    #[inline(always)]
    pub fn format(&self) -> Format {
        self.format
    }

    pub fn framebuffer_attachment(&self) -> FramebufferAttachment {
        FramebufferAttachment {
            view: self.id,
            format: self.format,
            usage: self.usage,
            width: self.width,
            height: self.height,
            layers: self.layers,
        }
    }
}

impl<B: Backend> Drop for Surface<B> {
    fn drop(&mut self) {
        unsafe {
            self.backend.destroy_image_view(&mut self.view);
        }
    }
}

impl<B: Backend> Default for SurfaceTable<B> {
    fn default() -> Self {
        Self {
            ids: IdGenerator::default(),
            surfaces: FxHashMap::default(),
        }
    }
}

impl<B: Backend> SurfaceTable<B> {
    #[inline(always)]
    pub fn allocate_id(&self) -> ViewId {
        ViewId(self.ids.create().get())
    }

    /// Returns an id that was allocated but never inserted.
    #[inline(always)]
    pub fn release_id(&self, id: ViewId) {
        if let Some(id) = NonZeroU32::new(id.0) {
            self.ids.free(id);
        }
    }

    #[inline(always)]
    pub fn insert(&mut self, surface: Surface<B>) {
        self.surfaces.insert(surface.id(), Arc::new(surface));
    }

    /// Removes the surface. Its id may be handed out again immediately.
    pub fn remove(&mut self, id: ViewId) -> Option<Arc<Surface<B>>> {
        let surface = self.surfaces.remove(&id)?;
        self.release_id(id);
        Some(surface)
    }

    #[inline(always)]
    pub fn get(&self, id: ViewId) -> Option<&Arc<Surface<B>>> {
        self.surfaces.get(&id)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    /// Whether any live surface views the resource.
    pub fn views_resource(&self, id: ResourceId) -> bool {
        self.surfaces.values().any(|surface| surface.resource() == id)
    }
}
