use std::sync::Arc;

use api::{types::Domain, Backend};
use ard_log::warn;
use rustc_hash::FxHashMap;

use crate::{
    bindings::BindKind,
    context::Context,
    resource::{Resource, ResourceId},
};

/// A handle shaders use to access a resource without a binding slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BindlessHandle(u64);

struct HandleEntry<B: Backend> {
    /// Keeps the resource alive for as long as the handle exists.
    object: Arc<Resource<B>>,
    kind: BindKind,
    resident: bool,
}

/// Texture and storage image handles. A resident handle counts as a bind in both domains since
/// any shader may use it.
pub(crate) struct BindlessHandles<B: Backend> {
    handles: FxHashMap<BindlessHandle, HandleEntry<B>>,
    next: u64,
    free: Vec<BindlessHandle>,
}

impl BindlessHandle {
    #[inline(always)]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl<B: Backend> Default for BindlessHandles<B> {
    fn default() -> Self {
        Self {
            handles: FxHashMap::default(),
            next: 0,
            free: Vec::default(),
        }
    }
}

impl<B: Backend> BindlessHandles<B> {
    fn allocate(&mut self) -> BindlessHandle {
        match self.free.pop() {
            Some(handle) => handle,
            None => {
                self.next += 1;
                BindlessHandle(self.next)
            }
        }
    }

    /// Resources referenced by resident handles.
    pub fn resident(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.handles
            .values()
            .filter(|entry| entry.resident)
            .map(|entry| entry.object.id())
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.handles.len()
    }
}

impl<B: Backend> Context<B> {
    /// Creates a sampled texture handle for an image or texel buffer.
    pub fn create_texture_handle(&mut self, resource: ResourceId) -> BindlessHandle {
        self.create_handle(resource, BindKind::BindlessTexture)
    }

    /// Creates a storage image handle.
    pub fn create_image_handle(&mut self, resource: ResourceId, writable: bool) -> BindlessHandle {
        self.create_handle(resource, BindKind::BindlessImage { writable })
    }

    /// Makes a handle usable by shaders or stops it from being usable. Handles whose resource
    /// was destroyed can no longer be made resident.
    pub fn make_handle_resident(&mut self, handle: BindlessHandle, resident: bool) {
        let Some(entry) = self.bindless.handles.get(&handle) else {
            warn!("residency change for unknown bindless handle {}", handle.raw());
            return;
        };

        if entry.resident == resident {
            return;
        }

        // The id may have been handed to a different resource since.
        let resource = entry.object.id();
        let live = self
            .resources
            .get(resource)
            .is_some_and(|current| Arc::ptr_eq(&current.object, &entry.object));
        if !live {
            warn!(
                "bindless handle {} refers to destroyed resource {resource:?}",
                handle.raw()
            );
            return;
        }

        let kind = entry.kind;
        if let Some(entry) = self.bindless.handles.get_mut(&handle) {
            entry.resident = resident;
        }

        for domain in Domain::ALL {
            if resident {
                self.bind_resource(resource, domain, None, kind);
            } else {
                self.unbind_resource(resource, domain, None, kind);
            }
        }
    }

    /// Deletes a handle, making it non-resident first.
    pub fn delete_handle(&mut self, handle: BindlessHandle) {
        self.make_handle_resident(handle, false);
        if self.bindless.handles.remove(&handle).is_some() {
            self.bindless.free.push(handle);
        }
    }

    fn create_handle(&mut self, resource: ResourceId, kind: BindKind) -> BindlessHandle {
        let Some(entry) = self.resources.get(resource) else {
            panic!("bindless handle for unknown resource {resource:?}");
        };
        let object = entry.object.clone();

        let handle = self.bindless.allocate();
        self.bindless.handles.insert(
            handle,
            HandleEntry {
                object,
                kind,
                resident: false,
            },
        );
        handle
    }
}
