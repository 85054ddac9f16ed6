use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use api::{
    barrier::SampleLocations,
    types::{
        AccessFlags, Domain, Format, ImageAspect, ImageLayout, ImageUsage, PipelineStageFlags,
        ShaderStage,
    },
    Backend,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::bindings::BindKind;

#[derive(Debug)]
pub(crate) struct IdGenerator {
    counter: AtomicU32,
    free: Mutex<Vec<NonZeroU32>>,
}

/// Identifies a buffer or image owned by a [`Context`](crate::context::Context).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(NonZeroU32);

/// A native buffer or image. Shared between the resource table and every batch that touched
/// it, so the native object is destroyed once the last of them lets go.
pub struct Resource<B: Backend> {
    backend: Arc<B>,
    id: ResourceId,
    kind: ResourceKind<B>,
    debug_name: Option<String>,
}

pub enum ResourceKind<B: Backend> {
    Buffer {
        buffer: B::Buffer,
        size: u64,
    },
    Image {
        image: B::Image,
        format: Format,
        usage: ImageUsage,
        width: u32,
        height: u32,
        layers: u32,
        samples: u8,
        presentable: bool,
    },
}

/// Everything the tracker knows about how a resource is used.
#[derive(Debug, Default, Clone)]
pub struct ResourceState {
    pub is_buffer: bool,
    pub aspect: ImageAspect,
    /// Current layout. Always `Undefined` for buffers.
    pub layout: ImageLayout,
    /// Access classes made available by the last barrier.
    pub access: AccessFlags,
    /// Stages the last barrier synchronized with.
    pub access_stage: PipelineStageFlags,
    /// The last barrier was recorded into the unordered barrier stream.
    pub unordered_barrier: bool,
    /// A depth image must be re-evaluated with these sample positions on its next barrier.
    pub zs_evaluate: Option<SampleLocations>,
    pub bind_count: [u32; 2],
    pub write_bind_count: [u32; 2],
    pub image_bind_count: [u32; 2],
    pub ubo_bind_count: [u32; 2],
    pub so_bind_count: u32,
    pub vbo_bind_mask: u64,
    /// Number of times the resource is attached to the current framebuffer.
    pub fb_binds: u32,
    /// Bind count per shader stage. Vertex buffers and stream output targets are not counted.
    pub stage_binds: [u32; ShaderStage::COUNT],
    /// Usage marker of the last batch that referenced the resource.
    pub(crate) batch_usage: u64,
    /// Id of the last submitted batch that referenced the resource.
    pub(crate) last_batch: u64,
}

pub(crate) struct ResourceEntry<B: Backend> {
    pub object: Arc<Resource<B>>,
    pub state: ResourceState,
}

pub(crate) struct ResourceTable<B: Backend> {
    ids: IdGenerator,
    entries: FxHashMap<ResourceId, ResourceEntry<B>>,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self {
            counter: AtomicU32::new(1),
            free: Mutex::new(Vec::default()),
        }
    }
}

impl IdGenerator {
    #[inline(always)]
    pub fn create(&self) -> NonZeroU32 {
        match self.free.lock().unwrap().pop() {
            Some(id) => id,
            // SAFETY: Safe since we initialize the counter to 1.
            None => unsafe {
                let id = self.counter.fetch_add(1, Ordering::Relaxed);
                debug_assert!(id != 0);
                NonZeroU32::new_unchecked(id)
            },
        }
    }

    #[inline(always)]
    pub fn free(&self, id: NonZeroU32) {
        self.free.lock().unwrap().push(id);
    }
}

impl ResourceId {
    #[inline(always)]
    pub fn as_idx(self) -> usize {
        (self.0.get() - 1) as usize
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u32) -> Self {
        ResourceId(NonZeroU32::new(raw).unwrap())
    }
}

impl<B: Backend> Resource<B> {
    pub(crate) fn new(
        backend: Arc<B>,
        id: ResourceId,
        kind: ResourceKind<B>,
        debug_name: Option<String>,
    ) -> Self {
        Self {
            backend,
            id,
            kind,
            debug_name,
        }
    }

    #[inline(always)]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[inline(always)]
    pub fn kind(&self) -> &ResourceKind<B> {
        &self.kind
    }

    #[inline(always)]
    pub fn debug_name(&self) -> Option<&str> {
        self.debug_name.as_deref()
    }

    #[inline(always)]
    pub fn is_buffer(&self) -> bool {
        matches!(self.kind, ResourceKind::Buffer { .. })
    }
}

impl<B: Backend> Drop for Resource<B> {
    fn drop(&mut self) {
        unsafe {
            match &mut self.kind {
                ResourceKind::Buffer { buffer, .. } => self.backend.destroy_buffer(buffer),
                ResourceKind::Image { image, .. } => self.backend.destroy_image(image),
            }
        }
    }
}

impl ResourceState {
    pub(crate) fn new_buffer() -> Self {
        Self {
            is_buffer: true,
            ..Default::default()
        }
    }

    pub(crate) fn new_image(format: Format) -> Self {
        Self {
            is_buffer: false,
            aspect: format.aspect(),
            ..Default::default()
        }
    }

    #[inline(always)]
    pub fn has_binds(&self) -> bool {
        self.bind_count[0] + self.bind_count[1] > 0
    }

    /// The layout an image must be in for the shader binds it has in `domain`.
    pub fn layout_eval(&self, domain: Domain) -> ImageLayout {
        if self.image_bind_count[domain.idx()] > 0 {
            ImageLayout::General
        } else if self
            .aspect
            .intersects(ImageAspect::DEPTH | ImageAspect::STENCIL)
        {
            ImageLayout::DepthStencilReadOnlyOptimal
        } else {
            ImageLayout::ShaderReadOnlyOptimal
        }
    }

    /// Access classes required by the binds the resource has in `domain`. Write binds only
    /// contribute shader writes, every remaining bind contributes its read class.
    pub fn bind_access(&self, domain: Domain) -> AccessFlags {
        let d = domain.idx();
        let mut access = AccessFlags::empty();
        if self.bind_count[d] == 0 {
            return access;
        }

        if self.write_bind_count[d] > 0 {
            access |= AccessFlags::SHADER_WRITE;
        }

        if self.write_bind_count[d] != self.bind_count[d] {
            let mut reads = self.bind_count[d] - self.write_bind_count[d];
            if self.is_buffer {
                if self.ubo_bind_count[d] > 0 {
                    access |= AccessFlags::UNIFORM_READ;
                    reads = reads.saturating_sub(self.ubo_bind_count[d]);
                }

                if domain == Domain::Graphics {
                    if self.vbo_bind_mask != 0 {
                        access |= AccessFlags::VERTEX_ATTRIBUTE_READ;
                        reads = reads.saturating_sub(self.vbo_bind_mask.count_ones());
                    }

                    if self.so_bind_count > 0 {
                        access |= AccessFlags::TRANSFORM_FEEDBACK_WRITE;
                        reads = reads.saturating_sub(self.so_bind_count);
                    }
                }
            }

            if reads > 0 {
                access |= AccessFlags::SHADER_READ;
            }
        }

        access
    }

    /// Stages the binds in `domain` execute in.
    pub fn bind_stage(&self, domain: Domain) -> PipelineStageFlags {
        if domain == Domain::Compute {
            return PipelineStageFlags::COMPUTE_SHADER;
        }

        let mut stage = PipelineStageFlags::empty();
        for shader in ShaderStage::ALL {
            if shader.domain() == Domain::Graphics && self.stage_binds[shader.idx()] > 0 {
                stage |= shader.pipeline_stage();
            }
        }

        if self.vbo_bind_mask != 0 {
            stage |= PipelineStageFlags::VERTEX_INPUT;
        }

        if self.so_bind_count > 0 {
            stage |= PipelineStageFlags::TRANSFORM_FEEDBACK;
        }

        if stage.is_empty() {
            stage = PipelineStageFlags::GRAPHICS_SHADERS;
        }

        stage
    }

    pub(crate) fn add_bind(&mut self, domain: Domain, stage: Option<ShaderStage>, kind: BindKind) {
        let d = domain.idx();
        self.bind_count[d] += 1;
        if let Some(stage) = stage {
            self.stage_binds[stage.idx()] += 1;
        }

        match kind {
            BindKind::ConstantBuffer => self.ubo_bind_count[d] += 1,
            BindKind::ShaderBuffer { writable } => {
                if writable {
                    self.write_bind_count[d] += 1;
                }
            }
            BindKind::SamplerView => {}
            BindKind::ShaderImage { writable } | BindKind::BindlessImage { writable } => {
                if writable {
                    self.write_bind_count[d] += 1;
                }
                self.image_bind_count[d] += 1;
            }
            BindKind::BindlessTexture => {}
            BindKind::VertexBuffer { slot } => {
                debug_assert_eq!(self.vbo_bind_mask & (1 << slot), 0);
                self.vbo_bind_mask |= 1 << slot;
            }
            BindKind::StreamOutput => self.so_bind_count += 1,
        }

        debug_assert!(self.write_bind_count[d] <= self.bind_count[d]);
    }

    /// Returns `true` if this was the last bind in `domain`.
    pub(crate) fn remove_bind(
        &mut self,
        domain: Domain,
        stage: Option<ShaderStage>,
        kind: BindKind,
    ) -> bool {
        let d = domain.idx();
        assert!(self.bind_count[d] > 0, "bind count underflow");
        self.bind_count[d] -= 1;
        if let Some(stage) = stage {
            assert!(self.stage_binds[stage.idx()] > 0, "stage bind underflow");
            self.stage_binds[stage.idx()] -= 1;
        }

        match kind {
            BindKind::ConstantBuffer => self.ubo_bind_count[d] -= 1,
            BindKind::ShaderBuffer { writable } => {
                if writable {
                    self.write_bind_count[d] -= 1;
                }
            }
            BindKind::SamplerView => {}
            BindKind::ShaderImage { writable } | BindKind::BindlessImage { writable } => {
                if writable {
                    self.write_bind_count[d] -= 1;
                }
                self.image_bind_count[d] -= 1;
            }
            BindKind::BindlessTexture => {}
            BindKind::VertexBuffer { slot } => self.vbo_bind_mask &= !(1 << slot),
            BindKind::StreamOutput => self.so_bind_count -= 1,
        }

        debug_assert!(self.write_bind_count[d] <= self.bind_count[d]);
        self.bind_count[d] == 0
    }
}

impl<B: Backend> Default for ResourceTable<B> {
    fn default() -> Self {
        Self {
            ids: IdGenerator::default(),
            entries: FxHashMap::default(),
        }
    }
}

impl<B: Backend> ResourceTable<B> {
    #[inline(always)]
    pub fn allocate_id(&self) -> ResourceId {
        ResourceId(self.ids.create())
    }

    #[inline(always)]
    pub fn insert(&mut self, object: Resource<B>, state: ResourceState) {
        let id = object.id();
        self.entries.insert(
            id,
            ResourceEntry {
                object: Arc::new(object),
                state,
            },
        );
    }

    /// Removes the entry and makes the id available again.
    pub fn remove(&mut self, id: ResourceId) -> Option<ResourceEntry<B>> {
        let entry = self.entries.remove(&id)?;
        self.ids.free(id.0);
        Some(entry)
    }

    #[inline(always)]
    pub fn get(&self, id: ResourceId) -> Option<&ResourceEntry<B>> {
        self.entries.get(&id)
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut ResourceEntry<B>> {
        self.entries.get_mut(&id)
    }

    #[inline(always)]
    pub fn state(&self, id: ResourceId) -> Option<&ResourceState> {
        self.entries.get(&id).map(|entry| &entry.state)
    }

    #[inline(always)]
    pub fn state_mut(&mut self, id: ResourceId) -> Option<&mut ResourceState> {
        self.entries.get_mut(&id).map(|entry| &mut entry.state)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_recycled() {
        let ids = IdGenerator::default();
        let a = ids.create();
        let b = ids.create();
        assert_ne!(a, b);
        ids.free(a);
        assert_eq!(ids.create(), a);
    }

    #[test]
    fn write_binds_dominate_reads() {
        let mut state = ResourceState::new_buffer();
        state.add_bind(
            Domain::Compute,
            Some(ShaderStage::Compute),
            BindKind::ShaderBuffer { writable: true },
        );
        assert_eq!(
            state.bind_access(Domain::Compute),
            AccessFlags::SHADER_WRITE
        );

        state.add_bind(
            Domain::Compute,
            Some(ShaderStage::Compute),
            BindKind::ConstantBuffer,
        );
        assert_eq!(
            state.bind_access(Domain::Compute),
            AccessFlags::SHADER_WRITE | AccessFlags::UNIFORM_READ
        );
    }

    #[test]
    fn graphics_stage_from_binds() {
        let mut state = ResourceState::new_buffer();
        assert_eq!(
            state.bind_stage(Domain::Graphics),
            PipelineStageFlags::GRAPHICS_SHADERS
        );

        state.add_bind(
            Domain::Graphics,
            Some(ShaderStage::Fragment),
            BindKind::ConstantBuffer,
        );
        state.add_bind(Domain::Graphics, None, BindKind::VertexBuffer { slot: 3 });
        assert_eq!(
            state.bind_stage(Domain::Graphics),
            PipelineStageFlags::FRAGMENT_SHADER | PipelineStageFlags::VERTEX_INPUT
        );
        assert_eq!(
            state.bind_access(Domain::Graphics),
            AccessFlags::UNIFORM_READ | AccessFlags::VERTEX_ATTRIBUTE_READ
        );
    }

    #[test]
    fn image_layout_eval() {
        let mut state = ResourceState::new_image(Format::Rgba8Unorm);
        assert_eq!(
            state.layout_eval(Domain::Graphics),
            ImageLayout::ShaderReadOnlyOptimal
        );

        state.add_bind(
            Domain::Compute,
            Some(ShaderStage::Compute),
            BindKind::ShaderImage { writable: true },
        );
        assert_eq!(state.layout_eval(Domain::Compute), ImageLayout::General);
        assert_eq!(
            state.layout_eval(Domain::Graphics),
            ImageLayout::ShaderReadOnlyOptimal
        );

        let depth = ResourceState::new_image(Format::D32Sfloat);
        assert_eq!(
            depth.layout_eval(Domain::Graphics),
            ImageLayout::DepthStencilReadOnlyOptimal
        );
    }

    #[test]
    fn last_unbind_is_reported() {
        let mut state = ResourceState::new_buffer();
        state.add_bind(
            Domain::Graphics,
            Some(ShaderStage::Vertex),
            BindKind::ConstantBuffer,
        );
        state.add_bind(
            Domain::Graphics,
            Some(ShaderStage::Fragment),
            BindKind::ConstantBuffer,
        );

        assert!(!state.remove_bind(
            Domain::Graphics,
            Some(ShaderStage::Vertex),
            BindKind::ConstantBuffer
        ));
        assert!(state.remove_bind(
            Domain::Graphics,
            Some(ShaderStage::Fragment),
            BindKind::ConstantBuffer
        ));
        assert_eq!(state.ubo_bind_count, [0, 0]);
        assert_eq!(state.stage_binds, [0; ShaderStage::COUNT]);
    }
}
