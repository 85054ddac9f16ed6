use api::{
    types::{Domain, ShaderStage},
    Backend,
};
use serde::{Deserialize, Serialize};

use crate::{context::Context, resource::ResourceId};

pub const MAX_CONSTANT_BUFFERS: usize = 16;
pub const MAX_SHADER_BUFFERS: usize = 16;
pub const MAX_SAMPLER_VIEWS: usize = 32;
pub const MAX_SHADER_IMAGES: usize = 8;
pub const MAX_VERTEX_BUFFERS: usize = 32;
pub const MAX_STREAM_OUTPUT_TARGETS: usize = 4;

/// A storage buffer binding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderBuffer {
    pub resource: ResourceId,
    pub writable: bool,
}

/// A storage image binding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderImage {
    pub resource: ResourceId,
    pub writable: bool,
}

/// The kind of a single bind, which determines the counters it moves.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum BindKind {
    ConstantBuffer,
    ShaderBuffer { writable: bool },
    SamplerView,
    ShaderImage { writable: bool },
    VertexBuffer { slot: u32 },
    StreamOutput,
    BindlessTexture,
    BindlessImage { writable: bool },
}

/// Every slot-based binding point.
#[derive(Default)]
pub(crate) struct Bindings {
    constant_buffers: [[Option<ResourceId>; MAX_CONSTANT_BUFFERS]; ShaderStage::COUNT],
    shader_buffers: [[Option<ShaderBuffer>; MAX_SHADER_BUFFERS]; ShaderStage::COUNT],
    sampler_views: [[Option<ResourceId>; MAX_SAMPLER_VIEWS]; ShaderStage::COUNT],
    shader_images: [[Option<ShaderImage>; MAX_SHADER_IMAGES]; ShaderStage::COUNT],
    vertex_buffers: [Option<ResourceId>; MAX_VERTEX_BUFFERS],
    stream_outputs: [Option<ResourceId>; MAX_STREAM_OUTPUT_TARGETS],
}

impl BindKind {
    #[inline(always)]
    pub fn is_write(self) -> bool {
        match self {
            BindKind::ShaderBuffer { writable }
            | BindKind::ShaderImage { writable }
            | BindKind::BindlessImage { writable } => writable,
            BindKind::StreamOutput => true,
            _ => false,
        }
    }

    /// Binds that require the image to be in the general layout.
    #[inline(always)]
    pub fn is_image(self) -> bool {
        matches!(
            self,
            BindKind::ShaderImage { .. } | BindKind::BindlessImage { .. }
        )
    }
}

impl Bindings {
    /// Every resource bound in `domain`. A resource bound in several slots appears several
    /// times.
    pub fn bound(&self, domain: Domain) -> impl Iterator<Item = ResourceId> + '_ {
        let stages = ShaderStage::ALL
            .into_iter()
            .filter(move |stage| stage.domain() == domain);

        let per_stage = stages.flat_map(move |stage| {
            let s = stage.idx();
            self.constant_buffers[s]
                .iter()
                .flatten()
                .copied()
                .chain(self.shader_buffers[s].iter().flatten().map(|b| b.resource))
                .chain(self.sampler_views[s].iter().flatten().copied())
                .chain(self.shader_images[s].iter().flatten().map(|i| i.resource))
        });

        let fixed_function: &[Option<ResourceId>] = match domain {
            Domain::Graphics => &self.vertex_buffers,
            Domain::Compute => &[],
        };
        let stream_outputs: &[Option<ResourceId>] = match domain {
            Domain::Graphics => &self.stream_outputs,
            Domain::Compute => &[],
        };

        per_stage
            .chain(fixed_function.iter().flatten().copied())
            .chain(stream_outputs.iter().flatten().copied())
    }
}

impl<B: Backend> Context<B> {
    /// Binds a uniform buffer to `slot` of `stage`, or unbinds the slot with `None`.
    pub fn set_constant_buffer(
        &mut self,
        stage: ShaderStage,
        slot: usize,
        buffer: Option<ResourceId>,
    ) {
        let old = self.bindings.constant_buffers[stage.idx()][slot];
        if old == buffer {
            return;
        }

        if let Some(old) = old {
            self.unbind_resource(old, stage.domain(), Some(stage), BindKind::ConstantBuffer);
        }

        if let Some(new) = buffer {
            self.bind_resource(new, stage.domain(), Some(stage), BindKind::ConstantBuffer);
        }

        self.bindings.constant_buffers[stage.idx()][slot] = buffer;
    }

    /// Binds storage buffers starting at `start`. Bit `i` of `writable_mask` marks
    /// `buffers[i]` as written by the shader.
    pub fn set_shader_buffers(
        &mut self,
        stage: ShaderStage,
        start: usize,
        buffers: &[Option<ResourceId>],
        writable_mask: u32,
    ) {
        for (i, buffer) in buffers.iter().enumerate() {
            let slot = start + i;
            let new = buffer.map(|resource| ShaderBuffer {
                resource,
                writable: writable_mask & (1 << i) != 0,
            });

            let old = self.bindings.shader_buffers[stage.idx()][slot];
            if old == new {
                continue;
            }

            if let Some(old) = old {
                self.unbind_resource(
                    old.resource,
                    stage.domain(),
                    Some(stage),
                    BindKind::ShaderBuffer {
                        writable: old.writable,
                    },
                );
            }

            if let Some(new) = new {
                self.bind_resource(
                    new.resource,
                    stage.domain(),
                    Some(stage),
                    BindKind::ShaderBuffer {
                        writable: new.writable,
                    },
                );
            }

            self.bindings.shader_buffers[stage.idx()][slot] = new;
        }
    }

    /// Binds sampled images starting at `start`.
    pub fn set_sampler_views(
        &mut self,
        stage: ShaderStage,
        start: usize,
        views: &[Option<ResourceId>],
    ) {
        for (i, view) in views.iter().enumerate() {
            let slot = start + i;
            let old = self.bindings.sampler_views[stage.idx()][slot];
            if old == *view {
                continue;
            }

            if let Some(old) = old {
                self.unbind_resource(old, stage.domain(), Some(stage), BindKind::SamplerView);
            }

            if let Some(new) = *view {
                self.bind_resource(new, stage.domain(), Some(stage), BindKind::SamplerView);
            }

            self.bindings.sampler_views[stage.idx()][slot] = *view;
        }
    }

    /// Binds storage images starting at `start`.
    pub fn set_shader_images(
        &mut self,
        stage: ShaderStage,
        start: usize,
        images: &[Option<ShaderImage>],
    ) {
        for (i, image) in images.iter().enumerate() {
            let slot = start + i;
            let old = self.bindings.shader_images[stage.idx()][slot];
            if old == *image {
                continue;
            }

            if let Some(old) = old {
                self.unbind_resource(
                    old.resource,
                    stage.domain(),
                    Some(stage),
                    BindKind::ShaderImage {
                        writable: old.writable,
                    },
                );
            }

            if let Some(new) = *image {
                self.bind_resource(
                    new.resource,
                    stage.domain(),
                    Some(stage),
                    BindKind::ShaderImage {
                        writable: new.writable,
                    },
                );
            }

            self.bindings.shader_images[stage.idx()][slot] = *image;
        }
    }

    /// Binds vertex buffers starting at `start`.
    pub fn set_vertex_buffers(&mut self, start: usize, buffers: &[Option<ResourceId>]) {
        for (i, buffer) in buffers.iter().enumerate() {
            let slot = start + i;
            let old = self.bindings.vertex_buffers[slot];
            if old == *buffer {
                continue;
            }

            let kind = BindKind::VertexBuffer { slot: slot as u32 };
            if let Some(old) = old {
                self.unbind_resource(old, Domain::Graphics, None, kind);
            }

            if let Some(new) = *buffer {
                self.bind_resource(new, Domain::Graphics, None, kind);
            }

            self.bindings.vertex_buffers[slot] = *buffer;
        }
    }

    /// Replaces every stream output target.
    pub fn set_stream_output_targets(&mut self, targets: &[Option<ResourceId>]) {
        assert!(
            targets.len() <= MAX_STREAM_OUTPUT_TARGETS,
            "too many stream output targets"
        );

        for slot in 0..MAX_STREAM_OUTPUT_TARGETS {
            let new = targets.get(slot).copied().flatten();
            let old = self.bindings.stream_outputs[slot];
            if old == new {
                continue;
            }

            if let Some(old) = old {
                self.unbind_resource(old, Domain::Graphics, None, BindKind::StreamOutput);
            }

            if let Some(new) = new {
                self.bind_resource(new, Domain::Graphics, None, BindKind::StreamOutput);
            }

            self.bindings.stream_outputs[slot] = new;
        }
    }

    /// Adds a bind and queues the barriers it needs. Binding never records a barrier itself.
    pub(crate) fn bind_resource(
        &mut self,
        id: ResourceId,
        domain: Domain,
        stage: Option<ShaderStage>,
        kind: BindKind,
    ) {
        let Some(state) = self.resources.state_mut(id) else {
            panic!("bound unknown resource {id:?}");
        };

        state.add_bind(domain, stage, kind);
        let is_buffer = state.is_buffer;
        let other_binds = state.bind_count[domain.other().idx()];

        self.scheduler.enqueue(id, domain);
        if is_buffer {
            // A new writer must be ordered against readers in the other domain.
            if kind.is_write() && other_binds > 0 {
                self.scheduler.enqueue(id, domain.other());
            }
        } else {
            self.check_for_layout_update(id, domain);
        }
    }

    /// Removes a bind. Resources left without binds in `domain` stop being tracked there.
    pub(crate) fn unbind_resource(
        &mut self,
        id: ResourceId,
        domain: Domain,
        stage: Option<ShaderStage>,
        kind: BindKind,
    ) {
        let Some(state) = self.resources.state_mut(id) else {
            return;
        };

        let last = state.remove_bind(domain, stage, kind);
        let layout_changes =
            !state.is_buffer && kind.is_image() && state.image_bind_count[domain.idx()] == 0;

        if last {
            self.scheduler.remove(id, domain);
        } else if layout_changes {
            self.check_for_layout_update(id, domain);
        }
    }

    /// Keeps every resource bound in `domain` alive until the current batch completes.
    pub(crate) fn reference_bound(&mut self, domain: Domain) {
        puffin::profile_function!();

        let bound = self
            .bindings
            .bound(domain)
            .chain(self.bindless.resident());
        for id in bound {
            if let Some(entry) = self.resources.get_mut(id) {
                self.batch.reference_resource(&mut entry.state, &entry.object);
            }
        }
    }
}
