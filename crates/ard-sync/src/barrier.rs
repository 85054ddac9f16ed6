use api::{
    barrier::{Barrier, BufferBarrier, ImageBarrier, PipelineBarrier},
    types::{AccessFlags, Domain, ImageLayout, PipelineStageFlags},
    Backend,
};
use ard_log::warn;

use crate::{
    context::Context,
    resource::{ResourceId, ResourceKind, ResourceState},
};

/// Which command buffer of the current batch a barrier is recorded into.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommandStream {
    /// The main command buffer. Barriers here are ordered with every other command.
    Primary,
    /// Executes before the primary command buffer. Lets barriers be hoisted out of an active
    /// render pass.
    Unordered,
}

/// Access a layout makes available as the source of a transition.
pub const fn access_src_flags(layout: ImageLayout) -> AccessFlags {
    match layout {
        ImageLayout::Undefined | ImageLayout::PresentSrc => AccessFlags::empty(),
        ImageLayout::General => AccessFlags::TRANSFER_READ.union(AccessFlags::TRANSFER_WRITE),
        ImageLayout::ColorAttachmentOptimal => AccessFlags::COLOR_ATTACHMENT_READ,
        ImageLayout::DepthStencilAttachmentOptimal => AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ImageLayout::DepthStencilReadOnlyOptimal | ImageLayout::ShaderReadOnlyOptimal => {
            AccessFlags::SHADER_READ
        }
        ImageLayout::TransferSrcOptimal => AccessFlags::TRANSFER_READ,
        ImageLayout::TransferDstOptimal => AccessFlags::TRANSFER_WRITE,
        ImageLayout::Preinitialized => AccessFlags::HOST_WRITE,
    }
}

/// Access a layout is used with after a transition.
pub const fn access_dst_flags(layout: ImageLayout) -> AccessFlags {
    match layout {
        ImageLayout::Undefined | ImageLayout::PresentSrc | ImageLayout::Preinitialized => {
            AccessFlags::empty()
        }
        ImageLayout::General => AccessFlags::TRANSFER_READ.union(AccessFlags::TRANSFER_WRITE),
        ImageLayout::ColorAttachmentOptimal => AccessFlags::COLOR_ATTACHMENT_WRITE,
        ImageLayout::DepthStencilAttachmentOptimal => AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ImageLayout::DepthStencilReadOnlyOptimal | ImageLayout::ShaderReadOnlyOptimal => {
            AccessFlags::SHADER_READ
        }
        ImageLayout::TransferSrcOptimal => AccessFlags::TRANSFER_READ,
        ImageLayout::TransferDstOptimal => AccessFlags::TRANSFER_WRITE,
    }
}

/// Stage a layout is used in after a transition.
pub const fn pipeline_dst_stage(layout: ImageLayout) -> PipelineStageFlags {
    match layout {
        ImageLayout::ColorAttachmentOptimal => PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ImageLayout::DepthStencilAttachmentOptimal => PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ImageLayout::TransferSrcOptimal | ImageLayout::TransferDstOptimal => {
            PipelineStageFlags::TRANSFER
        }
        ImageLayout::General => PipelineStageFlags::ALL_COMMANDS,
        ImageLayout::ShaderReadOnlyOptimal | ImageLayout::DepthStencilReadOnlyOptimal => {
            PipelineStageFlags::FRAGMENT_SHADER
        }
        _ => PipelineStageFlags::BOTTOM_OF_PIPE,
    }
}

/// Stages implied by a buffer access when none are given.
pub const fn pipeline_access_stage(access: AccessFlags) -> PipelineStageFlags {
    if access.intersects(
        AccessFlags::UNIFORM_READ
            .union(AccessFlags::SHADER_READ)
            .union(AccessFlags::SHADER_WRITE),
    ) {
        PipelineStageFlags::ALL_SHADERS
    } else {
        PipelineStageFlags::TRANSFER
    }
}

impl ResourceState {
    /// Whether a buffer access needs a barrier given what the last barrier made available.
    pub fn buffer_needs_barrier(&self, access: AccessFlags, stage: PipelineStageFlags) -> bool {
        if self.access.is_empty() || self.access_stage.is_empty() {
            return true;
        }

        let stage = if stage.is_empty() {
            pipeline_access_stage(access)
        } else {
            stage
        };

        // An earlier stage in the recorded scope already orders later stages. Stage bits are in
        // pipeline order, so every bit below the lowest requested one is an earlier stage.
        let earlier = PipelineStageFlags::from_bits_retain(stage.bits().wrapping_sub(1));
        self.access.is_write()
            || access.is_write()
            || (!self.access_stage.contains(stage) && !self.access_stage.intersects(earlier))
            || !self.access.contains(access)
    }

    /// Whether an image access needs a barrier given its current layout and what the last
    /// barrier made available.
    pub fn image_needs_barrier(
        &self,
        layout: ImageLayout,
        access: AccessFlags,
        stage: PipelineStageFlags,
    ) -> bool {
        let stage = if stage.is_empty() {
            pipeline_dst_stage(layout)
        } else {
            stage
        };
        let access = if access.is_empty() {
            access_dst_flags(layout)
        } else {
            access
        };

        self.zs_evaluate.is_some()
            || self.layout != layout
            || !self.access_stage.contains(stage)
            || !self.access.contains(access)
            || self.access.is_write()
            || access.is_write()
    }

    fn record_access(&mut self, access: AccessFlags, stage: PipelineStageFlags) {
        if self.unordered_barrier {
            self.access |= access;
            self.access_stage |= stage;
        } else {
            self.access = access;
            self.access_stage = stage;
        }
    }
}

impl<B: Backend> Context<B> {
    /// Makes `access` at `stage` visible for a buffer, recording a barrier only if one is
    /// needed. Returns `true` if a barrier was recorded.
    ///
    /// An empty `stage` defaults to the stages implied by `access`.
    pub fn request_buffer_access(
        &mut self,
        id: ResourceId,
        access: AccessFlags,
        stage: PipelineStageFlags,
    ) -> bool {
        let stage = if stage.is_empty() {
            pipeline_access_stage(access)
        } else {
            stage
        };

        let Some(state) = self.resources.state(id) else {
            warn!("requested buffer access for unknown resource {id:?}");
            return false;
        };
        assert!(state.is_buffer, "{id:?} is not a buffer");

        if !state.buffer_needs_barrier(access, stage) {
            return false;
        }

        let (src_access, src_stage) = if state.access_stage.is_empty() {
            (AccessFlags::empty(), pipeline_access_stage(state.access))
        } else {
            (state.access, state.access_stage)
        };

        let stream = self.select_command_stream(id);
        let Some(entry) = self.resources.get_mut(id) else {
            return false;
        };

        if let ResourceKind::Buffer { buffer, .. } = entry.object.kind() {
            unsafe {
                self.backend.cmd_pipeline_barrier(
                    self.batch.stream_mut(stream),
                    PipelineBarrier {
                        src_stage,
                        dst_stage: stage,
                        barrier: Barrier::Buffer(BufferBarrier {
                            buffer,
                            src_access,
                            dst_access: access,
                        }),
                    },
                );
            }
        }

        self.batch.reference_resource(&mut entry.state, &entry.object);
        entry.state.record_access(access, stage);
        self.check_defer_buffer_barrier(id, stage);
        true
    }

    /// Makes `access` at `stage` visible for an image in `layout`, recording a barrier (and a
    /// layout transition) only if one is needed. Returns `true` if a barrier was recorded.
    ///
    /// Empty `access` and `stage` default to what `layout` is typically used with.
    pub fn request_image_access(
        &mut self,
        id: ResourceId,
        layout: ImageLayout,
        access: AccessFlags,
        stage: PipelineStageFlags,
    ) -> bool {
        let stage = if stage.is_empty() {
            pipeline_dst_stage(layout)
        } else {
            stage
        };
        let access = if access.is_empty() {
            access_dst_flags(layout)
        } else {
            access
        };

        let Some(state) = self.resources.state(id) else {
            warn!("requested image access for unknown resource {id:?}");
            return false;
        };
        assert!(!state.is_buffer, "{id:?} is not an image");

        if !state.image_needs_barrier(layout, access, stage) {
            return false;
        }

        let (src_access, src_stage) = if state.access_stage.is_empty() {
            (AccessFlags::empty(), PipelineStageFlags::TOP_OF_PIPE)
        } else if state.access.is_empty() {
            (access_src_flags(state.layout), state.access_stage)
        } else {
            (state.access, state.access_stage)
        };

        let stream = self.select_command_stream(id);
        let Some(entry) = self.resources.get_mut(id) else {
            return false;
        };

        let sample_locations = entry.state.zs_evaluate.take();
        if let ResourceKind::Image { image, .. } = entry.object.kind() {
            unsafe {
                self.backend.cmd_pipeline_barrier(
                    self.batch.stream_mut(stream),
                    PipelineBarrier {
                        src_stage,
                        dst_stage: stage,
                        barrier: Barrier::Image(ImageBarrier {
                            image,
                            aspect: entry.state.aspect,
                            old_layout: entry.state.layout,
                            new_layout: layout,
                            src_access,
                            dst_access: access,
                            sample_locations: sample_locations.as_ref(),
                        }),
                    },
                );
            }
        }

        self.batch.reference_resource(&mut entry.state, &entry.object);
        entry.state.layout = layout;
        entry.state.record_access(access, stage);
        self.check_defer_image_barrier(id, layout, stage);
        true
    }

    /// Picks the stream a barrier for `id` goes into. Barriers can only be hoisted out of an
    /// active render pass when nothing ordered in the primary stream has touched the resource.
    pub(crate) fn select_command_stream(&mut self, id: ResourceId) -> CommandStream {
        let ordered = self
            .resources
            .state(id)
            .map(|state| !state.access.is_empty() && !state.unordered_barrier)
            .unwrap_or(true);

        if ordered || !self.target.in_render_pass() {
            self.end_render_pass();
            if let Some(state) = self.resources.state_mut(id) {
                state.unordered_barrier = false;
            }
            CommandStream::Primary
        } else {
            if let Some(state) = self.resources.state_mut(id) {
                state.unordered_barrier = true;
            }
            self.batch.set_has_barriers();
            CommandStream::Unordered
        }
    }

    /// Requeues a buffer into the domains whose binds were not covered by a barrier at `stage`.
    fn check_defer_buffer_barrier(&mut self, id: ResourceId, stage: PipelineStageFlags) {
        let Some(state) = self.resources.state(id) else {
            return;
        };

        let gfx = Domain::Graphics.idx();
        let compute = Domain::Compute.idx();

        if state.bind_count[gfx].saturating_sub(state.so_bind_count) > 0 {
            let vbo_binds = state.vbo_bind_mask.count_ones();
            let vertex_uncovered =
                state.vbo_bind_mask != 0 && !stage.contains(PipelineStageFlags::VERTEX_INPUT);
            let shader_uncovered = vbo_binds != state.bind_count[gfx]
                && !stage.intersects(PipelineStageFlags::GRAPHICS_SHADERS);
            if vertex_uncovered || shader_uncovered {
                self.scheduler.enqueue(id, Domain::Graphics);
            }
        }

        if state.bind_count[compute] > 0 && !stage.contains(PipelineStageFlags::COMPUTE_SHADER) {
            self.scheduler.enqueue(id, Domain::Compute);
        }
    }

    /// Requeues an image into the domains whose binds need a different layout or were not
    /// covered by a barrier at `stage`.
    fn check_defer_image_barrier(
        &mut self,
        id: ResourceId,
        layout: ImageLayout,
        stage: PipelineStageFlags,
    ) {
        let Some(state) = self.resources.state(id) else {
            return;
        };

        let is_compute = stage == PipelineStageFlags::COMPUTE_SHADER;
        let is_shader = stage.intersects(PipelineStageFlags::GRAPHICS_SHADERS);
        let domain = if is_compute {
            Domain::Compute
        } else {
            Domain::Graphics
        };
        let other = domain.other();

        let binds = state.bind_count[domain.idx()];
        let other_binds = state.bind_count[other.idx()];

        if (is_shader || binds == 0) && other_binds == 0 && (!is_compute || state.fb_binds == 0)
        {
            return;
        }

        if other_binds > 0 && is_shader && layout == state.layout_eval(other) {
            return;
        }

        let requeue_own = binds > 0 && !is_shader;
        if other_binds > 0 {
            self.scheduler.enqueue(id, other);
        }

        if requeue_own {
            self.scheduler.enqueue(id, domain);
        }
    }

    /// Queues the image for the domains whose binds need a different layout than it has.
    pub(crate) fn check_for_layout_update(&mut self, id: ResourceId, domain: Domain) {
        let Some(state) = self.resources.state(id) else {
            return;
        };

        let other = domain.other();
        let binds = state.bind_count[domain.idx()];
        let other_binds = state.bind_count[other.idx()];
        let current = state.layout;

        // A domain without binds has no layout requirement.
        let layout = if binds > 0 {
            state.layout_eval(domain)
        } else {
            ImageLayout::Undefined
        };
        let other_layout = state.layout_eval(other);

        if binds > 0 && layout != current {
            self.scheduler.enqueue(id, domain);
        }

        if other_binds > 0 && (layout != other_layout || current != other_layout) {
            self.scheduler.enqueue(id, other);
        }
    }
}

#[cfg(test)]
mod tests {
    use api::types::Format;

    use super::*;

    fn synced(access: AccessFlags, stage: PipelineStageFlags) -> ResourceState {
        ResourceState {
            access,
            access_stage: stage,
            ..ResourceState::new_buffer()
        }
    }

    #[test]
    fn unsynchronized_buffer_always_needs_barrier() {
        let state = ResourceState::new_buffer();
        assert!(state.buffer_needs_barrier(
            AccessFlags::SHADER_READ,
            PipelineStageFlags::FRAGMENT_SHADER
        ));
    }

    #[test]
    fn covered_reads_need_no_barrier() {
        let state = synced(
            AccessFlags::SHADER_READ | AccessFlags::UNIFORM_READ,
            PipelineStageFlags::VERTEX_SHADER,
        );
        assert!(!state.buffer_needs_barrier(
            AccessFlags::SHADER_READ,
            PipelineStageFlags::VERTEX_SHADER
        ));
        // Fragment runs after vertex, so the recorded scope already covers it.
        assert!(!state.buffer_needs_barrier(
            AccessFlags::UNIFORM_READ,
            PipelineStageFlags::FRAGMENT_SHADER
        ));
    }

    #[test]
    fn earlier_stage_needs_barrier() {
        let state = synced(AccessFlags::SHADER_READ, PipelineStageFlags::COMPUTE_SHADER);
        assert!(state.buffer_needs_barrier(
            AccessFlags::SHADER_READ,
            PipelineStageFlags::VERTEX_SHADER
        ));
    }

    #[test]
    fn writes_always_need_barrier() {
        let state = synced(AccessFlags::SHADER_WRITE, PipelineStageFlags::COMPUTE_SHADER);
        assert!(state.buffer_needs_barrier(
            AccessFlags::SHADER_WRITE,
            PipelineStageFlags::COMPUTE_SHADER
        ));

        let state = synced(AccessFlags::SHADER_READ, PipelineStageFlags::COMPUTE_SHADER);
        assert!(state.buffer_needs_barrier(
            AccessFlags::SHADER_WRITE,
            PipelineStageFlags::COMPUTE_SHADER
        ));
    }

    #[test]
    fn missing_access_class_needs_barrier() {
        let state = synced(AccessFlags::SHADER_READ, PipelineStageFlags::COMPUTE_SHADER);
        assert!(state.buffer_needs_barrier(
            AccessFlags::UNIFORM_READ,
            PipelineStageFlags::COMPUTE_SHADER
        ));
    }

    #[test]
    fn image_layout_change_needs_barrier() {
        let mut state = ResourceState::new_image(Format::Rgba8Unorm);
        state.layout = ImageLayout::ShaderReadOnlyOptimal;
        state.access = AccessFlags::SHADER_READ;
        state.access_stage = PipelineStageFlags::FRAGMENT_SHADER;

        assert!(!state.image_needs_barrier(
            ImageLayout::ShaderReadOnlyOptimal,
            AccessFlags::empty(),
            PipelineStageFlags::empty()
        ));
        assert!(state.image_needs_barrier(
            ImageLayout::General,
            AccessFlags::SHADER_READ,
            PipelineStageFlags::FRAGMENT_SHADER
        ));

        state.zs_evaluate = Some(Default::default());
        assert!(state.image_needs_barrier(
            ImageLayout::ShaderReadOnlyOptimal,
            AccessFlags::SHADER_READ,
            PipelineStageFlags::FRAGMENT_SHADER
        ));
    }

    #[test]
    fn access_stage_defaults() {
        assert_eq!(
            pipeline_access_stage(AccessFlags::UNIFORM_READ),
            PipelineStageFlags::ALL_SHADERS
        );
        assert_eq!(
            pipeline_access_stage(AccessFlags::TRANSFER_WRITE),
            PipelineStageFlags::TRANSFER
        );
        assert_eq!(
            pipeline_dst_stage(ImageLayout::PresentSrc),
            PipelineStageFlags::BOTTOM_OF_PIPE
        );
        assert_eq!(
            access_src_flags(ImageLayout::Preinitialized),
            AccessFlags::HOST_WRITE
        );
    }
}
