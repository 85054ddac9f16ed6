use api::{
    barrier::{Barrier, MemoryBarrier, PipelineBarrier},
    types::{AccessFlags, Domain, PipelineStageFlags},
    Backend, BackendError,
};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::context::Context;

bitflags! {
    /// Classes of prior shader writes that later commands must observe.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MemoryBarrierFlags: u32 {
        const TEXTURE = 1 << 0;
        const SHADER_BUFFER = 1 << 1;
        const IMAGE = 1 << 2;
        const CONSTANT_BUFFER = 1 << 3;
        const INDIRECT_BUFFER = 1 << 4;
        const VERTEX_BUFFER = 1 << 5;
        const INDEX_BUFFER = 1 << 6;
        const FRAMEBUFFER = 1 << 7;
        const STREAMOUT_BUFFER = 1 << 8;
        /// Covered by resource updates themselves.
        const UPDATE = 1 << 9;
        const MAPPED_BUFFER = 1 << 10;
        const ALL = (1 << 11) - 1;
    }
}

impl<B: Backend> Context<B> {
    /// Requests a memory barrier before the next draw or dispatch. Replaces any request that
    /// was not flushed yet.
    pub fn memory_barrier(&mut self, flags: MemoryBarrierFlags) {
        let flags = flags - MemoryBarrierFlags::UPDATE;
        if flags.is_empty() {
            return;
        }

        self.memory_barrier = flags - MemoryBarrierFlags::MAPPED_BUFFER;
    }

    /// Makes color and depth attachment writes visible to fragment shader reads.
    pub fn texture_barrier(&mut self) {
        let target = self.framebuffer_target();
        let has_color = !target.color.is_empty();
        let has_zs = target.depth_stencil.is_some();
        if !has_color && !has_zs {
            return;
        }

        if has_zs {
            self.record_memory_barrier(
                PipelineStageFlags::EARLY_FRAGMENT_TESTS | PipelineStageFlags::LATE_FRAGMENT_TESTS,
                PipelineStageFlags::FRAGMENT_SHADER,
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                AccessFlags::SHADER_READ,
            );
        }

        if has_color {
            self.record_memory_barrier(
                PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                PipelineStageFlags::FRAGMENT_SHADER,
                AccessFlags::COLOR_ATTACHMENT_WRITE,
                AccessFlags::SHADER_READ,
            );
        }
    }

    /// Records the barriers for a pending [`memory_barrier`](Self::memory_barrier) request.
    pub(crate) fn flush_memory_barrier(&mut self, domain: Domain) {
        let flags = self.memory_barrier;
        if flags.is_empty() {
            return;
        }

        let gfx = PipelineStageFlags::GRAPHICS_SHADERS;
        let src = if self.last_was_compute {
            PipelineStageFlags::COMPUTE_SHADER
        } else {
            gfx
        };
        let dst = match domain {
            Domain::Compute => PipelineStageFlags::COMPUTE_SHADER,
            Domain::Graphics => gfx,
        };

        if flags.intersects(
            MemoryBarrierFlags::TEXTURE | MemoryBarrierFlags::SHADER_BUFFER | MemoryBarrierFlags::IMAGE,
        ) {
            self.record_memory_barrier(src, dst, AccessFlags::SHADER_WRITE, AccessFlags::SHADER_READ);
        }

        if flags.contains(MemoryBarrierFlags::CONSTANT_BUFFER) {
            self.record_memory_barrier(src, dst, AccessFlags::SHADER_WRITE, AccessFlags::UNIFORM_READ);
        }

        if domain == Domain::Graphics {
            if flags.contains(MemoryBarrierFlags::INDIRECT_BUFFER) {
                self.record_memory_barrier(
                    src,
                    PipelineStageFlags::DRAW_INDIRECT,
                    AccessFlags::SHADER_WRITE,
                    AccessFlags::INDIRECT_COMMAND_READ,
                );
            }

            if flags.contains(MemoryBarrierFlags::VERTEX_BUFFER) {
                self.record_memory_barrier(
                    gfx,
                    PipelineStageFlags::VERTEX_INPUT,
                    AccessFlags::SHADER_WRITE,
                    AccessFlags::VERTEX_ATTRIBUTE_READ,
                );
            }

            if flags.contains(MemoryBarrierFlags::INDEX_BUFFER) {
                self.record_memory_barrier(
                    gfx,
                    PipelineStageFlags::VERTEX_INPUT,
                    AccessFlags::SHADER_WRITE,
                    AccessFlags::INDEX_READ,
                );
            }

            if flags.contains(MemoryBarrierFlags::FRAMEBUFFER) {
                self.texture_barrier();
            }

            if flags.contains(MemoryBarrierFlags::STREAMOUT_BUFFER) {
                self.record_memory_barrier(
                    PipelineStageFlags::VERTEX_SHADER
                        | PipelineStageFlags::TESSELLATION_EVALUATION_SHADER
                        | PipelineStageFlags::GEOMETRY_SHADER,
                    PipelineStageFlags::TRANSFORM_FEEDBACK,
                    AccessFlags::SHADER_READ,
                    AccessFlags::TRANSFORM_FEEDBACK_WRITE
                        | AccessFlags::TRANSFORM_FEEDBACK_COUNTER_WRITE,
                );
            }
        }

        self.memory_barrier = MemoryBarrierFlags::empty();
    }

    /// Prepares the current batch for a draw and hands the primary command buffer to
    /// `record`. Barriers for bound resources are recorded first and the render pass is begun
    /// if needed.
    pub fn draw<F>(&mut self, record: F) -> Result<(), BackendError>
    where
        F: FnOnce(&B, &mut B::CommandBuffer),
    {
        puffin::profile_function!();

        if self.check_device_lost() {
            return Err(BackendError::DeviceLost);
        }

        self.flush_memory_barrier(Domain::Graphics);
        self.update_barriers(Domain::Graphics);

        if self.target.rp_changed() {
            self.end_render_pass();
        }
        self.begin_render_pass()?;
        self.reference_bound(Domain::Graphics);

        record(self.backend.as_ref(), self.batch.primary_mut());
        self.last_was_compute = false;
        self.batch.set_has_work();
        Ok(())
    }

    /// Like [`draw`](Self::draw) for compute work. Dispatches never happen inside a render
    /// pass.
    pub fn dispatch<F>(&mut self, record: F) -> Result<(), BackendError>
    where
        F: FnOnce(&B, &mut B::CommandBuffer),
    {
        puffin::profile_function!();

        if self.check_device_lost() {
            return Err(BackendError::DeviceLost);
        }

        self.flush_memory_barrier(Domain::Compute);
        self.update_barriers(Domain::Compute);
        self.end_render_pass();
        self.reference_bound(Domain::Compute);

        record(self.backend.as_ref(), self.batch.primary_mut());
        self.last_was_compute = true;
        self.batch.set_has_work();
        Ok(())
    }

    fn record_memory_barrier(
        &mut self,
        src_stage: PipelineStageFlags,
        dst_stage: PipelineStageFlags,
        src_access: AccessFlags,
        dst_access: AccessFlags,
    ) {
        self.end_render_pass();
        unsafe {
            self.backend.cmd_pipeline_barrier(
                self.batch.primary_mut(),
                PipelineBarrier {
                    src_stage,
                    dst_stage,
                    barrier: Barrier::Memory(MemoryBarrier {
                        src_access,
                        dst_access,
                    }),
                },
            );
        }
        self.batch.set_has_work();
    }
}
