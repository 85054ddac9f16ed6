use std::sync::Arc;

use api::{
    barrier::SampleLocations,
    command_buffer::{ClearValue, RenderPassBegin},
    framebuffer::{FramebufferState, ViewId},
    render_pass::{RenderPassAttachment, RenderPassState, MAX_ATTACHMENTS, MAX_COLOR_ATTACHMENTS},
    types::{Domain, ImageAspect},
    Backend, BackendError,
};
use arrayvec::ArrayVec;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    context::Context, framebuffer::Framebuffer, render_pass::RenderPass, surface::Surface,
};

bitflags! {
    /// Attachments affected by a clear. Color attachment `i` is bit `i`.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ClearFlags: u32 {
        const COLOR0 = 1 << 0;
        const COLOR1 = 1 << 1;
        const COLOR2 = 1 << 2;
        const COLOR3 = 1 << 3;
        const COLOR4 = 1 << 4;
        const COLOR5 = 1 << 5;
        const COLOR6 = 1 << 6;
        const COLOR7 = 1 << 7;
        const DEPTH = 1 << 8;
        const STENCIL = 1 << 9;
        const COLOR = 0xFF;
        const DEPTH_STENCIL = Self::DEPTH.bits() | Self::STENCIL.bits();
        const ALL = Self::COLOR.bits() | Self::DEPTH_STENCIL.bits();
    }
}

/// The surfaces rendered to by the next render pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FramebufferTarget {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub samples: u8,
    pub color: ArrayVec<ViewId, MAX_COLOR_ATTACHMENTS>,
    pub depth_stencil: Option<ViewId>,
}

type AttachedSurfaces<B> = SmallVec<[Arc<Surface<B>>; MAX_ATTACHMENTS]>;

pub(crate) struct RenderTarget<B: Backend> {
    target: FramebufferTarget,
    color_clears: [Option<[f32; 4]>; MAX_COLOR_ATTACHMENTS],
    depth_clear: Option<f32>,
    stencil_clear: Option<u32>,
    depth_write: bool,
    render_pass: Option<Arc<RenderPass<B>>>,
    framebuffer: Option<Arc<Framebuffer<B>>>,
    /// Usage marker of the batch the current framebuffer was last retained by.
    retained_by: u64,
    rp_changed: bool,
    in_render_pass: bool,
    new_swapchain: bool,
}

impl<B: Backend> Default for RenderTarget<B> {
    fn default() -> Self {
        Self {
            target: FramebufferTarget::default(),
            color_clears: [None; MAX_COLOR_ATTACHMENTS],
            depth_clear: None,
            stencil_clear: None,
            depth_write: false,
            render_pass: None,
            framebuffer: None,
            retained_by: 0,
            rp_changed: true,
            in_render_pass: false,
            new_swapchain: false,
        }
    }
}

impl<B: Backend> RenderTarget<B> {
    #[inline(always)]
    pub fn in_render_pass(&self) -> bool {
        self.in_render_pass
    }

    /// The render pass must be rebuilt before the next draw.
    #[inline(always)]
    pub fn rp_changed(&self) -> bool {
        self.rp_changed
    }

    #[inline(always)]
    pub fn has_attachments(&self) -> bool {
        !self.target.color.is_empty() || self.target.depth_stencil.is_some()
    }

    pub fn has_pending_clears(&self) -> bool {
        self.has_attachments()
            && (self.color_clears.iter().any(Option::is_some)
                || self.depth_clear.is_some()
                || self.stencil_clear.is_some())
    }

    #[inline(always)]
    pub fn is_attached(&self, view: ViewId) -> bool {
        self.views().any(|attached| attached == view)
    }

    fn views(&self) -> impl Iterator<Item = ViewId> + '_ {
        self.target
            .color
            .iter()
            .copied()
            .chain(self.target.depth_stencil)
    }

    fn take_clears(&mut self) {
        self.color_clears = [None; MAX_COLOR_ATTACHMENTS];
        self.depth_clear = None;
        self.stencil_clear = None;
    }
}

impl<B: Backend> Context<B> {
    #[inline(always)]
    pub fn in_render_pass(&self) -> bool {
        self.target.in_render_pass()
    }

    #[inline(always)]
    pub fn framebuffer_target(&self) -> &FramebufferTarget {
        &self.target.target
    }

    /// Replaces the attachments rendered to. Pending clears on the old attachments are
    /// applied first.
    ///
    /// # Panics
    /// - If any view is not a live surface.
    pub fn set_framebuffer_state(&mut self, target: FramebufferTarget) -> Result<(), BackendError> {
        puffin::profile_function!();

        if self.target.target == target {
            return Ok(());
        }

        if self.target.has_pending_clears() {
            self.begin_render_pass()?;
        }
        self.end_render_pass();

        let old: SmallVec<[ViewId; MAX_ATTACHMENTS]> = self.target.views().collect();
        for view in old {
            let Some(resource) = self.surfaces.get(view).map(|surface| surface.resource()) else {
                continue;
            };

            let Some(state) = self.resources.state_mut(resource) else {
                continue;
            };
            state.fb_binds -= 1;
            if state.fb_binds == 0 && state.has_binds() {
                self.check_for_layout_update(resource, Domain::Graphics);
            }
        }

        self.target.target = target;
        let new: SmallVec<[ViewId; MAX_ATTACHMENTS]> = self.target.views().collect();
        for view in new {
            let Some(surface) = self.surfaces.get(view) else {
                panic!("attached unknown surface {}", view.0);
            };

            if let Some(state) = self.resources.state_mut(surface.resource()) {
                state.fb_binds += 1;
            }
        }

        self.target.take_clears();
        self.target.render_pass = None;
        self.target.framebuffer = None;
        self.target.rp_changed = true;
        Ok(())
    }

    /// Queues clears that are applied when the next render pass begins.
    pub fn clear(&mut self, flags: ClearFlags, color: [f32; 4], depth: f32, stencil: u32) {
        if flags.is_empty() || !self.target.has_attachments() {
            return;
        }

        // Clears are load operations, so an active pass must restart.
        self.end_render_pass();

        for i in 0..self.target.target.color.len() {
            if flags.bits() & (1 << i) != 0 {
                self.target.color_clears[i] = Some(color);
            }
        }

        if let Some(view) = self.target.target.depth_stencil {
            let aspect = self
                .surfaces
                .get(view)
                .map(|surface| surface.format().aspect())
                .unwrap_or_default();

            if flags.contains(ClearFlags::DEPTH) && aspect.contains(ImageAspect::DEPTH) {
                self.target.depth_clear = Some(depth);
            }

            if flags.contains(ClearFlags::STENCIL) && aspect.contains(ImageAspect::STENCIL) {
                self.target.stencil_clear = Some(stencil);
            }
        }

        self.target.rp_changed = true;
    }

    /// Whether the depth/stencil attachment is written by draws.
    pub fn set_depth_write(&mut self, enabled: bool) {
        if self.target.depth_write != enabled {
            self.target.depth_write = enabled;
            self.target.rp_changed = true;
        }
    }

    /// The next render pass renders the first frame of a new swapchain.
    pub fn set_new_swapchain(&mut self) {
        self.target.new_swapchain = true;
        self.target.rp_changed = true;
    }

    /// Id of the pipeline compatibility class of the current render pass.
    pub fn render_pass_pipeline_state(&mut self) -> Result<u32, BackendError> {
        let surfaces = self.attached_surfaces();
        Ok(self.current_render_pass(&surfaces)?.pipeline_state())
    }

    /// Begins a render pass over the current framebuffer state. Attachments are transitioned
    /// first, and queued clears are consumed by the pass.
    pub fn begin_render_pass(&mut self) -> Result<(), BackendError> {
        puffin::profile_function!();

        if self.target.in_render_pass {
            return Ok(());
        }

        let surfaces = self.attached_surfaces();
        let pass = self.current_render_pass(&surfaces)?;

        let t = &self.target.target;
        let state = FramebufferState {
            width: t.width,
            height: t.height,
            layers: t.layers.max(1),
            samples: t.samples.max(1),
            attachments: surfaces
                .iter()
                .map(|surface| surface.framebuffer_attachment())
                .collect(),
        };
        let views: SmallVec<[&B::ImageView; MAX_ATTACHMENTS]> =
            surfaces.iter().map(|surface| surface.internal()).collect();
        let framebuffer = self.framebuffers.get_or_create(&pass, &state, &views)?;

        for (i, surface) in surfaces.iter().enumerate() {
            let info = pass.state().attachment_barrier_info(i);
            let resource = surface.resource();
            self.request_image_access(resource, info.layout, info.access, info.stage);
            if let Some(entry) = self.resources.get_mut(resource) {
                self.batch.reference_resource(&mut entry.state, &entry.object);
            }
        }

        let clear_values = self.clear_values(pass.state());
        let attachments: &[&B::ImageView] = if framebuffer.is_imageless() {
            &views[..]
        } else {
            &[]
        };

        unsafe {
            self.backend.cmd_begin_render_pass(
                self.batch.primary_mut(),
                RenderPassBegin {
                    render_pass: pass.internal(),
                    framebuffer: framebuffer.internal(),
                    state: &state,
                    attachments,
                    clear_values: &clear_values,
                },
            );
        }

        let retained = self.target.retained_by == self.batch.usage()
            && self
                .target
                .framebuffer
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &framebuffer));
        if !retained {
            self.batch.retain_render_pass(pass.clone());
            self.batch.retain_framebuffer(framebuffer.clone());
            for surface in surfaces.iter() {
                self.batch.retain_surface(surface.clone());
            }
            self.target.retained_by = self.batch.usage();
        }

        if !clear_values.is_empty() {
            // The next pass over these attachments loads instead of clearing.
            self.target.take_clears();
            self.target.rp_changed = true;
        }

        self.target.framebuffer = Some(framebuffer);
        self.target.new_swapchain = false;
        self.target.in_render_pass = true;
        self.batch.set_has_work();
        Ok(())
    }

    pub fn end_render_pass(&mut self) {
        if !self.target.in_render_pass {
            return;
        }

        unsafe {
            self.backend.cmd_end_render_pass(self.batch.primary_mut());
        }
        self.target.in_render_pass = false;
    }

    /// The depth buffer is resolved with `sample_locations` the next time it is transitioned.
    pub fn evaluate_depth_buffer(&mut self, sample_locations: SampleLocations) {
        let Some(view) = self.target.target.depth_stencil else {
            return;
        };

        let Some(resource) = self.surfaces.get(view).map(|surface| surface.resource()) else {
            return;
        };

        if let Some(state) = self.resources.state_mut(resource) {
            state.zs_evaluate = Some(sample_locations);
        }
        self.end_render_pass();
    }

    fn attached_surfaces(&self) -> AttachedSurfaces<B> {
        self.target
            .views()
            .map(|view| match self.surfaces.get(view) {
                Some(surface) => surface.clone(),
                None => panic!("surface {} destroyed while attached", view.0),
            })
            .collect()
    }

    fn current_render_pass(
        &mut self,
        surfaces: &AttachedSurfaces<B>,
    ) -> Result<Arc<RenderPass<B>>, BackendError> {
        if !self.target.rp_changed {
            if let Some(pass) = &self.target.render_pass {
                return Ok(pass.clone());
            }
        }

        let state = self.render_pass_state(surfaces);
        let pass = self.render_passes.get_or_create(&state)?;
        self.target.render_pass = Some(pass.clone());
        self.target.rp_changed = false;
        Ok(pass)
    }

    fn render_pass_state(&self, surfaces: &AttachedSurfaces<B>) -> RenderPassState {
        let target = &self.target;
        let num_color = target.target.color.len();
        let mut state = RenderPassState::default();
        state.swapchain_init = target.new_swapchain;

        for (i, surface) in surfaces.iter().enumerate() {
            let mut attachment = RenderPassAttachment {
                format: surface.format,
                samples: surface.samples.max(1),
                swapchain: surface.presentable,
                ..Default::default()
            };

            if i < num_color {
                attachment.clear_color = target.color_clears[i].is_some();
                state.push_color(attachment);
            } else {
                attachment.clear_color = target.depth_clear.is_some();
                attachment.clear_stencil = target.stencil_clear.is_some();
                attachment.needs_write = target.depth_write
                    || attachment.clear_color
                    || attachment.clear_stencil;
                state.set_depth_stencil(attachment);
            }
        }

        state
    }

    /// One value per attachment up to the last cleared one.
    fn clear_values(&self, state: &RenderPassState) -> SmallVec<[ClearValue; MAX_ATTACHMENTS]> {
        let clears = state.clears();
        let mut values = SmallVec::new();
        if clears == 0 {
            return values;
        }

        let zs_bits = 0b11 << MAX_COLOR_ATTACHMENTS;
        let last = if clears & zs_bits != 0 {
            state.num_attachments() - 1
        } else {
            (31 - clears.leading_zeros()) as usize
        };

        for i in 0..=last {
            if i < state.num_color() {
                values.push(ClearValue::Color(
                    self.target.color_clears[i].unwrap_or_default(),
                ));
            } else {
                values.push(ClearValue::DepthStencil {
                    depth: self.target.depth_clear.unwrap_or_default(),
                    stencil: self.target.stencil_clear.unwrap_or_default(),
                });
            }
        }

        values
    }
}
