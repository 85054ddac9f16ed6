use std::hash::{Hash, Hasher};

use arrayvec::ArrayVec;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::types::{AccessFlags, Format, ImageLayout, PipelineStageFlags};

/// Maximum number of color attachments a render pass may have.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// Color attachments plus one depth/stencil attachment.
pub const MAX_ATTACHMENTS: usize = MAX_COLOR_ATTACHMENTS + 1;

/// Describes a single attachment of a render pass.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderPassAttachment {
    pub format: Format,
    pub samples: u8,
    /// For color attachments, the attachment is cleared on load. For depth/stencil attachments
    /// this covers the depth aspect.
    pub clear_color: bool,
    /// Depth/stencil attachments only.
    pub clear_stencil: bool,
    /// A transient multisampled image resolves into this attachment.
    pub resolve: bool,
    /// Depth/stencil attachments only. The pass writes depth or stencil.
    pub needs_write: bool,
    /// The attachment is a presentable image.
    pub swapchain: bool,
    /// The attachment is read back in the fragment shader.
    pub fbfetch: bool,
}

/// The structural description of a render pass.
///
/// Only the populated prefix of the attachment list and the header participate in hashing and
/// equality. Two states with different attachment counts never compare equal, even when the
/// extra attachments are default initialized.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RenderPassState {
    attachments: ArrayVec<RenderPassAttachment, MAX_ATTACHMENTS>,
    num_color: u8,
    have_zs: bool,
    /// Any attachment is multisampled.
    pub samples: bool,
    /// The first frame of a new swapchain is being rendered.
    pub swapchain_init: bool,
}

/// The coarser description of a render pass that pipelines are compiled against.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineRenderPassState {
    pub samples: bool,
    pub attachments: ArrayVec<PipelineAttachment, MAX_ATTACHMENTS>,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineAttachment {
    pub format: Format,
    pub samples: u8,
}

/// What an attachment needs from the tracker before the pass begins.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AttachmentBarrierInfo {
    pub layout: ImageLayout,
    pub access: AccessFlags,
    pub stage: PipelineStageFlags,
}

impl RenderPassState {
    /// Appends a color attachment.
    ///
    /// # Panics
    /// - If a depth/stencil attachment has already been set.
    /// - If there are already [`MAX_COLOR_ATTACHMENTS`] color attachments.
    pub fn push_color(&mut self, attachment: RenderPassAttachment) {
        assert!(!self.have_zs, "color attachments must precede depth/stencil");
        assert!(
            (self.num_color as usize) < MAX_COLOR_ATTACHMENTS,
            "too many color attachments"
        );
        self.samples |= attachment.samples > 1;
        self.attachments.push(attachment);
        self.num_color += 1;
    }

    /// Sets the depth/stencil attachment. Always the last attachment.
    pub fn set_depth_stencil(&mut self, attachment: RenderPassAttachment) {
        if self.have_zs {
            self.attachments.pop();
        }
        self.samples |= attachment.samples > 1;
        self.attachments.push(attachment);
        self.have_zs = true;
    }

    #[inline(always)]
    pub fn attachments(&self) -> &[RenderPassAttachment] {
        &self.attachments
    }

    #[inline(always)]
    pub fn attachments_mut(&mut self) -> &mut [RenderPassAttachment] {
        &mut self.attachments
    }

    #[inline(always)]
    pub fn num_attachments(&self) -> usize {
        self.attachments.len()
    }

    #[inline(always)]
    pub fn num_color(&self) -> usize {
        self.num_color as usize
    }

    #[inline(always)]
    pub fn have_zs(&self) -> bool {
        self.have_zs
    }

    #[inline(always)]
    pub fn depth_stencil(&self) -> Option<&RenderPassAttachment> {
        if self.have_zs {
            self.attachments.last()
        } else {
            None
        }
    }

    /// Bitmask of cleared attachments. Color attachment `i` is bit `i`, depth is bit
    /// [`MAX_COLOR_ATTACHMENTS`] and stencil is the bit after it.
    pub fn clears(&self) -> u32 {
        let mut clears = 0;
        for (i, attachment) in self.attachments.iter().enumerate() {
            if i < self.num_color as usize {
                clears |= (attachment.clear_color as u32) << i;
            } else {
                clears |= (attachment.clear_color as u32) << MAX_COLOR_ATTACHMENTS;
                clears |= (attachment.clear_stencil as u32) << (MAX_COLOR_ATTACHMENTS + 1);
            }
        }
        clears
    }

    /// A stable hash over the header and populated prefix.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    pub fn pipeline_state(&self) -> PipelineRenderPassState {
        PipelineRenderPassState {
            samples: self.samples,
            attachments: self
                .attachments
                .iter()
                .map(|attachment| PipelineAttachment {
                    format: attachment.format,
                    samples: attachment.samples,
                })
                .collect(),
        }
    }

    /// Layout, access and stage an attachment must be in when the pass begins.
    pub fn attachment_barrier_info(&self, idx: usize) -> AttachmentBarrierInfo {
        let attachment = &self.attachments[idx];
        if idx < self.num_color as usize {
            let mut access = AccessFlags::COLOR_ATTACHMENT_WRITE;
            if !attachment.clear_color && (!self.swapchain_init || !attachment.swapchain) {
                access |= AccessFlags::COLOR_ATTACHMENT_READ;
            }
            return AttachmentBarrierInfo {
                layout: ImageLayout::ColorAttachmentOptimal,
                access,
                stage: PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            };
        }

        debug_assert!(self.have_zs);
        let stage =
            PipelineStageFlags::EARLY_FRAGMENT_TESTS | PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let loads = !attachment.clear_color && !attachment.clear_stencil;
        let mut access = AccessFlags::empty();
        if loads {
            access |= AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;
        }

        if loads && !attachment.needs_write {
            return AttachmentBarrierInfo {
                layout: ImageLayout::DepthStencilReadOnlyOptimal,
                access,
                stage,
            };
        }

        AttachmentBarrierInfo {
            layout: ImageLayout::DepthStencilAttachmentOptimal,
            access: access | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            stage,
        }
    }
}

impl PartialEq for RenderPassState {
    fn eq(&self, other: &Self) -> bool {
        self.attachments.len() == other.attachments.len()
            && self.num_color == other.num_color
            && self.have_zs == other.have_zs
            && self.samples == other.samples
            && self.swapchain_init == other.swapchain_init
            && self.attachments[..] == other.attachments[..]
    }
}

impl Eq for RenderPassState {}

impl Hash for RenderPassState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.attachments.len());
        self.num_color.hash(state);
        self.have_zs.hash(state);
        self.samples.hash(state);
        self.swapchain_init.hash(state);
        for attachment in &self.attachments {
            attachment.hash(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(format: Format) -> RenderPassAttachment {
        RenderPassAttachment {
            format,
            samples: 1,
            ..Default::default()
        }
    }

    #[test]
    fn attachment_count_is_part_of_identity() {
        let mut one = RenderPassState::default();
        one.push_color(color(Format::Rgba8Unorm));

        let mut two = one.clone();
        two.push_color(RenderPassAttachment::default());

        assert_ne!(one, two);
        assert_ne!(one.content_hash(), two.content_hash());
    }

    #[test]
    fn equal_prefixes_hash_equal() {
        let mut a = RenderPassState::default();
        a.push_color(color(Format::Rgba8Unorm));
        a.set_depth_stencil(color(Format::D32Sfloat));

        let mut b = RenderPassState::default();
        b.push_color(color(Format::Rgba8Unorm));
        b.set_depth_stencil(color(Format::D32Sfloat));

        assert_eq!(a, b);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn clears_mask() {
        let mut state = RenderPassState::default();
        state.push_color(color(Format::Rgba8Unorm));
        state.push_color(RenderPassAttachment {
            clear_color: true,
            ..color(Format::Rgba8Unorm)
        });
        state.set_depth_stencil(RenderPassAttachment {
            clear_stencil: true,
            ..color(Format::D24UnormS8Uint)
        });

        assert_eq!(state.clears(), 0b10 | (1 << (MAX_COLOR_ATTACHMENTS + 1)));
    }

    #[test]
    fn depth_barrier_info() {
        let mut state = RenderPassState::default();
        state.set_depth_stencil(color(Format::D32Sfloat));

        let info = state.attachment_barrier_info(0);
        assert_eq!(info.layout, ImageLayout::DepthStencilReadOnlyOptimal);
        assert_eq!(info.access, AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ);

        state.attachments_mut()[0].needs_write = true;
        let info = state.attachment_barrier_info(0);
        assert_eq!(info.layout, ImageLayout::DepthStencilAttachmentOptimal);
        assert!(info.access.is_write());
    }
}
