use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

use crate::{
    render_pass::MAX_ATTACHMENTS,
    types::{Format, ImageUsage},
};

/// Identifies an image view used as a framebuffer attachment. Ids are recycled once the view is
/// destroyed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViewId(pub u32);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FramebufferAttachment {
    /// Concrete framebuffers are keyed on this. Imageless framebuffers ignore it.
    pub view: ViewId,
    pub format: Format,
    pub usage: ImageUsage,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

/// Describes the attachments and extent of a framebuffer.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FramebufferState {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub samples: u8,
    pub attachments: ArrayVec<FramebufferAttachment, MAX_ATTACHMENTS>,
}

impl FramebufferState {
    #[inline(always)]
    pub fn num_attachments(&self) -> usize {
        self.attachments.len()
    }

    /// The same state with every view identity erased. Two states with equal structure but
    /// different views produce the same projection.
    pub fn structural(&self) -> FramebufferState {
        let mut out = self.clone();
        for attachment in &mut out.attachments {
            attachment.view = ViewId(0);
        }
        out
    }

    /// Iterates the views named by this state.
    #[inline(always)]
    pub fn views(&self) -> impl Iterator<Item = ViewId> + '_ {
        self.attachments.iter().map(|attachment| attachment.view)
    }
}
