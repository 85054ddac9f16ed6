use crate::{framebuffer::FramebufferState, Backend};

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

pub struct RenderPassBegin<'a, B: Backend> {
    pub render_pass: &'a B::RenderPass,
    pub framebuffer: &'a B::Framebuffer,
    pub state: &'a FramebufferState,
    /// Views bound at begin time. Required for imageless framebuffers and ignored otherwise.
    pub attachments: &'a [&'a B::ImageView],
    /// One value per attachment up to the last attachment that is cleared.
    pub clear_values: &'a [ClearValue],
}
