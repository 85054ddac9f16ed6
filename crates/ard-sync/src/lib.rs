pub mod barrier;
pub mod batch;
pub mod bindings;
pub mod bindless;
pub mod config;
pub mod context;
pub mod draw;
pub mod framebuffer;
pub mod render_pass;
pub mod render_target;
pub mod resource;
pub mod scheduler;
pub mod surface;

mod submit;

#[cfg(test)]
mod tests;

pub use api;
pub use empty;

cfg_if::cfg_if! {
    if #[cfg(feature = "vulkan")] {
        pub type Backend = vulkan::VulkanBackend;

        pub mod backend {
            pub use vulkan::{VulkanBackend, VulkanBackendCreateError, VulkanBackendCreateInfo};
        }
    } else {
        pub type Backend = empty::EmptyBackend;

        pub mod backend {
            pub use empty::{EmptyBackend, EmptyBackendCreateInfo};
        }
    }
}

pub mod prelude {
    pub use api::types::*;
    pub use api::{
        barrier::SampleLocations,
        buffer::BufferCreateInfo,
        framebuffer::ViewId,
        image::{ImageCreateInfo, ImageViewCreateInfo},
        BackendError, Capabilities,
    };

    pub use crate::{
        barrier::CommandStream,
        batch::WaitError,
        bindings::{ShaderBuffer, ShaderImage},
        bindless::BindlessHandle,
        config::{ContextCreateInfo, FramebufferStrategy},
        context::{FlushError, ResetCallback, ResetStatus},
        draw::MemoryBarrierFlags,
        render_target::{ClearFlags, FramebufferTarget},
        resource::{ResourceId, ResourceState},
    };

    // Context
    pub type Context = crate::context::Context<crate::Backend>;

    // Batches
    pub type BatchState = crate::batch::BatchState<crate::Backend>;

    // Render passes and framebuffers
    pub type RenderPass = crate::render_pass::RenderPass<crate::Backend>;
    pub type RenderPassCache = crate::render_pass::RenderPassCache<crate::Backend>;
    pub type Framebuffer = crate::framebuffer::Framebuffer<crate::Backend>;
    pub use api::render_pass::{RenderPassAttachment, RenderPassState};

    // Surfaces
    pub type Surface = crate::surface::Surface<crate::Backend>;
}
