//! The interface between the synchronization core and a native graphics API.
//!
//! The core never talks to a driver directly. Everything it needs (object creation, barrier
//! recording, submission and fence waits) goes through a [`Backend`].

pub mod barrier;
pub mod buffer;
pub mod command_buffer;
pub mod framebuffer;
pub mod image;
pub mod render_pass;
pub mod types;

use std::time::Duration;

use barrier::PipelineBarrier;
use buffer::BufferCreateInfo;
use command_buffer::RenderPassBegin;
use framebuffer::FramebufferState;
use image::{ImageCreateInfo, ImageViewCreateInfo};
use render_pass::RenderPassState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Optional features a backend may support.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Framebuffers can be created without views, which are then supplied when a render pass
    /// begins.
    pub imageless_framebuffer: bool,
    /// Submissions can signal a monotonically increasing timeline value that can be waited on
    /// instead of individual fences.
    pub timeline_semaphore: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("the device has been lost")]
    DeviceLost,
    #[error("an error has occured: {0}")]
    Other(String),
}

/// Result of waiting on a fence or timeline value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FenceStatus {
    /// The timeout elapsed before the work completed.
    Pending,
    /// The work is complete.
    Signaled,
    /// The device was lost while waiting.
    DeviceLost,
}

/// Every handle type must be shareable across threads since batches are submitted from a
/// dedicated thread.
///
/// Creation functions are fallible. Destruction functions are only called once the core knows
/// no pending GPU work references the object.
#[allow(clippy::missing_safety_doc)]
pub trait Backend: Sized + Send + Sync + 'static {
    type Buffer: Send + Sync;
    type Image: Send + Sync;
    type ImageView: Send + Sync;
    type RenderPass: Send + Sync;
    type Framebuffer: Send + Sync;
    type CommandBuffer: Send + Sync;
    type Fence: Send + Sync;

    fn capabilities(&self) -> Capabilities;

    unsafe fn create_buffer(
        &self,
        create_info: &BufferCreateInfo,
    ) -> Result<Self::Buffer, BackendError>;
    unsafe fn destroy_buffer(&self, buffer: &mut Self::Buffer);

    unsafe fn create_image(&self, create_info: &ImageCreateInfo)
        -> Result<Self::Image, BackendError>;
    unsafe fn destroy_image(&self, image: &mut Self::Image);

    unsafe fn create_image_view(
        &self,
        image: &Self::Image,
        create_info: &ImageViewCreateInfo,
    ) -> Result<Self::ImageView, BackendError>;
    unsafe fn destroy_image_view(&self, view: &mut Self::ImageView);

    unsafe fn create_render_pass(
        &self,
        state: &RenderPassState,
    ) -> Result<Self::RenderPass, BackendError>;
    unsafe fn destroy_render_pass(&self, pass: &mut Self::RenderPass);

    /// `views` is `None` when creating an imageless framebuffer.
    unsafe fn create_framebuffer(
        &self,
        pass: &Self::RenderPass,
        state: &FramebufferState,
        views: Option<&[&Self::ImageView]>,
    ) -> Result<Self::Framebuffer, BackendError>;
    unsafe fn destroy_framebuffer(&self, framebuffer: &mut Self::Framebuffer);

    unsafe fn create_command_buffer(
        &self,
        debug_name: Option<&str>,
    ) -> Result<Self::CommandBuffer, BackendError>;
    unsafe fn destroy_command_buffer(&self, command_buffer: &mut Self::CommandBuffer);
    unsafe fn begin_command_buffer(
        &self,
        command_buffer: &mut Self::CommandBuffer,
    ) -> Result<(), BackendError>;
    unsafe fn end_command_buffer(
        &self,
        command_buffer: &mut Self::CommandBuffer,
    ) -> Result<(), BackendError>;
    unsafe fn reset_command_buffer(
        &self,
        command_buffer: &mut Self::CommandBuffer,
    ) -> Result<(), BackendError>;

    unsafe fn create_fence(&self) -> Result<Self::Fence, BackendError>;
    unsafe fn destroy_fence(&self, fence: &mut Self::Fence);
    unsafe fn reset_fence(&self, fence: &mut Self::Fence) -> Result<(), BackendError>;
    /// Waits for the fence. A `timeout` of `None` waits forever and a zero timeout polls.
    unsafe fn wait_fence(&self, fence: &Self::Fence, timeout: Option<Duration>) -> FenceStatus;

    /// Only called when [`Capabilities::timeline_semaphore`] is supported.
    unsafe fn timeline_value(&self) -> Result<u64, BackendError>;
    /// Only called when [`Capabilities::timeline_semaphore`] is supported.
    unsafe fn wait_timeline(&self, value: u64, timeout: Option<Duration>) -> FenceStatus;

    /// Submits command buffers in order. The fence is signaled once all of them complete, and
    /// if `signal` is provided the timeline is advanced to that value.
    unsafe fn submit(
        &self,
        command_buffers: &[&Self::CommandBuffer],
        fence: &Self::Fence,
        signal: Option<u64>,
    ) -> Result<(), BackendError>;

    unsafe fn cmd_pipeline_barrier(
        &self,
        command_buffer: &mut Self::CommandBuffer,
        barrier: PipelineBarrier<'_, Self>,
    );
    unsafe fn cmd_begin_render_pass(
        &self,
        command_buffer: &mut Self::CommandBuffer,
        begin: RenderPassBegin<'_, Self>,
    );
    unsafe fn cmd_end_render_pass(&self, command_buffer: &mut Self::CommandBuffer);
}
