use api::{
    framebuffer::FramebufferState,
    render_pass::{RenderPassAttachment, RenderPassState},
    BackendError,
};
use arrayvec::ArrayVec;
use ash::vk;

use crate::{image::ImageView, util};

const MAX_ATTACHMENTS: usize = api::render_pass::MAX_ATTACHMENTS;

pub struct VkRenderPass {
    pub(crate) pass: vk::RenderPass,
}

pub struct VkFramebuffer {
    pub(crate) framebuffer: vk::Framebuffer,
    pub(crate) imageless: bool,
}

impl VkRenderPass {
    /// Attachments start and end the pass in the layout the tracker transitions them to before
    /// the pass begins, so the pass never performs layout transitions of its own.
    pub(crate) unsafe fn new(
        device: &ash::Device,
        state: &RenderPassState,
    ) -> Result<Self, BackendError> {
        let mut attachments = ArrayVec::<vk::AttachmentDescription, MAX_ATTACHMENTS>::new();
        let mut color_refs = ArrayVec::<vk::AttachmentReference, MAX_ATTACHMENTS>::new();
        let mut depth_ref = None;

        for (i, attachment) in state.attachments().iter().enumerate() {
            let layout = util::to_vk_image_layout(state.attachment_barrier_info(i).layout);
            let is_color = i < state.num_color();

            let description = vk::AttachmentDescription::default()
                .format(util::to_vk_format(attachment.format))
                .samples(util::to_vk_sample_count(attachment.samples))
                .load_op(color_load_op(state, attachment, is_color))
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(if is_color {
                    vk::AttachmentLoadOp::DONT_CARE
                } else if attachment.clear_stencil {
                    vk::AttachmentLoadOp::CLEAR
                } else {
                    vk::AttachmentLoadOp::LOAD
                })
                .stencil_store_op(if is_color {
                    vk::AttachmentStoreOp::DONT_CARE
                } else {
                    vk::AttachmentStoreOp::STORE
                })
                .initial_layout(layout)
                .final_layout(layout);
            attachments.push(description);

            let reference = vk::AttachmentReference {
                attachment: i as u32,
                layout,
            };
            if is_color {
                color_refs.push(reference);
            } else {
                depth_ref = Some(reference);
            }
        }

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        // Writes made inside the pass are made available to whatever the tracker records next.
        let dependency = vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            )
            .dst_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
            .src_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let subpasses = [subpass];
        let dependencies = [dependency];
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let pass = device
            .create_render_pass(&create_info, None)
            .map_err(util::to_backend_error)?;

        Ok(Self { pass })
    }
}

impl VkFramebuffer {
    /// Creates an imageless framebuffer when `views` is `None`.
    pub(crate) unsafe fn new(
        device: &ash::Device,
        pass: &VkRenderPass,
        state: &FramebufferState,
        views: Option<&[&ImageView]>,
    ) -> Result<Self, BackendError> {
        let framebuffer = match views {
            Some(views) => {
                let views: ArrayVec<vk::ImageView, MAX_ATTACHMENTS> =
                    views.iter().map(|view| view.view).collect();
                let create_info = vk::FramebufferCreateInfo::default()
                    .render_pass(pass.pass)
                    .attachments(&views)
                    .width(state.width)
                    .height(state.height)
                    .layers(state.layers.max(1));
                device.create_framebuffer(&create_info, None)
            }
            None => {
                let formats: ArrayVec<[vk::Format; 1], MAX_ATTACHMENTS> = state
                    .attachments
                    .iter()
                    .map(|attachment| [util::to_vk_format(attachment.format)])
                    .collect();
                let image_infos: ArrayVec<vk::FramebufferAttachmentImageInfo, MAX_ATTACHMENTS> =
                    state
                        .attachments
                        .iter()
                        .zip(formats.iter())
                        .map(|(attachment, format)| {
                            vk::FramebufferAttachmentImageInfo::default()
                                .usage(util::to_vk_image_usage(attachment.usage))
                                .width(attachment.width)
                                .height(attachment.height)
                                .layer_count(attachment.layers.max(1))
                                .view_formats(format)
                        })
                        .collect();
                let mut attachments_info =
                    vk::FramebufferAttachmentsCreateInfo::default().attachment_image_infos(&image_infos);

                let mut create_info = vk::FramebufferCreateInfo::default()
                    .flags(vk::FramebufferCreateFlags::IMAGELESS)
                    .render_pass(pass.pass)
                    .width(state.width)
                    .height(state.height)
                    .layers(state.layers.max(1))
                    .push_next(&mut attachments_info);
                create_info.attachment_count = image_infos.len() as u32;
                device.create_framebuffer(&create_info, None)
            }
        }
        .map_err(util::to_backend_error)?;

        Ok(Self {
            framebuffer,
            imageless: views.is_none(),
        })
    }
}

/// Presentable images on the first frame of a new swapchain have no contents worth loading.
#[inline(always)]
fn color_load_op(
    state: &RenderPassState,
    attachment: &RenderPassAttachment,
    is_color: bool,
) -> vk::AttachmentLoadOp {
    if attachment.clear_color {
        vk::AttachmentLoadOp::CLEAR
    } else if is_color && state.swapchain_init && attachment.swapchain {
        vk::AttachmentLoadOp::DONT_CARE
    } else {
        vk::AttachmentLoadOp::LOAD
    }
}
